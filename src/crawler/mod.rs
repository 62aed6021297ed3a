//! Upstream catalog crawling
//!
//! This module walks an upstream catalog's navigation graph to a bounded
//! depth and produces a [`FeedTree`]. Sibling sub-catalogs are fetched
//! concurrently; a failing branch is logged and skipped without aborting the
//! crawl.

pub mod fetcher;
pub mod tree;
pub mod url;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use fetcher::{FeedFetcher, PageFetch, RawDownload};
pub use tree::{FeedTree, InsertOutcome};

use crate::config::{Credentials, SourceConfig};
use crate::metrics;
use crate::opds::{is_navigation_document, is_sub_catalog_link, opensearch, Feed};
use crate::utils::error::{CrawlerError, FetchError};
use self::url::{relative_path, resolve_href};

/// Shared state of one crawl
struct CrawlContext<'a> {
    source: &'a SourceConfig,
    visited: Mutex<HashSet<String>>,
    cancel: &'a CancellationToken,
}

/// Main crawler structure
pub struct Crawler {
    /// Upstream fetcher
    fetcher: Arc<FeedFetcher>,

    /// Sibling sub-catalogs fetched at once
    fanout: usize,
}

impl Crawler {
    /// Create a crawler over a shared fetcher
    pub fn new(fetcher: Arc<FeedFetcher>, fanout: usize) -> Self {
        Self {
            fetcher,
            fanout: fanout.max(1),
        }
    }

    /// The underlying fetcher
    pub fn fetcher(&self) -> &Arc<FeedFetcher> {
        &self.fetcher
    }

    /// Fetch and decode one document
    pub async fn fetch_one(
        &self,
        url: &str,
        auth: Option<&Credentials>,
    ) -> Result<Feed, CrawlerError> {
        self.fetcher.fetch_one(url, auth).await
    }

    /// Fetch a document following up to `max_pages` pages (0 = all)
    pub async fn fetch_with_page_limit(
        &self,
        url: &str,
        auth: Option<&Credentials>,
        max_pages: u32,
    ) -> Result<PageFetch, CrawlerError> {
        self.fetcher.fetch_with_page_limit(url, auth, max_pages).await
    }

    /// Open an upstream body stream for proxying
    pub async fn fetch_raw(
        &self,
        url: &str,
        auth: Option<&Credentials>,
    ) -> Result<RawDownload, FetchError> {
        self.fetcher.fetch_raw(url, auth).await
    }

    /// Crawl a source to its configured depth
    ///
    /// Depth 0 fetches only the root. Depth N stores documents at most N
    /// levels below the root, and only navigation documents are descended
    /// into. Each document is fetched with the source's page budget.
    ///
    /// # Errors
    ///
    /// Fails when the root cannot be fetched or decoded, or when `cancel`
    /// fires before the crawl completes. Failures below the root only prune
    /// that branch.
    pub async fn crawl(
        &self,
        source: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<FeedTree, CrawlerError> {
        let slug = source.slug();
        let _timer = metrics::start_crawl_timer(&slug);
        info!(source = %source.name, url = %source.url, depth = source.poll_depth, "Crawling source");

        let result = self.crawl_inner(source, cancel).await;
        match &result {
            Ok(tree) => {
                let nodes = tree.node_count().await;
                metrics::record_crawl(&slug, true, nodes);
                info!(source = %source.name, documents = nodes, "Crawl complete");
            }
            Err(e) => {
                metrics::record_crawl(&slug, false, 0);
                warn!(source = %source.name, error = %e, "Crawl failed");
            }
        }
        result
    }

    async fn crawl_inner(
        &self,
        source: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<FeedTree, CrawlerError> {
        let page = tokio::select! {
            _ = cancel.cancelled() => return Err(CrawlerError::Cancelled),
            page = self.fetcher.fetch_with_page_limit(&source.url, source.auth.as_ref(), source.max_paginate) => page?,
        };

        let search_url = page
            .feed
            .search_link()
            .map(|link| search_href(&source.url, &link.href));
        let root = FeedTree::from_page(source.url.clone(), page).with_search_url(search_url);

        if source.poll_depth > 0 {
            let ctx = CrawlContext {
                source,
                visited: Mutex::new(HashSet::from([relative_path(&source.url, &source.url)])),
                cancel,
            };
            self.crawl_children(&root, &ctx, 1).await?;
        }

        if cancel.is_cancelled() {
            return Err(CrawlerError::Cancelled);
        }
        Ok(root)
    }

    /// Fetch the sub-catalogs of `node` and store them as level `level`
    fn crawl_children<'a>(
        &'a self,
        node: &'a FeedTree,
        ctx: &'a CrawlContext<'a>,
        level: u32,
    ) -> BoxFuture<'a, Result<(), CrawlerError>> {
        Box::pin(async move {
            let mut targets = Vec::new();
            {
                let mut visited = ctx.visited.lock().await;
                for link in node.feed.entries.iter().flat_map(|e| e.links.iter()) {
                    if !is_sub_catalog_link(link) {
                        continue;
                    }
                    let absolute = resolve_href(&node.url, &link.href);
                    let key = relative_path(&ctx.source.url, &absolute);
                    if visited.insert(key.clone()) {
                        targets.push((key, absolute));
                    }
                }
            }

            let results: Vec<Result<(), CrawlerError>> = stream::iter(targets)
                .map(|(key, url)| self.crawl_child(node, ctx, level, key, url))
                .buffer_unordered(self.fanout)
                .collect()
                .await;

            results.into_iter().collect()
        })
    }

    async fn crawl_child(
        &self,
        parent: &FeedTree,
        ctx: &CrawlContext<'_>,
        level: u32,
        key: String,
        url: String,
    ) -> Result<(), CrawlerError> {
        let source = ctx.source;
        let page = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(CrawlerError::Cancelled),
            page = self.fetcher.fetch_with_page_limit(&url, source.auth.as_ref(), source.max_paginate) => page,
        };

        let page = match page {
            Ok(page) => page,
            Err(e) => {
                warn!(source = %source.name, url = %url, error = %e, "Skipping child feed");
                return Ok(());
            }
        };

        let child = Arc::new(FeedTree::from_page(url, page));
        let descend = level < source.poll_depth && is_navigation_document(&child.feed);
        debug!(source = %source.name, key = %key, level, "Stored child feed");
        parent.insert_child(key, child.clone()).await;

        if descend {
            self.crawl_children(&child, ctx, level + 1).await?;
        }
        Ok(())
    }
}

/// Absolute form of a feed's search href, keeping template placeholders
pub fn search_href(base: &str, href: &str) -> String {
    if opensearch::is_template(href) {
        opensearch::resolve_template(href, |h| resolve_href(base, h))
    } else {
        resolve_href(base, href)
    }
}
