//! Browse request resolution
//!
//! Maps "source S, sub-path P, query Q" onto a document, in order:
//!
//! 1. crawl and cache the source when nothing is cached yet
//! 2. drop the gateway's own pagination parameters from Q
//! 3. empty P and Q serve the root document
//! 4. a cached node under `P?Q` is served as is
//! 5. `ext?url=U` serves or fetches `U` directly
//! 6. anything else is rebuilt against the source root and fetched
//!
//! Fetched documents are inserted into the tree before being served. A
//! failed fetch caches nothing.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::paginate::strip_local_params;
use crate::cache::FeedCache;
use crate::config::SourceConfig;
use crate::crawler::url::{ext_path, reverse_resolve, EXT_SEGMENT};
use crate::crawler::{Crawler, FeedTree};
use crate::error::{Error, Result};
use crate::metrics;
use crate::opds::Feed;
use crate::utils::query_param;

/// A document chosen for a browse request
#[derive(Debug, Clone)]
pub struct Resolved {
    pub feed: Arc<Feed>,

    /// Upstream URL of this document, the base for its relative links
    pub url: String,

    /// Root URL of the source tree it belongs to
    pub root_url: String,

    /// Upstream pagination of this document was cut short
    pub has_more_upstream: bool,
}

impl Resolved {
    fn from_node(node: &FeedTree, root: &FeedTree) -> Self {
        Self {
            feed: node.feed.clone(),
            url: node.url.clone(),
            root_url: root.url.clone(),
            has_more_upstream: node.has_more_upstream,
        }
    }
}

/// Resolves browse requests against the feed cache
pub struct Resolver {
    crawler: Arc<Crawler>,
    cache: Arc<FeedCache>,
}

impl Resolver {
    pub fn new(crawler: Arc<Crawler>, cache: Arc<FeedCache>) -> Self {
        Self { crawler, cache }
    }

    /// Cached tree of `source`, crawling it first when absent
    pub async fn tree(&self, source: &SourceConfig) -> Result<Arc<FeedTree>> {
        let slug = source.slug();
        if let Some(cached) = self.cache.get(&slug).await {
            return Ok(cached.tree);
        }

        info!(slug = %slug, "No cached tree, crawling on demand");
        let tree = self.crawler.crawl(source, &CancellationToken::new()).await?;
        Ok(self.cache.put(&slug, tree).await)
    }

    /// Document for `sub_path` and `raw_query` below `source`
    ///
    /// # Errors
    ///
    /// Upstream and decode failures of any fetch involved, or an invalid
    /// request when an `ext` path carries no `url` parameter.
    pub async fn resolve(
        &self,
        source: &SourceConfig,
        sub_path: &str,
        raw_query: &str,
    ) -> Result<Resolved> {
        let slug = source.slug();
        let tree = self.tree(source).await?;

        let query = strip_local_params(raw_query);
        let sub_path = sub_path.trim_start_matches('/');

        if sub_path.is_empty() && query.is_empty() {
            metrics::record_resolver_lookup(&slug, true);
            return Ok(Resolved::from_node(&tree, &tree));
        }

        let cache_key = if query.is_empty() {
            sub_path.to_string()
        } else {
            format!("{sub_path}?{query}")
        };

        if let Some(node) = tree.find(&cache_key).await {
            metrics::record_resolver_lookup(&slug, true);
            return Ok(Resolved::from_node(&node, &tree));
        }

        let (key, upstream) = if sub_path.trim_end_matches('/') == EXT_SEGMENT {
            let target = query_param(&query, "url")
                .filter(|u| !u.is_empty())
                .ok_or_else(|| Error::invalid_request("missing url parameter"))?;
            let key = ext_path(&target);
            if let Some(node) = tree.find(&key).await {
                metrics::record_resolver_lookup(&slug, true);
                return Ok(Resolved::from_node(&node, &tree));
            }
            (key, target)
        } else {
            (cache_key, reverse_resolve(&tree.url, sub_path, &query))
        };

        metrics::record_resolver_lookup(&slug, false);
        info!(slug = %slug, url = %upstream, "Fetching document on demand");
        let page = self
            .crawler
            .fetch_with_page_limit(&upstream, source.auth.as_ref(), source.max_paginate)
            .await?;

        let node = Arc::new(FeedTree::from_page(upstream, page));
        let (outcome, stored) = tree.insert_child(key.clone(), node).await;
        metrics::record_on_demand_insert(&slug, outcome.label());
        debug!(slug = %slug, key = %key, outcome = outcome.label(), "On-demand insert");

        Ok(Resolved::from_node(&stored, &tree))
    }
}
