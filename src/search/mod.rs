//! Fan-out search across upstream catalogs
//!
//! Each source advertises search through a description document or a
//! direct template. A query is expanded into every source's template,
//! dispatched concurrently under a per-source deadline and merged. A
//! failing source is logged and left out; it never fails the search.
//!
//! # Example
//!
//! ```rust,ignore
//! let searcher = Searcher::new(crawler, paths, Duration::from_secs(15));
//! let results = searcher.search_all("dune", targets).await;
//! ```

use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Credentials, SourceConfig};
use crate::crawler::url::resolve_href;
use crate::crawler::{Crawler, PageFetch};
use crate::error::{Error, Result};
use crate::gateway::paths::GatewayPaths;
use crate::gateway::rewrite::{rewrite_feed, RewriteContext};
use crate::metrics;
use crate::opds::opensearch::{self, expand_template};
use crate::opds::{media, Category, Entry, Feed, Link, Rel};
use crate::utils::error::FetchError;
use crate::utils::query_escape;

/// Category scheme marking which source a search result came from
pub const SOURCE_SCHEME: &str = "urn:opds-aggregator:source";

/// Largest description document read
const DESCRIPTION_LIMIT: usize = 64 * 1024;

/// A source taking part in a fan-out search
#[derive(Debug, Clone)]
pub struct SearchTarget {
    pub source: SourceConfig,

    /// Description or template URL advertised by the source root
    pub search_url: String,
}

/// Results of a single-source search
#[derive(Debug, Clone)]
pub struct SourceResults {
    /// Expanded upstream query URL, the base for the results' links
    pub url: String,
    pub page: PageFetch,
}

/// Dispatches queries to upstream search endpoints
pub struct Searcher {
    crawler: Arc<Crawler>,
    paths: GatewayPaths,
    timeout: Duration,
}

impl Searcher {
    pub fn new(crawler: Arc<Crawler>, paths: GatewayPaths, timeout: Duration) -> Self {
        Self {
            crawler,
            paths,
            timeout,
        }
    }

    /// Absolute query template behind a search link
    ///
    /// A link that already is a template is used directly. Otherwise the
    /// description document is fetched and its preferred template taken,
    /// resolved against the description URL.
    pub async fn template_for(
        &self,
        search_url: &str,
        auth: Option<&Credentials>,
    ) -> Result<String> {
        if opensearch::is_template(search_url) {
            return Ok(search_url.to_string());
        }

        let body = self
            .crawler
            .fetcher()
            .fetch_bytes(search_url, auth, DESCRIPTION_LIMIT)
            .await?;
        let desc = opensearch::parse_description(&body)?;
        let template = desc.preferred_template()?;
        Ok(opensearch::resolve_template(template, |h| {
            resolve_href(search_url, h)
        }))
    }

    /// Search one source, following its pages up to `max_paginate`
    pub async fn search_one(
        &self,
        source: &SourceConfig,
        search_url: &str,
        query: &str,
    ) -> Result<SourceResults> {
        let template = self.template_for(search_url, source.auth.as_ref()).await?;
        let url = expand_template(&template, query);
        debug!(source = %source.name, url = %url, "Searching source");

        let page = self
            .crawler
            .fetch_with_page_limit(&url, source.auth.as_ref(), source.max_paginate)
            .await?;
        Ok(SourceResults { url, page })
    }

    /// Search every target concurrently and merge the tagged results
    ///
    /// Entries keep the order of `targets`, and within a source the
    /// upstream order. Links are rewritten into the gateway namespace and
    /// every entry carries one category naming its source.
    pub async fn search_all(&self, query: &str, targets: &[SearchTarget]) -> Feed {
        let searches = targets.iter().map(|target| async move {
            let slug = target.source.slug();
            let outcome = tokio::time::timeout(self.timeout, self.search_entries(target, query))
                .await
                .unwrap_or_else(|_| {
                    Err(FetchError::Timeout(target.search_url.clone()).into())
                });

            match outcome {
                Ok(entries) => entries,
                Err(e) => {
                    metrics::record_search_failure(&slug);
                    warn!(source = %target.source.name, error = %e, "Search failed for source");
                    Vec::new()
                }
            }
        });

        let entries: Vec<Entry> = join_all(searches).await.into_iter().flatten().collect();
        self.results_feed(query, entries)
    }

    async fn search_entries(&self, target: &SearchTarget, query: &str) -> Result<Vec<Entry>> {
        let source = &target.source;
        let slug = source.slug();

        let template = self.template_for(&target.search_url, source.auth.as_ref()).await?;
        let url = expand_template(&template, query);
        let feed = self.crawler.fetch_one(&url, source.auth.as_ref()).await?;

        let ctx = RewriteContext {
            slug: &slug,
            doc_url: &url,
            root_url: &source.url,
            paths: &self.paths,
        };
        let mut feed = rewrite_feed(&feed, &ctx);
        for entry in &mut feed.entries {
            entry.categories.retain(|c| c.scheme.as_deref() != Some(SOURCE_SCHEME));
            entry.categories.push(Category {
                term: slug.clone(),
                label: Some(source.name.clone()),
                scheme: Some(SOURCE_SCHEME.to_string()),
            });
        }
        Ok(feed.entries)
    }

    fn results_feed(&self, query: &str, entries: Vec<Entry>) -> Feed {
        Feed {
            id: format!("urn:opds-aggregator:search:{}", query_escape(query)),
            title: format!("Search results for \"{query}\""),
            updated: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            links: vec![
                Link::new(Rel::SelfLink, self.paths.global_search(query))
                    .with_type(media::OPDS_ACQUISITION),
                Link::new(Rel::Start, self.paths.root()).with_type(media::OPDS_NAVIGATION),
            ],
            entries,
            ..Feed::default()
        }
    }
}

/// Reject an empty query before any upstream is contacted
pub fn require_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_request("missing q parameter"));
    }
    Ok(trimmed)
}
