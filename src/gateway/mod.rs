//! Aggregating gateway
//!
//! [`Gateway`] is the surface the HTTP layer talks to. It owns the feed
//! cache, resolves browse requests, rewrites every served document into the
//! gateway namespace and proxies downloads and searches.
//!
//! # Architecture
//!
//! ```text
//! browse ─► Resolver ─► (FeedCache | Crawler) ─► paginate ─► rewrite ─► Feed
//! search ─► Searcher ─► per-source fetch ─► rewrite + tag ─► merged Feed
//! ```

pub mod paginate;
pub mod paths;
pub mod poller;
pub mod resolver;
pub mod rewrite;

use bytes::{Bytes, BytesMut};
use chrono::{SecondsFormat, Utc};
use futures::future::{self, join_all};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use paths::GatewayPaths;
pub use poller::Poller;
pub use resolver::{Resolved, Resolver};

use self::paginate::{paginate, strip_local_params, PageRequest};
use self::rewrite::{rewrite_feed, RewriteContext};
use crate::cache::{CachedDownload, DownloadCache, FeedCache};
use crate::config::{Config, SourceConfig};
use crate::crawler::url::ensure_http;
use crate::crawler::{Crawler, FeedFetcher};
use crate::error::{Error, Result};
use crate::opds::{media, opensearch, Entry, Feed, Link, Rel, Text};
use crate::search::{require_query, SearchTarget, Searcher};
use crate::utils::format_bytes;
use crate::utils::error::FetchError;

/// A download ready to be sent to a client
pub enum Download {
    /// Served from the disk cache
    Cached(CachedDownload),

    /// Streamed from upstream
    Upstream {
        stream: BoxStream<'static, std::result::Result<Bytes, FetchError>>,
        content_type: Option<String>,
        content_length: Option<u64>,
    },
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cached(hit) => f.debug_tuple("Cached").field(hit).finish(),
            Self::Upstream {
                content_type,
                content_length,
                ..
            } => f
                .debug_struct("Upstream")
                .field("content_type", content_type)
                .field("content_length", content_length)
                .finish_non_exhaustive(),
        }
    }
}

/// The aggregator core
pub struct Gateway {
    config: Arc<Config>,
    crawler: Arc<Crawler>,
    cache: Arc<FeedCache>,
    downloads: Option<DownloadCache>,
    resolver: Resolver,
    searcher: Searcher,
    paths: GatewayPaths,
}

impl Gateway {
    /// Build a gateway and its upstream fetcher from configuration
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = Arc::new(FeedFetcher::new(&config.crawler)?);
        let crawler = Arc::new(Crawler::new(fetcher, config.crawler.crawl_fanout));
        Ok(Self::with_crawler(config, crawler))
    }

    /// Build a gateway around an existing crawler
    pub fn with_crawler(config: Config, crawler: Arc<Crawler>) -> Self {
        let paths = GatewayPaths::new(&config.server.base_path);
        let cache = Arc::new(FeedCache::new());
        let downloads = config
            .server
            .download_cache
            .enabled
            .then(|| DownloadCache::new(&config.server.download_cache.dir));

        Self {
            resolver: Resolver::new(crawler.clone(), cache.clone()),
            searcher: Searcher::new(crawler.clone(), paths.clone(), config.search_timeout()),
            config: Arc::new(config),
            crawler,
            cache,
            downloads,
            paths,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<FeedCache> {
        &self.cache
    }

    pub fn paths(&self) -> &GatewayPaths {
        &self.paths
    }

    /// Configured source for `slug`
    pub fn source(&self, slug: &str) -> Result<&SourceConfig> {
        self.config
            .source(slug)
            .ok_or_else(|| Error::not_found(format!("unknown source: {slug}")))
    }

    /// Navigation feed listing every configured source
    pub async fn root_feed(&self) -> Feed {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let cached = self.cache.all().await;
        let root = self.paths.root();

        let entries = self
            .config
            .feeds
            .iter()
            .map(|source| {
                let slug = source.slug();
                let updated = cached
                    .get(&slug)
                    .map(|c| c.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_else(|| now.clone());
                Entry {
                    id: format!("urn:opds-aggregator:source:{slug}"),
                    title: source.name.clone(),
                    updated,
                    content: Some(Text::plain(source.url.clone())),
                    links: vec![Link::new(Rel::Subsection, self.paths.source(&slug, ""))
                        .with_type(media::OPDS_NAVIGATION)],
                    ..Entry::default()
                }
            })
            .collect();

        Feed {
            id: "urn:opds-aggregator:root".to_string(),
            title: self.config.server.title.clone(),
            updated: now,
            links: vec![
                Link::new(Rel::SelfLink, root.clone()).with_type(media::OPDS_NAVIGATION),
                Link::new(Rel::Start, root).with_type(media::OPDS_NAVIGATION),
                Link::new(Rel::Search, self.paths.global_search_template())
                    .with_type(media::OPDS_ACQUISITION),
            ],
            entries,
            ..Feed::default()
        }
    }

    /// Serve a source document with local pagination and rewritten links
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown slug, upstream and decode failures of an
    /// on-demand fetch, or an invalid `ext` request.
    pub async fn browse(&self, slug: &str, sub_path: &str, raw_query: &str) -> Result<Feed> {
        let source = self.source(slug)?;
        let resolved = self.resolver.resolve(source, sub_path, raw_query).await?;

        let mut feed = (*resolved.feed).clone();
        let request = PageRequest::from_query(raw_query);
        let limit = request.effective_limit(
            source.max_entries,
            self.config.server.default_max_entries,
        );
        if limit > 0 {
            let query = strip_local_params(raw_query);
            let mut base = self.paths.source(slug, sub_path.trim_start_matches('/'));
            if !query.is_empty() {
                base.push('?');
                base.push_str(&query);
            }
            paginate(&mut feed, request.offset, limit, &base, resolved.has_more_upstream);
        }

        let ctx = RewriteContext {
            slug,
            doc_url: &resolved.url,
            root_url: &resolved.root_url,
            paths: &self.paths,
        };
        Ok(rewrite_feed(&feed, &ctx))
    }

    /// Proxy an acquisition, consulting the download cache first
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown slug, `InvalidRequest` for a missing or
    /// non-http(s) URL, upstream failures otherwise.
    pub async fn download(&self, slug: &str, url: &str) -> Result<Download> {
        let source = self.source(slug)?;
        if url.is_empty() {
            return Err(Error::invalid_request("missing url parameter"));
        }
        ensure_http(url).map_err(|e| Error::invalid_request(e.to_string()))?;

        if let Some(cache) = &self.downloads {
            match cache.get(url).await {
                Ok(Some(hit)) => return Ok(Download::Cached(hit)),
                Ok(None) => {}
                Err(e) => warn!(url = %url, error = %e, "Download cache read failed"),
            }
        }

        let raw = self.crawler.fetch_raw(url, source.auth.as_ref()).await?;
        let stream = match &self.downloads {
            Some(cache) => tee_into_cache(
                raw.stream,
                cache.clone(),
                url.to_string(),
                raw.content_type.clone(),
            ),
            None => raw.stream,
        };

        Ok(Download::Upstream {
            stream,
            content_type: raw.content_type,
            content_length: raw.content_length,
        })
    }

    /// Re-crawl one source and replace its cached tree
    ///
    /// The cached tree is left untouched when the crawl fails or is
    /// cancelled.
    pub async fn refresh_source(&self, slug: &str, cancel: &CancellationToken) -> Result<()> {
        let source = self.source(slug)?;
        let tree = self.crawler.crawl(source, cancel).await?;
        self.cache.put(slug, tree).await;
        Ok(())
    }

    /// Re-crawl every source concurrently, returning the slugs that failed
    pub async fn refresh_all(&self, cancel: &CancellationToken) -> Vec<String> {
        let refreshes = self.config.feeds.iter().map(|source| async move {
            let slug = source.slug();
            match self.refresh_source(&slug, cancel).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(slug = %slug, error = %e, "Refresh failed");
                    Some(slug)
                }
            }
        });
        join_all(refreshes).await.into_iter().flatten().collect()
    }

    /// Refresh `slug`, or every source when `None`
    ///
    /// # Errors
    ///
    /// For a single source, its crawl error. For all sources, an upstream
    /// error naming the failed slugs when any failed.
    pub async fn refresh(&self, slug: Option<&str>, cancel: &CancellationToken) -> Result<()> {
        match slug {
            Some(slug) => self.refresh_source(slug, cancel).await,
            None => {
                let failed = self.refresh_all(cancel).await;
                if failed.is_empty() {
                    Ok(())
                } else {
                    Err(Error::PartialRefresh(failed))
                }
            }
        }
    }

    /// Fan-out search over every cached source that advertises search
    pub async fn search(&self, query: &str) -> Result<Feed> {
        let query = require_query(query)?;
        let cached = self.cache.all().await;

        let targets: Vec<SearchTarget> = self
            .config
            .feeds
            .iter()
            .filter_map(|source| {
                let search_url = cached.get(&source.slug())?.tree.search_url.clone()?;
                Some(SearchTarget {
                    source: source.clone(),
                    search_url,
                })
            })
            .collect();

        info!(query = %query, sources = targets.len(), "Fan-out search");
        Ok(self.searcher.search_all(query, &targets).await)
    }

    /// Search one source through the upstream search link `upstream`
    pub async fn search_source(&self, slug: &str, upstream: &str, query: &str) -> Result<Feed> {
        let source = self.source(slug)?;
        if upstream.is_empty() {
            return Err(Error::invalid_request("missing upstream parameter"));
        }
        let query = require_query(query)?;

        let results = self.searcher.search_one(source, upstream, query).await?;
        let ctx = RewriteContext {
            slug,
            doc_url: &results.url,
            root_url: &source.url,
            paths: &self.paths,
        };
        Ok(rewrite_feed(&results.page.feed, &ctx))
    }

    /// OpenSearch description pointing a reader back at [`Gateway::search_source`]
    pub fn opensearch_description(&self, slug: &str, upstream: &str) -> Result<Vec<u8>> {
        let source = self.source(slug)?;
        if upstream.is_empty() {
            return Err(Error::invalid_request("missing upstream parameter"));
        }
        let template = self.paths.search_template(slug, upstream);
        Ok(opensearch::render_description(
            &source.name,
            &format!("Search {}", source.name),
            &template,
        )?)
    }
}

/// Pass a download through while collecting it for the cache
///
/// The body is stored once the stream ends cleanly; a failed chunk drops
/// what was collected.
fn tee_into_cache(
    upstream: BoxStream<'static, std::result::Result<Bytes, FetchError>>,
    cache: DownloadCache,
    url: String,
    content_type: Option<String>,
) -> BoxStream<'static, std::result::Result<Bytes, FetchError>> {
    let collected = Arc::new(Mutex::new(Some(BytesMut::new())));
    let sink = collected.clone();

    let passthrough = upstream.inspect(move |chunk| {
        if let Ok(mut guard) = sink.lock() {
            match chunk {
                Ok(bytes) => {
                    if let Some(buf) = guard.as_mut() {
                        buf.extend_from_slice(bytes);
                    }
                }
                Err(_) => *guard = None,
            }
        }
    });

    let store = stream::once(async move {
        let body = collected.lock().ok().and_then(|mut guard| guard.take());
        if let Some(body) = body {
            match cache.put(&url, content_type.as_deref(), &body).await {
                Ok(()) => info!(url = %url, size = %format_bytes(body.len() as u64), "Cached download"),
                Err(e) => warn!(url = %url, error = %e, "Failed to cache download"),
            }
        }
        None::<std::result::Result<Bytes, FetchError>>
    })
    .filter_map(future::ready);

    passthrough.chain(store).boxed()
}
