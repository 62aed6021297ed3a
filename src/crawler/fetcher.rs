//! HTTP fetcher for upstream catalogs
//!
//! This module provides the single outbound HTTP path of the aggregator:
//! - Rate limiting with governor
//! - A semaphore bounding in-flight requests
//! - Optional Basic credentials per source
//! - Page-limited merging of paginated feeds
//! - Streaming raw downloads for proxied acquisitions
//!
//! Only http and https URLs are ever requested.

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{
    header::{ACCEPT, CONTENT_TYPE},
    Client, Response,
};
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::url::{ensure_http, resolve_href};
use crate::config::{CrawlerConfig, Credentials};
use crate::metrics;
use crate::opds::{media, parse_feed, Feed, Rel};
use crate::utils::error::{CrawlerError, FetchError};

/// Result of a page-limited fetch
#[derive(Debug, Clone)]
pub struct PageFetch {
    /// First page with the entries of every followed page appended
    pub feed: Feed,

    /// The page budget ran out before upstream pagination did
    pub has_more: bool,

    /// Absolute URL of the first page not fetched, when `has_more`
    pub next_url: Option<String>,
}

/// Upstream response body for proxying
pub struct RawDownload {
    pub stream: BoxStream<'static, Result<Bytes, FetchError>>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl std::fmt::Debug for RawDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDownload")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Upstream fetcher shared by crawls, on-demand resolution, search and downloads
pub struct FeedFetcher {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    /// Bounds concurrent upstream requests
    permits: Semaphore,
}

impl FeedFetcher {
    /// Create a fetcher from crawler configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: &CrawlerConfig) -> Result<Self, FetchError> {
        Self::with_limits(
            config.rate_limit,
            config.max_concurrent_requests,
            Duration::from_secs(config.request_timeout_secs),
            &config.user_agent,
        )
    }

    /// Create a fetcher with explicit limits
    ///
    /// # Arguments
    ///
    /// * `requests_per_second` - Maximum number of requests per second
    /// * `max_in_flight` - Maximum number of concurrent requests
    /// * `timeout` - Per-request deadline
    /// * `user_agent` - User-Agent header value
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn with_limits(
        requests_per_second: u32,
        max_in_flight: usize,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::from_reqwest("<client>", e))?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            permits: Semaphore::new(max_in_flight.max(1)),
        })
    }

    /// Fetch and decode a single catalog document
    ///
    /// # Errors
    ///
    /// `CrawlerError::Fetch` on transport failure or non-2xx status,
    /// `CrawlerError::Parse` when the body is not a feed.
    pub async fn fetch_one(
        &self,
        url: &str,
        auth: Option<&Credentials>,
    ) -> Result<Feed, CrawlerError> {
        let body = self.fetch_body(url, auth, Some(media::ATOM), None, "feed").await?;
        parse_feed(&body).map_err(|source| {
            metrics::record_upstream_fetch("feed", "parse_error");
            CrawlerError::Parse {
                url: url.to_string(),
                source,
            }
        })
    }

    /// Fetch a document and follow its `next` links, merging entries
    ///
    /// `max_pages` of 0 follows every page. When the budget runs out the
    /// merged document keeps a `next` link to the first unfetched page and
    /// `has_more` is set; otherwise the `next` link is removed. A failing
    /// page or a repeated URL ends pagination without failing the call.
    ///
    /// # Errors
    ///
    /// Only a failure of the first page is returned.
    pub async fn fetch_with_page_limit(
        &self,
        url: &str,
        auth: Option<&Credentials>,
        max_pages: u32,
    ) -> Result<PageFetch, CrawlerError> {
        let mut feed = self.fetch_one(url, auth).await?;
        let mut next = feed.next_link().cloned().map(|mut link| {
            link.href = resolve_href(url, &link.href);
            link
        });

        let mut seen = HashSet::from([url.to_string()]);
        let mut pages = 1u32;

        while let Some(next_link) = next.take() {
            let next_url = next_link.href.clone();
            if !seen.insert(next_url.clone()) {
                debug!(url = %next_url, "Pagination loop detected");
                break;
            }

            if max_pages > 0 && pages >= max_pages {
                feed.set_link(next_link);
                return Ok(PageFetch {
                    feed,
                    has_more: true,
                    next_url: Some(next_url),
                });
            }

            match self.fetch_one(&next_url, auth).await {
                Ok(page) => {
                    next = page.next_link().cloned().map(|mut link| {
                        link.href = resolve_href(&next_url, &link.href);
                        link
                    });
                    feed.entries.extend(page.entries);
                    pages += 1;
                }
                Err(e) => {
                    warn!(url = %next_url, error = %e, "Pagination fetch failed");
                    break;
                }
            }
        }

        feed.remove_links(&Rel::Next);
        Ok(PageFetch {
            feed,
            has_more: false,
            next_url: None,
        })
    }

    /// Fetch a body, reading at most `limit` bytes
    ///
    /// # Errors
    ///
    /// Same failure semantics as [`FeedFetcher::fetch_one`] without decoding.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        auth: Option<&Credentials>,
        limit: usize,
    ) -> Result<Bytes, FetchError> {
        self.fetch_body(url, auth, None, Some(limit), "description")
            .await
    }

    /// Start a download and hand back the body as a stream
    ///
    /// # Errors
    ///
    /// Non-http(s) URLs, transport failures and non-2xx statuses.
    pub async fn fetch_raw(
        &self,
        url: &str,
        auth: Option<&Credentials>,
    ) -> Result<RawDownload, FetchError> {
        let response = {
            let _permit = self.permits.acquire().await.map_err(|_| FetchError::Closed)?;
            self.send(url, auth, None, "download").await?
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        let owned_url = url.to_string();
        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| FetchError::from_reqwest(&owned_url, e)))
            .boxed();

        Ok(RawDownload {
            stream,
            content_type,
            content_length,
        })
    }

    async fn fetch_body(
        &self,
        url: &str,
        auth: Option<&Credentials>,
        accept: Option<&str>,
        limit: Option<usize>,
        kind: &'static str,
    ) -> Result<Bytes, FetchError> {
        let _permit = self.permits.acquire().await.map_err(|_| FetchError::Closed)?;
        let response = self.send(url, auth, accept, kind).await?;
        let body = Self::read_body(url, response, limit).await.inspect_err(|_| {
            metrics::record_upstream_fetch(kind, "error");
        })?;
        metrics::record_upstream_fetch(kind, "ok");
        Ok(body)
    }

    /// Issue a GET and check the status
    async fn send(
        &self,
        url: &str,
        auth: Option<&Credentials>,
        accept: Option<&str>,
        kind: &'static str,
    ) -> Result<Response, FetchError> {
        let target = ensure_http(url)?;
        self.rate_limiter.until_ready().await;
        let _timer = metrics::start_fetch_timer(kind);

        debug!(url = %url, kind, "Fetching upstream");

        let mut request = self.client.get(target);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(creds) = auth.filter(|c| !c.username.is_empty()) {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await.map_err(|e| {
            metrics::record_upstream_fetch(kind, "error");
            FetchError::from_reqwest(url, e)
        })?;

        let status = response.status();
        if !status.is_success() {
            metrics::record_upstream_fetch(kind, "status");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }

    async fn read_body(
        url: &str,
        mut response: Response,
        limit: Option<usize>,
    ) -> Result<Bytes, FetchError> {
        let Some(limit) = limit else {
            return response
                .bytes()
                .await
                .map_err(|e| FetchError::from_reqwest(url, e));
        };

        let mut buf = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
        {
            let room = limit - buf.len();
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if buf.len() >= limit {
                break;
            }
        }
        Ok(buf.freeze())
    }
}
