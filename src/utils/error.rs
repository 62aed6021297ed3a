//! Error types for the aggregator
//!
//! This module defines the domain error types used throughout the crate.

use thiserror::Error;

/// Errors that can occur while talking to an upstream catalog
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level HTTP failure
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Upstream answered with a non-2xx status
    #[error("upstream {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Request deadline elapsed
    #[error("request to {0} timed out")]
    Timeout(String),

    /// URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Only http and https may be fetched
    #[error("unsupported URL scheme in {0}")]
    UnsupportedScheme(String),

    /// Could not acquire a concurrency permit
    #[error("fetcher is shutting down")]
    Closed,
}

impl FetchError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(url.to_string())
        } else {
            Self::Http {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// Errors that can occur while decoding or encoding catalog documents
#[derive(Error, Debug)]
pub enum ParseError {
    /// Malformed XML
    #[error("malformed XML: {0}")]
    Xml(String),

    /// The document has no recognisable root element
    #[error("expected <{expected}> root element")]
    MissingRoot { expected: &'static str },

    /// The OpenSearch description has no usable template
    #[error("no URL template in OpenSearch description")]
    NoSearchTemplate,

    /// Serialization failure
    #[error("failed to write document: {0}")]
    Serialize(String),
}

impl From<quick_xml::Error> for ParseError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

/// Errors raised by a crawl or an on-demand fetch
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Fetch error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse error
    #[error("parse error for {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    /// The crawl was cancelled before completing
    #[error("crawl cancelled")]
    Cancelled,
}

/// Fatal configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No sources configured
    #[error("at least one feed must be configured")]
    NoFeeds,

    /// A required field is missing
    #[error("feed[{index}]: {field} is required")]
    MissingField { index: usize, field: &'static str },

    /// A field has an invalid value
    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Two sources produce the same slug
    #[error("feed[{index}] ({name}): duplicate slug {slug:?}")]
    DuplicateSlug {
        index: usize,
        name: String,
        slug: String,
    },

    /// Config file could not be read or parsed
    #[error("failed to load {path}: {reason}")]
    Load { path: String, reason: String },
}
