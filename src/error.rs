//! Unified error handling for the aggregator
//!
//! This module provides a unified error type that consolidates the domain-specific
//! errors into a single `Error` enum, while keeping the domain errors available
//! to callers that need the detail.
//!
//! # Architecture
//!
//! - [`GatewayErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use opds_aggregator::error::{Error, ErrorCategory, GatewayErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.category() == ErrorCategory::Upstream {
//!         // answer 502, keep serving the rest of the catalog
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::utils::error::{ConfigError, CrawlerError, FetchError, ParseError};

/// Common trait for the aggregator error types
pub trait GatewayErrorTrait: std::error::Error {
    /// Check if this error may succeed on a later refresh
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Upstream fetch failures (HTTP status, transport, timeout)
    Upstream,
    /// Document decoding errors
    Parsing,
    /// Nothing matched the request
    NotFound,
    /// The client sent an unusable request
    Request,
    /// Configuration and validation errors
    Config,
    /// Storage and I/O errors
    Storage,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Parsing => "parsing",
            Self::NotFound => "not_found",
            Self::Request => "request",
            Self::Config => "config",
            Self::Storage => "storage",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the aggregator
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("upstream error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse-specific errors
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Configuration errors
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// No source, document or route matched
    #[error("not found: {0}")]
    NotFound(String),

    /// The request could not be served as given
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Some sources could not be refreshed
    #[error("refresh failed for: {}", .0.join(", "))]
    PartialRefresh(Vec<String>),

    /// The operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CrawlerError> for Error {
    fn from(err: CrawlerError) -> Self {
        match err {
            CrawlerError::Fetch(e) => Self::Fetch(e),
            CrawlerError::Parse { source, .. } => Self::Parse(source),
            CrawlerError::Cancelled => Self::Cancelled,
        }
    }
}

impl GatewayErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(FetchError::InvalidUrl(_) | FetchError::UnsupportedScheme(_)) => false,
            Self::Fetch(_) => true,
            Self::Parse(_) => true, // upstream may publish a valid document later
            Self::Config(_) => false,
            Self::NotFound(_) => false,
            Self::InvalidRequest(_) => false,
            Self::PartialRefresh(_) => true,
            Self::Cancelled => true,
            Self::Io(_) => true,
            Self::Json(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(FetchError::InvalidUrl(_) | FetchError::UnsupportedScheme(_)) => {
                ErrorCategory::Request
            }
            Self::Fetch(_) => ErrorCategory::Upstream,
            Self::Parse(_) => ErrorCategory::Parsing,
            Self::Config(_) => ErrorCategory::Config,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::InvalidRequest(_) => ErrorCategory::Request,
            Self::PartialRefresh(_) => ErrorCategory::Upstream,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::Cancelled => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an invalid-request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// True when the failure came from an upstream document (fetch or decode)
    pub fn is_bad_upstream(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Upstream | ErrorCategory::Parsing
        )
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
