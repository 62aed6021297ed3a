//! opds-aggregator - OPDS catalog aggregation gateway
//!
//! Merges any number of upstream OPDS catalogs into one catalog served
//! under a single base path. Upstream links are rewritten into the
//! gateway namespace, so a client only ever talks to the gateway.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading, environment overlay and validation
//! - [`opds`] - Atom/OPDS and OpenSearch document model, parser and renderer
//! - [`crawler`] - Rate-limited fetching and bounded-depth catalog crawls
//! - [`cache`] - In-memory catalog trees and the on-disk download cache
//! - [`gateway`] - Path resolution, pagination, link rewriting and polling
//! - [`search`] - Concurrent fan-out search across sources
//! - [`server`] - HTTP routes and the server lifecycle
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use opds_aggregator::config::{Config, SourceConfig};
//! use opds_aggregator::server::GatewayServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config
//!         .feeds
//!         .push(SourceConfig::new("Example", "https://example.org/opds"));
//!     let server = GatewayServer::new(config)?;
//!     server
//!         .start_with_shutdown(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod crawler;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod opds;
pub mod search;
pub mod server;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{DownloadCache, FeedCache};
    pub use crate::config::{Config, SourceConfig};
    pub use crate::crawler::{Crawler, FeedFetcher, FeedTree};
    pub use crate::error::{Error, ErrorCategory, GatewayErrorTrait, Result};
    pub use crate::gateway::Gateway;
    pub use crate::opds::{Entry, Feed, Link};
    pub use crate::server::GatewayServer;
}

// Direct re-exports for convenience
pub use gateway::Gateway;
pub use opds::Feed;
