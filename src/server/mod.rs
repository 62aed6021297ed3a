//! HTTP surface of the gateway
//!
//! # Routes
//!
//! ```text
//! GET  {base}/                              root navigation feed
//! GET  {base}/source/{slug}/{*path}         browse a source
//! GET  {base}/download/{slug}?url=          proxied (and cached) download
//! GET  {base}/search?q=                     search every source
//! GET  {base}/search/{slug}?upstream=&q=    search one source
//! POST {base}/refresh[/{slug}]              manual refresh
//! GET  /health                              health check
//! GET  /metrics                             Prometheus metrics
//! ```

pub mod api;
pub mod server;

pub use api::create_router;
pub use server::{AppState, GatewayServer, ServerError, ServerInfo};
