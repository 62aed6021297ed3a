//! Prometheus metrics for the aggregator
//!
//! This module provides metrics tracking for:
//! - Crawler: upstream fetches, crawl duration and outcome, tree size
//! - Gateway: resolver cache hits, on-demand inserts, search failures, HTTP requests
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for upstream-facing metrics
struct CrawlerMetrics {
    upstream_fetches: CounterVec,
    fetch_duration: HistogramVec,
    crawls: CounterVec,
    crawl_duration: HistogramVec,
    tree_nodes: GaugeVec,
}

/// Container for client-facing metrics
struct GatewayMetrics {
    resolver_lookups: CounterVec,
    on_demand_inserts: CounterVec,
    search_failures: CounterVec,
    http_requests: CounterVec,
}

/// Global storage for crawler metrics
static CRAWLER_METRICS: OnceLock<CrawlerMetrics> = OnceLock::new();

/// Global storage for gateway metrics
static GATEWAY_METRICS: OnceLock<GatewayMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = opds_aggregator::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let crawler = CrawlerMetrics {
        upstream_fetches: register_counter_vec!(
            "opds_upstream_fetches_total",
            "Upstream requests by kind and outcome",
            &["kind", "outcome"]
        )?,
        fetch_duration: register_histogram_vec!(
            "opds_upstream_fetch_duration_seconds",
            "Upstream request duration in seconds",
            &["kind"],
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
        crawls: register_counter_vec!(
            "opds_crawls_total",
            "Source crawls by outcome",
            &["source", "outcome"]
        )?,
        crawl_duration: register_histogram_vec!(
            "opds_crawl_duration_seconds",
            "Time spent crawling a source in seconds",
            &["source"],
            vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
        tree_nodes: register_gauge_vec!(
            "opds_tree_nodes",
            "Documents held in a source's cached tree after its last crawl",
            &["source"]
        )?,
    };

    let gateway = GatewayMetrics {
        resolver_lookups: register_counter_vec!(
            "opds_resolver_lookups_total",
            "Browse requests by source and cache result",
            &["source", "result"]
        )?,
        on_demand_inserts: register_counter_vec!(
            "opds_on_demand_inserts_total",
            "On-demand child inserts by source and outcome",
            &["source", "outcome"]
        )?,
        search_failures: register_counter_vec!(
            "opds_search_failures_total",
            "Per-source search failures",
            &["source"]
        )?,
        http_requests: register_counter_vec!(
            "opds_http_requests_total",
            "Gateway HTTP requests by route and status",
            &["route", "status"]
        )?,
    };

    CRAWLER_METRICS
        .set(crawler)
        .map_err(|_| "Crawler metrics already initialized")?;
    GATEWAY_METRICS
        .set(gateway)
        .map_err(|_| "Gateway metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    CRAWLER_METRICS.get().is_some() && GATEWAY_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start an upstream fetch timer
pub fn start_fetch_timer(kind: &str) -> MetricsTimer {
    match CRAWLER_METRICS.get() {
        Some(m) => MetricsTimer::new(m.fetch_duration.with_label_values(&[kind]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

/// Record an upstream request outcome
pub fn record_upstream_fetch(kind: &str, outcome: &str) {
    if let Some(m) = CRAWLER_METRICS.get() {
        m.upstream_fetches.with_label_values(&[kind, outcome]).inc();
    }
}

/// Start a crawl timer
pub fn start_crawl_timer(source: &str) -> MetricsTimer {
    match CRAWLER_METRICS.get() {
        Some(m) => MetricsTimer::new(m.crawl_duration.with_label_values(&[source]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

/// Record a finished crawl
pub fn record_crawl(source: &str, succeeded: bool, nodes: usize) {
    let Some(m) = CRAWLER_METRICS.get() else {
        return;
    };

    let outcome = if succeeded { "success" } else { "failure" };
    m.crawls.with_label_values(&[source, outcome]).inc();
    if succeeded {
        m.tree_nodes.with_label_values(&[source]).set(nodes as f64);
    }
}

/// Record whether a browse request was served from the cached tree
pub fn record_resolver_lookup(source: &str, hit: bool) {
    if let Some(m) = GATEWAY_METRICS.get() {
        let result = if hit { "hit" } else { "miss" };
        m.resolver_lookups.with_label_values(&[source, result]).inc();
    }
}

/// Record an on-demand insert (`inserted` or `discarded`)
pub fn record_on_demand_insert(source: &str, outcome: &str) {
    if let Some(m) = GATEWAY_METRICS.get() {
        m.on_demand_inserts.with_label_values(&[source, outcome]).inc();
    }
}

/// Record a source excluded from a search
pub fn record_search_failure(source: &str) {
    if let Some(m) = GATEWAY_METRICS.get() {
        m.search_failures.with_label_values(&[source]).inc();
    }
}

/// Record a gateway HTTP request
pub fn record_http_request(route: &str, status: u16) {
    if let Some(m) = GATEWAY_METRICS.get() {
        let status_str = status.to_string();
        m.http_requests
            .with_label_values(&[route, &status_str])
            .inc();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
        // idempotent
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_metrics_initialized() {
        ensure_metrics_initialized();
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_upstream_fetch("feed", "ok");
        let text = encode_metrics().unwrap();
        assert!(text.contains("opds_upstream_fetches_total"));
    }

    #[test]
    fn test_recorders_do_not_panic() {
        ensure_metrics_initialized();
        record_crawl("gutenberg", true, 12);
        record_crawl("gutenberg", false, 0);
        record_resolver_lookup("gutenberg", true);
        record_on_demand_insert("gutenberg", "discarded");
        record_search_failure("gutenberg");
        record_http_request("browse", 502);
        let _fetch = start_fetch_timer("feed");
        let _crawl = start_crawl_timer("gutenberg");
    }
}
