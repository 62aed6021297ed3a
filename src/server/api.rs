//! HTTP handlers for the gateway
//!
//! This module defines the routes and handlers. Handlers stay thin: they
//! pull parameters out of the request, call [`Gateway`](crate::gateway::Gateway)
//! and map the outcome onto a response.

use axum::{
    body::Body,
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::server::AppState;
use crate::error::{Error, ErrorCategory, GatewayErrorTrait};
use crate::gateway::Download;
use crate::metrics;
use crate::opds::{opensearch, render_feed, Feed, FEED_CONTENT_TYPE};

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub sources: usize,
    pub cached_sources: usize,
}

/// Refresh result
#[derive(Debug, Default, Serialize)]
pub struct RefreshResponse {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

/// `?url=` of the download route
#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    #[serde(default)]
    pub url: String,
}

/// `?q=` and `?upstream=` of the search routes
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub upstream: String,
}

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_bad_upstream() {
            return StatusCode::BAD_GATEWAY;
        }
        match self.0.category() {
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Request => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, category = self.0.category().label(), "Request failed");
        } else {
            warn!(error = %self.0, category = self.0.category().label(), "Request rejected");
        }
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

// ============================================================================
// API Routes
// ============================================================================

/// Create the gateway router with every route below `base_path`
pub fn create_router(state: AppState, base_path: &str) -> Router {
    let base = base_path.trim_end_matches('/');

    let mut router = Router::new();
    if !base.is_empty() {
        router = router.route(base, get(root_feed));
    }

    router
        .route(&format!("{base}/"), get(root_feed))
        // Browse endpoints
        .route(&format!("{base}/source/{{slug}}"), get(browse_source_root))
        .route(&format!("{base}/source/{{slug}}/"), get(browse_source_root))
        .route(&format!("{base}/source/{{slug}}/{{*path}}"), get(browse_source))
        // Proxy endpoints
        .route(&format!("{base}/download/{{slug}}"), get(download))
        .route(&format!("{base}/search"), get(search_all))
        .route(&format!("{base}/search/{{slug}}"), get(search_source))
        // Management endpoints
        .route(&format!("{base}/refresh"), post(refresh_all))
        .route(&format!("{base}/refresh/{{slug}}"), post(refresh_source))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

// ============================================================================
// Helpers
// ============================================================================

fn feed_response(feed: &Feed) -> ApiResult {
    let body = render_feed(feed).map_err(Error::from)?;
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(FEED_CONTENT_TYPE))],
        body,
    )
        .into_response())
}

/// Count the request under `route` with the status it ended in
fn observed(route: &str, result: ApiResult) -> Response {
    let response = result.unwrap_or_else(IntoResponse::into_response);
    metrics::record_http_request(route, response.status().as_u16());
    response
}

// ============================================================================
// Feed Handlers
// ============================================================================

/// Aggregated root feed
async fn root_feed(State(state): State<AppState>) -> Response {
    let feed = state.gateway.root_feed().await;
    observed("root", feed_response(&feed))
}

async fn browse_source_root(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    observed("browse", browse(&state, &slug, "", query.as_deref()).await)
}

/// Browse below a source root
///
/// The sub-path is taken still percent-encoded from the request URI, since
/// cache keys and upstream URLs are built from encoded paths.
async fn browse_source(
    State(state): State<AppState>,
    Path((slug, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    uri: Uri,
) -> Response {
    let base = &state.gateway.config().server.base_path;
    let path = raw_sub_path(uri.path(), base, &slug).unwrap_or(path.as_str());
    observed("browse", browse(&state, &slug, path, query.as_deref()).await)
}

/// Encoded remainder of `{base}/source/{slug}/...`
fn raw_sub_path<'a>(uri_path: &'a str, base: &str, slug: &str) -> Option<&'a str> {
    uri_path
        .strip_prefix(base.trim_end_matches('/'))?
        .strip_prefix("/source/")?
        .strip_prefix(slug)?
        .strip_prefix('/')
}

async fn browse(state: &AppState, slug: &str, path: &str, query: Option<&str>) -> ApiResult {
    let feed = state
        .gateway
        .browse(slug, path, query.unwrap_or_default())
        .await?;
    feed_response(&feed)
}

// ============================================================================
// Proxy Handlers
// ============================================================================

/// Stream an acquisition through the gateway
async fn download(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Response {
    observed("download", proxy_download(&state, &slug, &params.url).await)
}

async fn proxy_download(state: &AppState, slug: &str, url: &str) -> ApiResult {
    let download = state.gateway.download(slug, url).await?;
    Ok(download_response(download))
}

fn download_response(download: Download) -> Response {
    let (body, content_type, content_length) = match download {
        Download::Cached(hit) => {
            let len = hit.body.len() as u64;
            (Body::from(hit.body), hit.content_type, Some(len))
        }
        Download::Upstream {
            stream,
            content_type,
            content_length,
        } => (Body::from_stream(stream), content_type, content_length),
    };

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    if let Some(value) = content_type.and_then(|t| HeaderValue::from_str(&t).ok()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(len) = content_length.filter(|len| *len > 0) {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    response
}

/// Fan-out search across every source
async fn search_all(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Response {
    let result = match state.gateway.search(&params.q).await {
        Ok(feed) => feed_response(&feed),
        Err(e) => Err(e.into()),
    };
    observed("search", result)
}

/// Search one source, or describe its search when no query is given
async fn search_source(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<SearchParams>,
) -> Response {
    observed("search_source", source_search(&state, &slug, &params).await)
}

async fn source_search(state: &AppState, slug: &str, params: &SearchParams) -> ApiResult {
    if params.q.trim().is_empty() {
        let body = state
            .gateway
            .opensearch_description(slug, &params.upstream)?;
        let content_type = opensearch::description_content_type();
        return Ok(([(header::CONTENT_TYPE, content_type)], body).into_response());
    }

    let feed = state
        .gateway
        .search_source(slug, &params.upstream, &params.q)
        .await?;
    feed_response(&feed)
}

// ============================================================================
// Management Handlers
// ============================================================================

/// Re-crawl every source
async fn refresh_all(State(state): State<AppState>) -> Response {
    observed("refresh", refresh(&state, None).await)
}

/// Re-crawl one source
async fn refresh_source(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    observed("refresh", refresh(&state, Some(&slug)).await)
}

/// A partial failure still reports which sources were refreshed
async fn refresh(state: &AppState, slug: Option<&str>) -> ApiResult {
    let targets: Vec<String> = match slug {
        Some(slug) => vec![slug.to_string()],
        None => state.gateway.config().feeds.iter().map(|f| f.slug()).collect(),
    };

    let (status, failed) = match state.gateway.refresh(slug, &state.shutdown).await {
        Ok(()) => (StatusCode::OK, Vec::new()),
        Err(Error::PartialRefresh(failed)) => (StatusCode::BAD_GATEWAY, failed),
        Err(e) => return Err(e.into()),
    };

    let refreshed = targets
        .into_iter()
        .filter(|slug| !failed.contains(slug))
        .collect();
    Ok((
        status,
        Json(ApiResponse::success(RefreshResponse { refreshed, failed })),
    )
        .into_response())
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        sources: state.gateway.config().feeds.len(),
        cached_sources: state.gateway.cache().len().await,
    }))
}

/// Prometheus text exposition
async fn metrics_endpoint() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
            .into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
