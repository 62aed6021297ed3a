//! Integration tests for fan-out search
//!
//! These tests validate result tagging, ordering and failure isolation
//! across several mock sources.

mod common;

use common::{acq_feed, description, nav_feed, nav_feed_with_search, test_gateway, titles};
use opds_aggregator::config::SourceConfig;
use opds_aggregator::error::{Error, ErrorCategory, GatewayErrorTrait};
use opds_aggregator::search::SOURCE_SCHEME;
use opds_aggregator::utils::query_escape;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

fn ok(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(body)
}

/// Four sources: description-based, direct template, failing and silent
async fn search_server() -> MockServer {
    let server = MockServer::start().await;
    let base = server.uri();

    mount(&server, "/alpha", ok(nav_feed_with_search("alpha", "/alpha/search.xml", &[]))).await;
    mount(
        &server,
        "/alpha/search.xml",
        ok(description(&format!("{base}/alpha/find?q={{searchTerms}}"))),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/alpha/find"))
        .and(query_param("q", "dune"))
        .respond_with(ok(acq_feed("alpha-results", &["Dune", "Dune Messiah"], None)))
        .mount(&server)
        .await;

    mount(
        &server,
        "/beta",
        ok(nav_feed_with_search("beta", "/beta/find?q={searchTerms}", &[])),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/beta/find"))
        .and(query_param("q", "dune"))
        .respond_with(ok(acq_feed("beta-results", &["Children of Dune"], None)))
        .mount(&server)
        .await;

    mount(
        &server,
        "/broken",
        ok(nav_feed_with_search("broken", "/broken/find?q={searchTerms}", &[])),
    )
    .await;
    mount(&server, "/broken/find", ResponseTemplate::new(500)).await;

    mount(&server, "/silent", ok(nav_feed("silent", &[]))).await;

    server
}

fn sources(server: &MockServer) -> Vec<SourceConfig> {
    let base = server.uri();
    vec![
        SourceConfig::new("Alpha", format!("{base}/alpha")),
        SourceConfig::new("Broken", format!("{base}/broken")),
        SourceConfig::new("Beta", format!("{base}/beta")),
        SourceConfig::new("Silent", format!("{base}/silent")),
    ]
}

/// Results are merged in source order and tagged with their source
#[tokio::test]
async fn test_fan_out_search() {
    let server = search_server().await;
    let gateway = test_gateway(sources(&server));
    let failed = gateway.refresh_all(&CancellationToken::new()).await;
    assert!(failed.is_empty());

    let feed = gateway.search("dune").await.unwrap();

    assert_eq!(titles(&feed), vec!["Dune", "Dune Messiah", "Children of Dune"]);

    let tags: Vec<&str> = feed
        .entries
        .iter()
        .map(|e| {
            let tagged: Vec<_> = e
                .categories
                .iter()
                .filter(|c| c.scheme.as_deref() == Some(SOURCE_SCHEME))
                .collect();
            assert_eq!(tagged.len(), 1);
            tagged[0].term.as_str()
        })
        .collect();
    assert_eq!(tags, vec!["alpha", "alpha", "beta"]);

    let acquisition = &feed.entries[2].links[0].href;
    assert_eq!(
        acquisition,
        &format!(
            "/opds/download/beta?url={}",
            query_escape(&format!("{}/files/Children%20of%20Dune.epub", server.uri()))
        )
    );
}

/// A source slower than the search deadline is left out
#[tokio::test]
async fn test_slow_source_excluded() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/slow",
        ok(nav_feed_with_search("slow", "/slow/find?q={searchTerms}", &[])),
    )
    .await;
    mount(
        &server,
        "/slow/find",
        ok(acq_feed("late", &["Late"], None)).set_delay(Duration::from_secs(5)),
    )
    .await;
    mount(
        &server,
        "/fast",
        ok(nav_feed_with_search("fast", "/fast/find?q={searchTerms}", &[])),
    )
    .await;
    mount(&server, "/fast/find", ok(acq_feed("fast", &["Quick"], None))).await;

    let base = server.uri();
    let gateway = test_gateway(vec![
        SourceConfig::new("Slow", format!("{base}/slow")),
        SourceConfig::new("Fast", format!("{base}/fast")),
    ]);
    gateway.refresh_all(&CancellationToken::new()).await;

    let feed = gateway.search("anything").await.unwrap();
    assert_eq!(titles(&feed), vec!["Quick"]);
}

/// Search before any crawl has nothing to fan out to
#[tokio::test]
async fn test_search_without_cache() {
    let server = search_server().await;
    let gateway = test_gateway(sources(&server));

    let feed = gateway.search("dune").await.unwrap();
    assert!(feed.entries.is_empty());
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let server = search_server().await;
    let gateway = test_gateway(sources(&server));

    let err = gateway.search("   ").await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

/// Single-source search goes through the description document
#[tokio::test]
async fn test_search_source() {
    let server = search_server().await;
    let gateway = test_gateway(sources(&server));
    let upstream = format!("{}/alpha/search.xml", server.uri());

    let feed = gateway.search_source("alpha", &upstream, "dune").await.unwrap();
    assert_eq!(titles(&feed), vec!["Dune", "Dune Messiah"]);
    assert!(feed.entries[0].links[0]
        .href
        .starts_with("/opds/download/alpha?url="));

    let err = gateway
        .search_source("broken", &format!("{}/broken/find?q={{searchTerms}}", server.uri()), "dune")
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Upstream);
}
