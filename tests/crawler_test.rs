//! Integration tests for the crawler using wiremock
//!
//! These tests validate crawl depth, failure isolation, pagination and
//! cancellation against mock catalogs.

mod common;

use common::{acq_feed, nav_feed, nav_feed_with_search, test_crawler, titles};
use opds_aggregator::config::SourceConfig;
use opds_aggregator::opds::Rel;
use opds_aggregator::utils::error::CrawlerError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Depth 0 fetches only the root
#[tokio::test]
async fn test_depth_zero_fetches_root_only() {
    let server = MockServer::start().await;
    mount(&server, "/opds", nav_feed("root", &[("Books", "books")])).await;
    Mock::given(method("GET"))
        .and(path("/opds/books"))
        .respond_with(ResponseTemplate::new(200).set_body_string(acq_feed("books", &["a"], None)))
        .expect(0)
        .mount(&server)
        .await;

    let source = SourceConfig::new("Mock", format!("{}/opds", server.uri()));
    let tree = test_crawler()
        .crawl(&source, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tree.feed.title, "root");
    assert_eq!(tree.child_count().await, 0);
    assert_eq!(tree.node_count().await, 1);
}

/// Depth N stores documents at most N levels down
#[tokio::test]
async fn test_depth_bound() {
    let server = MockServer::start().await;
    mount(&server, "/opds", nav_feed("root", &[("Genres", "genres")])).await;
    mount(&server, "/opds/genres", nav_feed("genres", &[("SciFi", "scifi")])).await;
    mount(
        &server,
        "/opds/genres/scifi",
        nav_feed("scifi", &[("Deep", "/opds/deep")]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/opds/deep"))
        .respond_with(ResponseTemplate::new(200).set_body_string(nav_feed("deep", &[])))
        .expect(0)
        .mount(&server)
        .await;

    let source = SourceConfig::new("Mock", format!("{}/opds", server.uri())).with_depth(2);
    let tree = test_crawler()
        .crawl(&source, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tree.depth().await, 2);
    assert_eq!(tree.child_keys().await, vec!["genres".to_string()]);

    let genres = tree.child("genres").await.unwrap();
    assert_eq!(
        genres.child_keys().await,
        vec!["genres/scifi".to_string()]
    );
    assert!(tree.find("deep").await.is_none());
}

/// Acquisition documents are stored but never descended into
#[tokio::test]
async fn test_acquisition_feed_not_descended() {
    let server = MockServer::start().await;
    mount(&server, "/opds", nav_feed("root", &[("New", "new")])).await;

    let mut new_books = acq_feed("new", &["a", "b"], None);
    new_books = new_books.replace(
        "</feed>",
        &format!(
            r#"<entry><id>x</id><title>More</title><updated>2024-01-01T00:00:00Z</updated>
<link rel="subsection" href="more" type="{}"/></entry></feed>"#,
            common::NAVIGATION
        ),
    );
    mount(&server, "/opds/new", new_books).await;
    Mock::given(method("GET"))
        .and(path("/opds/new/more"))
        .respond_with(ResponseTemplate::new(200).set_body_string(nav_feed("more", &[])))
        .expect(0)
        .mount(&server)
        .await;

    let source = SourceConfig::new("Mock", format!("{}/opds", server.uri())).with_depth(3);
    let tree = test_crawler()
        .crawl(&source, &CancellationToken::new())
        .await
        .unwrap();

    let new = tree.child("new").await.unwrap();
    assert_eq!(titles(&new.feed), vec!["a", "b", "More"]);
    assert_eq!(new.child_count().await, 0);
}

/// A failing child is skipped while its siblings are kept
#[tokio::test]
async fn test_partial_failure() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/opds",
        nav_feed("root", &[("Good", "good"), ("Bad", "bad"), ("Broken", "broken")]),
    )
    .await;
    mount(&server, "/opds/good", acq_feed("good", &["a"], None)).await;
    Mock::given(method("GET"))
        .and(path("/opds/bad"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount(&server, "/opds/broken", "<html>not a feed</html>".to_string()).await;

    let source = SourceConfig::new("Mock", format!("{}/opds", server.uri())).with_depth(1);
    let tree = test_crawler()
        .crawl(&source, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tree.child_keys().await, vec!["good".to_string()]);
}

/// A failing root fails the crawl
#[tokio::test]
async fn test_root_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/opds"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = SourceConfig::new("Mock", format!("{}/opds", server.uri()));
    let result = test_crawler()
        .crawl(&source, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(CrawlerError::Fetch(_))));
}

/// Cycles through already visited documents are not refetched
#[tokio::test]
async fn test_cycle_visited_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/opds"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(nav_feed("root", &[("A", "a"), ("B", "b")])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/opds/a"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(nav_feed("a", &[("Root", "/opds"), ("B", "/opds/b")])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/opds/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string(nav_feed("b", &[("A", "/opds/a")])))
        .expect(1)
        .mount(&server)
        .await;

    let source = SourceConfig::new("Mock", format!("{}/opds", server.uri())).with_depth(3);
    let tree = test_crawler()
        .crawl(&source, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tree.node_count().await, 3);
}

/// The root's search link is kept as an absolute URL
#[tokio::test]
async fn test_search_url_discovered() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/opds",
        nav_feed_with_search("root", "/opds/search.xml", &[]),
    )
    .await;

    let source = SourceConfig::new("Mock", format!("{}/opds", server.uri()));
    let tree = test_crawler()
        .crawl(&source, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        tree.search_url.as_deref(),
        Some(format!("{}/opds/search.xml", server.uri()).as_str())
    );
}

async fn paginated_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/opds/all"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(acq_feed("p2", &["c", "d"], Some("/opds/all?page=3"))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/opds/all"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(acq_feed("p3", &["e"], None)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/opds/all"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(acq_feed("p1", &["a", "b"], Some("/opds/all?page=2"))),
        )
        .mount(&server)
        .await;
    server
}

/// A page budget of 0 follows every page and drops the next link
#[tokio::test]
async fn test_pagination_unbounded() {
    let server = paginated_server().await;
    let url = format!("{}/opds/all", server.uri());

    let page = test_crawler()
        .fetch_with_page_limit(&url, None, 0)
        .await
        .unwrap();

    assert_eq!(titles(&page.feed), vec!["a", "b", "c", "d", "e"]);
    assert!(!page.has_more);
    assert!(page.feed.next_link().is_none());
}

/// A page budget of 1 keeps the first page and an absolute next link
#[tokio::test]
async fn test_pagination_single_page() {
    let server = paginated_server().await;
    let url = format!("{}/opds/all", server.uri());

    let page = test_crawler()
        .fetch_with_page_limit(&url, None, 1)
        .await
        .unwrap();

    assert_eq!(titles(&page.feed), vec!["a", "b"]);
    assert!(page.has_more);
    let next = format!("{}/opds/all?page=2", server.uri());
    assert_eq!(page.next_url.as_deref(), Some(next.as_str()));
    assert_eq!(page.feed.link(&Rel::Next).unwrap().href, next);
}

/// A next link pointing back at a seen page ends pagination
#[tokio::test]
async fn test_pagination_loop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/opds/loop"))
        .respond_with(ResponseTemplate::new(200).set_body_string(acq_feed("loop", &["a"], Some("/opds/loop"))))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/opds/loop", server.uri());
    let page = test_crawler()
        .fetch_with_page_limit(&url, None, 0)
        .await
        .unwrap();

    assert_eq!(titles(&page.feed), vec!["a"]);
    assert!(!page.has_more);
}

/// A cancelled crawl returns no tree
#[tokio::test]
async fn test_cancellation() {
    let server = MockServer::start().await;
    mount(&server, "/opds", nav_feed("root", &[("Slow", "slow")])).await;
    Mock::given(method("GET"))
        .and(path("/opds/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(nav_feed("slow", &[]))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let source = SourceConfig::new("Mock", format!("{}/opds", server.uri())).with_depth(1);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = test_crawler().crawl(&source, &cancel).await;
    assert!(matches!(result, Err(CrawlerError::Cancelled)));
}
