//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use opds_aggregator::config::{Config, SourceConfig};
use opds_aggregator::crawler::{Crawler, FeedFetcher};
use opds_aggregator::gateway::Gateway;

pub const NAVIGATION: &str = "application/atom+xml;profile=opds-catalog;kind=navigation";
pub const ACQUISITION: &str = "application/atom+xml;profile=opds-catalog;kind=acquisition";

/// Fetcher without effective rate limiting
pub fn test_fetcher() -> Arc<FeedFetcher> {
    Arc::new(FeedFetcher::with_limits(1000, 16, Duration::from_secs(5), "opds-aggregator-test").unwrap())
}

pub fn test_crawler() -> Arc<Crawler> {
    Arc::new(Crawler::new(test_fetcher(), 4))
}

/// Configuration with the given sources and test-friendly limits
pub fn test_config(feeds: Vec<SourceConfig>) -> Config {
    let mut config = Config::default();
    config.crawler.rate_limit = 1000;
    config.crawler.search_timeout_secs = 2;
    config.feeds = feeds;
    config
}

pub fn test_gateway(feeds: Vec<SourceConfig>) -> Gateway {
    Gateway::with_crawler(test_config(feeds), test_crawler())
}

/// Navigation feed whose entries point at `(title, href)` sub-catalogs
pub fn nav_feed(id: &str, children: &[(&str, &str)]) -> String {
    let entries: String = children
        .iter()
        .map(|(title, href)| {
            format!(
                r#"<entry>
  <id>{id}:{title}</id>
  <title>{title}</title>
  <updated>2024-01-01T00:00:00Z</updated>
  <link rel="subsection" href="{href}" type="{NAVIGATION}"/>
</entry>"#
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opds="http://opds-spec.org/2010/catalog">
  <id>{id}</id>
  <title>{id}</title>
  <updated>2024-01-01T00:00:00Z</updated>
  {entries}
</feed>"#
    )
}

/// Navigation feed advertising a search link
pub fn nav_feed_with_search(id: &str, search_href: &str, children: &[(&str, &str)]) -> String {
    nav_feed(id, children).replacen(
        "<updated>",
        &format!(
            r#"<link rel="search" href="{search_href}" type="application/opensearchdescription+xml"/>
  <updated>"#
        ),
        1,
    )
}

/// Acquisition feed listing `books`, optionally linking a next page
pub fn acq_feed(id: &str, books: &[&str], next: Option<&str>) -> String {
    let entries: String = books
        .iter()
        .map(|title| {
            format!(
                r#"<entry>
  <id>urn:book:{title}</id>
  <title>{title}</title>
  <updated>2024-01-01T00:00:00Z</updated>
  <link rel="http://opds-spec.org/acquisition" href="/files/{title}.epub" type="application/epub+zip"/>
</entry>"#
            )
        })
        .collect();
    let next = next
        .map(|href| format!(r#"<link rel="next" href="{href}" type="{ACQUISITION}"/>"#))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>{id}</id>
  <title>{id}</title>
  <updated>2024-01-01T00:00:00Z</updated>
  {next}
  {entries}
</feed>"#
    )
}

/// OpenSearch description with one Atom template
pub fn description(template: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OpenSearchDescription xmlns="http://a9.com/-/spec/opensearch/1.1/">
  <ShortName>Test</ShortName>
  <Description>Test search</Description>
  <Url type="application/atom+xml" template="{template}"/>
</OpenSearchDescription>"#
    )
}

/// Entry titles of a feed, in order
pub fn titles(feed: &opds_aggregator::opds::Feed) -> Vec<String> {
    feed.entries.iter().map(|e| e.title.clone()).collect()
}
