//! Property tests for URL mapping between upstream and gateway paths

use opds_aggregator::crawler::url::{ext_path, relative_path, resolve_href, reverse_resolve};
use opds_aggregator::utils::query_param;
use proptest::prelude::*;

fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9_-]{0,8}"
}

fn query() -> impl Strategy<Value = String> {
    prop::option::of(("[a-z]{1,5}", "[a-z0-9]{1,5}")).prop_map(|pair| {
        pair.map(|(k, v)| format!("{k}={v}")).unwrap_or_default()
    })
}

proptest! {
    /// A URL below the root maps back to itself through its relative path
    #[test]
    fn prop_relative_path_round_trip(
        root_segs in prop::collection::vec(segment(), 0..3),
        sub_segs in prop::collection::vec(segment(), 1..4),
        q in query(),
    ) {
        let root = format!("https://ex.org/{}", root_segs.join("/"));
        let mut full = format!("{}/{}", root.trim_end_matches('/'), sub_segs.join("/"));
        if !q.is_empty() {
            full.push('?');
            full.push_str(&q);
        }

        let rel = relative_path(&root, &full);
        prop_assert!(!rel.starts_with("ext?"), "{full} escaped the root {root}");

        let (path, query) = rel.split_once('?').unwrap_or((rel.as_str(), ""));
        prop_assert_eq!(reverse_resolve(&root, path, query), full);
    }

    /// A URL on another host always travels through the ext escape hatch
    #[test]
    fn prop_foreign_host_uses_ext(
        segs in prop::collection::vec(segment(), 0..3),
        host in "[a-z]{3,8}",
    ) {
        let full = format!("https://{host}.net/{}", segs.join("/"));

        let rel = relative_path("https://ex.org/opds", &full);
        prop_assert_eq!(&rel, &ext_path(&full));

        let (_, q) = rel.split_once('?').unwrap();
        prop_assert_eq!(query_param(q, "url"), Some(full));
    }

    /// Relative hrefs always resolve below the document's own path
    #[test]
    fn prop_relative_href_stays_below_base(
        base_segs in prop::collection::vec(segment(), 1..3),
        href in segment(),
    ) {
        let base = format!("https://ex.org/{}", base_segs.join("/"));
        let resolved = resolve_href(&base, &href);
        prop_assert_eq!(resolved, format!("{base}/{href}"));
    }
}

#[test]
fn test_root_itself_is_empty_path() {
    assert_eq!(relative_path("https://ex.org/opds", "https://ex.org/opds"), "");
    assert_eq!(relative_path("https://ex.org/opds", "https://ex.org/opds/"), "");
}

#[test]
fn test_sibling_prefix_is_not_below_root() {
    assert_eq!(
        relative_path("https://ex.org/cat", "https://ex.org/catalog"),
        ext_path("https://ex.org/catalog")
    );
}

#[test]
fn test_port_mismatch_uses_ext() {
    assert_eq!(
        relative_path("http://ex.org:8080/opds", "http://ex.org/opds/a"),
        ext_path("http://ex.org/opds/a")
    );
}
