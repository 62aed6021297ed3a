//! Upstream URL resolution
//!
//! Converts between absolute upstream URLs and paths relative to a source's
//! root URL, in both directions:
//!
//! - [`resolve_href`] turns a link href into an absolute URL using the
//!   document it was found in as base
//! - [`relative_path`] computes the source-relative path of an absolute URL,
//!   falling back to the `ext?url=` escape hatch when no such path exists
//! - [`reverse_resolve`] rebuilds the upstream URL from a source-relative path
//!
//! For every URL that does not need the escape hatch,
//! `reverse_resolve(root, relative_path(root, url))` yields `url` again.

use url::Url;

use crate::utils::error::FetchError;
use crate::utils::query_escape;

/// Path segment used for URLs that cannot be expressed relative to a root
pub const EXT_SEGMENT: &str = "ext";

/// Escape-hatch path for an absolute URL
///
/// # Examples
///
/// ```
/// use opds_aggregator::crawler::url::ext_path;
///
/// assert_eq!(ext_path("https://other.org/x"), "ext?url=https%3A%2F%2Fother.org%2Fx");
/// ```
pub fn ext_path(absolute: &str) -> String {
    format!("{EXT_SEGMENT}?url={}", query_escape(absolute))
}

/// Resolve a link href against the URL of the document containing it
///
/// Absolute http(s) hrefs are returned unchanged. For relative path
/// references the base path is treated as a directory, so `foo` against
/// `https://ex.org/cat` gives `https://ex.org/cat/foo`. Hrefs that cannot be
/// resolved are returned as-is.
///
/// # Examples
///
/// ```
/// use opds_aggregator::crawler::url::resolve_href;
///
/// assert_eq!(resolve_href("https://ex.org/cat", "books"), "https://ex.org/cat/books");
/// assert_eq!(resolve_href("https://ex.org/cat/", "/top"), "https://ex.org/top");
/// ```
pub fn resolve_href(base: &str, href: &str) -> String {
    if is_absolute_http(href) {
        return href.to_string();
    }

    let Ok(mut base_url) = Url::parse(base) else {
        return href.to_string();
    };

    if is_relative_path_ref(href) && !base_url.path().ends_with('/') {
        let dir = format!("{}/", base_url.path());
        base_url.set_path(&dir);
    }

    match base_url.join(href) {
        Ok(u) => u.to_string(),
        Err(_) => href.to_string(),
    }
}

fn is_absolute_http(href: &str) -> bool {
    let lower = href.get(..8).map(str::to_ascii_lowercase).unwrap_or_default();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A reference made of a path that does not start at the host root
fn is_relative_path_ref(href: &str) -> bool {
    if href.is_empty() || href.starts_with(['/', '?', '#']) {
        return false;
    }
    // scheme:... is absolute
    let scheme_end = href.find(':');
    let first_delim = href.find(['/', '?', '#']);
    match (scheme_end, first_delim) {
        (Some(c), Some(d)) => c > d,
        (Some(_), None) => false,
        _ => true,
    }
}

/// Path of `full` relative to the source root `root`, plus its query string
///
/// The root's path is a directory prefix: `https://ex.org/cat` owns
/// `/cat/...` but not `/catalog`. A URL on another scheme, host or port, or
/// outside the root's path, is expressed through [`ext_path`] instead.
///
/// # Examples
///
/// ```
/// use opds_aggregator::crawler::url::relative_path;
///
/// let root = "https://ex.org/cat/";
/// assert_eq!(relative_path(root, "https://ex.org/cat/books/scifi"), "books/scifi");
/// assert_eq!(relative_path(root, "https://ex.org/cat/new?page=2"), "new?page=2");
/// assert_eq!(relative_path(root, "https://ex.org/other"), "ext?url=https%3A%2F%2Fex.org%2Fother");
/// ```
pub fn relative_path(root: &str, full: &str) -> String {
    let (Ok(root_url), Ok(full_url)) = (Url::parse(root), Url::parse(full)) else {
        return ext_path(full);
    };

    if root_url.scheme() != full_url.scheme()
        || root_url.host_str() != full_url.host_str()
        || root_url.port_or_known_default() != full_url.port_or_known_default()
    {
        return ext_path(full);
    }

    let root_dir = root_url.path().trim_end_matches('/');
    let full_path = full_url.path();

    let mut rel = if full_path.trim_end_matches('/') == root_dir {
        String::new()
    } else {
        match full_path
            .strip_prefix(root_dir)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            Some(rest) => rest.to_string(),
            None => return ext_path(full),
        }
    };

    if let Some(query) = full_url.query().filter(|q| !q.is_empty()) {
        rel.push('?');
        rel.push_str(query);
    }
    rel
}

/// Rebuild an upstream URL from the source root and a relative path
///
/// Any query string on the root is discarded first so it never ends up in
/// the middle of the reconstructed path.
///
/// # Examples
///
/// ```
/// use opds_aggregator::crawler::url::reverse_resolve;
///
/// assert_eq!(
///     reverse_resolve("https://ex.org/cat/?lang=en", "/books/scifi", "page=2"),
///     "https://ex.org/cat/books/scifi?page=2"
/// );
/// ```
pub fn reverse_resolve(root: &str, sub_path: &str, query: &str) -> String {
    let root = root.split(['?', '#']).next().unwrap_or(root);
    let mut url = format!(
        "{}/{}",
        root.trim_end_matches('/'),
        sub_path.trim_start_matches('/')
    );
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Parse a URL the aggregator is about to fetch, allowing only http(s)
pub fn ensure_http(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw).map_err(|_| FetchError::InvalidUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(FetchError::InvalidUrl(raw.to_string())),
        _ => Err(FetchError::UnsupportedScheme(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_directory_base() {
        assert_eq!(
            resolve_href("https://ex.org/opds", "foo"),
            "https://ex.org/opds/foo"
        );
        assert_eq!(
            resolve_href("https://ex.org/opds/", "foo/bar?x=1"),
            "https://ex.org/opds/foo/bar?x=1"
        );
        assert_eq!(
            resolve_href("https://ex.org/opds/new", "../old"),
            "https://ex.org/opds/old"
        );
    }

    #[test]
    fn test_resolve_non_path_refs() {
        assert_eq!(
            resolve_href("https://ex.org/opds/new", "?page=2"),
            "https://ex.org/opds/new?page=2"
        );
        assert_eq!(
            resolve_href("https://ex.org/opds/new", "/search.xml"),
            "https://ex.org/search.xml"
        );
        assert_eq!(
            resolve_href("https://ex.org/opds", "//cdn.ex.org/c.jpg"),
            "https://cdn.ex.org/c.jpg"
        );
    }

    #[test]
    fn test_resolve_absolute_untouched() {
        assert_eq!(
            resolve_href("https://ex.org/opds", "https://other.org/x"),
            "https://other.org/x"
        );
        assert_eq!(resolve_href("not a url", "foo"), "foo");
    }

    #[test]
    fn test_relative_path_cases() {
        let root = "https://ex.org/cat/";
        assert_eq!(relative_path(root, "https://ex.org/cat/"), "");
        assert_eq!(relative_path(root, "https://ex.org/cat"), "");
        assert_eq!(relative_path(root, "https://ex.org/cat/?p=2"), "?p=2");
        assert_eq!(relative_path(root, "https://ex.org/cat/a/"), "a/");
        assert_eq!(
            relative_path(root, "https://ex.org/catalog/x"),
            "ext?url=https%3A%2F%2Fex.org%2Fcatalog%2Fx"
        );
        assert_eq!(
            relative_path(root, "http://ex.org/cat/a"),
            "ext?url=http%3A%2F%2Fex.org%2Fcat%2Fa"
        );
        assert_eq!(
            relative_path(root, "https://ex.org:8443/cat/a"),
            "ext?url=https%3A%2F%2Fex.org%3A8443%2Fcat%2Fa"
        );
    }

    #[test]
    fn test_relative_path_host_root() {
        assert_eq!(relative_path("https://ex.org", "https://ex.org/a/b"), "a/b");
        assert_eq!(
            relative_path("https://ex.org/", "https://other.org/x"),
            "ext?url=https%3A%2F%2Fother.org%2Fx"
        );
    }

    #[test]
    fn test_reverse_resolve() {
        assert_eq!(
            reverse_resolve("https://ex.org/cat/", "books/scifi", ""),
            "https://ex.org/cat/books/scifi"
        );
        assert_eq!(
            reverse_resolve("https://ex.org/cat", "", "p=2"),
            "https://ex.org/cat/?p=2"
        );
        assert_eq!(
            reverse_resolve("https://ex.org/opds?lang=en", "a/", ""),
            "https://ex.org/opds/a/"
        );
    }

    #[test]
    fn test_round_trip_example() {
        let root = "https://ex.org/cat/";
        let abs = resolve_href(root, "books/scifi");
        let rel = relative_path(root, &abs);
        assert_eq!(rel, "books/scifi");
        let (path, query) = rel.split_once('?').unwrap_or((&rel, ""));
        assert_eq!(reverse_resolve(root, path, query), abs);
    }

    #[test]
    fn test_ensure_http() {
        assert!(ensure_http("https://ex.org/a.epub").is_ok());
        assert!(matches!(
            ensure_http("file:///etc/passwd"),
            Err(FetchError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            ensure_http("not a url"),
            Err(FetchError::InvalidUrl(_))
        ));
    }
}
