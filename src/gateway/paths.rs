//! Gateway URL namespace
//!
//! Every link handed to a client points at one of these routes below the
//! configured base path.

use crate::opds::opensearch::SEARCH_TERMS;
use crate::utils::query_escape;

/// Builds and recognizes gateway-local paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPaths {
    /// Base path with a trailing slash, or empty for relative paths
    prefix: String,
}

impl GatewayPaths {
    /// Paths mounted under `base_path` (`"/opds"`, or `""` for relative paths)
    pub fn new(base_path: &str) -> Self {
        let trimmed = base_path.trim_end_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The aggregated root feed
    pub fn root(&self) -> String {
        match self.prefix.trim_end_matches('/') {
            "" => "/".to_string(),
            base => base.to_string(),
        }
    }

    /// Browse path of a source document, `rel` being source-root relative
    pub fn source(&self, slug: &str, rel: &str) -> String {
        format!("{}source/{slug}/{rel}", self.prefix)
    }

    /// Download proxy path for an absolute upstream URL
    pub fn download(&self, slug: &str, absolute: &str) -> String {
        format!("{}download/{slug}?url={}", self.prefix, query_escape(absolute))
    }

    /// Search proxy path for an upstream description or template URL
    pub fn search(&self, slug: &str, upstream: &str) -> String {
        format!("{}search/{slug}?upstream={}", self.prefix, query_escape(upstream))
    }

    /// Template served to readers in a generated OpenSearch description
    pub fn search_template(&self, slug: &str, upstream: &str) -> String {
        format!("{}&q={SEARCH_TERMS}", self.search(slug, upstream))
    }

    /// Fan-out search template advertised by the root feed
    pub fn global_search_template(&self) -> String {
        format!("{}search?q={SEARCH_TERMS}", self.prefix)
    }

    /// Fan-out search results for a concrete query
    pub fn global_search(&self, query: &str) -> String {
        format!("{}search?q={}", self.prefix, query_escape(query))
    }

    /// True when `href` already points into the gateway
    ///
    /// Browse paths match by prefix alone. Download and search paths only
    /// match when they carry the query marker the gateway itself emits, so an
    /// upstream that happens to serve `/opds/download/...` is still proxied.
    pub fn is_local(&self, href: &str) -> bool {
        let Some(rest) = href.strip_prefix(self.prefix.as_str()) else {
            return false;
        };

        if rest.starts_with("source/") {
            return true;
        }
        if let Some(tail) = rest.strip_prefix("download/") {
            return tail.contains("?url=");
        }
        if let Some(tail) = rest.strip_prefix("search/") {
            return tail.contains("?upstream=") || tail.contains("?q=");
        }
        rest.starts_with("search?q=")
    }
}

impl Default for GatewayPaths {
    fn default() -> Self {
        Self::new("/opds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let paths = GatewayPaths::default();
        assert_eq!(paths.root(), "/opds");
        assert_eq!(paths.source("ex", ""), "/opds/source/ex/");
        assert_eq!(paths.source("ex", "books?p=2"), "/opds/source/ex/books?p=2");
        assert_eq!(
            paths.download("ex", "https://ex.org/b.epub"),
            "/opds/download/ex?url=https%3A%2F%2Fex.org%2Fb.epub"
        );
        assert_eq!(
            paths.search_template("ex", "https://ex.org/s"),
            "/opds/search/ex?upstream=https%3A%2F%2Fex.org%2Fs&q={searchTerms}"
        );
        assert_eq!(paths.global_search_template(), "/opds/search?q={searchTerms}");
    }

    #[test]
    fn test_relative_mode() {
        let paths = GatewayPaths::new("");
        assert_eq!(paths.source("mysrc", "books/scifi"), "source/mysrc/books/scifi");
        assert_eq!(paths.root(), "/");
        assert_eq!(GatewayPaths::new("/opds/"), GatewayPaths::default());
    }

    #[test]
    fn test_is_local() {
        let paths = GatewayPaths::default();
        assert!(paths.is_local("/opds/source/ex/books"));
        assert!(paths.is_local("/opds/download/ex?url=https%3A%2F%2Fex.org%2Fx"));
        assert!(paths.is_local("/opds/search/ex?upstream=x"));
        assert!(paths.is_local("/opds/search?q=dune"));

        assert!(!paths.is_local("/opds/download/book.epub"));
        assert!(!paths.is_local("/opds/new"));
        assert!(!paths.is_local("https://ex.org/opds/source/ex"));
        assert!(!paths.is_local("books/scifi"));
    }
}
