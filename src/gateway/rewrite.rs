//! Link rewriting into the gateway namespace
//!
//! Every link of a served document is resolved against the URL that
//! document was fetched from and then mapped to a gateway route:
//!
//! | Link | Route |
//! |---|---|
//! | acquisition or image relation | `download/{slug}?url=` |
//! | search relation | `search/{slug}?upstream=` |
//! | navigation or pagination relation, or a feed media type | `source/{slug}/{relative path}` |
//! | any other http(s) target | `download/{slug}?url=` |
//!
//! Links that already point into the gateway are left alone, so rewriting
//! is idempotent.

use super::paths::GatewayPaths;
use crate::crawler::search_href;
use crate::crawler::url::{ensure_http, relative_path, resolve_href};
use crate::opds::{Feed, Link, RelClass};

/// Where a document came from and where its links should point
#[derive(Debug, Clone, Copy)]
pub struct RewriteContext<'a> {
    /// Source slug used in every emitted path
    pub slug: &'a str,

    /// Absolute URL the document was fetched from
    pub doc_url: &'a str,

    /// Source root URL that browse paths are relative to
    pub root_url: &'a str,

    pub paths: &'a GatewayPaths,
}

/// Copy of `feed` with every feed-level and entry link rewritten
pub fn rewrite_feed(feed: &Feed, ctx: &RewriteContext<'_>) -> Feed {
    let mut out = feed.clone();
    rewrite_links(&mut out.links, ctx);
    for entry in &mut out.entries {
        rewrite_links(&mut entry.links, ctx);
    }
    out
}

fn rewrite_links(links: &mut [Link], ctx: &RewriteContext<'_>) {
    for link in links {
        if let Some(href) = rewrite_href(link, ctx) {
            link.href = href;
        }
    }
}

/// Gateway href for `link`, or `None` when it must stay as it is
pub fn rewrite_href(link: &Link, ctx: &RewriteContext<'_>) -> Option<String> {
    if ctx.paths.is_local(&link.href) {
        return None;
    }

    let class = link.rel_class();
    if class == RelClass::Search {
        let upstream = search_href(ctx.doc_url, &link.href);
        return is_http(&upstream).then(|| ctx.paths.search(ctx.slug, &upstream));
    }

    let absolute = resolve_href(ctx.doc_url, &link.href);
    if !is_http(&absolute) {
        return None;
    }

    let href = match class {
        RelClass::Acquisition | RelClass::Image => ctx.paths.download(ctx.slug, &absolute),
        RelClass::Navigation | RelClass::Pagination => {
            ctx.paths.source(ctx.slug, &relative_path(ctx.root_url, &absolute))
        }
        _ if link.media_kind().is_feed() => {
            ctx.paths.source(ctx.slug, &relative_path(ctx.root_url, &absolute))
        }
        _ => ctx.paths.download(ctx.slug, &absolute),
    };
    Some(href)
}

fn is_http(url: &str) -> bool {
    ensure_http(url).is_ok()
}
