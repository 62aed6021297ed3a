//! Gateway-local pagination
//!
//! Large documents are served in slices selected by the reserved
//! `agg_offset` and `agg_limit` query parameters. These parameters belong to
//! the gateway: they are removed before a query is used as a cache key or
//! forwarded upstream.

use crate::opds::{media, Feed, Link, Rel};

/// Slice start parameter
pub const OFFSET_PARAM: &str = "agg_offset";

/// Slice size parameter
pub const LIMIT_PARAM: &str = "agg_limit";

/// Slice requested by a client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl PageRequest {
    /// Read the reserved parameters from a raw query string
    ///
    /// Values that do not parse as unsigned integers are ignored.
    pub fn from_query(raw_query: &str) -> Self {
        let mut req = Self::default();
        for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
            match key.as_ref() {
                OFFSET_PARAM => req.offset = value.parse().unwrap_or(0),
                LIMIT_PARAM => req.limit = value.parse().ok(),
                _ => {}
            }
        }
        req
    }

    /// Effective slice size, falling back to the source and server defaults
    ///
    /// 0 means unlimited.
    pub fn effective_limit(&self, source_max: usize, default_max: usize) -> usize {
        match self.limit {
            Some(limit) => limit,
            None if source_max > 0 => source_max,
            None => default_max,
        }
    }
}

/// Raw query without the reserved parameters, other pairs kept verbatim
pub fn strip_local_params(raw_query: &str) -> String {
    raw_query
        .split('&')
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            !pair.is_empty() && key != OFFSET_PARAM && key != LIMIT_PARAM
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Cut `feed` down to one slice and link the neighbouring slices
///
/// `base_href` is the gateway path of the document without the reserved
/// parameters. Upstream pagination links are replaced by gateway ones,
/// except that an upstream `next` link survives on the final slice when
/// `upstream_has_more` is set, so a reader can continue past what was
/// merged. A `limit` of 0 leaves the document untouched.
pub fn paginate(
    feed: &mut Feed,
    offset: usize,
    limit: usize,
    base_href: &str,
    upstream_has_more: bool,
) {
    if limit == 0 {
        return;
    }

    let total = feed.entries.len();
    let start = offset.min(total);
    let end = start.saturating_add(limit).min(total);
    feed.entries.truncate(end);
    feed.entries.drain(..start);

    let upstream_next = feed.next_link().cloned();
    for rel in [Rel::First, Rel::Previous, Rel::Next, Rel::Last] {
        feed.remove_links(&rel);
    }

    let page_link = |rel: Rel, at: usize| {
        Link::new(rel, slice_href(base_href, at, limit)).with_type(media::OPDS_ACQUISITION)
    };

    feed.links.push(page_link(Rel::First, 0));
    if start > 0 {
        feed.links.push(page_link(Rel::Previous, start.saturating_sub(limit)));
    }
    if end < total {
        feed.links.push(page_link(Rel::Next, end));
    } else if upstream_has_more {
        if let Some(next) = upstream_next {
            feed.links.push(next);
        }
    }
    let last = if total == 0 { 0 } else { (total - 1) / limit * limit };
    feed.links.push(page_link(Rel::Last, last));

    feed.total_results = Some(total as u64);
    feed.items_per_page = Some(limit as u64);
    feed.start_index = Some(start as u64 + 1);
}

fn slice_href(base_href: &str, offset: usize, limit: usize) -> String {
    let sep = if base_href.contains('?') { '&' } else { '?' };
    format!("{base_href}{sep}{OFFSET_PARAM}={offset}&{LIMIT_PARAM}={limit}")
}
