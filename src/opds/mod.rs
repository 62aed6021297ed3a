//! OPDS catalog documents
//!
//! Typed Atom/OPDS model, a lenient decoder, the encoder and OpenSearch
//! description handling.

pub mod opensearch;
pub mod parse;
pub mod render;
pub mod types;

pub use parse::parse_feed;
pub use render::{render_feed, XML_DECLARATION};
pub use types::{
    is_acquisition_link, is_image_link, is_navigation_document, is_search_link,
    is_sub_catalog_link, media, ns, Category, Entry, Feed, IndirectAcquisition, Link, MediaKind,
    Person, Price, Rel, RelClass, Text,
};

/// Content type of every served feed
pub const FEED_CONTENT_TYPE: &str = "application/atom+xml; charset=utf-8";
