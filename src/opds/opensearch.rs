//! OpenSearch description documents
//!
//! Upstream feeds advertise search through a `rel="search"` link that points
//! either at a description document or directly at a URL template.

use quick_xml::events::{BytesEnd, BytesStart, Event};

use super::parse::{attr, XmlCursor};
use super::render::{emit, new_writer, text_element};
use super::types::{media, ns};
use crate::utils::error::ParseError;
use crate::utils::query_escape;

/// Placeholder substituted with the user's query
pub const SEARCH_TERMS: &str = "{searchTerms}";

/// Optional template parameters removed on expansion
const OPTIONAL_PARAMS: &[&str] = &[
    "{startPage?}",
    "{startIndex?}",
    "{count?}",
    "{language?}",
    "{inputEncoding?}",
    "{outputEncoding?}",
];

/// `<Url>` element of a description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    pub media_type: String,
    pub template: String,
}

/// Parsed `<OpenSearchDescription>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenSearchDescription {
    pub short_name: String,
    pub description: String,
    pub urls: Vec<UrlTemplate>,
}

impl OpenSearchDescription {
    /// Template returning Atom results, else the first one declared
    pub fn preferred_template(&self) -> Result<&str, ParseError> {
        self.urls
            .iter()
            .find(|u| u.media_type.contains("atom"))
            .or_else(|| self.urls.first())
            .map(|u| u.template.as_str())
            .filter(|t| !t.is_empty())
            .ok_or(ParseError::NoSearchTemplate)
    }
}

/// Decode an OpenSearch description document
pub fn parse_description(input: &[u8]) -> Result<OpenSearchDescription, ParseError> {
    let mut cursor = XmlCursor::new(input);
    let mut desc = OpenSearchDescription::default();

    match cursor.root()? {
        Some((_, start, empty)) if start.local_name().as_ref() == b"OpenSearchDescription" => {
            if empty {
                return Ok(desc);
            }
        }
        _ => {
            return Err(ParseError::MissingRoot {
                expected: "OpenSearchDescription",
            })
        }
    }

    loop {
        let (e, empty) = match cursor.next()? {
            (_, Event::Start(e)) => (e, false),
            (_, Event::Empty(e)) => (e, true),
            (_, Event::End(_)) => break,
            (_, Event::Eof) => {
                return Err(ParseError::Xml("unexpected end of document".to_string()));
            }
            _ => continue,
        };

        match e.local_name().as_ref() {
            b"ShortName" => desc.short_name = cursor.text(empty)?,
            b"Description" => desc.description = cursor.text(empty)?,
            b"Url" => {
                let attrs = cursor.attributes(&e);
                desc.urls.push(UrlTemplate {
                    media_type: attr(&attrs, "type").unwrap_or_default().to_string(),
                    template: attr(&attrs, "template").unwrap_or_default().to_string(),
                });
                cursor.skip(&e, empty)?;
            }
            _ => cursor.skip(&e, empty)?,
        }
    }

    Ok(desc)
}

/// True when an href is already a query template rather than a description
pub fn is_template(href: &str) -> bool {
    href.contains(SEARCH_TERMS)
}

/// Make a relative template absolute without mangling its placeholders
///
/// URL parsing would percent-encode `{` and `}`, so `{searchTerms}` is
/// swapped for a plain token while `resolve` runs. Optional parameters are
/// dropped beforehand since expansion removes them anyway.
pub fn resolve_template(template: &str, resolve: impl Fn(&str) -> String) -> String {
    const TOKEN: &str = "opds-aggregator-search-terms";

    let mut stripped = template.replace(SEARCH_TERMS, TOKEN);
    for param in OPTIONAL_PARAMS {
        stripped = stripped.replace(param, "");
    }
    resolve(&stripped).replace(TOKEN, SEARCH_TERMS)
}

/// Substitute the query into a template and drop optional parameters
pub fn expand_template(template: &str, query: &str) -> String {
    let mut out = template.replace(SEARCH_TERMS, &query_escape(query));
    for param in OPTIONAL_PARAMS {
        out = out.replace(param, "");
    }
    out
}

/// Encode a description whose single template points at `template`
pub fn render_description(
    short_name: &str,
    description: &str,
    template: &str,
) -> Result<Vec<u8>, ParseError> {
    let mut w = new_writer();

    let mut root = BytesStart::new("OpenSearchDescription");
    root.push_attribute(("xmlns", ns::OPENSEARCH));
    emit(&mut w, Event::Start(root))?;
    text_element(&mut w, "ShortName", short_name)?;
    text_element(&mut w, "Description", description)?;

    let mut url = BytesStart::new("Url");
    url.push_attribute(("type", "application/atom+xml;profile=opds-catalog"));
    url.push_attribute(("template", template));
    emit(&mut w, Event::Empty(url))?;

    emit(&mut w, Event::End(BytesEnd::new("OpenSearchDescription")))?;
    Ok(w.into_inner())
}

/// Media type for rendered descriptions
pub fn description_content_type() -> String {
    format!("{}; charset=utf-8", media::OPENSEARCH)
}
