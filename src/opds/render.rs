//! Atom/OPDS encoder

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::types::{ns, Entry, Feed, IndirectAcquisition, Link, Person, Text};
use crate::utils::error::ParseError;

/// Standard XML declaration emitted before every document
pub const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

pub(super) type XmlWriter = Writer<Vec<u8>>;

pub(super) fn new_writer() -> XmlWriter {
    let mut buf = Vec::with_capacity(8 * 1024);
    buf.extend_from_slice(XML_DECLARATION.as_bytes());
    Writer::new_with_indent(buf, b' ', 2)
}

pub(super) fn emit(w: &mut XmlWriter, event: Event<'_>) -> Result<(), ParseError> {
    w.write_event(event)
        .map_err(|e| ParseError::Serialize(e.to_string()))
}

pub(super) fn text_element(w: &mut XmlWriter, name: &str, value: &str) -> Result<(), ParseError> {
    emit(w, Event::Start(BytesStart::new(name)))?;
    emit(w, Event::Text(BytesText::new(value)))?;
    emit(w, Event::End(BytesEnd::new(name)))
}

fn optional_element(w: &mut XmlWriter, name: &str, value: Option<&str>) -> Result<(), ParseError> {
    match value {
        Some(v) => text_element(w, name, v),
        None => Ok(()),
    }
}

/// Encode a feed with the XML declaration and all OPDS namespace prefixes
pub fn render_feed(feed: &Feed) -> Result<Vec<u8>, ParseError> {
    let mut w = new_writer();

    let mut root = BytesStart::new("feed");
    root.push_attribute(("xmlns", ns::ATOM));
    root.push_attribute(("xmlns:dc", ns::DC));
    root.push_attribute(("xmlns:opds", ns::OPDS));
    root.push_attribute(("xmlns:opensearch", ns::OPENSEARCH));
    root.push_attribute(("xmlns:thr", ns::THR));
    root.push_attribute(("xmlns:fh", ns::FH));
    emit(&mut w, Event::Start(root))?;

    text_element(&mut w, "id", &feed.id)?;
    text_element(&mut w, "title", &feed.title)?;
    text_element(&mut w, "updated", &feed.updated)?;
    optional_element(&mut w, "icon", feed.icon.as_deref())?;
    if let Some(author) = &feed.author {
        write_person(&mut w, author)?;
    }
    for link in &feed.links {
        write_link(&mut w, link)?;
    }
    for entry in &feed.entries {
        write_entry(&mut w, entry)?;
    }

    if let Some(n) = feed.total_results {
        text_element(&mut w, "opensearch:totalResults", &n.to_string())?;
    }
    if let Some(n) = feed.items_per_page {
        text_element(&mut w, "opensearch:itemsPerPage", &n.to_string())?;
    }
    if let Some(n) = feed.start_index {
        text_element(&mut w, "opensearch:startIndex", &n.to_string())?;
    }
    if feed.complete {
        emit(&mut w, Event::Empty(BytesStart::new("fh:complete")))?;
    }

    emit(&mut w, Event::End(BytesEnd::new("feed")))?;
    Ok(w.into_inner())
}

fn write_entry(w: &mut XmlWriter, entry: &Entry) -> Result<(), ParseError> {
    emit(w, Event::Start(BytesStart::new("entry")))?;

    text_element(w, "id", &entry.id)?;
    text_element(w, "title", &entry.title)?;
    text_element(w, "updated", &entry.updated)?;
    optional_element(w, "published", entry.published.as_deref())?;
    if let Some(summary) = &entry.summary {
        write_text(w, "summary", summary)?;
    }
    if let Some(content) = &entry.content {
        write_text(w, "content", content)?;
    }
    optional_element(w, "rights", entry.rights.as_deref())?;
    optional_element(w, "dc:language", entry.language.as_deref())?;
    optional_element(w, "dc:issued", entry.issued.as_deref())?;
    optional_element(w, "dc:publisher", entry.publisher.as_deref())?;
    for author in &entry.authors {
        write_person(w, author)?;
    }
    for category in &entry.categories {
        let mut el = BytesStart::new("category");
        el.push_attribute(("term", category.term.as_str()));
        if let Some(label) = &category.label {
            el.push_attribute(("label", label.as_str()));
        }
        if let Some(scheme) = &category.scheme {
            el.push_attribute(("scheme", scheme.as_str()));
        }
        emit(w, Event::Empty(el))?;
    }
    for link in &entry.links {
        write_link(w, link)?;
    }
    for price in &entry.prices {
        let mut el = BytesStart::new("opds:price");
        el.push_attribute(("currencycode", price.currency_code.as_str()));
        emit(w, Event::Start(el))?;
        emit(w, Event::Text(BytesText::new(&price.value)))?;
        emit(w, Event::End(BytesEnd::new("opds:price")))?;
    }

    emit(w, Event::End(BytesEnd::new("entry")))
}

fn write_person(w: &mut XmlWriter, person: &Person) -> Result<(), ParseError> {
    emit(w, Event::Start(BytesStart::new("author")))?;
    text_element(w, "name", &person.name)?;
    optional_element(w, "uri", person.uri.as_deref())?;
    emit(w, Event::End(BytesEnd::new("author")))
}

fn write_text(w: &mut XmlWriter, name: &str, text: &Text) -> Result<(), ParseError> {
    let mut el = BytesStart::new(name);
    if let Some(kind) = &text.kind {
        el.push_attribute(("type", kind.as_str()));
    }
    emit(w, Event::Start(el))?;
    if text.is_xhtml() {
        emit(w, Event::Text(BytesText::from_escaped(text.body.as_str())))?;
    } else {
        emit(w, Event::Text(BytesText::new(&text.body)))?;
    }
    emit(w, Event::End(BytesEnd::new(name)))
}

fn write_link(w: &mut XmlWriter, link: &Link) -> Result<(), ParseError> {
    let count = link.count.map(|c| c.to_string());
    let length = link.length.map(|l| l.to_string());

    let mut el = BytesStart::new("link");
    if let Some(rel) = &link.rel {
        el.push_attribute(("rel", rel.as_str()));
    }
    el.push_attribute(("href", link.href.as_str()));
    if let Some(t) = &link.media_type {
        el.push_attribute(("type", t.as_str()));
    }
    if let Some(title) = &link.title {
        el.push_attribute(("title", title.as_str()));
    }
    if let Some(count) = &count {
        el.push_attribute(("thr:count", count.as_str()));
    }
    if let Some(group) = &link.facet_group {
        el.push_attribute(("opds:facetGroup", group.as_str()));
    }
    if let Some(active) = &link.active_facet {
        el.push_attribute(("opds:activeFacet", active.as_str()));
    }
    if let Some(length) = &length {
        el.push_attribute(("length", length.as_str()));
    }

    if link.indirect_acquisition.is_empty() {
        return emit(w, Event::Empty(el));
    }
    emit(w, Event::Start(el))?;
    for indirect in &link.indirect_acquisition {
        write_indirect(w, indirect)?;
    }
    emit(w, Event::End(BytesEnd::new("link")))
}

fn write_indirect(w: &mut XmlWriter, indirect: &IndirectAcquisition) -> Result<(), ParseError> {
    let mut el = BytesStart::new("opds:indirectAcquisition");
    el.push_attribute(("type", indirect.media_type.as_str()));
    if indirect.children.is_empty() {
        return emit(w, Event::Empty(el));
    }
    emit(w, Event::Start(el))?;
    for child in &indirect.children {
        write_indirect(w, child)?;
    }
    emit(w, Event::End(BytesEnd::new("opds:indirectAcquisition")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opds::parse::parse_feed;
    use crate::opds::types::{media, Category, Rel};

    fn sample() -> Feed {
        Feed {
            id: "urn:test".to_string(),
            title: "Tom & Jerry <Shelf>".to_string(),
            updated: "2024-01-01T00:00:00Z".to_string(),
            links: vec![Link::new(Rel::SelfLink, "/opds?a=1&b=2").with_type(media::OPDS_NAVIGATION)],
            entries: vec![Entry {
                id: "urn:e1".to_string(),
                title: "One".to_string(),
                categories: vec![Category {
                    term: "src".to_string(),
                    label: Some("Source".to_string()),
                    scheme: Some("urn:opds-aggregator:source".to_string()),
                }],
                links: vec![Link {
                    length: Some(10),
                    count: Some(3),
                    indirect_acquisition: vec![IndirectAcquisition {
                        media_type: "application/epub+zip".to_string(),
                        children: Vec::new(),
                    }],
                    ..Link::new(Rel::Borrow, "/b")
                }],
                ..Entry::default()
            }],
            total_results: Some(12),
            complete: true,
            ..Feed::default()
        }
    }

    #[test]
    fn test_envelope() {
        let out = String::from_utf8(render_feed(&sample()).unwrap()).unwrap();
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<feed "));
        assert!(out.contains(r#"xmlns="http://www.w3.org/2005/Atom""#));
        assert!(out.contains(r#"xmlns:opds="http://opds-spec.org/2010/catalog""#));
        assert!(out.contains("<title>Tom &amp; Jerry &lt;Shelf&gt;</title>"));
        assert!(out.contains("href=\"/opds?a=1&amp;b=2\""));
        assert!(out.contains("<opensearch:totalResults>12</opensearch:totalResults>"));
        assert!(out.contains("<fh:complete/>"));
    }

    #[test]
    fn test_render_then_parse_preserves_document() {
        let feed = sample();
        let bytes = render_feed(&feed).unwrap();
        let parsed = parse_feed(&bytes).unwrap();
        assert_eq!(parsed, feed);
    }

    #[test]
    fn test_xhtml_body_is_not_escaped() {
        let feed = Feed {
            entries: vec![Entry {
                content: Some(Text {
                    kind: Some("xhtml".to_string()),
                    body: "<div xmlns=\"http://www.w3.org/1999/xhtml\"><p>Hi</p></div>".to_string(),
                }),
                ..Entry::default()
            }],
            ..Feed::default()
        };
        let out = String::from_utf8(render_feed(&feed).unwrap()).unwrap();
        assert!(out.contains("<p>Hi</p>"));
    }
}
