//! Lenient Atom/OPDS decoder
//!
//! Upstream catalogs vary a lot in how strictly they follow the XML rules.
//! Elements without a namespace are read as Atom, undeclared but well-known
//! prefixes (`dc:`, `opds:` ...) are matched by name, mismatched end tags are
//! accepted and attribute values with bare `&` are kept verbatim.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use super::types::{
    ns, Category, Entry, Feed, IndirectAcquisition, Link, Person, Price, Rel, Text,
};
use crate::utils::error::ParseError;

/// Namespace of an element or attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Ns {
    Atom,
    Dc,
    Opds,
    OpenSearch,
    Thr,
    Fh,
    /// Unprefixed attribute
    Plain,
    Other,
}

impl Ns {
    fn from_uri(uri: &[u8]) -> Self {
        match uri {
            u if u == ns::ATOM.as_bytes() => Self::Atom,
            u if u == ns::DC.as_bytes() || u == b"http://purl.org/dc/elements/1.1/" => Self::Dc,
            u if u == ns::OPDS.as_bytes() => Self::Opds,
            u if u == ns::OPENSEARCH.as_bytes() => Self::OpenSearch,
            u if u == ns::THR.as_bytes() => Self::Thr,
            u if u == ns::FH.as_bytes() => Self::Fh,
            _ => Self::Other,
        }
    }

    fn from_prefix(prefix: &[u8]) -> Self {
        match prefix {
            b"atom" => Self::Atom,
            b"dc" | b"dcterms" => Self::Dc,
            b"opds" => Self::Opds,
            b"opensearch" | b"os" => Self::OpenSearch,
            b"thr" => Self::Thr,
            b"fh" => Self::Fh,
            _ => Self::Other,
        }
    }

    fn element(result: &ResolveResult<'_>) -> Self {
        match result {
            ResolveResult::Bound(Namespace(uri)) => Self::from_uri(uri),
            ResolveResult::Unbound => Self::Atom,
            ResolveResult::Unknown(prefix) => Self::from_prefix(prefix),
        }
    }

    fn attribute(result: &ResolveResult<'_>) -> Self {
        match result {
            ResolveResult::Bound(Namespace(uri)) => Self::from_uri(uri),
            ResolveResult::Unbound => Self::Plain,
            ResolveResult::Unknown(prefix) => Self::from_prefix(prefix),
        }
    }
}

pub(super) struct Attr {
    ns: Ns,
    name: String,
    value: String,
}

pub(super) fn attr<'a>(attrs: &'a [Attr], name: &str) -> Option<&'a str> {
    ns_attr(attrs, Ns::Plain, name)
}

pub(super) fn ns_attr<'a>(attrs: &'a [Attr], ns: Ns, name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|a| a.ns == ns && a.name == name)
        .map(|a| a.value.as_str())
}

/// Event cursor over an in-memory document
pub(super) struct XmlCursor<'i> {
    reader: NsReader<&'i [u8]>,
}

impl<'i> XmlCursor<'i> {
    pub(super) fn new(input: &'i [u8]) -> Self {
        let mut reader = NsReader::from_reader(input);
        let config = reader.config_mut();
        config.trim_text(true);
        config.check_end_names = false;
        Self { reader }
    }

    pub(super) fn next(&mut self) -> Result<(Ns, Event<'i>), ParseError> {
        let (ns, event) = self.reader.read_resolved_event()?;
        Ok((Ns::element(&ns), event))
    }

    /// Advance to the document element
    pub(super) fn root(&mut self) -> Result<Option<(Ns, BytesStart<'i>, bool)>, ParseError> {
        loop {
            match self.next()? {
                (ns, Event::Start(e)) => return Ok(Some((ns, e, false))),
                (ns, Event::Empty(e)) => return Ok(Some((ns, e, true))),
                (_, Event::Eof) => return Ok(None),
                _ => {}
            }
        }
    }

    pub(super) fn attributes(&self, start: &BytesStart<'_>) -> Vec<Attr> {
        start
            .attributes()
            .with_checks(false)
            .flatten()
            .map(|a| {
                let (ns, local) = self.reader.resolve_attribute(a.key);
                let ns = Ns::attribute(&ns);
                let name = String::from_utf8_lossy(local.as_ref()).into_owned();
                let value = match a.unescape_value() {
                    Ok(v) => v.into_owned(),
                    Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
                };
                Attr { ns, name, value }
            })
            .collect()
    }

    /// Skip the rest of an element
    pub(super) fn skip(&mut self, start: &BytesStart<'_>, empty: bool) -> Result<(), ParseError> {
        if !empty {
            self.reader.read_to_end(start.name())?;
        }
        Ok(())
    }

    /// Character content of the current element, nested markup ignored
    pub(super) fn text(&mut self, empty: bool) -> Result<String, ParseError> {
        if empty {
            return Ok(String::new());
        }
        let mut out = String::new();
        let mut depth = 0usize;
        loop {
            match self.reader.read_event()? {
                Event::Text(t) => match t.unescape() {
                    Ok(s) => out.push_str(&s),
                    Err(_) => out.push_str(&String::from_utf8_lossy(&t)),
                },
                Event::CData(c) => out.push_str(&String::from_utf8_lossy(&c)),
                Event::Start(_) => depth += 1,
                Event::End(_) if depth == 0 => break,
                Event::End(_) => depth -= 1,
                Event::Eof => {
                    return Err(ParseError::Xml("unexpected end of document".to_string()));
                }
                _ => {}
            }
        }
        Ok(out.trim().to_string())
    }

    /// Raw inner markup of the current element
    fn markup(&mut self, start: &BytesStart<'_>, empty: bool) -> Result<String, ParseError> {
        if empty {
            return Ok(String::new());
        }
        Ok(self.reader.read_text(start.name())?.trim().to_string())
    }
}

/// Decode an Atom/OPDS feed
pub fn parse_feed(input: &[u8]) -> Result<Feed, ParseError> {
    let mut cursor = XmlCursor::new(input);
    match cursor.root()? {
        Some((Ns::Atom, start, empty)) if start.local_name().as_ref() == b"feed" => {
            FeedParser { cursor }.feed(empty)
        }
        _ => Err(ParseError::MissingRoot { expected: "feed" }),
    }
}

struct FeedParser<'i> {
    cursor: XmlCursor<'i>,
}

impl<'i> FeedParser<'i> {
    fn feed(&mut self, empty: bool) -> Result<Feed, ParseError> {
        let mut feed = Feed::default();
        if empty {
            return Ok(feed);
        }

        loop {
            let (ns, e, empty) = match self.cursor.next()? {
                (ns, Event::Start(e)) => (ns, e, false),
                (ns, Event::Empty(e)) => (ns, e, true),
                (_, Event::End(_)) => break,
                (_, Event::Eof) => {
                    return Err(ParseError::Xml("unexpected end of document".to_string()));
                }
                _ => continue,
            };

            match (ns, e.local_name().as_ref()) {
                (Ns::Atom, b"id") => feed.id = self.cursor.text(empty)?,
                (Ns::Atom, b"title") => feed.title = self.cursor.text(empty)?,
                (Ns::Atom, b"updated") => feed.updated = self.cursor.text(empty)?,
                (Ns::Atom, b"icon") => feed.icon = Some(self.cursor.text(empty)?),
                (Ns::Atom, b"author") => feed.author = Some(self.person(empty)?),
                (Ns::Atom, b"link") => feed.links.push(self.link(&e, empty)?),
                (Ns::Atom, b"entry") => feed.entries.push(self.entry(empty)?),
                (Ns::OpenSearch, b"totalResults") => {
                    feed.total_results = self.cursor.text(empty)?.parse().ok();
                }
                (Ns::OpenSearch, b"itemsPerPage") => {
                    feed.items_per_page = self.cursor.text(empty)?.parse().ok();
                }
                (Ns::OpenSearch, b"startIndex") => {
                    feed.start_index = self.cursor.text(empty)?.parse().ok();
                }
                (Ns::Fh, b"complete") => {
                    feed.complete = true;
                    self.cursor.skip(&e, empty)?;
                }
                _ => self.cursor.skip(&e, empty)?,
            }
        }

        Ok(feed)
    }

    fn entry(&mut self, empty: bool) -> Result<Entry, ParseError> {
        let mut entry = Entry::default();
        if empty {
            return Ok(entry);
        }

        loop {
            let (ns, e, empty) = match self.cursor.next()? {
                (ns, Event::Start(e)) => (ns, e, false),
                (ns, Event::Empty(e)) => (ns, e, true),
                (_, Event::End(_)) => break,
                (_, Event::Eof) => {
                    return Err(ParseError::Xml("unexpected end of document".to_string()));
                }
                _ => continue,
            };

            match (ns, e.local_name().as_ref()) {
                (Ns::Atom, b"id") => entry.id = self.cursor.text(empty)?,
                (Ns::Atom, b"title") => entry.title = self.cursor.text(empty)?,
                (Ns::Atom, b"updated") => entry.updated = self.cursor.text(empty)?,
                (Ns::Atom, b"published") => entry.published = Some(self.cursor.text(empty)?),
                (Ns::Atom, b"summary") => entry.summary = Some(self.text_construct(&e, empty)?),
                (Ns::Atom, b"content") => entry.content = Some(self.text_construct(&e, empty)?),
                (Ns::Atom, b"rights") => entry.rights = Some(self.cursor.text(empty)?),
                (Ns::Atom, b"author") => entry.authors.push(self.person(empty)?),
                (Ns::Atom, b"category") => {
                    let attrs = self.cursor.attributes(&e);
                    entry.categories.push(Category {
                        term: attr(&attrs, "term").unwrap_or_default().to_string(),
                        label: attr(&attrs, "label").map(str::to_string),
                        scheme: attr(&attrs, "scheme").map(str::to_string),
                    });
                    self.cursor.skip(&e, empty)?;
                }
                (Ns::Atom, b"link") => entry.links.push(self.link(&e, empty)?),
                (Ns::Dc, b"language") => entry.language = Some(self.cursor.text(empty)?),
                (Ns::Dc, b"issued") => entry.issued = Some(self.cursor.text(empty)?),
                (Ns::Dc, b"publisher") => entry.publisher = Some(self.cursor.text(empty)?),
                (Ns::Opds, b"price") => {
                    let attrs = self.cursor.attributes(&e);
                    entry.prices.push(Price {
                        currency_code: attr(&attrs, "currencycode").unwrap_or_default().to_string(),
                        value: self.cursor.text(empty)?,
                    });
                }
                _ => self.cursor.skip(&e, empty)?,
            }
        }

        Ok(entry)
    }

    fn person(&mut self, empty: bool) -> Result<Person, ParseError> {
        let mut person = Person::default();
        if empty {
            return Ok(person);
        }

        loop {
            let (ns, e, empty) = match self.cursor.next()? {
                (ns, Event::Start(e)) => (ns, e, false),
                (ns, Event::Empty(e)) => (ns, e, true),
                (_, Event::End(_)) => break,
                (_, Event::Eof) => {
                    return Err(ParseError::Xml("unexpected end of document".to_string()));
                }
                _ => continue,
            };
            match (ns, e.local_name().as_ref()) {
                (Ns::Atom, b"name") => person.name = self.cursor.text(empty)?,
                (Ns::Atom, b"uri") => person.uri = Some(self.cursor.text(empty)?),
                _ => self.cursor.skip(&e, empty)?,
            }
        }

        Ok(person)
    }

    fn text_construct(&mut self, start: &BytesStart<'i>, empty: bool) -> Result<Text, ParseError> {
        let attrs = self.cursor.attributes(start);
        let kind = attr(&attrs, "type").map(str::to_string);
        let body = if kind.as_deref() == Some("xhtml") {
            self.cursor.markup(start, empty)?
        } else {
            self.cursor.text(empty)?
        };
        Ok(Text { kind, body })
    }

    fn link(&mut self, start: &BytesStart<'i>, empty: bool) -> Result<Link, ParseError> {
        let attrs = self.cursor.attributes(start);
        let mut link = Link {
            rel: attr(&attrs, "rel").map(Rel::parse),
            href: attr(&attrs, "href").unwrap_or_default().to_string(),
            media_type: attr(&attrs, "type").map(str::to_string),
            title: attr(&attrs, "title").map(str::to_string),
            count: ns_attr(&attrs, Ns::Thr, "count").and_then(|v| v.parse().ok()),
            facet_group: ns_attr(&attrs, Ns::Opds, "facetGroup").map(str::to_string),
            active_facet: ns_attr(&attrs, Ns::Opds, "activeFacet").map(str::to_string),
            length: attr(&attrs, "length").and_then(|v| v.parse().ok()),
            indirect_acquisition: Vec::new(),
        };
        if !empty {
            link.indirect_acquisition = self.indirect_children()?;
        }
        Ok(link)
    }

    /// Nested opds:indirectAcquisition elements up to the enclosing end tag
    fn indirect_children(&mut self) -> Result<Vec<IndirectAcquisition>, ParseError> {
        let mut out = Vec::new();
        loop {
            let (ns, e, empty) = match self.cursor.next()? {
                (ns, Event::Start(e)) => (ns, e, false),
                (ns, Event::Empty(e)) => (ns, e, true),
                (_, Event::End(_)) => break,
                (_, Event::Eof) => {
                    return Err(ParseError::Xml("unexpected end of document".to_string()));
                }
                _ => continue,
            };
            if ns == Ns::Opds && e.local_name().as_ref() == b"indirectAcquisition" {
                let attrs = self.cursor.attributes(&e);
                let media_type = attr(&attrs, "type").unwrap_or_default().to_string();
                let children = if empty {
                    Vec::new()
                } else {
                    self.indirect_children()?
                };
                out.push(IndirectAcquisition {
                    media_type,
                    children,
                });
            } else {
                self.cursor.skip(&e, empty)?;
            }
        }
        Ok(out)
    }
}
