//! Atom/OPDS document model
//!
//! Link relations and media types are closed enumerations so that every
//! classification branch is checked by the compiler.

/// XML namespaces used in OPDS catalogs
pub mod ns {
    pub const ATOM: &str = "http://www.w3.org/2005/Atom";
    pub const DC: &str = "http://purl.org/dc/terms/";
    pub const OPDS: &str = "http://opds-spec.org/2010/catalog";
    pub const OPENSEARCH: &str = "http://a9.com/-/spec/opensearch/1.1/";
    pub const THR: &str = "http://purl.org/syndication/thread/1.0";
    pub const FH: &str = "http://purl.org/syndication/history/1.0";
}

/// Media types
pub mod media {
    pub const OPDS_NAVIGATION: &str = "application/atom+xml;profile=opds-catalog;kind=navigation";
    pub const OPDS_ACQUISITION: &str =
        "application/atom+xml;profile=opds-catalog;kind=acquisition";
    pub const OPDS_ENTRY: &str = "application/atom+xml;type=entry;profile=opds-catalog";
    pub const ATOM: &str = "application/atom+xml";
    pub const OPENSEARCH: &str = "application/opensearchdescription+xml";
}

/// Link relation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Rel {
    SelfLink,
    Start,
    Subsection,
    First,
    Previous,
    Next,
    Last,
    Search,
    Alternate,
    Related,
    Facet,
    Acquisition,
    OpenAccess,
    Borrow,
    Buy,
    Sample,
    Subscribe,
    Image,
    Thumbnail,
    SortNew,
    SortPopular,
    Featured,
    Recommended,
    Shelf,
    Subscriptions,
    /// Any relation outside the known vocabulary, preserved verbatim
    Other(String),
}

/// Broad role of a link relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelClass {
    /// Points at another catalog document
    Navigation,
    /// first / previous / next / last
    Pagination,
    /// OpenSearch description or template
    Search,
    /// Obtains a publication
    Acquisition,
    /// Cover or thumbnail
    Image,
    Other,
}

impl Rel {
    pub fn parse(rel: &str) -> Self {
        match rel {
            "self" => Self::SelfLink,
            "start" => Self::Start,
            "subsection" => Self::Subsection,
            "first" => Self::First,
            "previous" | "prev" => Self::Previous,
            "next" => Self::Next,
            "last" => Self::Last,
            "search" => Self::Search,
            "alternate" => Self::Alternate,
            "related" => Self::Related,
            "http://opds-spec.org/facet" => Self::Facet,
            "http://opds-spec.org/acquisition" => Self::Acquisition,
            "http://opds-spec.org/acquisition/open-access" => Self::OpenAccess,
            "http://opds-spec.org/acquisition/borrow" => Self::Borrow,
            "http://opds-spec.org/acquisition/buy" => Self::Buy,
            "http://opds-spec.org/acquisition/sample" => Self::Sample,
            "http://opds-spec.org/acquisition/subscribe" => Self::Subscribe,
            "http://opds-spec.org/image" => Self::Image,
            "http://opds-spec.org/image/thumbnail" => Self::Thumbnail,
            "http://opds-spec.org/sort/new" => Self::SortNew,
            "http://opds-spec.org/sort/popular" => Self::SortPopular,
            "http://opds-spec.org/featured" => Self::Featured,
            "http://opds-spec.org/recommended" => Self::Recommended,
            "http://opds-spec.org/shelf" => Self::Shelf,
            "http://opds-spec.org/subscriptions" => Self::Subscriptions,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::SelfLink => "self",
            Self::Start => "start",
            Self::Subsection => "subsection",
            Self::First => "first",
            Self::Previous => "previous",
            Self::Next => "next",
            Self::Last => "last",
            Self::Search => "search",
            Self::Alternate => "alternate",
            Self::Related => "related",
            Self::Facet => "http://opds-spec.org/facet",
            Self::Acquisition => "http://opds-spec.org/acquisition",
            Self::OpenAccess => "http://opds-spec.org/acquisition/open-access",
            Self::Borrow => "http://opds-spec.org/acquisition/borrow",
            Self::Buy => "http://opds-spec.org/acquisition/buy",
            Self::Sample => "http://opds-spec.org/acquisition/sample",
            Self::Subscribe => "http://opds-spec.org/acquisition/subscribe",
            Self::Image => "http://opds-spec.org/image",
            Self::Thumbnail => "http://opds-spec.org/image/thumbnail",
            Self::SortNew => "http://opds-spec.org/sort/new",
            Self::SortPopular => "http://opds-spec.org/sort/popular",
            Self::Featured => "http://opds-spec.org/featured",
            Self::Recommended => "http://opds-spec.org/recommended",
            Self::Shelf => "http://opds-spec.org/shelf",
            Self::Subscriptions => "http://opds-spec.org/subscriptions",
            Self::Other(s) => s,
        }
    }

    pub fn class(&self) -> RelClass {
        match self {
            Self::SelfLink
            | Self::Start
            | Self::Subsection
            | Self::Alternate
            | Self::Related
            | Self::Facet
            | Self::SortNew
            | Self::SortPopular
            | Self::Featured
            | Self::Recommended
            | Self::Shelf
            | Self::Subscriptions => RelClass::Navigation,
            Self::First | Self::Previous | Self::Next | Self::Last => RelClass::Pagination,
            Self::Search => RelClass::Search,
            Self::Acquisition
            | Self::OpenAccess
            | Self::Borrow
            | Self::Buy
            | Self::Sample
            | Self::Subscribe => RelClass::Acquisition,
            Self::Image | Self::Thumbnail => RelClass::Image,
            Self::Other(_) => RelClass::Other,
        }
    }
}

impl std::fmt::Display for Rel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse class of a link's `type` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// OPDS navigation feed
    Navigation,
    /// OPDS acquisition feed
    Acquisition,
    /// Single OPDS entry document
    Entry,
    /// Plain Atom or unspecified OPDS catalog
    Feed,
    /// OpenSearch description
    OpenSearch,
    /// Anything else (publication formats, images, html)
    Other,
}

impl MediaKind {
    pub fn of(media_type: &str) -> Self {
        let t = media_type.to_ascii_lowercase();
        if t.contains("opensearchdescription") {
            Self::OpenSearch
        } else if t.contains("type=entry") {
            Self::Entry
        } else if t.contains("kind=navigation") {
            Self::Navigation
        } else if t.contains("kind=acquisition") {
            Self::Acquisition
        } else if t.contains("opds-catalog") || t.contains("atom+xml") {
            Self::Feed
        } else {
            Self::Other
        }
    }

    /// True for anything that decodes as a catalog document
    pub fn is_feed(self) -> bool {
        match self {
            Self::Navigation | Self::Acquisition | Self::Entry | Self::Feed => true,
            Self::OpenSearch | Self::Other => false,
        }
    }
}

/// Atom person construct
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Person {
    pub name: String,
    pub uri: Option<String>,
}

/// Atom text construct
///
/// For `type="xhtml"` the body holds the raw inner markup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Text {
    pub kind: Option<String>,
    pub body: String,
}

impl Text {
    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            kind: Some("text".to_string()),
            body: body.into(),
        }
    }

    pub fn is_xhtml(&self) -> bool {
        self.kind.as_deref() == Some("xhtml")
    }
}

/// Atom category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Category {
    pub term: String,
    pub label: Option<String>,
    pub scheme: Option<String>,
}

/// opds:price
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Price {
    pub currency_code: String,
    pub value: String,
}

/// opds:indirectAcquisition chain element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndirectAcquisition {
    pub media_type: String,
    pub children: Vec<IndirectAcquisition>,
}

/// Atom link with OPDS extensions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Link {
    pub rel: Option<Rel>,
    pub href: String,
    pub media_type: Option<String>,
    pub title: Option<String>,
    /// thr:count
    pub count: Option<u64>,
    pub facet_group: Option<String>,
    pub active_facet: Option<String>,
    pub length: Option<u64>,
    pub indirect_acquisition: Vec<IndirectAcquisition>,
}

impl Link {
    pub fn new(rel: Rel, href: impl Into<String>) -> Self {
        Self {
            rel: Some(rel),
            href: href.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn rel_class(&self) -> RelClass {
        self.rel.as_ref().map_or(RelClass::Other, Rel::class)
    }

    pub fn media_kind(&self) -> MediaKind {
        self.media_type.as_deref().map_or(MediaKind::Other, MediaKind::of)
    }

    fn has_rel(&self, rel: &Rel) -> bool {
        self.rel.as_ref() == Some(rel)
    }
}

/// Atom entry with OPDS extensions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub title: String,
    pub updated: String,
    pub published: Option<String>,
    pub summary: Option<Text>,
    pub content: Option<Text>,
    pub rights: Option<String>,
    /// dc:language
    pub language: Option<String>,
    /// dc:issued
    pub issued: Option<String>,
    /// dc:publisher
    pub publisher: Option<String>,
    pub authors: Vec<Person>,
    pub categories: Vec<Category>,
    pub links: Vec<Link>,
    pub prices: Vec<Price>,
}

impl Entry {
    pub fn has_acquisition_links(&self) -> bool {
        self.links.iter().any(is_acquisition_link)
    }
}

/// Atom feed with OPDS extensions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    pub id: String,
    pub title: String,
    pub updated: String,
    pub icon: Option<String>,
    pub author: Option<Person>,
    pub links: Vec<Link>,
    pub entries: Vec<Entry>,
    /// opensearch:totalResults
    pub total_results: Option<u64>,
    /// opensearch:itemsPerPage
    pub items_per_page: Option<u64>,
    /// opensearch:startIndex
    pub start_index: Option<u64>,
    /// fh:complete
    pub complete: bool,
}

impl Feed {
    /// First link with the given relation
    pub fn link(&self, rel: &Rel) -> Option<&Link> {
        self.links.iter().find(|l| l.has_rel(rel))
    }

    pub fn self_link(&self) -> Option<&Link> {
        self.link(&Rel::SelfLink)
    }

    pub fn next_link(&self) -> Option<&Link> {
        self.link(&Rel::Next)
    }

    pub fn search_link(&self) -> Option<&Link> {
        self.link(&Rel::Search)
    }

    /// Drop every link with the given relation
    pub fn remove_links(&mut self, rel: &Rel) {
        self.links.retain(|l| !l.has_rel(rel));
    }

    /// Replace the first link with this relation, or append one
    pub fn set_link(&mut self, link: Link) {
        match link
            .rel
            .as_ref()
            .and_then(|rel| self.links.iter().position(|l| l.has_rel(rel)))
        {
            Some(i) => self.links[i] = link,
            None => self.links.push(link),
        }
    }
}

/// A `subsection` link whose type is a catalog document (or unspecified)
pub fn is_sub_catalog_link(link: &Link) -> bool {
    link.rel == Some(Rel::Subsection)
        && (link.media_type.is_none() || link.media_kind().is_feed())
}

pub fn is_acquisition_link(link: &Link) -> bool {
    link.rel_class() == RelClass::Acquisition
}

pub fn is_image_link(link: &Link) -> bool {
    link.rel_class() == RelClass::Image
}

pub fn is_search_link(link: &Link) -> bool {
    link.rel_class() == RelClass::Search
}

/// A document is navigation-only when no entry offers an acquisition
pub fn is_navigation_document(feed: &Feed) -> bool {
    !feed.entries.iter().any(Entry::has_acquisition_links)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rel_round_trip() {
        for raw in [
            "self",
            "subsection",
            "http://opds-spec.org/acquisition/open-access",
            "http://opds-spec.org/image/thumbnail",
            "x-custom",
        ] {
            assert_eq!(Rel::parse(raw).as_str(), raw);
        }
    }

    #[test]
    fn test_rel_class() {
        assert_eq!(Rel::Borrow.class(), RelClass::Acquisition);
        assert_eq!(Rel::Thumbnail.class(), RelClass::Image);
        assert_eq!(Rel::Next.class(), RelClass::Pagination);
        assert_eq!(Rel::Facet.class(), RelClass::Navigation);
        assert_eq!(Rel::parse("describedby").class(), RelClass::Other);
    }

    #[test]
    fn test_media_kind() {
        assert_eq!(MediaKind::of(media::OPDS_NAVIGATION), MediaKind::Navigation);
        assert_eq!(MediaKind::of(media::OPDS_ENTRY), MediaKind::Entry);
        assert_eq!(MediaKind::of(media::OPENSEARCH), MediaKind::OpenSearch);
        assert_eq!(MediaKind::of("application/epub+zip"), MediaKind::Other);
        assert!(MediaKind::of(media::ATOM).is_feed());
    }

    #[test]
    fn test_sub_catalog_link() {
        let nav = Link::new(Rel::Subsection, "a").with_type(media::OPDS_NAVIGATION);
        assert!(is_sub_catalog_link(&nav));

        let untyped = Link::new(Rel::Subsection, "a");
        assert!(is_sub_catalog_link(&untyped));

        let html = Link::new(Rel::Subsection, "a").with_type("text/html");
        assert!(!is_sub_catalog_link(&html));

        let acq = Link::new(Rel::Acquisition, "a").with_type(media::OPDS_ACQUISITION);
        assert!(!is_sub_catalog_link(&acq));
    }

    #[test]
    fn test_navigation_document() {
        let mut feed = Feed::default();
        assert!(is_navigation_document(&feed));

        feed.entries.push(Entry {
            links: vec![Link::new(Rel::Subsection, "x")],
            ..Entry::default()
        });
        assert!(is_navigation_document(&feed));

        feed.entries.push(Entry {
            links: vec![Link::new(Rel::OpenAccess, "book.epub")],
            ..Entry::default()
        });
        assert!(!is_navigation_document(&feed));
    }

    #[test]
    fn test_link_accessors() {
        let mut feed = Feed {
            links: vec![
                Link::new(Rel::SelfLink, "/self"),
                Link::new(Rel::Next, "/p2"),
            ],
            ..Feed::default()
        };
        assert_eq!(feed.next_link().map(|l| l.href.as_str()), Some("/p2"));
        assert!(feed.search_link().is_none());

        feed.set_link(Link::new(Rel::Next, "/p3"));
        assert_eq!(feed.links.len(), 2);
        assert_eq!(feed.next_link().map(|l| l.href.as_str()), Some("/p3"));

        feed.remove_links(&Rel::Next);
        assert!(feed.next_link().is_none());
    }
}
