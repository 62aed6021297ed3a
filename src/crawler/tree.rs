//! Crawled document tree of one source
//!
//! Each node owns its document and a map of children keyed by their path
//! relative to the source root (query string included). Children are only
//! ever added, first writer wins; a whole tree is replaced by a new crawl.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::fetcher::PageFetch;
use crate::opds::Feed;

/// Result of [`FeedTree::insert_child`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The node was stored under the key
    Inserted,
    /// Another writer stored the key first; the offered node was dropped
    Discarded,
}

impl InsertOutcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Discarded => "discarded",
        }
    }
}

/// A fetched document and the documents discovered below it
#[derive(Debug)]
pub struct FeedTree {
    /// The document, shared with readers
    pub feed: Arc<Feed>,

    /// Absolute URL the document was fetched from
    pub url: String,

    /// Search description or template URL advertised by the document
    pub search_url: Option<String>,

    /// Upstream pagination was cut short by the page budget
    pub has_more_upstream: bool,

    /// First upstream page not merged into `feed`
    pub next_upstream_url: Option<String>,

    children: RwLock<HashMap<String, Arc<FeedTree>>>,
}

impl FeedTree {
    /// Create a childless node
    pub fn new(url: impl Into<String>, feed: Feed) -> Self {
        Self {
            feed: Arc::new(feed),
            url: url.into(),
            search_url: None,
            has_more_upstream: false,
            next_upstream_url: None,
            children: RwLock::new(HashMap::new()),
        }
    }

    /// Create a node from a page-limited fetch
    pub fn from_page(url: impl Into<String>, page: PageFetch) -> Self {
        Self {
            has_more_upstream: page.has_more,
            next_upstream_url: page.next_url,
            ..Self::new(url, page.feed)
        }
    }

    pub fn with_search_url(mut self, search_url: Option<String>) -> Self {
        self.search_url = search_url;
        self
    }

    /// Direct child under `key`
    pub async fn child(&self, key: &str) -> Option<Arc<FeedTree>> {
        self.children.read().await.get(key).cloned()
    }

    /// Nearest node under `key` anywhere below this one
    pub async fn find(&self, key: &str) -> Option<Arc<FeedTree>> {
        let mut frontier: VecDeque<Arc<FeedTree>> = {
            let children = self.children.read().await;
            if let Some(hit) = children.get(key) {
                return Some(hit.clone());
            }
            children.values().cloned().collect()
        };

        while let Some(node) = frontier.pop_front() {
            let children = node.children.read().await;
            if let Some(hit) = children.get(key) {
                return Some(hit.clone());
            }
            frontier.extend(children.values().cloned());
        }
        None
    }

    /// Store `child` under `key` unless the key is already taken
    ///
    /// Returns the outcome together with the node now stored under the key,
    /// which is `child` itself only when it was inserted.
    pub async fn insert_child(
        &self,
        key: impl Into<String>,
        child: Arc<FeedTree>,
    ) -> (InsertOutcome, Arc<FeedTree>) {
        let mut children = self.children.write().await;
        match children.entry(key.into()) {
            std::collections::hash_map::Entry::Occupied(existing) => {
                (InsertOutcome::Discarded, existing.get().clone())
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(child.clone());
                (InsertOutcome::Inserted, child)
            }
        }
    }

    /// Number of direct children
    pub async fn child_count(&self) -> usize {
        self.children.read().await.len()
    }

    /// Keys of the direct children, sorted
    pub async fn child_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.children.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Every node below this one as `(level, key, node)`, parents first
    ///
    /// Direct children are level 1. Siblings are ordered by key.
    pub async fn descendants(&self) -> Vec<(usize, String, Arc<FeedTree>)> {
        let mut out = Vec::new();
        let mut stack = Self::sorted_children(self, 1).await;
        stack.reverse();

        while let Some((level, key, node)) = stack.pop() {
            let mut below = Self::sorted_children(&node, level + 1).await;
            below.reverse();
            out.push((level, key, node));
            stack.extend(below);
        }
        out
    }

    /// Total number of documents held, this node included
    pub async fn node_count(&self) -> usize {
        1 + self.descendants().await.len()
    }

    /// Deepest level below this node (0 when childless)
    pub async fn depth(&self) -> usize {
        self.descendants()
            .await
            .iter()
            .map(|(level, _, _)| *level)
            .max()
            .unwrap_or(0)
    }

    async fn sorted_children(node: &FeedTree, level: usize) -> Vec<(usize, String, Arc<FeedTree>)> {
        let children = node.children.read().await;
        let mut out: Vec<_> = children
            .iter()
            .map(|(k, v)| (level, k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.1.cmp(&b.1));
        out
    }
}
