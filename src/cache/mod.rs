//! In-memory cache of crawled source trees
//!
//! This module provides the store the gateway serves from:
//! - Feed cache: one [`FeedTree`] per source slug, replaced wholesale on refresh
//! - Download cache: optional disk-backed acquisition bodies (see [`download`])
//!
//! # Example
//!
//! ```rust,ignore
//! use opds_aggregator::cache::FeedCache;
//!
//! let cache = FeedCache::new();
//! cache.put("gutenberg", tree).await;
//! let cached = cache.get("gutenberg").await;
//! ```

pub mod download;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::crawler::FeedTree;

pub use download::{CachedDownload, DownloadCache};

/// A source tree and the time it was stored
#[derive(Debug, Clone)]
pub struct CachedFeed {
    pub tree: Arc<FeedTree>,
    pub updated_at: DateTime<Utc>,
}

/// Source slug to tree map
///
/// Trees are shared behind `Arc`, so replacing one never disturbs readers
/// still holding the previous tree. The map lock is only held for the map
/// operation itself, never across a fetch.
#[derive(Debug, Default)]
pub struct FeedCache {
    entries: RwLock<HashMap<String, CachedFeed>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `tree` for `slug`, replacing any previous tree
    pub async fn put(&self, slug: &str, tree: FeedTree) -> Arc<FeedTree> {
        self.put_shared(slug, Arc::new(tree)).await
    }

    /// Store an already shared tree
    pub async fn put_shared(&self, slug: &str, tree: Arc<FeedTree>) -> Arc<FeedTree> {
        let entry = CachedFeed {
            tree: tree.clone(),
            updated_at: Utc::now(),
        };
        self.entries.write().await.insert(slug.to_string(), entry);
        debug!(slug = %slug, "Cached source tree");
        tree
    }

    pub async fn get(&self, slug: &str) -> Option<CachedFeed> {
        self.entries.read().await.get(slug).cloned()
    }

    /// Snapshot of every cached source
    pub async fn all(&self) -> HashMap<String, CachedFeed> {
        self.entries.read().await.clone()
    }

    pub async fn remove(&self, slug: &str) -> Option<CachedFeed> {
        self.entries.write().await.remove(slug)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opds::Feed;

    fn tree(title: &str) -> FeedTree {
        FeedTree::new(
            "https://ex.org/opds",
            Feed {
                title: title.to_string(),
                ..Feed::default()
            },
        )
    }

    #[tokio::test]
    async fn test_put_replaces_whole_tree() {
        let cache = FeedCache::new();
        cache.put("ex", tree("old")).await;
        let held = cache.get("ex").await.unwrap();

        cache.put("ex", tree("new")).await;

        assert_eq!(held.tree.feed.title, "old");
        assert_eq!(cache.get("ex").await.unwrap().tree.feed.title, "new");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_independent() {
        let cache = FeedCache::new();
        cache.put("a", tree("a")).await;

        let snapshot = cache.all().await;
        cache.put("b", tree("b")).await;
        cache.remove("a").await;

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("a"));
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
    }

    #[tokio::test]
    async fn test_missing_slug() {
        let cache = FeedCache::new();
        assert!(cache.is_empty().await);
        assert!(cache.get("nope").await.is_none());
        assert!(cache.remove("nope").await.is_none());
    }
}
