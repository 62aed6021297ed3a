//! Content-addressed disk cache for proxied downloads
//!
//! Bodies are stored under `dir/<first two hex chars>/<sha256(url)>` with a
//! `.meta` JSON sidecar holding the source URL, content type and cache time.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::Result;

/// Sidecar stored next to each body
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DownloadMeta {
    url: String,
    content_type: Option<String>,
    cached_at: DateTime<Utc>,
}

/// A body read back from the cache
#[derive(Debug, Clone)]
pub struct CachedDownload {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub cached_at: DateTime<Utc>,
}

/// Disk cache rooted at one directory
#[derive(Debug, Clone)]
pub struct DownloadCache {
    dir: PathBuf,
}

impl DownloadCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lowercase hex SHA-256 of the URL
    pub fn key(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.dir.join(&key[..2]).join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(&key[..2]).join(format!("{key}.meta"))
    }

    /// Cached body for `url`, if present
    pub async fn get(&self, url: &str) -> Result<Option<CachedDownload>> {
        let key = Self::key(url);

        let body = match tokio::fs::read(self.body_path(&key)).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let meta = match tokio::fs::read_to_string(self.meta_path(&key)).await {
            Ok(json) => serde_json::from_str::<DownloadMeta>(&json)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        debug!(url = %url, key = %key, "Download cache hit");
        Ok(Some(CachedDownload {
            body: Bytes::from(body),
            content_type: meta.content_type,
            cached_at: meta.cached_at,
        }))
    }

    /// Store a body for `url`
    ///
    /// Body and sidecar are each written to a unique temporary name and
    /// renamed into place, body first, so concurrent writers never share a
    /// file and a reader sees either nothing or a complete entry.
    pub async fn put(&self, url: &str, content_type: Option<&str>, body: &[u8]) -> Result<()> {
        let key = Self::key(url);
        let shard = self.dir.join(&key[..2]);
        tokio::fs::create_dir_all(&shard).await?;

        let meta = DownloadMeta {
            url: url.to_string(),
            content_type: content_type.map(str::to_string),
            cached_at: Utc::now(),
        };

        write_atomic(&shard, &self.body_path(&key), body).await?;
        let json = serde_json::to_string_pretty(&meta)?;
        write_atomic(&shard, &self.meta_path(&key), json.as_bytes()).await?;

        debug!(url = %url, key = %key, bytes = body.len(), "Stored download");
        Ok(())
    }
}

/// Write through a per-call temporary file, then rename onto `target`
async fn write_atomic(shard: &Path, target: &Path, contents: &[u8]) -> Result<()> {
    static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = shard.join(format!(
        "{name}.{}.{}.tmp",
        std::process::id(),
        NEXT_TMP.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_is_sha256_hex() {
        let key = DownloadCache::key("https://ex.org/book.epub");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(key, DownloadCache::key("https://ex.org/other.epub"));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = DownloadCache::new(dir.path());
        let url = "https://ex.org/book.epub";

        cache
            .put(url, Some("application/epub+zip"), b"PK\x03\x04")
            .await
            .unwrap();

        let key = DownloadCache::key(url);
        assert!(dir.path().join(&key[..2]).join(&key).exists());
        assert!(dir.path().join(&key[..2]).join(format!("{key}.meta")).exists());

        let hit = cache.get(url).await.unwrap().unwrap();
        assert_eq!(hit.body.as_ref(), b"PK\x03\x04");
        assert_eq!(hit.content_type.as_deref(), Some("application/epub+zip"));
    }

    #[tokio::test]
    async fn test_miss() {
        let dir = TempDir::new().unwrap();
        let cache = DownloadCache::new(dir.path().join("missing"));
        assert!(cache.get("https://ex.org/nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_puts_leave_one_whole_body() {
        let dir = TempDir::new().unwrap();
        let cache = DownloadCache::new(dir.path());
        let url = "https://ex.org/big.epub";
        let first = vec![b'a'; 512 * 1024];
        let second = vec![b'b'; 256 * 1024];

        let (a, b) = tokio::join!(
            cache.put(url, Some("application/epub+zip"), &first),
            cache.put(url, Some("application/epub+zip"), &second),
        );
        a.unwrap();
        b.unwrap();

        let hit = cache.get(url).await.unwrap().unwrap();
        assert!(hit.body.as_ref() == first.as_slice() || hit.body.as_ref() == second.as_slice());

        let key = DownloadCache::key(url);
        let mut entries = std::fs::read_dir(dir.path().join(&key[..2])).unwrap();
        assert!(entries.all(|e| !e.unwrap().file_name().to_string_lossy().ends_with(".tmp")));
    }
}
