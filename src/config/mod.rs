//! Configuration management for the aggregator
//!
//! This module handles loading and validating configuration from a TOML file
//! and environment variables. Upstream sources are listed as `[[feeds]]`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::utils::error::ConfigError;
use crate::utils::slugify;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Upstream fetch configuration
    pub crawler: CrawlerConfig,

    /// Background refresh configuration
    pub polling: PollingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Upstream catalogs
    pub feeds: Vec<SourceConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,

    /// Title of the aggregated root catalog
    pub title: String,

    /// Path prefix every gateway route lives under
    pub base_path: String,

    /// Entries per local page when a source sets none (0 = unlimited)
    pub default_max_entries: usize,

    /// Enable permissive CORS
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,

    /// Disk cache for proxied downloads
    pub download_cache: DownloadCacheConfig,
}

/// Download cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadCacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

/// Upstream fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum number of in-flight upstream requests
    pub max_concurrent_requests: usize,

    /// Rate limit (requests per second)
    pub rate_limit: u32,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Per-source deadline for fan-out search in seconds
    pub search_timeout_secs: u64,

    /// Sibling sub-catalogs fetched concurrently during a crawl
    pub crawl_fanout: usize,

    /// User agent string
    pub user_agent: String,
}

/// Background refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval between full refreshes in seconds
    pub interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

/// Basic credentials for an upstream catalog
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One upstream catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Display name; the slug is derived from it
    pub name: String,

    /// Root URL of the upstream catalog
    pub url: String,

    /// Optional Basic credentials sent upstream
    #[serde(default)]
    pub auth: Option<Credentials>,

    /// Crawl depth (0 = root only, everything else fetched on demand)
    #[serde(default)]
    pub poll_depth: u32,

    /// Entries per local page (0 = use the server default)
    #[serde(default)]
    pub max_entries: usize,

    /// Upstream pages to follow per document (0 = all)
    #[serde(default)]
    pub max_paginate: u32,
}

impl SourceConfig {
    /// Create a source with default limits
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            auth: None,
            poll_depth: 0,
            max_entries: 0,
            max_paginate: 0,
        }
    }

    /// Set crawl depth
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.poll_depth = depth;
        self
    }

    /// Set the upstream page-follow limit
    pub fn with_max_paginate(mut self, pages: u32) -> Self {
        self.max_paginate = pages;
        self
    }

    /// Set Basic credentials
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// URL-safe identifier for the source
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            title: String::from("OPDS Aggregator"),
            base_path: String::from("/opds"),
            default_max_entries: 0,
            enable_cors: true,
            enable_request_logging: true,
            download_cache: DownloadCacheConfig::default(),
        }
    }
}

impl Default for DownloadCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("cache/downloads"),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 16,
            rate_limit: 20,
            request_timeout_secs: 30,
            search_timeout_secs: 15,
            crawl_fanout: 4,
            user_agent: format!("opds-aggregator/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 6 * 60 * 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay the environment
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Load { reason, .. } => ConfigError::Load {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })?;
        config.apply_env();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Load {
            path: String::from("<inline>"),
            reason: e.to_string(),
        })
    }

    /// Build configuration entirely from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay environment variables onto the configuration
    ///
    /// Scalar values override when set and parseable. If any `OPDS_FEED_{i}_NAME`
    /// is present the environment feeds replace the file feeds.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = get("OPDS_SERVER_ADDR").and_then(|v| v.parse().ok()) {
            self.server.addr = addr;
        }
        if let Some(title) = get("OPDS_SERVER_TITLE").filter(|v| !v.is_empty()) {
            self.server.title = title;
        }
        if let Some(n) = get("OPDS_SERVER_DEFAULT_MAX_ENTRIES").and_then(|v| v.parse().ok()) {
            self.server.default_max_entries = n;
        }
        if let Some(secs) = get("OPDS_POLLING_INTERVAL").and_then(|v| v.parse().ok()) {
            self.polling.interval_secs = secs;
        }

        let mut feeds = Vec::new();
        for i in 0.. {
            let prefix = format!("OPDS_FEED_{i}_");
            let Some(name) = get(&format!("{prefix}NAME")).filter(|v| !v.is_empty()) else {
                break;
            };
            let mut feed = SourceConfig::new(name, get(&format!("{prefix}URL")).unwrap_or_default());
            if let Some(depth) = get(&format!("{prefix}POLL_DEPTH")).and_then(|v| v.parse().ok()) {
                feed.poll_depth = depth;
            }
            if let Some(n) = get(&format!("{prefix}MAX_ENTRIES")).and_then(|v| v.parse().ok()) {
                feed.max_entries = n;
            }
            if let Some(n) = get(&format!("{prefix}MAX_PAGINATE")).and_then(|v| v.parse().ok()) {
                feed.max_paginate = n;
            }
            let user = get(&format!("{prefix}AUTH_USERNAME")).unwrap_or_default();
            let pass = get(&format!("{prefix}AUTH_PASSWORD")).unwrap_or_default();
            if !user.is_empty() || !pass.is_empty() {
                feed = feed.with_auth(user, pass);
            }
            feeds.push(feed);
        }
        if !feeds.is_empty() {
            self.feeds = feeds;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crawler.max_concurrent_requests == 0 {
            return Err(ConfigError::InvalidValue {
                field: "crawler.max_concurrent_requests".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.crawler.rate_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "crawler.rate_limit".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.crawler.crawl_fanout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "crawler.crawl_fanout".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }

        let mut slugs = HashSet::new();
        for (index, feed) in self.feeds.iter().enumerate() {
            if feed.name.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    index,
                    field: "name",
                });
            }
            if feed.url.trim().is_empty() {
                return Err(ConfigError::MissingField { index, field: "url" });
            }
            match Url::parse(&feed.url) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {}
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("feeds[{index}].url"),
                        reason: format!("{} is not an http(s) URL", feed.url),
                    });
                }
            }

            let slug = feed.slug();
            if slug.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("feeds[{index}].name"),
                    reason: format!("{:?} produces an empty slug", feed.name),
                });
            }
            if !slugs.insert(slug.clone()) {
                return Err(ConfigError::DuplicateSlug {
                    index,
                    name: feed.name.clone(),
                    slug,
                });
            }
        }

        Ok(())
    }

    /// Find a source by slug
    pub fn source(&self, slug: &str) -> Option<&SourceConfig> {
        self.feeds.iter().find(|f| f.slug() == slug)
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.request_timeout_secs)
    }

    /// Get the per-source search deadline as Duration
    #[must_use]
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.search_timeout_secs)
    }

    /// Get polling interval as Duration
    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }

    /// Default config search paths, in priority order
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("opds-aggregator").join("config.toml"));
        }
        if let Ok(home) = std::env::var("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("opds-aggregator")
                    .join("config.toml"),
            );
        }
        paths
    }

    /// First existing default config file, if any
    pub fn find() -> Option<PathBuf> {
        Self::default_paths().into_iter().find(|p| p.exists())
    }
}
