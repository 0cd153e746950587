//! Worker configuration.
//!
//! The version tag is a build/deploy parameter: bumping it renames both
//! buckets, which is the only way previously cached entries are invalidated.

use std::path::Path;
use std::time::Duration;

use pwakit_common::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::{SwError, SwResult};

/// Offline worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Application name, used as bucket name prefix.
    pub app_name: String,

    /// Semantic version tag embedded in bucket names.
    pub version: String,

    /// Paths fetched and stored in the static bucket on install.
    pub precache: Vec<String>,

    /// Top-level app routes served cache-first.
    pub app_routes: Vec<String>,

    /// Path prefixes that are never intercepted (framework build output).
    pub ignored_prefixes: Vec<String>,

    /// Offline fallback page for navigations.
    pub offline_page: String,

    /// Only intercept requests to the worker's own origin.
    pub same_origin_only: bool,

    /// Maximum entries kept in the dynamic bucket (LRU). `None` = unbounded.
    pub max_dynamic_entries: Option<usize>,

    /// Total cache store quota in bytes. `None` = unlimited.
    pub quota_bytes: Option<u64>,

    /// Per-fetch timeout in milliseconds. `None` = no timeout.
    pub fetch_timeout_ms: Option<u64>,

    /// Attempts per precache asset.
    pub precache_attempts: u32,

    /// Push notification defaults.
    pub notifications: NotificationConfig,
}

/// Push notification defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notification title.
    pub title: String,

    /// Body used when the payload carries none.
    pub default_body: String,

    /// Route opened when the payload carries no URL, or on body clicks.
    pub default_url: String,

    /// Notification icon.
    pub icon: String,

    /// Notification badge.
    pub badge: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            app_name: "pwakit".to_string(),
            version: "2.0.0".to_string(),
            precache: [
                "/",
                "/offline.html",
                "/manifest.json",
                "/icons/icon-192x192.png",
                "/icons/icon-512x512.png",
                "/dashboard",
                "/pricing",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            app_routes: ["/", "/dashboard", "/pricing", "/login", "/register"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignored_prefixes: vec!["/_next/".to_string()],
            offline_page: "/offline.html".to_string(),
            same_origin_only: false,
            max_dynamic_entries: None,
            quota_bytes: None,
            fetch_timeout_ms: None,
            precache_attempts: 1,
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "PWAKit".to_string(),
            default_body: "New content available".to_string(),
            default_url: "/dashboard".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> SwResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SwError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> SwResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SwError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Check the configuration for values the worker cannot run with.
    pub fn validate(&self) -> SwResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(SwError::Config("app_name must not be empty".to_string()));
        }
        if self.version.trim().is_empty() {
            return Err(SwError::Config("version must not be empty".to_string()));
        }
        if self.precache_attempts == 0 {
            return Err(SwError::Config(
                "precache_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_dynamic_entries == Some(0) {
            return Err(SwError::Config(
                "max_dynamic_entries must be at least 1".to_string(),
            ));
        }

        let paths = std::iter::once(&self.offline_page)
            .chain(&self.precache)
            .chain(&self.app_routes)
            .chain(&self.ignored_prefixes)
            .chain(std::iter::once(&self.notifications.default_url));
        for path in paths {
            if !path.starts_with('/') {
                return Err(SwError::Config(format!(
                    "path '{}' must start with '/'",
                    path
                )));
            }
        }

        Ok(())
    }

    /// Name of the precached static bucket.
    pub fn static_cache_name(&self) -> String {
        format!("{}-static-v{}", self.app_name, self.version)
    }

    /// Name of the runtime-populated dynamic bucket.
    pub fn dynamic_cache_name(&self) -> String {
        format!("{}-dynamic-v{}", self.app_name, self.version)
    }

    /// Per-fetch timeout.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Retry policy for precache assets.
    pub fn precache_retry(&self) -> RetryConfig {
        RetryConfig::attempts(self.precache_attempts)
    }
}
