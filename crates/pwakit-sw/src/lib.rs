//! # PWAKit Service Worker
//!
//! Offline-first service worker for the PWAKit web application.
//!
//! ## Features
//!
//! - **Precache**: best-effort install of a fixed asset manifest
//! - **Janitor**: version-tagged cache cleanup on activation
//! - **Routing**: navigation / static / dynamic request classification
//! - **Strategies**: Navigation-Fallback, Cache-First, Network-First
//! - **Push**: notification rendering and click routing
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker
//!     ├── install   → precache  → CacheStorage["<app>-static-v<ver>"]
//!     ├── activate  → janitor   → delete stale buckets, claim clients
//!     ├── fetch     → Router    → Strategy → Fetcher / CacheStorage
//!     └── push      → push      → Notification → WorkerEvent
//!
//! CacheStorage
//!     └── Cache (bucket)
//!             └── Request URL → CacheEntry
//! ```

use pwakit_common::PwaKitError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod janitor;
pub mod network;
pub mod precache;
pub mod push;
pub mod request;
pub mod router;
pub mod strategy;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheSnapshot, CacheStorage};
pub use clients::{Client, ClientType, Clients};
pub use config::{NotificationConfig, WorkerConfig};
pub use network::{Fetcher, HttpFetcher, HttpFetcherConfig, OfflineFetcher};
pub use precache::{AssetOutcome, AssetResult, PrecacheReport};
pub use push::{ClickAction, Notification, NotificationAction, NotificationClick, PushPayload};
pub use request::{FetchRequest, FetchResponse, RequestDestination, RequestMode, ResponseSource};
pub use router::{PassthroughReason, Route, Router};
pub use strategy::Strategy;
pub use worker::{FetchOutcome, OfflineWorker, ServiceWorkerId, ServiceWorkerState, WorkerEvent};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<std::io::Error> for SwError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SwError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SwError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<SwError> for PwaKitError {
    fn from(err: SwError) -> Self {
        match err {
            SwError::Network(msg) => PwaKitError::network(msg),
            SwError::Config(msg) => PwaKitError::Config(msg),
            SwError::InvalidUrl(msg) => PwaKitError::InvalidArgument(msg),
            SwError::Io(msg) => {
                PwaKitError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg))
            }
            SwError::State(msg) => PwaKitError::internal(msg),
            other @ (SwError::Cache(_)
            | SwError::QuotaExceeded { .. }
            | SwError::Serialization(_)) => PwaKitError::Storage(other.to_string()),
        }
    }
}

/// Result type alias for service worker operations.
pub type SwResult<T> = Result<T, SwError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_categories() {
        let err: PwaKitError = SwError::Network("offline".into()).into();
        assert_eq!(err.category(), "network");

        let err: PwaKitError = SwError::QuotaExceeded {
            needed: 10,
            available: 2,
        }
        .into();
        assert_eq!(err.category(), "storage");
        assert!(err.to_string().contains("10 bytes needed"));

        let err: PwaKitError = SwError::Config("empty version".into()).into();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_url_parse_error_conversion() {
        let err: SwError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, SwError::InvalidUrl(_)));
    }
}
