//! Precache Installer.
//!
//! Installation is best-effort: every manifest entry is attempted, each one
//! yields its own [`AssetResult`], and installation proceeds no matter how
//! many of them failed.

use std::time::Duration;

use futures::future::join_all;
use http::Method;
use pwakit_common::{retry_with_backoff, RetryConfig};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::network::Fetcher;
use crate::request::{cache_key, FetchRequest, FetchResponse};
use crate::{SwError, SwResult};

/// Outcome for a single manifest entry.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetOutcome {
    Cached { status: u16, bytes: usize },
    Failed { reason: String },
}

/// Result for a single manifest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetResult {
    /// Manifest path.
    pub path: String,
    pub outcome: AssetOutcome,
}

impl AssetResult {
    pub fn is_cached(&self) -> bool {
        matches!(self.outcome, AssetOutcome::Cached { .. })
    }
}

/// Install report.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecacheReport {
    /// Bucket that was populated.
    pub cache_name: String,
    /// One result per manifest entry, in manifest order.
    pub results: Vec<AssetResult>,
    /// Whether installation went ahead. Asset failures never clear this.
    pub proceeded: bool,
}

impl PrecacheReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_cached()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Paths that could not be cached.
    pub fn failed_paths(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.is_cached())
            .map(|r| r.path.as_str())
            .collect()
    }
}

/// Precache settings.
pub struct Precache<'a> {
    pub origin: &'a Url,
    pub cache_name: &'a str,
    pub manifest: &'a [String],
    pub retry: RetryConfig,
    pub fetch_timeout: Option<Duration>,
}

impl Precache<'_> {
    /// Open the bucket and fetch+store every manifest entry.
    pub async fn run(&self, caches: &RwLock<CacheStorage>, fetcher: &dyn Fetcher) -> PrecacheReport {
        caches.write().await.open(self.cache_name);

        let results = join_all(
            self.manifest
                .iter()
                .map(|path| self.precache_one(caches, fetcher, path)),
        )
        .await;

        let report = PrecacheReport {
            cache_name: self.cache_name.to_string(),
            results,
            proceeded: true,
        };

        info!(
            cache = %self.cache_name,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Precache complete"
        );
        report
    }

    async fn precache_one(
        &self,
        caches: &RwLock<CacheStorage>,
        fetcher: &dyn Fetcher,
        path: &str,
    ) -> AssetResult {
        let outcome = match self.fetch_and_store(caches, fetcher, path).await {
            Ok((status, bytes)) => {
                debug!(path = %path, status, bytes, "Precached");
                AssetOutcome::Cached { status, bytes }
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Precache failed");
                AssetOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        AssetResult {
            path: path.to_string(),
            outcome,
        }
    }

    async fn fetch_and_store(
        &self,
        caches: &RwLock<CacheStorage>,
        fetcher: &dyn Fetcher,
        path: &str,
    ) -> SwResult<(u16, usize)> {
        let url = self.origin.join(path)?;
        let request = FetchRequest::get(url);

        let response = retry_with_backoff(&self.retry, |_attempt| {
            fetch_ok(fetcher, &request, self.fetch_timeout)
        })
        .await?;

        let bytes = response.body.len();
        let entry = response.to_cache_entry(&cache_key(&request.url), &Method::GET);
        caches.write().await.put(self.cache_name, entry)?;
        Ok((response.status, bytes))
    }
}

/// Fetch, treating anything but 200 as a failure.
async fn fetch_ok(
    fetcher: &dyn Fetcher,
    request: &FetchRequest,
    timeout: Option<Duration>,
) -> SwResult<FetchResponse> {
    let response = match timeout {
        Some(timeout) => pwakit_common::with_timeout(timeout, || fetcher.fetch(request))
            .await
            .map_err(|e| SwError::Network(e.to_string()))??,
        None => fetcher.fetch(request).await?,
    };
    if !response.is_ok() {
        return Err(SwError::Network(format!(
            "{} responded {}",
            request.url, response.status
        )));
    }
    Ok(response)
}
