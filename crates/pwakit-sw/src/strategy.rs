//! Fetch Strategies.
//!
//! ```text
//! START → cache lookup → HIT | MISS → network (conditional) → STORE | FALLBACK → RESPONSE
//! ```
//!
//! Cache writes never affect the response: a failed write is logged and
//! the network response is returned as if it had been stored.

use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::CacheStorage;
use crate::network::Fetcher;
use crate::request::{FetchRequest, FetchResponse};
use crate::{SwError, SwResult};

/// How a routed request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Network, then exact cache match, then offline page, then 503.
    NavigationFallback,
    /// Cache, then network (stored on 200), then 503.
    CacheFirst,
    /// Network (stored on 200), then cache, then plain-text 503.
    NetworkFirst,
}

/// What a strategy needs from the worker.
pub struct StrategyContext<'a> {
    pub caches: &'a RwLock<CacheStorage>,
    pub fetcher: &'a dyn Fetcher,
    /// Bucket receiving runtime responses.
    pub dynamic_cache: &'a str,
    /// Absolute URL of the precached offline page.
    pub offline_page: &'a str,
    pub fetch_timeout: Option<Duration>,
}

impl Strategy {
    /// Answer `request`. Never fails; the worst case is a synthesized 503.
    pub async fn respond(self, ctx: &StrategyContext<'_>, request: &FetchRequest) -> FetchResponse {
        match self {
            Strategy::NavigationFallback => navigation_fallback(ctx, request).await,
            Strategy::CacheFirst => cache_first(ctx, request).await,
            Strategy::NetworkFirst => network_first(ctx, request).await,
        }
    }
}

async fn navigation_fallback(ctx: &StrategyContext<'_>, request: &FetchRequest) -> FetchResponse {
    match fetch_network(ctx, request).await {
        Ok(response) => {
            if response.is_success() {
                store(ctx, request, &response).await;
            }
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Navigation failed, trying cache");
            if let Some(cached) = lookup(ctx, &request.cache_key()).await {
                return cached;
            }
            if let Some(offline) = lookup(ctx, ctx.offline_page).await {
                debug!(url = %request.url, "Serving offline page");
                return offline;
            }
            warn!(url = %request.url, "Offline page missing from cache");
            FetchResponse::service_unavailable()
        }
    }
}

async fn cache_first(ctx: &StrategyContext<'_>, request: &FetchRequest) -> FetchResponse {
    if let Some(cached) = lookup(ctx, &request.cache_key()).await {
        return cached;
    }

    match fetch_network(ctx, request).await {
        Ok(response) => {
            if response.is_ok() {
                store(ctx, request, &response).await;
            }
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Static asset unavailable");
            FetchResponse::service_unavailable()
        }
    }
}

async fn network_first(ctx: &StrategyContext<'_>, request: &FetchRequest) -> FetchResponse {
    match fetch_network(ctx, request).await {
        Ok(response) => {
            if response.is_ok() {
                store(ctx, request, &response).await;
            }
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Network failed, trying cache");
            // Never the offline page here.
            lookup(ctx, &request.cache_key())
                .await
                .unwrap_or_else(FetchResponse::service_unavailable)
        }
    }
}

/// Network fetch with the optional timeout applied.
async fn fetch_network(ctx: &StrategyContext<'_>, request: &FetchRequest) -> SwResult<FetchResponse> {
    match ctx.fetch_timeout {
        Some(timeout) => {
            pwakit_common::with_timeout(timeout, || ctx.fetcher.fetch(request))
                .await
                .map_err(|e| SwError::Network(e.to_string()))?
        }
        None => ctx.fetcher.fetch(request).await,
    }
}

async fn lookup(ctx: &StrategyContext<'_>, key: &str) -> Option<FetchResponse> {
    let entry = ctx.caches.write().await.match_request(key)?;
    debug!(url = %key, "Cache hit");
    Some(FetchResponse::from_cache(&entry))
}

/// Store a snapshot of `response` in the dynamic bucket; failures are swallowed.
async fn store(ctx: &StrategyContext<'_>, request: &FetchRequest, response: &FetchResponse) {
    let entry = response.to_cache_entry(&request.cache_key(), &request.method);
    if let Err(e) = ctx.caches.write().await.put(ctx.dynamic_cache, entry) {
        warn!(url = %request.url, cache = %ctx.dynamic_cache, error = %e, "Cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::OfflineFetcher;
    use crate::request::ResponseSource;
    use crate::CacheEntry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    /// Answers every request with a fixed status and counts calls.
    struct FixedFetcher {
        status: u16,
        body: &'static str,
        calls: AtomicUsize,
    }

    impl FixedFetcher {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                status,
                body,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for FixedFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> SwResult<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchResponse::new(self.status, self.body))
        }
    }

    /// Never answers.
    struct HangingFetcher;

    #[async_trait]
    impl Fetcher for HangingFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> SwResult<FetchResponse> {
            std::future::pending().await
        }
    }

    const OFFLINE: &str = "https://app.example/offline.html";
    const DYNAMIC: &str = "app-dynamic-v2.0.0";

    fn ctx<'a>(caches: &'a RwLock<CacheStorage>, fetcher: &'a dyn Fetcher) -> StrategyContext<'a> {
        StrategyContext {
            caches,
            fetcher,
            dynamic_cache: DYNAMIC,
            offline_page: OFFLINE,
            fetch_timeout: None,
        }
    }

    fn request(path: &str) -> FetchRequest {
        FetchRequest::get(Url::parse("https://app.example/").unwrap().join(path).unwrap())
    }

    fn seeded(url: &str, body: &str) -> RwLock<CacheStorage> {
        let mut storage = CacheStorage::new();
        storage
            .put(
                "app-static-v2.0.0",
                FetchResponse::new(200, body.to_string()).to_cache_entry(url, &http::Method::GET),
            )
            .unwrap();
        RwLock::new(storage)
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let caches = seeded("https://app.example/app.css", "cached");
        let fetcher = FixedFetcher::new(200, "fresh");

        let response = Strategy::CacheFirst
            .respond(&ctx(&caches, &fetcher), &request("/app.css"))
            .await;

        assert_eq!(response.text(), "cached");
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_stores_200() {
        let caches = RwLock::new(CacheStorage::new());
        let fetcher = FixedFetcher::new(200, "fresh");

        let response = Strategy::CacheFirst
            .respond(&ctx(&caches, &fetcher), &request("/app.css"))
            .await;

        assert_eq!(response.source, ResponseSource::Network);
        let stored = caches.read().await;
        assert!(stored.get(DYNAMIC).unwrap().contains("https://app.example/app.css"));
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_errors() {
        let caches = RwLock::new(CacheStorage::new());
        let fetcher = FixedFetcher::new(404, "nope");

        let response = Strategy::CacheFirst
            .respond(&ctx(&caches, &fetcher), &request("/missing.png"))
            .await;

        assert_eq!(response.status, 404);
        assert!(!caches.read().await.has(DYNAMIC));
    }

    #[tokio::test]
    async fn test_cache_first_offline_miss_is_503() {
        let caches = RwLock::new(CacheStorage::new());
        let response = Strategy::CacheFirst
            .respond(&ctx(&caches, &OfflineFetcher), &request("/app.css"))
            .await;

        assert_eq!(response.status, 503);
        assert_eq!(response.source, ResponseSource::Synthesized);
    }

    #[tokio::test]
    async fn test_network_first_offline_never_serves_offline_page() {
        let caches = seeded(OFFLINE, "<h1>offline</h1>");
        let response = Strategy::NetworkFirst
            .respond(&ctx(&caches, &OfflineFetcher), &request("/api/results"))
            .await;

        assert_eq!(response.status, 503);
        assert!(response.header("content-type").unwrap().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_network_first_prefers_network() {
        let caches = seeded("https://app.example/api/results", "stale");
        let fetcher = FixedFetcher::new(200, "fresh");

        let response = Strategy::NetworkFirst
            .respond(&ctx(&caches, &fetcher), &request("/api/results"))
            .await;

        assert_eq!(response.text(), "fresh");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_navigation_falls_back_to_offline_page_then_503() {
        let caches = seeded(OFFLINE, "<h1>offline</h1>");
        let response = Strategy::NavigationFallback
            .respond(&ctx(&caches, &OfflineFetcher), &request("/results"))
            .await;
        assert_eq!(response.text(), "<h1>offline</h1>");

        let empty = RwLock::new(CacheStorage::new());
        let response = Strategy::NavigationFallback
            .respond(&ctx(&empty, &OfflineFetcher), &request("/results"))
            .await;
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn test_navigation_stores_only_successful_pages() {
        let caches = RwLock::new(CacheStorage::new());
        let missing = FixedFetcher::new(404, "<h1>Not found</h1>");

        let request = FetchRequest::navigate(Url::parse("https://app.example/results/9").unwrap());
        let response = Strategy::NavigationFallback
            .respond(&ctx(&caches, &missing), &request)
            .await;
        assert_eq!(response.status, 404);
        assert_eq!(response.source, ResponseSource::Network);
        assert!(!caches.read().await.has(DYNAMIC));

        let found = FixedFetcher::new(200, "<h1>Results</h1>");
        Strategy::NavigationFallback
            .respond(&ctx(&caches, &found), &request)
            .await;
        let stored = caches.read().await;
        assert!(stored.get(DYNAMIC).unwrap().contains("https://app.example/results/9"));
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_network_response() {
        let mut storage = CacheStorage::new();
        storage.set_quota(Some(1));
        let caches = RwLock::new(storage);
        let fetcher = FixedFetcher::new(200, "a body larger than one byte");

        for strategy in [
            Strategy::NavigationFallback,
            Strategy::CacheFirst,
            Strategy::NetworkFirst,
        ] {
            let response = strategy
                .respond(&ctx(&caches, &fetcher), &request("/api/results"))
                .await;
            assert_eq!(response.status, 200);
            assert_eq!(response.text(), "a body larger than one byte");
        }
        assert_eq!(caches.read().await.total_bytes(), 0);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_network_failure() {
        let caches = RwLock::new(CacheStorage::new());
        caches
            .write()
            .await
            .put(
                DYNAMIC,
                CacheEntry {
                    url: "https://app.example/api/results".to_string(),
                    method: "GET".to_string(),
                    status: 200,
                    status_text: "OK".to_string(),
                    headers: Default::default(),
                    body: b"cached".to_vec(),
                    cached_at: 0,
                },
            )
            .unwrap();

        let mut context = ctx(&caches, &HangingFetcher);
        context.fetch_timeout = Some(Duration::from_millis(20));

        let response = Strategy::NetworkFirst
            .respond(&context, &request("/api/results"))
            .await;
        assert_eq!(response.text(), "cached");
    }
}
