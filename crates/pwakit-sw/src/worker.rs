//! Worker lifecycle and event dispatch.
//!
//! ```text
//! install  → precache          (Parsed → Installing → Installed, skip-waiting)
//! activate → janitor + claim   (Installed → Activating → Activated)
//! fetch    → router → strategy (only once Activated)
//! push / notificationclick
//! ```
//!
//! Handlers take `&self` and may run concurrently. Shared state lives in
//! the cache store and the clients registry; neither lock is held across a
//! network fetch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::{Client, Clients};
use crate::config::WorkerConfig;
use crate::janitor::purge_stale_caches;
use crate::network::Fetcher;
use crate::precache::{Precache, PrecacheReport};
use crate::push::{Notification, NotificationClick, PushPayload};
use crate::request::{cache_key, FetchRequest, FetchResponse};
use crate::router::{PassthroughReason, Route, Router};
use crate::strategy::StrategyContext;
use crate::{SwError, SwResult};

// ==================== Types ====================

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Constructed, not yet installed.
    #[default]
    Parsed,
    /// Install event running (precache).
    Installing,
    /// Installed; skip-waiting makes it eligible for activation at once.
    Installed,
    /// Activate event running (janitor, claim).
    Activating,
    /// Active and handling fetches.
    Activated,
    /// Retired.
    Redundant,
}

/// Events emitted towards the host runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// Install finished; the worker asks to activate without waiting.
    SkipWaiting { worker_id: ServiceWorkerId },
    /// Stale buckets were deleted during activation.
    CachesDeleted { names: Vec<String> },
    /// A client is now controlled by this worker.
    ControllerChange { client_id: String },
    /// A notification should be displayed.
    NotificationShown(Notification),
    /// A notification was clicked and should be closed.
    NotificationClosed { title: String },
    /// A window was opened from a notification click.
    WindowOpened { client_id: String, url: Url },
}

/// Result of a fetch event.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The worker answered.
    Respond { route: Route, response: FetchResponse },
    /// The request goes to the network unmodified.
    Passthrough(PassthroughReason),
}

impl FetchOutcome {
    /// The worker's response, if it answered.
    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            FetchOutcome::Passthrough(_) => None,
        }
    }

    /// Consume into the worker's response, if it answered.
    pub fn into_response(self) -> Option<FetchResponse> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            FetchOutcome::Passthrough(_) => None,
        }
    }
}

// ==================== Worker ====================

/// One version of the offline worker.
pub struct OfflineWorker {
    id: ServiceWorkerId,
    config: WorkerConfig,
    origin: Url,
    router: Router,
    static_cache: String,
    dynamic_cache: String,
    offline_page: String,
    state: RwLock<(ServiceWorkerState, Instant)>,
    caches: Arc<RwLock<CacheStorage>>,
    clients: Arc<RwLock<Clients>>,
    fetcher: Arc<dyn Fetcher>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl OfflineWorker {
    /// Create a worker with an empty cache store.
    pub fn new(
        config: WorkerConfig,
        origin: Url,
        fetcher: Arc<dyn Fetcher>,
    ) -> SwResult<(Self, mpsc::UnboundedReceiver<WorkerEvent>)> {
        Self::with_caches(config, origin, fetcher, CacheStorage::new())
    }

    /// Create a worker on top of an existing cache store (e.g. one loaded
    /// from a snapshot left by a previous version).
    pub fn with_caches(
        config: WorkerConfig,
        origin: Url,
        fetcher: Arc<dyn Fetcher>,
        mut caches: CacheStorage,
    ) -> SwResult<(Self, mpsc::UnboundedReceiver<WorkerEvent>)> {
        config.validate()?;
        if origin.cannot_be_a_base() || origin.host_str().is_none() {
            return Err(SwError::InvalidUrl(format!("not an origin: {}", origin)));
        }
        let origin = origin.join("/")?;

        caches.set_quota(config.quota_bytes);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let worker = Self {
            id: ServiceWorkerId::new(),
            router: Router::new(&config, origin.clone()),
            static_cache: config.static_cache_name(),
            dynamic_cache: config.dynamic_cache_name(),
            offline_page: cache_key(&origin.join(&config.offline_page)?),
            config,
            origin,
            state: RwLock::new((ServiceWorkerState::Parsed, Instant::now())),
            caches: Arc::new(RwLock::new(caches)),
            clients: Arc::new(RwLock::new(Clients::new())),
            fetcher,
            event_tx,
        };

        debug!(
            worker_id = worker.id.raw(),
            static_cache = %worker.static_cache,
            dynamic_cache = %worker.dynamic_cache,
            "Worker created"
        );
        Ok((worker, event_rx))
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Shared cache store.
    pub fn caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.caches)
    }

    /// Shared clients registry.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    /// Current state.
    pub async fn state(&self) -> ServiceWorkerState {
        self.state.read().await.0
    }

    /// When the state last changed.
    pub async fn state_changed_at(&self) -> Instant {
        self.state.read().await.1
    }

    /// Whether the worker is handling fetches.
    pub async fn is_active(&self) -> bool {
        self.state().await == ServiceWorkerState::Activated
    }

    // ==================== Lifecycle ====================

    /// Install event: precache the manifest, then skip waiting.
    pub async fn install(&self) -> SwResult<PrecacheReport> {
        self.transition(&[ServiceWorkerState::Parsed], ServiceWorkerState::Installing)
            .await?;

        let report = Precache {
            origin: &self.origin,
            cache_name: &self.static_cache,
            manifest: &self.config.precache,
            retry: self.config.precache_retry(),
            fetch_timeout: self.config.fetch_timeout(),
        }
        .run(&self.caches, self.fetcher.as_ref())
        .await;

        self.set_state(ServiceWorkerState::Installed).await;
        self.emit(WorkerEvent::SkipWaiting { worker_id: self.id });
        Ok(report)
    }

    /// Activate event: delete stale buckets and claim open clients.
    ///
    /// Returns the deleted bucket names. Re-activating an active worker is
    /// allowed: it re-runs the purge and claim while staying `Activated`,
    /// and never touches the current buckets.
    pub async fn activate(&self) -> SwResult<Vec<String>> {
        let reactivating = self.is_active().await;
        if !reactivating {
            self.transition(&[ServiceWorkerState::Installed], ServiceWorkerState::Activating)
                .await?;
        }

        {
            let mut caches = self.caches.write().await;
            caches.open(&self.static_cache);
            caches.open_bounded(&self.dynamic_cache, self.config.max_dynamic_entries);
        }

        let deleted =
            purge_stale_caches(&self.caches, &[self.static_cache.as_str(), self.dynamic_cache.as_str()])
                .await;
        if !deleted.is_empty() {
            self.emit(WorkerEvent::CachesDeleted {
                names: deleted.clone(),
            });
        }

        let claimed = self.clients.write().await.claim(self.id);
        for client_id in claimed {
            self.emit(WorkerEvent::ControllerChange { client_id });
        }

        if !reactivating {
            self.set_state(ServiceWorkerState::Activated).await;
        }
        info!(worker_id = self.id.raw(), deleted = deleted.len(), reactivating, "Worker activated");
        Ok(deleted)
    }

    /// Install, then activate immediately.
    pub async fn start(&self) -> SwResult<PrecacheReport> {
        let report = self.install().await?;
        self.activate().await?;
        Ok(report)
    }

    /// Activate on top of a static bucket persisted by an earlier run of
    /// this version, without precaching again.
    pub async fn restore(&self) -> SwResult<()> {
        if !self.caches.read().await.has(&self.static_cache) {
            return Err(SwError::State(format!(
                "no persisted cache '{}' to restore from",
                self.static_cache
            )));
        }
        self.transition(&[ServiceWorkerState::Parsed], ServiceWorkerState::Installed)
            .await?;
        self.emit(WorkerEvent::SkipWaiting { worker_id: self.id });
        self.activate().await?;
        Ok(())
    }

    /// Mark this worker as replaced. It stops handling fetches.
    pub async fn retire(&self) {
        self.set_state(ServiceWorkerState::Redundant).await;
    }

    // ==================== Events ====================

    /// Fetch event.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        if !self.is_active().await {
            trace!(url = %request.url, "Not active, passing through");
            return FetchOutcome::Passthrough(PassthroughReason::NotActive);
        }

        let route = self.router.classify(request);
        let strategy = match route.strategy() {
            Ok(strategy) => strategy,
            Err(reason) => {
                trace!(url = %request.url, ?reason, "Passing through");
                return FetchOutcome::Passthrough(reason);
            }
        };

        let ctx = StrategyContext {
            caches: &self.caches,
            fetcher: self.fetcher.as_ref(),
            dynamic_cache: &self.dynamic_cache,
            offline_page: &self.offline_page,
            fetch_timeout: self.config.fetch_timeout(),
        };
        let response = strategy.respond(&ctx, request).await;

        debug!(
            url = %request.url,
            ?route,
            status = response.status,
            source = ?response.source,
            "Fetch handled"
        );
        FetchOutcome::Respond { route, response }
    }

    /// Push event. Malformed payloads are dropped.
    pub fn handle_push(&self, data: &[u8]) -> Option<Notification> {
        let payload = PushPayload::parse(data)?;
        let notification = Notification::from_payload(payload, &self.config.notifications);
        debug!(title = %notification.title, url = %notification.data.url, "Showing notification");
        self.emit(WorkerEvent::NotificationShown(notification.clone()));
        Some(notification)
    }

    /// Notification click. Returns the window opened, if any.
    pub async fn handle_notification_click(
        &self,
        click: &NotificationClick,
    ) -> SwResult<Option<Client>> {
        self.emit(WorkerEvent::NotificationClosed {
            title: click.notification.title.clone(),
        });

        let Some(target) = click.target(&self.config.notifications) else {
            debug!(action = ?click.action, "Notification dismissed");
            return Ok(None);
        };

        let url = self.origin.join(target)?;
        let client = self.clients.write().await.open_window(url.clone(), self.id);
        self.emit(WorkerEvent::WindowOpened {
            client_id: client.id.clone(),
            url,
        });
        Ok(Some(client))
    }

    // ==================== Helpers ====================

    async fn transition(
        &self,
        from: &[ServiceWorkerState],
        to: ServiceWorkerState,
    ) -> SwResult<()> {
        let mut state = self.state.write().await;
        if !from.contains(&state.0) {
            return Err(SwError::State(format!(
                "cannot move from {:?} to {:?}",
                state.0, to
            )));
        }
        *state = (to, Instant::now());
        drop(state);

        self.emit(WorkerEvent::StateChange {
            worker_id: self.id,
            new_state: to,
        });
        Ok(())
    }

    async fn set_state(&self, to: ServiceWorkerState) {
        *self.state.write().await = (to, Instant::now());
        self.emit(WorkerEvent::StateChange {
            worker_id: self.id,
            new_state: to,
        });
    }

    fn emit(&self, event: WorkerEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }
}

impl std::fmt::Debug for OfflineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("id", &self.id)
            .field("origin", &self.origin.as_str())
            .field("static_cache", &self.static_cache)
            .field("dynamic_cache", &self.dynamic_cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::OfflineFetcher;
    use crate::push::ClickAction;

    fn worker() -> (OfflineWorker, mpsc::UnboundedReceiver<WorkerEvent>) {
        OfflineWorker::new(
            WorkerConfig {
                precache: vec!["/offline.html".to_string()],
                ..Default::default()
            },
            Url::parse("https://app.example/some/page").unwrap(),
            Arc::new(OfflineFetcher),
        )
        .unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_worker_ids_unique() {
        assert_ne!(ServiceWorkerId::new(), ServiceWorkerId::new());
    }

    #[test]
    fn test_origin_is_normalized() {
        let (worker, _rx) = worker();
        assert_eq!(worker.origin().as_str(), "https://app.example/");
    }

    #[test]
    fn test_rejects_non_origin_urls() {
        let result = OfflineWorker::new(
            WorkerConfig::default(),
            Url::parse("mailto:ops@app.example").unwrap(),
            Arc::new(OfflineFetcher),
        );
        assert!(matches!(result, Err(SwError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_order_enforced() {
        let (worker, _rx) = worker();

        assert!(matches!(worker.activate().await, Err(SwError::State(_))));

        worker.install().await.unwrap();
        assert_eq!(worker.state().await, ServiceWorkerState::Installed);
        assert!(matches!(worker.install().await, Err(SwError::State(_))));

        worker.activate().await.unwrap();
        assert!(worker.is_active().await);

        worker.retire().await;
        assert!(matches!(worker.activate().await, Err(SwError::State(_))));
    }

    #[tokio::test]
    async fn test_fetch_passes_through_until_activated() {
        let (worker, _rx) = worker();
        let request = FetchRequest::get(Url::parse("https://app.example/app.js").unwrap());

        worker.install().await.unwrap();
        assert_eq!(
            worker.handle_fetch(&request).await,
            FetchOutcome::Passthrough(PassthroughReason::NotActive)
        );

        worker.activate().await.unwrap();
        let outcome = worker.handle_fetch(&request).await;
        assert_eq!(outcome.response().unwrap().status, 503);
    }

    #[tokio::test]
    async fn test_install_emits_skip_waiting() {
        let (worker, mut rx) = worker();
        let report = worker.install().await.unwrap();

        assert!(report.proceeded);
        assert_eq!(report.failed(), 1);
        let events = drain(&mut rx);
        assert!(events.contains(&WorkerEvent::SkipWaiting {
            worker_id: worker.id()
        }));
        assert_eq!(
            events.last(),
            Some(&WorkerEvent::SkipWaiting {
                worker_id: worker.id()
            })
        );
    }

    #[tokio::test]
    async fn test_reactivation_stays_activated() {
        let (worker, mut rx) = worker();
        worker.start().await.unwrap();
        let activated_at = worker.state_changed_at().await;
        drain(&mut rx);

        worker.caches().write().await.open("pwakit-static-v1.0.0");

        assert_eq!(worker.activate().await.unwrap(), vec!["pwakit-static-v1.0.0"]);
        assert!(worker.is_active().await);
        assert_eq!(worker.state_changed_at().await, activated_at);
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, WorkerEvent::StateChange { .. })));
    }

    #[tokio::test]
    async fn test_restore_reuses_persisted_static_cache() {
        let (worker, _rx) = worker();
        assert!(matches!(worker.restore().await, Err(SwError::State(_))));
        assert_eq!(worker.state().await, ServiceWorkerState::Parsed);

        let mut storage = CacheStorage::new();
        storage
            .put(
                "pwakit-static-v2.0.0",
                FetchResponse::new(200, "offline")
                    .to_cache_entry("https://app.example/offline.html", &http::Method::GET),
            )
            .unwrap();
        let (worker, _rx) = OfflineWorker::with_caches(
            WorkerConfig::default(),
            Url::parse("https://app.example/").unwrap(),
            Arc::new(OfflineFetcher),
            storage,
        )
        .unwrap();

        worker.restore().await.unwrap();
        assert!(worker.is_active().await);
        let response = worker
            .handle_fetch(&FetchRequest::navigate(
                Url::parse("https://app.example/anywhere").unwrap(),
            ))
            .await
            .into_response()
            .unwrap();
        assert_eq!(response.text(), "offline");
    }

    #[tokio::test]
    async fn test_activate_claims_open_clients() {
        let (worker, mut rx) = worker();
        let client = Client::window(Url::parse("https://app.example/dashboard").unwrap());
        let client_id = client.id.clone();
        worker.clients().write().await.add(client);

        worker.start().await.unwrap();

        let clients = worker.clients();
        let clients = clients.read().await;
        assert_eq!(clients.get(&client_id).unwrap().controller, Some(worker.id()));
        assert!(drain(&mut rx).contains(&WorkerEvent::ControllerChange { client_id }));
    }

    #[tokio::test]
    async fn test_push_and_click_open_window() {
        let (worker, mut rx) = worker();

        let notification = worker
            .handle_push(br#"{"body":"Hi","url":"/dashboard"}"#)
            .unwrap();
        let click = NotificationClick {
            notification,
            action: ClickAction::Explore,
        };
        let client = worker.handle_notification_click(&click).await.unwrap().unwrap();

        assert_eq!(client.url.as_str(), "https://app.example/dashboard");
        assert!(client.focused);

        let events = drain(&mut rx);
        assert!(matches!(events[0], WorkerEvent::NotificationShown(_)));
        assert!(matches!(events[1], WorkerEvent::NotificationClosed { .. }));
        assert!(matches!(events[2], WorkerEvent::WindowOpened { .. }));
    }

    #[tokio::test]
    async fn test_close_action_opens_nothing() {
        let (worker, _rx) = worker();
        let notification = worker.handle_push(br#"{}"#).unwrap();
        let click = NotificationClick {
            notification,
            action: ClickAction::Close,
        };

        assert!(worker.handle_notification_click(&click).await.unwrap().is_none());
        assert!(worker.clients().read().await.is_empty());
    }
}
