//! Cache Janitor: drops buckets left behind by other worker versions.

use tokio::sync::RwLock;
use tracing::info;

use crate::cache::CacheStorage;

/// Delete every bucket whose name is not one of `current`.
///
/// Returns the deleted names. Running it again with the same `current`
/// names deletes nothing.
pub async fn purge_stale_caches(caches: &RwLock<CacheStorage>, current: &[&str]) -> Vec<String> {
    let mut storage = caches.write().await;

    let stale: Vec<String> = storage
        .keys()
        .into_iter()
        .filter(|name| !current.contains(name))
        .map(str::to_string)
        .collect();

    for name in &stale {
        info!(cache = %name, "Deleting stale cache");
        storage.delete(name);
    }

    stale
}
