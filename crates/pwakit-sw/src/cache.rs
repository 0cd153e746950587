//! Cache Store: named buckets of request → response snapshots.
//!
//! Buckets are keyed by request URL (fragment stripped). Only GET responses
//! are stored. A bucket may carry an entry bound, in which case the least
//! recently used entry is evicted on overflow; the store as a whole may carry
//! a byte quota, in which case writes that would exceed it are rejected.

use std::num::NonZeroUsize;
use std::path::Path;

use hashbrown::HashMap;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{SwError, SwResult};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (cache key).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    #[serde(default)]
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Approximate storage footprint.
    pub fn size_bytes(&self) -> u64 {
        let headers: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        (self.url.len() + self.method.len() + headers + self.body.len()) as u64
    }
}

// ==================== Cache ====================

/// A cache bucket.
#[derive(Debug)]
pub struct Cache {
    /// Bucket name.
    pub name: String,

    entries: LruCache<String, CacheEntry>,
    max_entries: Option<NonZeroUsize>,
    bytes: u64,
}

impl Cache {
    /// Create an unbounded bucket.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: LruCache::unbounded(),
            max_entries: None,
            bytes: 0,
        }
    }

    /// Create a bucket holding at most `max_entries` entries.
    pub fn bounded(name: &str, max_entries: NonZeroUsize) -> Self {
        Self {
            name: name.to_string(),
            entries: LruCache::new(max_entries),
            max_entries: Some(max_entries),
            bytes: 0,
        }
    }

    /// Entry bound, if any.
    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries.map(NonZeroUsize::get)
    }

    /// Change the entry bound. Shrinking evicts least recently used entries.
    pub fn set_max_entries(&mut self, max_entries: Option<NonZeroUsize>) {
        if self.max_entries == max_entries {
            return;
        }
        match max_entries {
            Some(limit) => {
                while self.entries.len() > limit.get() {
                    if let Some((key, evicted)) = self.entries.pop_lru() {
                        debug!(cache = %self.name, url = %key, "Evicted on resize");
                        self.bytes -= evicted.size_bytes();
                    }
                }
                self.entries.resize(limit);
            }
            None => {
                let cap = NonZeroUsize::new(usize::MAX).unwrap_or(NonZeroUsize::MIN);
                self.entries.resize(cap);
            }
        }
        self.max_entries = max_entries;
    }

    /// Match a request and mark it as recently used.
    pub fn match_request(&mut self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Look up a request without touching recency.
    pub fn peek(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.peek(url)
    }

    /// Check for a request.
    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains(url)
    }

    /// Entry that storing `url` would push out: the least recently used
    /// one, when the bucket is full and `url` is not already present.
    pub fn eviction_candidate(&self, url: &str) -> Option<&CacheEntry> {
        let limit = self.max_entries?;
        if self.entries.len() < limit.get() || self.entries.contains(url) {
            return None;
        }
        self.entries.peek_lru().map(|(_, entry)| entry)
    }

    /// Store an entry under its URL. Returns the entry evicted to make room,
    /// if the bucket was full.
    pub fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let key = entry.url.clone();
        self.bytes += entry.size_bytes();

        match self.entries.push(key.clone(), entry) {
            Some((old_key, old)) => {
                self.bytes -= old.size_bytes();
                if old_key == key {
                    trace!(cache = %self.name, url = %key, "Replaced entry");
                    None
                } else {
                    debug!(cache = %self.name, url = %old_key, "Evicted least recently used entry");
                    Some(old)
                }
            }
            None => None,
        }
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &str) -> bool {
        match self.entries.pop(url) {
            Some(entry) => {
                self.bytes -= entry.size_bytes();
                true
            }
            None => false,
        }
    }

    /// All keys, most recently used first.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total footprint of all entries.
    pub fn size_bytes(&self) -> u64 {
        self.bytes
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }

    /// Entries, least recently used first.
    fn entries_lru_first(&self) -> Vec<CacheEntry> {
        self.entries.iter().rev().map(|(_, e)| e.clone()).collect()
    }
}

// ==================== Cache Storage ====================

/// Serializable image of a [`CacheStorage`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub caches: Vec<BucketSnapshot>,
}

/// Serializable image of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    pub name: String,
    #[serde(default)]
    pub max_entries: Option<usize>,
    /// Least recently used first.
    pub entries: Vec<CacheEntry>,
}

/// All buckets of one origin.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    /// Creation order, used by cross-bucket matching.
    order: Vec<String>,
    quota_bytes: Option<u64>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the byte quota.
    pub fn set_quota(&mut self, quota_bytes: Option<u64>) {
        self.quota_bytes = quota_bytes;
    }

    /// Current byte quota.
    pub fn quota(&self) -> Option<u64> {
        self.quota_bytes
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            debug!(cache = %name, "Creating cache");
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Open a cache and apply an entry bound.
    pub fn open_bounded(&mut self, name: &str, max_entries: Option<usize>) -> &mut Cache {
        let cache = self.open(name);
        cache.set_max_entries(max_entries.and_then(NonZeroUsize::new));
        cache
    }

    /// Get an existing cache.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache and all its entries.
    pub fn delete(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.caches.remove(name).is_some()
    }

    /// All cache names, in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Match across all caches, oldest bucket first.
    pub fn match_request(&mut self, url: &str) -> Option<CacheEntry> {
        for name in &self.order {
            if let Some(entry) = self
                .caches
                .get_mut(name)
                .and_then(|cache| cache.match_request(url))
            {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Store an entry in the named cache, creating it if needed.
    ///
    /// Fails with [`SwError::QuotaExceeded`] if the write would push the
    /// store past its quota; the store is left unchanged in that case.
    pub fn put(&mut self, cache_name: &str, entry: CacheEntry) -> SwResult<()> {
        if !entry.method.eq_ignore_ascii_case("GET") {
            return Err(SwError::Cache(format!(
                "only GET requests can be cached, got {}",
                entry.method
            )));
        }

        if let Some(quota) = self.quota_bytes {
            // Bytes the write itself releases: the entry it replaces, or the
            // one a full bounded bucket evicts for it.
            let freed = self
                .caches
                .get(cache_name)
                .and_then(|c| c.peek(&entry.url).or_else(|| c.eviction_candidate(&entry.url)))
                .map(CacheEntry::size_bytes)
                .unwrap_or(0);
            let used = self.total_bytes() - freed;
            let needed = entry.size_bytes();
            if used + needed > quota {
                return Err(SwError::QuotaExceeded {
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }

        self.open(cache_name).put(entry);
        Ok(())
    }

    /// Footprint of all buckets.
    pub fn total_bytes(&self) -> u64 {
        self.caches.values().map(Cache::size_bytes).sum()
    }

    /// Capture every bucket.
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            caches: self
                .order
                .iter()
                .filter_map(|name| self.caches.get(name))
                .map(|cache| BucketSnapshot {
                    name: cache.name.clone(),
                    max_entries: cache.max_entries(),
                    entries: cache.entries_lru_first(),
                })
                .collect(),
        }
    }

    /// Rebuild a store from a snapshot.
    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        let mut storage = Self::new();
        for bucket in snapshot.caches {
            let cache = storage.open_bounded(&bucket.name, bucket.max_entries);
            for entry in bucket.entries {
                cache.put(entry);
            }
        }
        storage
    }

    /// Write a JSON snapshot to `path`.
    pub async fn save(&self, path: impl AsRef<Path>) -> SwResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec(&self.snapshot())?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), bytes = json.len(), "Saved cache snapshot");
        Ok(())
    }

    /// Load a JSON snapshot. A missing file yields an empty store.
    pub async fn load(path: impl AsRef<Path>) -> SwResult<Self> {
        let path = path.as_ref();
        let json = match tokio::fs::read(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache snapshot, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: CacheSnapshot = serde_json::from_slice(&json)?;
        Ok(Self::from_snapshot(snapshot))
    }
}
