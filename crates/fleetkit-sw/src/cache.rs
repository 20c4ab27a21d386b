//! Named cache stores and the store manager.
//!
//! ```text
//! CacheManager (async, shared by every handler)
//!     └── CacheStorage
//!             └── Cache (one per store name)
//!                     └── url → CacheEntry, oldest first
//! ```
//!
//! Entries keep insertion order. Re-putting a key moves it to the back,
//! so "oldest" always means "least recently written".

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetkit_common::Clock;
use fleetkit_net::Response;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Result, ServiceWorkerError};
use crate::generation::Generation;

// ==================== Cache Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (the key).
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers, lowercased names.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

impl CacheEntry {
    /// Snapshot a response for storage.
    pub fn from_response(url: &str, response: &Response, cached_at: i64) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: url.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at,
        }
    }

    /// Rebuild a response from the stored copy.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        Response {
            url: Url::parse(&self.url).ok(),
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: self.body.clone().into(),
        }
    }

    /// Parsed `date` header. `None` when absent or unparsable.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        let raw = self.headers.get("date")?;
        match DateTime::parse_from_rfc2822(raw) {
            Ok(date) => Some(date.with_timezone(&Utc)),
            Err(e) => {
                warn!(url = %self.url, date = %raw, error = %e, "Unparsable date header");
                None
            }
        }
    }

    /// Whether the entry is older than `ttl` at `now`.
    ///
    /// Entries without a usable `date` header never expire.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let Some(date) = self.date() else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - date > ttl,
            Err(_) => false,
        }
    }
}

// ==================== Cache ====================

/// A single named store.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Entries in insertion order.
    entries: IndexMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: IndexMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Insert or replace; the key becomes the newest entry.
    pub fn put(&mut self, url: &str, entry: CacheEntry) {
        self.entries.shift_remove(url);
        self.entries.insert(url.to_string(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.shift_remove(url).is_some()
    }

    /// Drop the oldest entries until at most `limit` remain.
    /// Returns the evicted keys, oldest first.
    pub fn evict_to_limit(&mut self, limit: usize) -> Vec<String> {
        let excess = self.entries.len().saturating_sub(limit);
        self.entries.drain(..excess).map(|(key, _)| key).collect()
    }

    /// All keys, oldest first.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// The set of named stores.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheStorage {
    caches: IndexMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get an existing cache.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.shift_remove(name).is_some()
    }

    /// Get all cache names, in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.keys().map(|s| s.as_str()).collect()
    }
}

// ==================== Cache Manager ====================

/// Async owner of all store mutation.
///
/// Cloning is cheap; clones share the same storage.
#[derive(Clone)]
pub struct CacheManager {
    storage: Arc<RwLock<CacheStorage>>,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_storage(CacheStorage::new(), clock)
    }

    /// Start from existing storage, e.g. a loaded snapshot.
    pub fn with_storage(storage: CacheStorage, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage: Arc::new(RwLock::new(storage)),
            clock,
        }
    }

    /// Create the store if it does not exist.
    pub async fn open(&self, name: &str) {
        self.storage.write().await.open(name);
    }

    /// Look up `key` in `store`. A missing store is a miss.
    pub async fn match_entry(&self, store: &str, key: &str) -> Option<CacheEntry> {
        let storage = self.storage.read().await;
        let entry = storage.get(store)?.match_request(key).cloned();
        trace!(store, key, hit = entry.is_some(), "Cache lookup");
        entry
    }

    /// Store a response under `key` without enforcing a ceiling.
    pub async fn put(&self, store: &str, key: &str, response: &Response) {
        let entry = self.entry_for(key, response);
        self.storage.write().await.open(store).put(key, entry);
        debug!(store, key, "Cached response");
    }

    /// Store a response and evict down to `limit` under one lock.
    ///
    /// Concurrent writers to the same store cannot interleave between the
    /// put and the eviction, so the ceiling holds exactly.
    pub async fn put_bounded(&self, store: &str, key: &str, response: &Response, limit: usize) {
        let entry = self.entry_for(key, response);
        let evicted = {
            let mut storage = self.storage.write().await;
            let cache = storage.open(store);
            cache.put(key, entry);
            cache.evict_to_limit(limit)
        };
        debug!(store, key, "Cached response");
        log_evictions(store, &evicted);
    }

    /// Store several responses at once. Either all land or none do.
    pub async fn put_all(&self, store: &str, responses: &[(String, Response)]) {
        let entries: Vec<_> = responses
            .iter()
            .map(|(key, response)| (key.as_str(), self.entry_for(key, response)))
            .collect();
        let mut storage = self.storage.write().await;
        let cache = storage.open(store);
        for (key, entry) in entries {
            cache.put(key, entry);
        }
        info!(store, count = responses.len(), "Stored batch");
    }

    /// Delete the oldest entries of `store` beyond `limit`.
    /// Returns how many were evicted.
    pub async fn evict_to_limit(&self, store: &str, limit: usize) -> usize {
        let evicted = {
            let mut storage = self.storage.write().await;
            if !storage.has(store) {
                return 0;
            }
            storage.open(store).evict_to_limit(limit)
        };
        log_evictions(store, &evicted);
        evicted.len()
    }

    /// Delete one entry.
    pub async fn delete_entry(&self, store: &str, key: &str) -> bool {
        let mut storage = self.storage.write().await;
        if !storage.has(store) {
            return false;
        }
        storage.open(store).delete(key)
    }

    /// Delete a whole store.
    pub async fn delete_store(&self, name: &str) -> bool {
        let deleted = self.storage.write().await.delete(name);
        if deleted {
            info!(store = name, "Deleted store");
        }
        deleted
    }

    /// Names of every existing store.
    pub async fn list_stores(&self) -> Vec<String> {
        let storage = self.storage.read().await;
        storage.keys().into_iter().map(String::from).collect()
    }

    /// Keys of `store`, oldest first. Empty when the store does not exist.
    pub async fn list_entries(&self, store: &str) -> Vec<String> {
        let storage = self.storage.read().await;
        storage
            .get(store)
            .map(|cache| cache.keys().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Delete every store not owned by `generation`. Returns the deleted names.
    pub async fn purge_except(&self, generation: &Generation) -> Vec<String> {
        let mut storage = self.storage.write().await;
        let stale: Vec<String> = storage
            .keys()
            .into_iter()
            .filter(|name| !generation.is_current(name))
            .map(String::from)
            .collect();
        for name in &stale {
            storage.delete(name);
            info!(store = %name, "Purged store from previous generation");
        }
        stale
    }

    /// Delete every store. Returns the deleted names.
    pub async fn clear_all(&self) -> Vec<String> {
        let mut storage = self.storage.write().await;
        let names: Vec<String> = storage.keys().into_iter().map(String::from).collect();
        for name in &names {
            storage.delete(name);
        }
        info!(count = names.len(), "Cleared all stores");
        names
    }

    /// Write every store to a JSON file.
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = {
            let storage = self.storage.read().await;
            serde_json::to_vec(&*storage).map_err(|e| ServiceWorkerError::Cache(e.to_string()))?
        };
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), "Saved cache snapshot");
        Ok(())
    }

    /// Replace the in-memory stores with a JSON snapshot.
    pub async fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = tokio::fs::read(path).await?;
        let loaded: CacheStorage = serde_json::from_slice(&json).map_err(|e| {
            ServiceWorkerError::Cache(format!("corrupt snapshot {}: {e}", path.display()))
        })?;
        let stores = loaded.keys().len();
        *self.storage.write().await = loaded;
        info!(path = %path.display(), stores, "Loaded cache snapshot");
        Ok(())
    }

    fn entry_for(&self, key: &str, response: &Response) -> CacheEntry {
        CacheEntry::from_response(key, response, self.clock.now().timestamp_millis())
    }
}

fn log_evictions(store: &str, evicted: &[String]) {
    if !evicted.is_empty() {
        info!(store, count = evicted.len(), "Evicted oldest entries");
        trace!(store, keys = ?evicted, "Evicted keys");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fleetkit_common::ManualClock;

    fn entry(url: &str, date: Option<&str>) -> CacheEntry {
        let mut headers = HashMap::new();
        if let Some(date) = date {
            headers.insert("date".to_string(), date.to_string());
        }
        CacheEntry {
            url: url.to_string(),
            status: 200,
            headers,
            body: b"x".to_vec(),
            cached_at: 0,
        }
    }

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("fleet-static-v1");
        cache.put("https://a.com/app.js", entry("https://a.com/app.js", None));

        assert!(cache.match_request("https://a.com/app.js").is_some());
        assert!(cache.match_request("https://a.com/other.js").is_none());
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1");
        cache.put("k", entry("k", None));
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reput_moves_to_back() {
        let mut cache = Cache::new("v1");
        for key in ["a", "b", "c"] {
            cache.put(key, entry(key, None));
        }
        cache.put("a", entry("a", None));
        assert_eq!(cache.keys(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_evict_to_limit_drops_oldest() {
        let mut cache = Cache::new("v1");
        for i in 0..7 {
            let key = format!("k{i}");
            cache.put(&key, entry(&key, None));
        }
        let evicted = cache.evict_to_limit(5);
        assert_eq!(evicted, vec!["k0", "k1"]);
        assert_eq!(cache.keys(), vec!["k2", "k3", "k4", "k5", "k6"]);

        assert!(cache.evict_to_limit(5).is_empty());
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1");
        storage.open("v0");
        assert_eq!(storage.keys(), vec!["v1", "v0"]);

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_expiry_uses_date_header() {
        let date = "Fri, 01 Mar 2024 12:00:00 GMT";
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let ttl = Duration::from_secs(60);
        let e = entry("k", Some(date));

        assert_eq!(e.date(), Some(t0));
        assert!(!e.is_expired(ttl, t0 + chrono::Duration::seconds(60)));
        assert!(e.is_expired(ttl, t0 + chrono::Duration::milliseconds(60_001)));
    }

    #[test]
    fn test_missing_or_bad_date_never_expires() {
        let far_future = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap();
        let ttl = Duration::from_secs(1);
        assert!(!entry("k", None).is_expired(ttl, far_future));
        assert!(!entry("k", Some("yesterday")).is_expired(ttl, far_future));
    }

    #[test]
    fn test_entry_roundtrips_response() {
        let response = Response::ok_with("hello")
            .with_header(http::header::CONTENT_TYPE, "text/plain")
            .with_header(http::header::DATE, "Fri, 01 Mar 2024 12:00:00 GMT");
        let stored = CacheEntry::from_response("https://a.com/x", &response, 42);
        assert_eq!(stored.headers.get("content-type").unwrap(), "text/plain");
        assert_eq!(stored.cached_at, 42);

        let back = stored.to_response();
        assert_eq!(back.status, StatusCode::OK);
        assert_eq!(back.text().unwrap(), "hello");
        assert_eq!(back.url.unwrap().as_str(), "https://a.com/x");
    }

    fn manager() -> CacheManager {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        CacheManager::new(Arc::new(clock))
    }

    #[tokio::test]
    async fn test_manager_put_bounded_keeps_newest() {
        let caches = manager();
        for i in 0..55 {
            let key = format!("https://a.com/{i}.js");
            caches
                .put_bounded("fleet-static-v1", &key, &Response::ok_with("x"), 50)
                .await;
        }
        let keys = caches.list_entries("fleet-static-v1").await;
        assert_eq!(keys.len(), 50);
        assert_eq!(keys.first().unwrap(), "https://a.com/5.js");
        assert_eq!(keys.last().unwrap(), "https://a.com/54.js");
    }

    #[tokio::test]
    async fn test_manager_evict_missing_store_is_noop() {
        let caches = manager();
        assert_eq!(caches.evict_to_limit("nope", 1).await, 0);
        assert!(caches.list_stores().await.is_empty());
    }

    #[tokio::test]
    async fn test_manager_match_does_not_create_store() {
        let caches = manager();
        assert!(caches.match_entry("fleet-api-v1", "k").await.is_none());
        assert!(caches.list_stores().await.is_empty());
    }

    #[tokio::test]
    async fn test_manager_delete_entry_and_store() {
        let caches = manager();
        caches.put("s", "k", &Response::ok_with("x")).await;
        assert!(caches.delete_entry("s", "k").await);
        assert!(!caches.delete_entry("s", "k").await);
        assert!(caches.delete_store("s").await);
        assert!(!caches.delete_store("s").await);
    }

    #[tokio::test]
    async fn test_manager_stamps_cached_at_from_clock() {
        let caches = manager();
        caches.put("s", "k", &Response::ok_with("x")).await;
        let entry = caches.match_entry("s", "k").await.unwrap();
        assert_eq!(
            entry.cached_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
                .unwrap()
                .timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = std::env::temp_dir().join(format!("fleetkit-snap-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("caches.json");

        let caches = manager();
        caches.put("fleet-static-v1", "a", &Response::ok_with("1")).await;
        caches.put("fleet-static-v1", "b", &Response::ok_with("2")).await;
        caches.put("fleet-api-v1", "c", &Response::ok_with("3")).await;
        caches.save_snapshot(&path).await.unwrap();

        let restored = manager();
        restored.load_snapshot(&path).await.unwrap();
        assert_eq!(
            restored.list_stores().await,
            vec!["fleet-static-v1", "fleet-api-v1"]
        );
        assert_eq!(restored.list_entries("fleet-static-v1").await, vec!["a", "b"]);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_corrupt_snapshot_fails() {
        let path = std::env::temp_dir().join(format!("fleetkit-bad-{}.json", std::process::id()));
        tokio::fs::write(&path, b"not json").await.unwrap();
        let err = manager().load_snapshot(&path).await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::Cache(_)));
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
