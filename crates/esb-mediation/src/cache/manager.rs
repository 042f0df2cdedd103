//! Scoped response store shared by cache mediators
//!
//! Each cache key owns one scope guarded by its own lock, so capacity checks,
//! eviction and insertion within a scope are atomic with respect to each
//! other. Every mutation is replicated after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use esb_common::now_millis;

use crate::cache::CachedObject;
use crate::replication::{ReplicationUpdate, Replicator};

type Scope = Arc<Mutex<HashMap<String, CachedObject>>>;

/// Result of looking up a request hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A live response is cached
    Hit(Bytes),
    /// An entry exists but is expired or still pending; it was reset to
    /// the in-flight state with a fresh timeout
    Reset,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Inserted,
    /// Scope at capacity even after evicting expired entries
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScopeStats {
    pub entries: usize,
    pub pending: usize,
    pub expired: usize,
}

pub struct CacheManager {
    scopes: DashMap<String, Scope>,
    replicator: Arc<dyn Replicator>,
}

impl CacheManager {
    pub fn new(replicator: Arc<dyn Replicator>) -> Self {
        Self {
            scopes: DashMap::new(),
            replicator,
        }
    }

    fn scope(&self, cache_key: &str) -> Scope {
        self.scopes
            .entry(cache_key.to_string())
            .or_insert_with(|| {
                debug!(cache_key = %cache_key, "Creating cache scope");
                Arc::new(Mutex::new(HashMap::new()))
            })
            .clone()
    }

    fn existing_scope(&self, cache_key: &str) -> Option<Scope> {
        self.scopes.get(cache_key).map(|entry| entry.value().clone())
    }

    pub async fn lookup(&self, cache_key: &str, request_hash: &str, timeout_millis: i64) -> Lookup {
        let now = now_millis();
        let reset = {
            let scope = self.scope(cache_key);
            let mut entries = scope.lock();
            let Some(object) = entries.get_mut(request_hash) else {
                return Lookup::Absent;
            };

            if !object.is_expired(now) {
                if let Some(response) = object.response() {
                    return Lookup::Hit(response.clone());
                }
            }

            object.expire();
            object.set_timeout(timeout_millis);
            object.clone()
        };

        debug!(cache_key = %cache_key, request_hash = %request_hash, "Existing cached response has expired. Reset cache element");
        self.replicate(ReplicationUpdate::Upsert {
            cache_key: cache_key.to_string(),
            object: reset,
        })
        .await;
        Lookup::Reset
    }

    /// Register a pending request, evicting expired entries when at capacity
    pub async fn admit(
        &self,
        cache_key: &str,
        request_hash: &str,
        timeout_millis: i64,
        capacity: usize,
    ) -> Admission {
        let now = now_millis();
        let (admitted, evicted) = {
            let scope = self.scope(cache_key);
            let mut entries = scope.lock();
            let mut evicted = Vec::new();

            if entries.len() >= capacity && !entries.contains_key(request_hash) {
                evicted = evict_expired(&mut entries, now);
            }

            if entries.len() >= capacity && !entries.contains_key(request_hash) {
                (None, evicted)
            } else {
                let object = entries
                    .entry(request_hash.to_string())
                    .or_insert_with(|| CachedObject::new(request_hash, timeout_millis))
                    .clone();
                (Some(object), evicted)
            }
        };

        self.replicate_removals(cache_key, evicted).await;

        match admitted {
            Some(object) => {
                self.replicate(ReplicationUpdate::Upsert {
                    cache_key: cache_key.to_string(),
                    object,
                })
                .await;
                Admission::Inserted
            }
            None => {
                debug!(cache_key = %cache_key, capacity, "In-memory cache is full. Unable to cache");
                Admission::Full
            }
        }
    }

    /// Attach a response to a pending entry; `false` when no entry matches
    pub async fn store_response(&self, cache_key: &str, request_hash: &str, response: Bytes) -> bool {
        let now = now_millis();
        let updated = {
            let Some(scope) = self.existing_scope(cache_key) else {
                return false;
            };
            let mut entries = scope.lock();
            match entries.get_mut(request_hash) {
                Some(object) => {
                    object.set_response(response, now);
                    object.clone()
                }
                None => return false,
            }
        };

        self.replicate(ReplicationUpdate::Upsert {
            cache_key: cache_key.to_string(),
            object: updated,
        })
        .await;
        true
    }

    pub fn get(&self, cache_key: &str, request_hash: &str) -> Option<CachedObject> {
        let scope = self.existing_scope(cache_key)?;
        let entries = scope.lock();
        let object = entries.get(request_hash).cloned();
        object
    }

    pub fn keys(&self, cache_key: &str) -> Vec<String> {
        let Some(scope) = self.existing_scope(cache_key) else {
            return Vec::new();
        };
        let entries = scope.lock();
        let keys: Vec<String> = entries.keys().cloned().collect();
        keys
    }

    pub fn scope_keys(&self) -> Vec<String> {
        self.scopes.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn stats(&self, cache_key: &str) -> ScopeStats {
        let now = now_millis();
        let Some(scope) = self.existing_scope(cache_key) else {
            return ScopeStats::default();
        };
        let entries = scope.lock();
        ScopeStats {
            entries: entries.len(),
            pending: entries.values().filter(|o| o.is_pending()).count(),
            expired: entries.values().filter(|o| o.is_expired(now)).count(),
        }
    }

    pub async fn remove_expired(&self, cache_key: &str) -> usize {
        let now = now_millis();
        let Some(scope) = self.existing_scope(cache_key) else {
            return 0;
        };
        let evicted = {
            let mut entries = scope.lock();
            evict_expired(&mut entries, now)
        };
        let count = evicted.len();
        self.replicate_removals(cache_key, evicted).await;
        count
    }

    pub async fn clear(&self, cache_key: &str) {
        if let Some(scope) = self.existing_scope(cache_key) {
            scope.lock().clear();
        }
        self.replicate(ReplicationUpdate::Clear {
            cache_key: cache_key.to_string(),
        })
        .await;
    }

    /// Apply an update received from a cluster peer without re-replicating it
    pub fn apply_replicated(&self, update: ReplicationUpdate) {
        match update {
            ReplicationUpdate::Upsert { cache_key, object } => {
                let scope = self.scope(&cache_key);
                let mut entries = scope.lock();
                entries.insert(object.request_hash().to_string(), object);
            }
            ReplicationUpdate::Remove { cache_key, request_hash } => {
                if let Some(scope) = self.existing_scope(&cache_key) {
                    scope.lock().remove(&request_hash);
                }
            }
            ReplicationUpdate::Clear { cache_key } => {
                if let Some(scope) = self.existing_scope(&cache_key) {
                    scope.lock().clear();
                }
            }
        }
    }

    async fn replicate_removals(&self, cache_key: &str, hashes: Vec<String>) {
        for request_hash in hashes {
            self.replicate(ReplicationUpdate::Remove {
                cache_key: cache_key.to_string(),
                request_hash,
            })
            .await;
        }
    }

    async fn replicate(&self, update: ReplicationUpdate) {
        if let Err(e) = self.replicator.replicate(&update).await {
            warn!(
                cache_key = %update.cache_key(),
                error = %e,
                "Unable to replicate cache state among the cluster"
            );
        }
    }
}

fn evict_expired(entries: &mut HashMap<String, CachedObject>, now: i64) -> Vec<String> {
    let expired: Vec<String> = entries
        .iter()
        .filter(|(_, object)| object.is_expired(now))
        .map(|(hash, _)| hash.clone())
        .collect();
    for hash in &expired {
        entries.remove(hash);
    }
    if !expired.is_empty() {
        debug!(evicted = expired.len(), "Removed expired cache entries");
    }
    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use esb_common::ReplicationError;
    use crate::replication::NoopReplicator;

    fn manager() -> CacheManager {
        CacheManager::new(Arc::new(NoopReplicator))
    }

    struct FailingReplicator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Replicator for FailingReplicator {
        async fn replicate(&self, _update: &ReplicationUpdate) -> Result<(), ReplicationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ReplicationError::Failed("peer unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_admit_then_hit() {
        let cache = manager();
        assert_eq!(cache.lookup("k", "h", 1000).await, Lookup::Absent);
        assert_eq!(cache.admit("k", "h", 60_000, 10).await, Admission::Inserted);

        // pending entries are not servable
        assert_eq!(cache.lookup("k", "h", 60_000).await, Lookup::Reset);

        assert!(cache.store_response("k", "h", Bytes::from_static(b"resp")).await);
        assert_eq!(
            cache.lookup("k", "h", 60_000).await,
            Lookup::Hit(Bytes::from_static(b"resp"))
        );
    }

    #[tokio::test]
    async fn test_expired_entry_is_reset() {
        let cache = manager();
        cache.admit("k", "h", 1, 10).await;
        cache.store_response("k", "h", Bytes::from_static(b"old")).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(cache.lookup("k", "h", 500).await, Lookup::Reset);

        let object = cache.get("k", "h").unwrap();
        assert!(object.is_pending());
        assert_eq!(object.timeout_millis(), 500);
    }

    #[tokio::test]
    async fn test_full_scope_rejects_when_nothing_expired() {
        let cache = manager();
        assert_eq!(cache.admit("k", "a", 60_000, 2).await, Admission::Inserted);
        assert_eq!(cache.admit("k", "b", 60_000, 2).await, Admission::Inserted);
        assert_eq!(cache.admit("k", "c", 60_000, 2).await, Admission::Full);
        assert_eq!(cache.keys("k").len(), 2);
    }

    #[tokio::test]
    async fn test_full_scope_evicts_expired() {
        let cache = manager();
        cache.admit("k", "a", 1, 1).await;
        cache.store_response("k", "a", Bytes::from_static(b"r")).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(cache.admit("k", "b", 1, 1).await, Admission::Inserted);
        assert_eq!(cache.keys("k"), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_store_response_without_pending_entry() {
        let cache = manager();
        assert!(!cache.store_response("k", "missing", Bytes::from_static(b"r")).await);
        assert_eq!(cache.stats("k"), ScopeStats::default());
    }

    #[tokio::test]
    async fn test_replication_failure_does_not_fail_mutation() {
        let replicator = Arc::new(FailingReplicator { calls: AtomicUsize::new(0) });
        let cache = CacheManager::new(replicator.clone());

        assert_eq!(cache.admit("k", "h", 1000, 10).await, Admission::Inserted);
        assert!(cache.store_response("k", "h", Bytes::from_static(b"r")).await);
        assert_eq!(replicator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_apply_replicated_updates_peer() {
        let peer = manager();
        let mut object = CachedObject::new("h", 0);
        object.set_response(Bytes::from_static(b"r"), now_millis());

        peer.apply_replicated(ReplicationUpdate::Upsert {
            cache_key: "k".to_string(),
            object,
        });
        assert_eq!(peer.lookup("k", "h", 0).await, Lookup::Hit(Bytes::from_static(b"r")));

        peer.apply_replicated(ReplicationUpdate::Remove {
            cache_key: "k".to_string(),
            request_hash: "h".to_string(),
        });
        assert_eq!(peer.lookup("k", "h", 0).await, Lookup::Absent);
    }

    #[tokio::test]
    async fn test_concurrent_admission_respects_capacity() {
        let cache = Arc::new(manager());
        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.admit("k", &format!("h{}", i), 60_000, 10).await })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            if task.await.unwrap() == Admission::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 10);
        assert_eq!(cache.stats("k").entries, 10);
    }
}
