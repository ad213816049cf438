//! TranslationCache: in-memory index over TranslationDb

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ahash::RandomState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use subvoxdb::{CacheEntry, Result, TranslationDb};
use tracing::{debug, info, warn};

use crate::policy::{rank, EvictionPolicy};
use crate::stats::CacheStats;

/// Mutable cache state, guarded as one unit
struct Inner {
    /// Live entries keyed by original text
    entries: HashMap<String, CacheEntry, RandomState>,

    /// Lookups since the last automatic eviction
    lookups_since_evict: u32,

    /// Set by shutdown
    closed: bool,
}

/// Persistent translation cache with frequency/recency eviction
///
/// Reads are served from memory; every mutation is written to the
/// [`TranslationDb`] first and applied in memory only once the write
/// succeeded. Storage failures never reach the caller: a failed read is a
/// miss and a failed write is dropped.
pub struct TranslationCache {
    /// Underlying persistent storage
    store: Arc<TranslationDb>,

    /// Entries and eviction bookkeeping
    inner: Mutex<Inner>,

    /// Cache statistics
    stats: Arc<CacheStats>,

    /// Eviction parameters
    policy: EvictionPolicy,
}

impl TranslationCache {
    /// Open the cache backed by the database file at `path`
    ///
    /// # Arguments
    /// * `path` - Database file path
    /// * `policy` - Eviction parameters
    ///
    /// # Returns
    /// * `Result<TranslationCache>` - Cache loaded with every stored row
    pub fn open<P: AsRef<Path>>(path: P, policy: EvictionPolicy) -> Result<Self> {
        let store = TranslationDb::open(path)?;
        Self::with_store(Arc::new(store), policy)
    }

    /// Build the cache over an already open database
    pub fn with_store(store: Arc<TranslationDb>, policy: EvictionPolicy) -> Result<Self> {
        let rows = store.load_all()?;
        let mut entries = HashMap::with_capacity_and_hasher(rows.len(), RandomState::new());
        for entry in rows {
            entries.insert(entry.original_text.clone(), entry);
        }

        info!("Translation cache loaded {} entries", entries.len());

        Ok(Self {
            store,
            inner: Mutex::new(Inner {
                entries,
                lookups_since_evict: 0,
                closed: false,
            }),
            stats: Arc::new(CacheStats::new()),
            policy,
        })
    }

    /// Get the cached translation for `key`
    ///
    /// A hit bumps the entry's access count by one and its last access to now.
    /// Every `evict_every` completed lookups an eviction pass runs before
    /// returning.
    pub fn lookup(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        // Read under the lock so timestamps follow the order of writes
        let now = Utc::now();

        let result = self.lookup_locked(&mut inner, key, now);

        inner.lookups_since_evict += 1;
        if inner.lookups_since_evict >= self.policy.evict_every {
            inner.lookups_since_evict = 0;
            self.evict_locked(&mut inner, now);
        }

        result
    }

    fn lookup_locked(&self, inner: &mut Inner, key: &str, now: DateTime<Utc>) -> Option<String> {
        let mut touched = match inner.entries.get(key) {
            Some(entry) => entry.clone(),
            None => {
                self.stats.record_miss();
                return None;
            }
        };
        touched.touch(now);

        match self.store.touch(&touched) {
            Ok(true) => {
                let translated = touched.translated_text.clone();
                inner.entries.insert(touched.original_text.clone(), touched);
                self.stats.record_hit();
                Some(translated)
            }
            Ok(false) => {
                warn!("Cached key {:?} missing from storage, dropping it", key);
                inner.entries.remove(key);
                self.stats.record_miss();
                None
            }
            Err(e) => {
                warn!("Cache lookup for {:?} failed: {}", key, e);
                self.stats.record_storage_error();
                self.stats.record_miss();
                None
            }
        }
    }

    /// Insert or replace the translation for `key`
    ///
    /// The entry restarts at access count 1. A storage failure is logged and
    /// the entry is simply not cached.
    pub fn store(&self, key: &str, value: &str) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        let now = Utc::now();

        let created = inner
            .entries
            .get(key)
            .map(|existing| existing.created)
            .unwrap_or(now);
        let entry = CacheEntry {
            created,
            ..CacheEntry::new(key, value, now)
        };

        match self.store.upsert(&entry) {
            Ok(()) => {
                inner.entries.insert(entry.original_text.clone(), entry);
                self.stats.record_insert();
            }
            Err(e) => {
                warn!("Cache store for {:?} failed: {}", key, e);
                self.stats.record_storage_error();
            }
        }
    }

    /// Run one eviction pass now
    ///
    /// # Returns
    /// * `usize` - Number of entries removed
    pub fn evict(&self) -> usize {
        self.evict_at(Utc::now())
    }

    /// Run one eviction pass as if the current time were `now`
    pub fn evict_at(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        if inner.closed {
            return 0;
        }
        self.evict_locked(&mut inner, now)
    }

    fn evict_locked(&self, inner: &mut Inner, now: DateTime<Utc>) -> usize {
        let victims = self.policy.select_victims(inner.entries.values(), now);
        if victims.is_empty() {
            return 0;
        }

        match self.store.delete_many(&victims) {
            Ok(_) => {
                for key in &victims {
                    inner.entries.remove(key);
                }
                self.stats.record_evictions(victims.len() as u64);
                debug!(
                    "Evicted {} translations, {} remain",
                    victims.len(),
                    inner.entries.len()
                );
                victims.len()
            }
            Err(e) => {
                warn!("Cache eviction failed: {}", e);
                self.stats.record_storage_error();
                0
            }
        }
    }

    /// Final eviction, then close storage
    ///
    /// Later lookups miss and later stores are dropped.
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }

        let removed = self.evict_locked(&mut inner, Utc::now());
        inner.closed = true;
        inner.entries.clear();
        info!("Translation cache shut down after evicting {} entries", removed);

        self.store.close()
    }

    /// Copy of the entry for `key` without counting an access
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// The `n` best entries by eviction score
    pub fn top(&self, n: usize) -> Vec<CacheEntry> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner.entries.values().cloned().collect();
        entries.sort_by(rank);
        entries.truncate(n);
        entries
    }

    /// Remove every entry from memory and storage
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.store.clear()?;
        inner.entries.clear();
        inner.lookups_since_evict = 0;
        Ok(())
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get eviction parameters
    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Get the number of live entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn memory_cache(policy: EvictionPolicy) -> (Arc<TranslationDb>, TranslationCache) {
        let db = Arc::new(TranslationDb::open_in_memory().unwrap());
        let cache = TranslationCache::with_store(Arc::clone(&db), policy).unwrap();
        (db, cache)
    }

    fn backdated(key: &str, hits: u32, idle: Duration) -> CacheEntry {
        let mut entry = CacheEntry::new(key, format!("{} (ru)", key), Utc::now() - idle);
        entry.access_count = hits;
        entry
    }

    #[test]
    fn test_store_then_lookup() {
        let (_db, cache) = memory_cache(EvictionPolicy::default());

        cache.store("Press X", "Нажмите X");
        assert_eq!(cache.lookup("Press X").as_deref(), Some("Нажмите X"));
        assert_eq!(cache.peek("Press X").unwrap().access_count, 2);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().inserts(), 1);
    }

    #[test]
    fn test_lookup_updates_last_accessed() {
        let (db, cache) = memory_cache(EvictionPolicy::default());
        cache.store("Continue", "Продолжить");

        let before = Utc::now();
        cache.lookup("Continue").unwrap();
        let after = Utc::now();

        let entry = cache.peek("Continue").unwrap();
        assert!(entry.last_accessed >= before && entry.last_accessed <= after);

        // Written through
        let stored = db.get("Continue").unwrap().unwrap();
        assert_eq!(stored.access_count, 2);
    }

    #[test]
    fn test_miss_has_no_side_effects() {
        let (_db, cache) = memory_cache(EvictionPolicy::default());
        cache.store("A", "А");
        let before = cache.peek("A").unwrap();

        assert!(cache.lookup("B").is_none());

        assert_eq!(cache.peek("A").unwrap(), before);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_store_resets_access_count() {
        let (_db, cache) = memory_cache(EvictionPolicy::default());
        cache.store("Quit", "Выход");
        cache.lookup("Quit");
        cache.lookup("Quit");
        assert_eq!(cache.peek("Quit").unwrap().access_count, 3);

        cache.store("Quit", "Выйти");

        let entry = cache.peek("Quit").unwrap();
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.translated_text, "Выйти");
    }

    #[test]
    fn test_keys_are_exact() {
        let (_db, cache) = memory_cache(EvictionPolicy::default());
        cache.store("Press X", "Нажмите X");

        assert!(cache.lookup("Press X.").is_none());
        assert!(cache.lookup("press x").is_none());
    }

    #[test]
    fn test_evict_age_rules() {
        let db = Arc::new(TranslationDb::open_in_memory().unwrap());
        db.upsert(&backdated("fresh", 1, Duration::minutes(5))).unwrap();
        db.upsert(&backdated("stale rare", 2, Duration::hours(30))).unwrap();
        db.upsert(&backdated("stale popular", 3, Duration::hours(30))).unwrap();
        db.upsert(&backdated("ancient", 40, Duration::days(8))).unwrap();
        let cache = TranslationCache::with_store(Arc::clone(&db), EvictionPolicy::default()).unwrap();

        assert_eq!(cache.evict(), 2);

        assert!(cache.peek("fresh").is_some());
        assert!(cache.peek("stale popular").is_some());
        assert!(cache.peek("stale rare").is_none());
        assert!(cache.peek("ancient").is_none());
        assert_eq!(db.len().unwrap(), 2);
    }

    #[test]
    fn test_evict_is_idempotent() {
        let (_db, cache) = memory_cache(EvictionPolicy {
            max_entries: 10,
            ..EvictionPolicy::default()
        });
        for i in 0..25 {
            cache.store(&format!("line {}", i), "x");
        }

        let now = Utc::now();
        assert_eq!(cache.evict_at(now), 15);
        assert_eq!(cache.evict_at(now), 0);
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn test_501_stores_keep_500() {
        let db = Arc::new(TranslationDb::open_in_memory().unwrap());
        let base = Utc::now() - Duration::minutes(10);
        for i in 0..501 {
            let entry = CacheEntry::new(format!("line {}", i), "x", base + Duration::milliseconds(i));
            db.upsert(&entry).unwrap();
        }
        let cache = TranslationCache::with_store(Arc::clone(&db), EvictionPolicy::default()).unwrap();

        assert_eq!(cache.evict(), 1);

        assert_eq!(cache.len(), 500);
        assert_eq!(db.len().unwrap(), 500);
        assert!(cache.peek("line 0").is_none());
        assert!(cache.top(500).iter().all(|e| e.access_count == 1));
    }

    #[test]
    fn test_501_writes_through_store_keep_500() {
        let (db, cache) = memory_cache(EvictionPolicy::default());
        cache.store("line 0", "x");
        std::thread::sleep(std::time::Duration::from_millis(2));
        for i in 1..501 {
            cache.store(&format!("line {}", i), "x");
        }
        assert_eq!(cache.len(), 501);

        assert_eq!(cache.evict(), 1);

        assert_eq!(cache.len(), 500);
        assert_eq!(db.len().unwrap(), 500);
        assert!(cache.peek("line 0").is_none());
        assert!(cache.peek("line 500").is_some());
        assert!(cache.top(500).iter().all(|e| e.access_count == 1));
    }

    #[test]
    fn test_failed_eviction_changes_nothing() {
        let (db, cache) = memory_cache(EvictionPolicy {
            max_entries: 2,
            ..EvictionPolicy::default()
        });
        for key in ["a", "b", "c", "d"] {
            cache.store(key, "x");
        }
        db.close().unwrap();

        assert_eq!(cache.evict(), 0);

        assert_eq!(cache.len(), 4);
        assert_eq!(cache.stats().evictions(), 0);
        assert_eq!(cache.stats().storage_errors(), 1);
    }

    #[test]
    fn test_last_accessed_never_goes_backwards() {
        let (_db, cache) = memory_cache(EvictionPolicy::default());
        let cache = Arc::new(cache);
        cache.store("shared", "общий");

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..200 {
                        cache.lookup("shared");
                        if let Some(entry) = cache.peek("shared") {
                            seen.push(entry.last_accessed);
                        }
                    }
                    seen
                })
            })
            .collect();

        for worker in workers {
            let seen = worker.join().unwrap();
            assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        }
        assert_eq!(cache.peek("shared").unwrap().access_count, 801);
    }

    #[test]
    fn test_eviction_every_n_lookups() {
        let (_db, cache) = memory_cache(EvictionPolicy {
            max_entries: 2,
            evict_every: 5,
            ..EvictionPolicy::default()
        });
        for key in ["a", "b", "c", "d"] {
            cache.store(key, "x");
        }

        for _ in 0..4 {
            cache.lookup("a");
        }
        assert_eq!(cache.len(), 4);

        cache.lookup("a");
        assert_eq!(cache.len(), 2);
        assert!(cache.peek("a").is_some());
    }

    #[test]
    fn test_store_failure_is_swallowed() {
        let (db, cache) = memory_cache(EvictionPolicy::default());
        cache.store("before", "до");

        db.close().unwrap();
        cache.store("after", "после");

        assert!(cache.peek("after").is_none());
        assert_eq!(cache.stats().storage_errors(), 1);
    }

    #[test]
    fn test_lookup_failure_is_a_miss() {
        let (db, cache) = memory_cache(EvictionPolicy::default());
        cache.store("key", "value");
        db.close().unwrap();

        assert!(cache.lookup("key").is_none());

        // Entry left as it was
        assert_eq!(cache.peek("key").unwrap().access_count, 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_shutdown_evicts_and_closes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("translations.db");

        {
            let db = TranslationDb::open(&path).unwrap();
            db.upsert(&backdated("old", 1, Duration::days(3))).unwrap();
            db.upsert(&backdated("new", 1, Duration::minutes(1))).unwrap();
            db.close().unwrap();
        }

        let cache = TranslationCache::open(&path, EvictionPolicy::default()).unwrap();
        assert_eq!(cache.len(), 2);
        cache.shutdown().unwrap();
        cache.shutdown().unwrap();

        assert!(cache.lookup("new").is_none());
        cache.store("ignored", "x");

        let reopened = TranslationCache::open(&path, EvictionPolicy::default()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.peek("new").is_some());
    }

    #[test]
    fn test_top_orders_by_score() {
        let (_db, cache) = memory_cache(EvictionPolicy::default());
        cache.store("once", "1");
        cache.store("twice", "2");
        cache.store("thrice", "3");
        cache.lookup("twice");
        cache.lookup("thrice");
        cache.lookup("thrice");

        let top: Vec<_> = cache.top(2).into_iter().map(|e| e.original_text).collect();
        assert_eq!(top, vec!["thrice".to_string(), "twice".to_string()]);
    }

    #[test]
    fn test_clear() {
        let (db, cache) = memory_cache(EvictionPolicy::default());
        cache.store("a", "b");

        cache.clear().unwrap();

        assert!(cache.is_empty());
        assert!(db.is_empty().unwrap());
    }
}
