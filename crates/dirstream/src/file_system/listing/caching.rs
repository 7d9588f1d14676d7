//! Bounded listing cache keyed by normalized directory path.
//!
//! A record is served only while both hold:
//! - its age is within an adaptive TTL: a record stored or served within the recency
//!   window is warm and gets the long TTL, one left alone longer gets the short one, and
//! - its stored fingerprint equals the directory's current one. A mismatch evicts the
//!   record instead of serving it.
//!
//! Eviction has two independent ceilings. Past the record-count ceiling the least
//! recently accessed record goes first. Before an insert that would exceed the byte
//! budget, the oldest inserted records go until the new one fits.
//!
//! Reads take the shared lock (last-access times are atomics), so lookups don't block
//! each other. Inserts, evictions and sweeps take the write lock.

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};

use crate::config::ListingConfig;
use crate::file_system::listing::metadata::{AVERAGE_ENTRY_BYTES, Entry, clear_classifier_caches};
use crate::file_system::validation::{Fingerprint, cache_key};
use crate::ignore_poison::IgnorePoisonRw;

/// Classifier caches are cleared every this many sweeps.
const SWEEPS_PER_CLASSIFIER_CLEAR: u64 = 20;

/// Limits and TTLs for a [`DirectoryCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub warm_ttl: Duration,
    pub cold_ttl: Duration,
    /// A record stored or served within this window counts as warm.
    pub recency_window: Duration,
    pub max_records: usize,
    pub max_bytes: usize,
    /// Directories with more entries than this are never cached.
    pub max_entries_per_directory: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&ListingConfig::default())
    }
}

impl From<&ListingConfig> for CacheConfig {
    fn from(config: &ListingConfig) -> Self {
        Self {
            warm_ttl: Duration::from_millis(config.warm_ttl_ms),
            cold_ttl: Duration::from_millis(config.cold_ttl_ms),
            recency_window: Duration::from_millis(config.recency_window_ms),
            max_records: config.max_cached_directories,
            max_bytes: config.max_cache_bytes,
            max_entries_per_directory: config.max_entries_per_cached_directory,
        }
    }
}

/// A cached listing as handed out to callers.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    /// Hydrated entries, in delivery order.
    pub entries: Arc<Vec<Entry>>,
    pub fingerprint: Fingerprint,
    pub captured_at: Instant,
    pub last_accessed: Instant,
    pub estimated_bytes: usize,
}

/// Counters for cache behavior since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Records dropped on lookup because the fingerprint changed.
    pub stale_evictions: u64,
    /// Records dropped because their TTL ran out (on lookup or sweep).
    pub expired_evictions: u64,
    pub lru_evictions: u64,
    pub budget_evictions: u64,
    pub records: usize,
    pub bytes: usize,
}

struct StoredRecord {
    entries: Arc<Vec<Entry>>,
    fingerprint: Fingerprint,
    captured_at: Instant,
    /// Nanoseconds since the cache epoch. A store counts as an access.
    last_accessed: AtomicU64,
    estimated_bytes: usize,
    inserted_seq: u64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, StoredRecord>,
    total_bytes: usize,
    next_seq: u64,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<StoredRecord> {
        let removed = self.records.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(removed.estimated_bytes);
        Some(removed)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    expired: AtomicU64,
    lru: AtomicU64,
    budget: AtomicU64,
}

/// Why a lookup didn't serve a record it found.
enum Rejection {
    Stale,
    Expired,
}

/// Directory listing cache. Construct one per engine and share it via `Arc`.
pub struct DirectoryCache {
    config: CacheConfig,
    epoch: Instant,
    inner: RwLock<Inner>,
    counters: Counters,
}

impl DirectoryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            epoch: Instant::now(),
            inner: RwLock::new(Inner::default()),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Looks up `path`, serving the record only if it's fresh and `current` matches the
    /// stored fingerprint.
    pub fn get(&self, path: &Path, current: Fingerprint) -> Option<CacheRecord> {
        self.get_at(path, current, Instant::now())
    }

    /// [`get`](Self::get) with an explicit clock.
    pub fn get_at(&self, path: &Path, current: Fingerprint, now: Instant) -> Option<CacheRecord> {
        let key = cache_key(path);

        let (rejection, seq) = {
            let inner = self.inner.read_ignore_poison();
            let Some(stored) = inner.records.get(&key) else {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            };
            if stored.fingerprint != current {
                (Rejection::Stale, stored.inserted_seq)
            } else if now.saturating_duration_since(stored.captured_at) > self.ttl_for(stored, now) {
                (Rejection::Expired, stored.inserted_seq)
            } else {
                stored.last_accessed.store(self.offset(now), Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("Listing cache hit: {}", key);
                return Some(CacheRecord {
                    entries: Arc::clone(&stored.entries),
                    fingerprint: stored.fingerprint,
                    captured_at: stored.captured_at,
                    last_accessed: now,
                    estimated_bytes: stored.estimated_bytes,
                });
            }
        };

        // Evict, unless another request already replaced the record meanwhile.
        let mut inner = self.inner.write_ignore_poison();
        if inner.records.get(&key).is_some_and(|s| s.inserted_seq == seq) {
            inner.remove(&key);
            match rejection {
                Rejection::Stale => {
                    log::debug!("Listing cache stale (fingerprint changed): {}", key);
                    self.counters.stale.fetch_add(1, Ordering::Relaxed);
                }
                Rejection::Expired => {
                    log::debug!("Listing cache expired: {}", key);
                    self.counters.expired.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores (or refreshes) the listing for `path`. Returns false if it wasn't cached.
    pub fn put(&self, path: &Path, entries: Vec<Entry>, fingerprint: Fingerprint) -> bool {
        self.put_guarded_at(path, entries, fingerprint, Instant::now(), || true)
    }

    /// Like [`put`](Self::put), but `should_store` is evaluated while holding the write
    /// lock. Used to make "check cancellation, then insert" atomic.
    pub fn put_guarded(
        &self,
        path: &Path,
        entries: Vec<Entry>,
        fingerprint: Fingerprint,
        should_store: impl FnOnce() -> bool,
    ) -> bool {
        self.put_guarded_at(path, entries, fingerprint, Instant::now(), should_store)
    }

    /// [`put`](Self::put) with an explicit clock.
    pub fn put_at(&self, path: &Path, entries: Vec<Entry>, fingerprint: Fingerprint, now: Instant) -> bool {
        self.put_guarded_at(path, entries, fingerprint, now, || true)
    }

    fn put_guarded_at(
        &self,
        path: &Path,
        entries: Vec<Entry>,
        fingerprint: Fingerprint,
        now: Instant,
        should_store: impl FnOnce() -> bool,
    ) -> bool {
        let key = cache_key(path);
        let estimated_bytes = entries.len().max(1) * AVERAGE_ENTRY_BYTES;
        let too_many = entries.len() > self.config.max_entries_per_directory;
        let too_big = estimated_bytes > self.config.max_bytes;

        let mut inner = self.inner.write_ignore_poison();
        if !should_store() {
            return false;
        }
        // Whatever was there is older than what we just read.
        inner.remove(&key);
        if too_many || too_big || self.config.max_records == 0 {
            log::debug!("Not caching {} ({} entries)", key, entries.len());
            return false;
        }

        while inner.total_bytes + estimated_bytes > self.config.max_bytes {
            let Some(oldest) = inner
                .records
                .iter()
                .min_by_key(|(_, s)| s.inserted_seq)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            inner.remove(&oldest);
            self.counters.budget.fetch_add(1, Ordering::Relaxed);
            log::debug!("Listing cache over byte budget, evicted {}", oldest);
        }

        while inner.records.len() >= self.config.max_records {
            let Some(coldest) = inner
                .records
                .iter()
                .min_by_key(|(_, s)| s.last_accessed.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            inner.remove(&coldest);
            self.counters.lru.fetch_add(1, Ordering::Relaxed);
            log::debug!("Listing cache full, evicted least recently used {}", coldest);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.total_bytes += estimated_bytes;
        inner.records.insert(
            key,
            StoredRecord {
                entries: Arc::new(entries),
                fingerprint,
                captured_at: now,
                last_accessed: AtomicU64::new(self.offset(now)),
                estimated_bytes,
                inserted_seq: seq,
            },
        );
        true
    }

    /// Drops the record for `path`. Call after any write operation that changes the
    /// directory. Returns whether a record was removed.
    pub fn invalidate(&self, path: &Path) -> bool {
        let key = cache_key(path);
        let removed = self.inner.write_ignore_poison().remove(&key).is_some();
        if removed {
            log::debug!("Listing cache invalidated: {}", key);
        }
        removed
    }

    /// Drops the record for `path` and every cached directory below it. Returns how
    /// many records were removed.
    pub fn invalidate_tree(&self, path: &Path) -> usize {
        let key = cache_key(path);
        let root = Path::new(&key);
        let mut inner = self.inner.write_ignore_poison();
        let doomed: Vec<String> = inner
            .records
            .keys()
            .filter(|k| Path::new(k.as_str()).starts_with(root))
            .cloned()
            .collect();
        for k in &doomed {
            inner.remove(k);
        }
        doomed.len()
    }

    /// Removes every record whose TTL has run out. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// [`purge_expired`](Self::purge_expired) with an explicit clock.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.write_ignore_poison();
        let expired: Vec<String> = inner
            .records
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.captured_at) > self.ttl_for(s, now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            inner.remove(k);
        }
        self.counters.expired.fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write_ignore_poison();
        inner.records.clear();
        inner.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.read_ignore_poison().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.read_ignore_poison().total_bytes
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.read_ignore_poison().records.contains_key(&cache_key(path))
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read_ignore_poison();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale_evictions: self.counters.stale.load(Ordering::Relaxed),
            expired_evictions: self.counters.expired.load(Ordering::Relaxed),
            lru_evictions: self.counters.lru.load(Ordering::Relaxed),
            budget_evictions: self.counters.budget.load(Ordering::Relaxed),
            records: inner.records.len(),
            bytes: inner.total_bytes,
        }
    }

    /// Offset of `at` from the cache epoch.
    fn offset(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_nanos() as u64
    }

    /// Warm while the last access (the store included) is within the recency window.
    fn ttl_for(&self, stored: &StoredRecord, now: Instant) -> Duration {
        let accessed = self.epoch + Duration::from_nanos(stored.last_accessed.load(Ordering::Relaxed));
        if now.saturating_duration_since(accessed) <= self.config.recency_window {
            self.config.warm_ttl
        } else {
            self.config.cold_ttl
        }
    }
}

/// Spawns the periodic sweep on the current tokio runtime.
///
/// The task holds only a weak reference and ends once the cache is dropped.
pub fn spawn_cache_sweeper(cache: &Arc<DirectoryCache>, interval: Duration) -> tokio::task::JoinHandle<()> {
    let weak: Weak<DirectoryCache> = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        let mut sweeps: u64 = 0;
        loop {
            ticker.tick().await;
            let Some(cache) = weak.upgrade() else {
                log::debug!("Listing cache dropped, sweeper exiting");
                break;
            };
            let purged = cache.purge_expired();
            sweeps += 1;
            if sweeps % SWEEPS_PER_CLASSIFIER_CLEAR == 0 {
                clear_classifier_caches();
            }
            if purged > 0 {
                log::debug!("Listing cache sweep purged {} records", purged);
            }
        }
    })
}
