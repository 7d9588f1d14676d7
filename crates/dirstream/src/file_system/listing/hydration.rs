//! Metadata hydration: filling in size, modification time and permissions on entries
//! the enumerator returned minimal.
//!
//! Small sets are hydrated inline on the caller's thread. Large remainders go through a
//! small, fixed rayon pool in chunks, so the caller can publish each chunk as it lands.
//! The pool size doesn't grow with the entry count: hydration is I/O-bound, and more
//! threads against one spinning disk or network share only slows it down.

use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::file_system::listing::error::ListingError;
use crate::file_system::listing::metadata::Entry;

/// Default number of hydration workers.
pub const DEFAULT_HYDRATION_WORKERS: usize = 4;
/// Hard ceiling for hydration workers, whatever the config or core count says.
pub const MAX_HYDRATION_WORKERS: usize = 8;

/// Outcome of a batched hydration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationSummary {
    /// Entries handed to the batch callback.
    pub delivered: usize,
    /// Entries whose stat failed; they were delivered minimal.
    pub failed: usize,
    /// True if the run stopped early because the request was cancelled.
    pub cancelled: bool,
}

/// Hydrates entries inline or on a bounded worker pool.
pub struct MetadataHydrator {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl MetadataHydrator {
    /// Creates a hydrator with `workers` threads, clamped to `1..=MAX_HYDRATION_WORKERS`
    /// and to the host's available parallelism.
    pub fn new(workers: usize) -> Result<Self, ListingError> {
        let available = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let workers = workers.clamp(1, MAX_HYDRATION_WORKERS).min(available.max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("dirstream-hydrate-{}", i))
            .build()
            .map_err(|e| ListingError::Config(format!("couldn't start hydration pool: {}", e)))?;
        log::debug!("Hydration pool started with {} workers", workers);
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Hydrates every entry on the calling thread. Failed entries stay minimal.
    pub fn hydrate_inline(&self, entries: Vec<Entry>) -> Vec<Entry> {
        entries.into_iter().map(|e| hydrate_or_keep(e, None)).collect()
    }

    /// Hydrates `entries` on the pool, `batch_size` at a time, calling `on_batch` with
    /// each hydrated chunk in input order.
    ///
    /// `is_cancelled` is checked before every chunk. The chunk in flight always finishes,
    /// nothing after it is started.
    pub fn hydrate_batched<C, F>(
        &self,
        entries: Vec<Entry>,
        batch_size: usize,
        is_cancelled: C,
        mut on_batch: F,
    ) -> HydrationSummary
    where
        C: Fn() -> bool,
        F: FnMut(Vec<Entry>),
    {
        let batch_size = batch_size.max(1);
        let failed = AtomicUsize::new(0);
        let mut summary = HydrationSummary::default();
        let mut remaining = entries.into_iter().peekable();

        while remaining.peek().is_some() {
            if is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let chunk: Vec<Entry> = remaining.by_ref().take(batch_size).collect();
            let hydrated: Vec<Entry> = self
                .pool
                .install(|| chunk.into_par_iter().map(|e| hydrate_or_keep(e, Some(&failed))).collect());
            summary.delivered += hydrated.len();
            on_batch(hydrated);
        }

        summary.failed = failed.load(Ordering::Relaxed);
        summary
    }
}

/// Stats one entry. Entries that are already hydrated come back unchanged.
pub fn hydrate_entry(entry: Entry) -> Result<Entry, ListingError> {
    if entry.is_hydrated() {
        return Ok(entry);
    }
    let path = Path::new(&entry.path);
    match fs::metadata(path).or_else(|_| fs::symlink_metadata(path)) {
        Ok(metadata) => Ok(entry.hydrated_with(&metadata)),
        Err(e) => Err(ListingError::PartialHydrationFailure {
            path: entry.path.clone(),
            message: e.to_string(),
        }),
    }
}

fn hydrate_or_keep(entry: Entry, failures: Option<&AtomicUsize>) -> Entry {
    let fallback = entry.clone();
    match hydrate_entry(entry) {
        Ok(hydrated) => hydrated,
        Err(e) => {
            log::warn!("{}", e);
            if let Some(counter) = failures {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            fallback
        }
    }
}
