//! Streaming directory listing: request contexts, the listing state machine, and the
//! coordinator that drives one request from path to `Complete`.
//!
//! `navigate` returns immediately. The listing runs on tokio's blocking pool:
//!
//! ```text
//! Idle -> Enumerating -> FirstPageReady -> Hydrating -> Complete
//!              \______________\_______________\_______-> Error
//! ```
//!
//! Starting a request cancels the previous one. Cancellation is cooperative: in-flight
//! syscalls run to completion, but every emit checks the request's flag first, so a
//! superseded request goes quiet and never writes to the cache.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::config::ListingConfig;
use crate::file_system::listing::caching::{CacheConfig, DirectoryCache, spawn_cache_sweeper};
use crate::file_system::listing::error::ListingError;
use crate::file_system::listing::events::{ListingEvent, RequestId, SessionEvent, Sink};
use crate::file_system::listing::hydration::MetadataHydrator;
use crate::file_system::listing::metadata::Entry;
use crate::file_system::listing::reading::{PathEnumerator, select_enumerator};
use crate::file_system::listing::sorting::delivery_order;
use crate::file_system::validation::{
    DirsHomeResolver, Fingerprint, HomeDirResolver, directory_fingerprint, resolve_request_path,
};
use crate::ignore_poison::IgnorePoison;

// ============================================================================
// Types and state
// ============================================================================

/// Where a listing request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListingState {
    Idle,
    Enumerating,
    FirstPageReady,
    Hydrating,
    Complete,
    Error,
}

impl ListingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    pub fn can_transition_to(self, next: ListingState) -> bool {
        use ListingState::*;
        match (self, next) {
            (Idle, Enumerating) => true,
            (Enumerating, FirstPageReady) => true,
            (FirstPageReady, Hydrating) | (FirstPageReady, Complete) => true,
            (Hydrating, Complete) => true,
            (from, Error) => !from.is_terminal() && from != Idle,
            _ => false,
        }
    }
}

/// Cancellation token and state for one navigation request.
pub struct RequestContext {
    id: RequestId,
    requested_path: String,
    started_at: Instant,
    cancelled: AtomicBool,
    state: Mutex<ListingState>,
    finished: watch::Sender<bool>,
}

impl RequestContext {
    pub(crate) fn new(id: RequestId, requested_path: &str) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            id,
            requested_path: requested_path.to_string(),
            started_at: Instant::now(),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(ListingState::Idle),
            finished,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The path as the consumer sent it (before resolution).
    pub fn requested_path(&self) -> &str {
        &self.requested_path
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Marks the request as superseded. Its remaining output is discarded.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::Relaxed) {
            log::debug!("Listing request {} cancelled", self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ListingState {
        *self.state.lock_ignore_poison()
    }

    /// True once the background work for this request has returned, whether it
    /// completed, failed or was cancelled.
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Waits until the background work for this request has returned.
    pub async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    fn transition(&self, next: ListingState) -> bool {
        let mut state = self.state.lock_ignore_poison();
        if state.can_transition_to(next) {
            log::debug!("Listing request {}: {:?} -> {:?}", self.id, *state, next);
            *state = next;
            true
        } else {
            log::warn!("Listing request {}: ignoring {:?} -> {:?}", self.id, *state, next);
            false
        }
    }

    fn mark_finished(&self) {
        self.finished.send_replace(true);
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("requested_path", &self.requested_path)
            .field("cancelled", &self.is_cancelled())
            .field("state", &self.state())
            .finish()
    }
}

/// Marks the context finished when the listing job returns. On a panic the spawning
/// task marks it instead, once the error event is out.
struct FinishGuard<'a>(&'a RequestContext);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.0.mark_finished();
        }
    }
}

/// What a listing job needs, shared between the coordinator and its jobs.
struct Engine {
    enumerator: Arc<dyn PathEnumerator>,
    hydrator: Arc<MetadataHydrator>,
    cache: Arc<DirectoryCache>,
    sink: Arc<dyn Sink>,
    home: Arc<dyn HomeDirResolver>,
    config: ListingConfig,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Runs listing requests for one consumer session. At most one request is active.
pub struct StreamCoordinator {
    engine: Arc<Engine>,
    runtime: tokio::runtime::Handle,
    active: Mutex<Option<Arc<RequestContext>>>,
    next_id: AtomicU64,
}

/// Builder for [`StreamCoordinator`]. Everything but the sink has a default.
pub struct StreamCoordinatorBuilder {
    sink: Arc<dyn Sink>,
    config: ListingConfig,
    enumerator: Option<Arc<dyn PathEnumerator>>,
    hydrator: Option<Arc<MetadataHydrator>>,
    cache: Option<Arc<DirectoryCache>>,
    home: Option<Arc<dyn HomeDirResolver>>,
    runtime: Option<tokio::runtime::Handle>,
}

impl StreamCoordinatorBuilder {
    pub fn config(mut self, config: ListingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn enumerator(mut self, enumerator: Arc<dyn PathEnumerator>) -> Self {
        self.enumerator = Some(enumerator);
        self
    }

    pub fn hydrator(mut self, hydrator: Arc<MetadataHydrator>) -> Self {
        self.hydrator = Some(hydrator);
        self
    }

    /// Shares an existing cache, for example with the write-side operations. Records
    /// hold unfiltered listings, so the sharers' hidden settings may differ.
    pub fn cache(mut self, cache: Arc<DirectoryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn home(mut self, home: Arc<dyn HomeDirResolver>) -> Self {
        self.home = Some(home);
        self
    }

    pub fn runtime(mut self, runtime: tokio::runtime::Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the coordinator. Without an explicit runtime, must be called from inside
    /// a tokio runtime.
    pub fn build(self) -> Result<StreamCoordinator, ListingError> {
        let config = self.config.validate();
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => tokio::runtime::Handle::try_current()
                .map_err(|e| ListingError::Config(format!("no tokio runtime: {}", e)))?,
        };
        let hydrator = match self.hydrator {
            Some(h) => h,
            None => Arc::new(MetadataHydrator::new(config.hydration_workers)?),
        };
        let enumerator = self.enumerator.unwrap_or_else(|| select_enumerator(config.enumerator));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(DirectoryCache::new(CacheConfig::from(&config))));
        let home = self.home.unwrap_or_else(|| Arc::new(DirsHomeResolver));
        log::debug!("Listing coordinator using the {} enumerator", enumerator.name());

        Ok(StreamCoordinator {
            engine: Arc::new(Engine {
                enumerator,
                hydrator,
                cache,
                sink: self.sink,
                home,
                config,
            }),
            runtime,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }
}

impl StreamCoordinator {
    pub fn builder(sink: Arc<dyn Sink>) -> StreamCoordinatorBuilder {
        StreamCoordinatorBuilder {
            sink,
            config: ListingConfig::default(),
            enumerator: None,
            hydrator: None,
            cache: None,
            home: None,
            runtime: None,
        }
    }

    /// Starts listing `path` and returns its context right away.
    ///
    /// An empty path means the home directory. The previous request, if any, is
    /// cancelled before this one starts. Results arrive through the sink.
    pub fn navigate(&self, path: &str) -> Arc<RequestContext> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::new(RequestContext::new(id, path));

        if let Some(previous) = self.active.lock_ignore_poison().replace(Arc::clone(&ctx)) {
            previous.cancel();
        }
        log::debug!("Listing request {} started for {:?}", id, path);

        let engine = Arc::clone(&self.engine);
        let job_ctx = Arc::clone(&ctx);
        self.runtime.spawn(async move {
            let error_ctx = Arc::clone(&job_ctx);
            let error_engine = Arc::clone(&engine);

            let result = tokio::task::spawn_blocking(move || {
                let _finished = FinishGuard(&job_ctx);
                run_listing(&engine, &job_ctx);
            })
            .await;

            if let Err(e) = result {
                log::error!("Listing task for request {} failed: {}", error_ctx.id(), e);
                let err = ListingError::EnumerationFailed(format!("task failed: {}", e));
                fail(&error_engine, &error_ctx, &err);
                error_ctx.mark_finished();
            }
        });

        ctx
    }

    /// Cancels the active request, if any.
    pub fn cancel_active(&self) {
        if let Some(active) = self.active.lock_ignore_poison().take() {
            active.cancel();
        }
    }

    /// The most recently started request, unless it was cancelled via `cancel_active`.
    pub fn active_request(&self) -> Option<Arc<RequestContext>> {
        self.active.lock_ignore_poison().clone()
    }

    pub fn cache(&self) -> &Arc<DirectoryCache> {
        &self.engine.cache
    }

    pub fn config(&self) -> &ListingConfig {
        &self.engine.config
    }

    /// Drops the cached listing for `path`. The write side calls this after copy,
    /// move, delete or rename touches the directory.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.engine.cache.invalidate(path)
    }

    /// Starts the periodic cache sweep on this coordinator's runtime.
    pub fn start_cache_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let _guard = self.runtime.enter();
        spawn_cache_sweeper(&self.engine.cache, self.engine.config.sweep_interval())
    }
}

// ============================================================================
// Listing job
// ============================================================================

/// Sends `event` unless the request was superseded. Returns whether it was sent.
fn emit(engine: &Engine, ctx: &RequestContext, event: ListingEvent) -> bool {
    if ctx.is_cancelled() {
        return false;
    }
    engine.sink.emit(SessionEvent::for_request(ctx.id(), event));
    true
}

fn fail(engine: &Engine, ctx: &RequestContext, err: &ListingError) {
    if ctx.is_cancelled() {
        log::debug!("Listing request {} failed after cancellation: {}", ctx.id(), err);
        return;
    }
    if ctx.transition(ListingState::Error) {
        log::debug!("Listing request {} failed: {}", ctx.id(), err);
        emit(engine, ctx, ListingEvent::Error { message: err.to_string() });
    }
}

fn run_listing(engine: &Engine, ctx: &RequestContext) {
    ctx.transition(ListingState::Enumerating);
    if let Err(e) = stream_listing(engine, ctx) {
        fail(engine, ctx, &e);
    }
}

fn stream_listing(engine: &Engine, ctx: &RequestContext) -> Result<(), ListingError> {
    let path = resolve_request_path(ctx.requested_path(), engine.home.as_ref())?;
    // Captured before reading, so a change during enumeration shows up as a mismatch
    // on the next lookup.
    let fingerprint = directory_fingerprint(&path)?;

    // Records hold the whole directory, hidden entries included. The hidden filter
    // applies on the way out, so coordinators with different settings can share a cache.
    if let Some(record) = engine.cache.get(&path, fingerprint) {
        return deliver_cached(engine, ctx, &path, visible(engine, record.entries.as_ref().clone()));
    }

    let started = Instant::now();
    let entries = delivery_order(engine.enumerator.enumerate(&path)?);
    log::debug!(
        "Listing request {}: enumerated {} entries in {}ms",
        ctx.id(),
        entries.len(),
        started.elapsed().as_millis()
    );
    if ctx.is_cancelled() {
        return Ok(());
    }

    if entries.len() <= engine.config.inline_hydration_threshold {
        let listing = engine.hydrator.hydrate_inline(entries);
        deliver_first_page(engine, ctx, &path, visible(engine, listing.clone()));
        return finish(engine, ctx, &path, fingerprint, listing);
    }

    let mut remainder = entries;
    let first_page: Vec<Entry> = remainder.drain(..engine.config.page_size.min(remainder.len())).collect();
    let mut listing = engine.hydrator.hydrate_inline(first_page);
    deliver_first_page(engine, ctx, &path, visible(engine, listing.clone()));

    if remainder.is_empty() {
        return finish(engine, ctx, &path, fingerprint, listing);
    }
    ctx.transition(ListingState::Hydrating);

    let summary = engine.hydrator.hydrate_batched(
        remainder,
        engine.config.hydration_batch_size,
        || ctx.is_cancelled(),
        |mut batch| {
            let mut shown = visible(engine, batch.clone());
            match shown.len() {
                0 => {}
                1 => {
                    emit(engine, ctx, ListingEvent::Hydrate { entry: shown.remove(0) });
                }
                _ => {
                    emit(engine, ctx, ListingEvent::Batch { entries: shown });
                }
            }
            listing.append(&mut batch);
        },
    );
    if summary.failed > 0 {
        log::debug!(
            "Listing request {}: {} entries left minimal after failed stat",
            ctx.id(),
            summary.failed
        );
    }
    if summary.cancelled || ctx.is_cancelled() {
        return Ok(());
    }
    finish(engine, ctx, &path, fingerprint, listing)
}

/// Drops hidden entries unless the config includes them. Only hydrated entries carry
/// the OS hidden flags, so this runs after hydration.
fn visible(engine: &Engine, mut entries: Vec<Entry>) -> Vec<Entry> {
    if !engine.config.include_hidden {
        entries.retain(|e| !e.is_hidden);
    }
    entries
}

fn deliver_first_page(engine: &Engine, ctx: &RequestContext, path: &Path, page: Vec<Entry>) {
    ctx.transition(ListingState::FirstPageReady);
    emit(engine, ctx, ListingEvent::Start { path: display(path) });
    if !page.is_empty() {
        emit(engine, ctx, ListingEvent::Batch { entries: page });
    }
}

fn deliver_cached(
    engine: &Engine,
    ctx: &RequestContext,
    path: &Path,
    entries: Vec<Entry>,
) -> Result<(), ListingError> {
    let (dir_count, file_count) = count_kinds(entries.iter());
    ctx.transition(ListingState::FirstPageReady);
    emit(engine, ctx, ListingEvent::Start { path: display(path) });
    if !entries.is_empty() {
        emit(engine, ctx, ListingEvent::Batch { entries });
    }
    if ctx.is_cancelled() {
        return Ok(());
    }
    ctx.transition(ListingState::Complete);
    emit(
        engine,
        ctx,
        ListingEvent::Complete {
            path: display(path),
            file_count,
            dir_count,
        },
    );
    Ok(())
}

fn finish(
    engine: &Engine,
    ctx: &RequestContext,
    path: &Path,
    fingerprint: Fingerprint,
    entries: Vec<Entry>,
) -> Result<(), ListingError> {
    let (dir_count, file_count) = count_kinds(entries.iter().filter(|e| engine.config.include_hidden || !e.is_hidden));
    // The cancellation check runs under the cache's write lock, so a request cancelled
    // at this point can't slip a record in after its successor looked.
    let stored = engine
        .cache
        .put_guarded(path, entries, fingerprint, || !ctx.is_cancelled());
    if ctx.is_cancelled() {
        return Ok(());
    }
    if !stored {
        log::debug!("Listing request {}: result not cached", ctx.id());
    }
    ctx.transition(ListingState::Complete);
    emit(
        engine,
        ctx,
        ListingEvent::Complete {
            path: display(path),
            file_count,
            dir_count,
        },
    );
    Ok(())
}

/// Returns `(dirs, files)`.
fn count_kinds<'a>(entries: impl Iterator<Item = &'a Entry>) -> (usize, usize) {
    entries.fold((0, 0), |(dirs, files), e| if e.is_dir { (dirs + 1, files) } else { (dirs, files + 1) })
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
