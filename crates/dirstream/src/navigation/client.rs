//! Consumer side of a listing session.
//!
//! The client lives on one thread (a UI event loop). It drops events from superseded
//! requests, buffers incoming entries and applies them once per frame, so a burst of
//! hundreds of batches costs one redraw. `Complete` flushes right away.
//!
//! Time is passed in explicitly (`now`) so the frame loop owns the clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::ListingConfig;
use crate::file_system::listing::events::{ListingEvent, RequestId, SessionEvent};
use crate::file_system::listing::metadata::Entry;
use crate::file_system::listing::streaming::{RequestContext, StreamCoordinator};
use crate::volumes::Volume;

/// Starts listing requests. Implemented by [`StreamCoordinator`]; tests substitute
/// their own.
pub trait Navigator {
    fn navigate(&self, path: &str) -> Arc<RequestContext>;
}

impl Navigator for StreamCoordinator {
    fn navigate(&self, path: &str) -> Arc<RequestContext> {
        StreamCoordinator::navigate(self, path)
    }
}

impl<N: Navigator + ?Sized> Navigator for Arc<N> {
    fn navigate(&self, path: &str) -> Arc<RequestContext> {
        (**self).navigate(path)
    }
}

/// Timing of completed navigations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NavigationStats {
    pub count: u64,
    pub last_ms: f64,
    pub average_ms: f64,
    /// Navigations that completed before the loading indicator would have shown.
    pub instant_count: u64,
}

impl NavigationStats {
    fn record(&mut self, elapsed: Duration, instant: bool) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.count += 1;
        self.last_ms = ms;
        self.average_ms += (ms - self.average_ms) / self.count as f64;
        if instant {
            self.instant_count += 1;
        }
    }
}

pub struct NavigationClient<N: Navigator> {
    navigator: N,
    loading_delay: Duration,

    request: Option<Arc<RequestContext>>,
    started_at: Option<Instant>,
    path: Option<String>,
    entries: Vec<Entry>,
    /// Entry path -> index into `entries`.
    positions: HashMap<String, usize>,
    pending: Vec<Entry>,
    loading: bool,
    complete: bool,
    error: Option<String>,

    volumes: Vec<Volume>,
    stats: NavigationStats,
}

impl<N: Navigator> NavigationClient<N> {
    pub fn new(navigator: N, config: &ListingConfig) -> Self {
        Self::with_loading_delay(navigator, config.loading_indicator_delay())
    }

    pub fn with_loading_delay(navigator: N, loading_delay: Duration) -> Self {
        Self {
            navigator,
            loading_delay,
            request: None,
            started_at: None,
            path: None,
            entries: Vec::new(),
            positions: HashMap::new(),
            pending: Vec::new(),
            loading: false,
            complete: false,
            error: None,
            volumes: Vec::new(),
            stats: NavigationStats::default(),
        }
    }

    /// Cancels the current request, clears the listing and starts a new request.
    pub fn navigate(&mut self, path: &str, now: Instant) -> RequestId {
        if let Some(previous) = self.request.take() {
            previous.cancel();
        }
        self.entries.clear();
        self.positions.clear();
        self.pending.clear();
        self.path = None;
        self.error = None;
        self.complete = false;
        self.loading = true;
        self.started_at = Some(now);

        let ctx = self.navigator.navigate(path);
        let id = ctx.id();
        self.request = Some(ctx);
        id
    }

    /// Applies one event. Returns false if it was dropped as belonging to another
    /// request.
    pub fn handle_event(&mut self, event: SessionEvent, now: Instant) -> bool {
        let Some(request_id) = event.request_id else {
            return match event.event {
                ListingEvent::VolumesChanged { volumes } => {
                    self.volumes = volumes;
                    true
                }
                other => {
                    log::debug!("Dropping {} event without a request id", other.name());
                    false
                }
            };
        };
        if self.current_request() != Some(request_id) {
            log::debug!("Dropping {} event from stale request {}", event.event.name(), request_id);
            return false;
        }

        match event.event {
            ListingEvent::Start { path } => self.path = Some(path),
            ListingEvent::Batch { entries } => self.pending.extend(entries),
            ListingEvent::Hydrate { entry } => self.pending.push(entry),
            ListingEvent::Complete { path, .. } => {
                self.flush();
                self.path = Some(path);
                self.finish(now);
                self.complete = true;
            }
            ListingEvent::Error { message } => {
                self.pending.clear();
                self.finish(now);
                self.error = Some(message);
            }
            ListingEvent::VolumesChanged { volumes } => self.volumes = volumes,
        }
        true
    }

    /// Applies buffered entries. Call once per rendered frame. Returns how many were
    /// applied.
    pub fn on_frame(&mut self) -> usize {
        self.flush()
    }

    /// Drains whatever has arrived on `rx` without waiting. Returns the number of
    /// events taken off the channel.
    pub fn pump(&mut self, rx: &mut UnboundedReceiver<SessionEvent>, now: Instant) -> usize {
        let mut taken = 0;
        while let Ok(event) = rx.try_recv() {
            self.handle_event(event, now);
            taken += 1;
        }
        taken
    }

    /// True once loading has lasted longer than the indicator delay.
    pub fn is_loading_visible(&self, now: Instant) -> bool {
        match (self.loading, self.started_at) {
            (true, Some(started)) => now.saturating_duration_since(started) >= self.loading_delay,
            _ => false,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn current_request(&self) -> Option<RequestId> {
        self.request.as_ref().map(|ctx| ctx.id())
    }

    /// Resolved path of the current listing, once `Start` has arrived.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Entries applied so far, in arrival order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entries received but not yet applied.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn stats(&self) -> NavigationStats {
        self.stats
    }

    fn flush(&mut self) -> usize {
        let applied = self.pending.len();
        for entry in self.pending.drain(..) {
            match self.positions.get(&entry.path) {
                Some(&index) => self.entries[index] = entry,
                None => {
                    self.positions.insert(entry.path.clone(), self.entries.len());
                    self.entries.push(entry);
                }
            }
        }
        applied
    }

    fn finish(&mut self, now: Instant) {
        if let Some(started) = self.started_at {
            let elapsed = now.saturating_duration_since(started);
            self.stats.record(elapsed, elapsed < self.loading_delay);
        }
        self.loading = false;
    }
}
