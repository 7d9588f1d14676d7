//! Event protocol between the listing engine and its consumer.
//!
//! Per request, events arrive in this order: one `Start`, zero or more `Batch` /
//! `Hydrate`, then exactly one of `Complete` or `Error`. Entries travel in batches so
//! a directory with tens of thousands of children costs hundreds of messages, not tens
//! of thousands. Nothing orders a superseded request's stragglers against the next
//! request's events; consumers filter by request id.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::file_system::listing::metadata::Entry;
use crate::ignore_poison::IgnorePoison;
use crate::volumes::Volume;

/// Identifies one navigation request within a session. Starts at 1.
pub type RequestId = u64;

/// Consumer-visible listing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ListingEvent {
    /// Carries the resolved path.
    Start { path: String },
    Batch { entries: Vec<Entry> },
    /// A single hydrated entry. Consumers upsert it by path.
    Hydrate { entry: Entry },
    #[serde(rename_all = "camelCase")]
    Complete {
        path: String,
        file_count: usize,
        dir_count: usize,
    },
    Error { message: String },
    /// Not tied to a request.
    VolumesChanged { volumes: Vec<Volume> },
}

impl ListingEvent {
    /// Event name, as a transport would label it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "listing-start",
            Self::Batch { .. } => "listing-batch",
            Self::Hydrate { .. } => "listing-hydrate",
            Self::Complete { .. } => "listing-complete",
            Self::Error { .. } => "listing-error",
            Self::VolumesChanged { .. } => "volumes-changed",
        }
    }

    /// True for `Complete` and `Error`, the last event of a request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Number of entries this event carries.
    pub fn entry_count(&self) -> usize {
        match self {
            Self::Batch { entries } => entries.len(),
            Self::Hydrate { .. } => 1,
            _ => 0,
        }
    }
}

/// A listing event addressed to a request, or to the whole session when `request_id`
/// is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(flatten)]
    pub event: ListingEvent,
}

impl SessionEvent {
    pub fn for_request(request_id: RequestId, event: ListingEvent) -> Self {
        Self {
            request_id: Some(request_id),
            event,
        }
    }

    pub fn session(event: ListingEvent) -> Self {
        Self {
            request_id: None,
            event,
        }
    }
}

/// Where the engine sends its events.
///
/// `emit` must not block for long: it's called from enumeration and hydration threads.
/// Implementations must deliver events from one thread in the order they were emitted.
pub trait Sink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

// ============================================================================
// Sinks
// ============================================================================

/// Delivers events over an unbounded tokio channel, in order.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.tx.send(event) {
            log::debug!("Dropping {} event, consumer is gone", e.0.event.name());
        }
    }
}

/// Records every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SessionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock_ignore_poison().clone()
    }

    /// Events for one request, in emission order.
    pub fn events_for(&self, request_id: RequestId) -> Vec<ListingEvent> {
        self.events
            .lock_ignore_poison()
            .iter()
            .filter(|e| e.request_id == Some(request_id))
            .map(|e| e.event.clone())
            .collect()
    }

    /// Removes and returns everything emitted so far.
    pub fn take(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock_ignore_poison())
    }

    pub fn len(&self) -> usize {
        self.events.lock_ignore_poison().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for MemorySink {
    fn emit(&self, event: SessionEvent) {
        self.events.lock_ignore_poison().push(event);
    }
}

/// Writes each event as one line of JSON.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> Sink for JsonLinesSink<W> {
    fn emit(&self, event: SessionEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Couldn't serialize {} event: {}", event.event.name(), e);
                return;
            }
        };
        let mut writer = self.writer.lock_ignore_poison();
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            log::error!("Couldn't write {} event: {}", event.event.name(), e);
        }
    }
}
