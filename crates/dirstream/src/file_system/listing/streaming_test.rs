//! End-to-end tests for the stream coordinator against real temp directories.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::ListingError;
use super::caching::DirectoryCache;
use super::events::{ListingEvent, MemorySink, SessionEvent, Sink};
use super::hydration::MetadataHydrator;
use super::metadata::Entry;
use super::reading::{PathEnumerator, PortableEnumerator, list_directory};
use super::streaming::{ListingState, RequestContext, StreamCoordinator};
use crate::config::ListingConfig;
use crate::file_system::validation::FixedHomeResolver;

fn make_files(dir: &Path, count: usize) {
    for i in 0..count {
        fs::write(dir.join(format!("file_{:05}.txt", i)), b"x").unwrap();
    }
}

fn coordinator(sink: &Arc<MemorySink>, home: &Path) -> StreamCoordinator {
    coordinator_with(sink, home, ListingConfig::default())
}

fn coordinator_with(sink: &Arc<MemorySink>, home: &Path, config: ListingConfig) -> StreamCoordinator {
    StreamCoordinator::builder(sink.clone())
        .config(config)
        .home(Arc::new(FixedHomeResolver(home.to_path_buf())))
        .build()
        .unwrap()
}

async fn run(
    coordinator: &StreamCoordinator,
    sink: &MemorySink,
    path: &Path,
) -> (Arc<RequestContext>, Vec<ListingEvent>) {
    let ctx = coordinator.navigate(&path.to_string_lossy());
    ctx.wait_finished().await;
    let events = sink.events_for(ctx.id());
    (ctx, events)
}

/// Shape of an event stream, e.g. `["start", "batch:100", "batch:50", "complete:150/0"]`.
fn shape(events: &[ListingEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| match e {
            ListingEvent::Start { .. } => "start".to_string(),
            ListingEvent::Batch { entries } => format!("batch:{}", entries.len()),
            ListingEvent::Hydrate { .. } => "hydrate".to_string(),
            ListingEvent::Complete {
                file_count, dir_count, ..
            } => format!("complete:{}/{}", file_count, dir_count),
            ListingEvent::Error { .. } => "error".to_string(),
            ListingEvent::VolumesChanged { .. } => "volumes".to_string(),
        })
        .collect()
}

fn delivered(events: &[ListingEvent]) -> Vec<Entry> {
    events
        .iter()
        .flat_map(|e| match e {
            ListingEvent::Batch { entries } => entries.clone(),
            ListingEvent::Hydrate { entry } => vec![entry.clone()],
            _ => Vec::new(),
        })
        .collect()
}

// ============================================================================
// Paging and caching
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_150_files_then_cache_hit() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 150);
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());

    let (ctx, events) = run(&coordinator, &sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:100", "batch:50", "complete:150/0"]);
    assert_eq!(ctx.state(), ListingState::Complete);
    assert!(coordinator.cache().contains(home.path()));

    let (_, events) = run(&coordinator, &sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:150", "complete:150/0"]);
    assert_eq!(coordinator.cache().stats().hits, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_small_directory_is_one_hydrated_batch() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 5);
    fs::create_dir(home.path().join("zeta")).unwrap();
    fs::create_dir(home.path().join("Alpha")).unwrap();
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());

    let (ctx, events) = run(&coordinator, &sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:7", "complete:5/2"]);
    // Small listings skip the hydrating stage.
    assert_eq!(ctx.state(), ListingState::Complete);

    let entries = delivered(&events);
    assert!(entries.iter().all(Entry::is_hydrated));
    assert_eq!(entries[0].name, "Alpha");
    assert_eq!(entries[1].name, "zeta");
    assert_eq!(
        events[0],
        ListingEvent::Start {
            path: home.path().to_string_lossy().to_string()
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_entry_remainder_is_a_hydrate_event() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 151);
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());

    let (_, events) = run(&coordinator, &sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:100", "batch:50", "hydrate", "complete:151/0"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_directory() {
    let home = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());

    let (_, events) = run(&coordinator, &sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "complete:0/0"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_directory_streams_first_page_first() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 10_000);
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());

    let (_, events) = run(&coordinator, &sink, home.path()).await;
    let shape = shape(&events);
    assert_eq!(shape[0], "start");
    assert_eq!(shape[1], "batch:100");
    assert_eq!(shape.last().unwrap(), "complete:10000/0");
    // Entries are coalesced, not sent one by one.
    assert_eq!(events.len(), 1 + 1 + 9_900 / 50 + 1);

    let entries = delivered(&events);
    assert!(entries.iter().all(Entry::is_hydrated));

    // Same set as an uncached listing.
    let hydrator = MetadataHydrator::new(2).unwrap();
    let snapshot = list_directory(&PortableEnumerator, &hydrator, home.path(), true).unwrap();
    let streamed: HashSet<String> = entries.into_iter().map(|e| e.path).collect();
    let expected: HashSet<String> = snapshot.files.into_iter().map(|e| e.path).collect();
    assert_eq!(streamed, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_modified_directory_is_listed_fresh() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 3);
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());
    run(&coordinator, &sink, home.path()).await;

    // Directory mtimes can be as coarse as a scheduler tick.
    tokio::time::sleep(Duration::from_millis(50)).await;
    fs::write(home.path().join("new.txt"), b"new").unwrap();

    let (_, events) = run(&coordinator, &sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:4", "complete:4/0"]);
    assert!(delivered(&events).iter().any(|e| e.name == "new.txt"));
    let stats = coordinator.cache().stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.stale_evictions, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalidate_forces_relisting() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 2);
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());
    run(&coordinator, &sink, home.path()).await;

    assert!(coordinator.invalidate(home.path()));
    run(&coordinator, &sink, home.path()).await;
    assert_eq!(coordinator.cache().stats().hits, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hidden_entries_can_be_excluded() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 2);
    fs::write(home.path().join(".secret"), b"").unwrap();
    let sink = Arc::new(MemorySink::new());
    let config = ListingConfig {
        include_hidden: false,
        ..ListingConfig::default()
    };
    let coordinator = coordinator_with(&sink, home.path(), config);

    let (_, events) = run(&coordinator, &sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:2", "complete:2/0"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_renavigation_after_a_pause_is_served_from_cache() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 150);
    let sink = Arc::new(MemorySink::new());
    let config = ListingConfig {
        warm_ttl_ms: 5_000,
        cold_ttl_ms: 50,
        recency_window_ms: 2_000,
        ..ListingConfig::default()
    };
    let coordinator = coordinator_with(&sink, home.path(), config);
    run(&coordinator, &sink, home.path()).await;

    // Longer than the cold TTL: only a warm record survives this.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (_, events) = run(&coordinator, &sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:150", "complete:150/0"]);
    assert_eq!(coordinator.cache().stats().hits, 1);
}

/// Reports every entry unhydrated and not hidden, like a directory stream that only
/// knows names and types. Hidden flags show up once the entry is stat'ed.
struct NameOnlyEnumerator;

impl PathEnumerator for NameOnlyEnumerator {
    fn name(&self) -> &'static str {
        "name-only"
    }

    fn enumerate(&self, dir: &Path) -> Result<Vec<Entry>, ListingError> {
        let entries = PortableEnumerator.enumerate(dir)?;
        Ok(entries
            .into_iter()
            .map(|e| Entry::minimal(dir, &e.name, e.is_dir, false))
            .collect())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_entries_found_hidden_during_hydration_are_excluded() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 150);
    for i in 0..30 {
        fs::write(home.path().join(format!(".h_{:02}", i)), b"").unwrap();
    }
    let sink = Arc::new(MemorySink::new());
    let coordinator = StreamCoordinator::builder(sink.clone())
        .config(ListingConfig {
            include_hidden: false,
            ..ListingConfig::default()
        })
        .enumerator(Arc::new(NameOnlyEnumerator))
        .home(Arc::new(FixedHomeResolver(home.path().to_path_buf())))
        .build()
        .unwrap();

    let (_, events) = run(&coordinator, &sink, home.path()).await;
    let entries = delivered(&events);
    assert_eq!(entries.len(), 150);
    assert!(entries.iter().all(|e| !e.is_hidden && !e.name.starts_with('.')));
    assert_eq!(shape(&events).last().unwrap(), "complete:150/0");

    // The cached copy is filtered the same way.
    let (_, events) = run(&coordinator, &sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:150", "complete:150/0"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shared_cache_respects_each_hidden_setting() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 2);
    fs::write(home.path().join(".secret"), b"").unwrap();
    let cache = Arc::new(DirectoryCache::new(Default::default()));
    let build = |sink: &Arc<MemorySink>, include_hidden: bool| {
        StreamCoordinator::builder(sink.clone())
            .config(ListingConfig {
                include_hidden,
                ..ListingConfig::default()
            })
            .cache(Arc::clone(&cache))
            .home(Arc::new(FixedHomeResolver(home.path().to_path_buf())))
            .build()
            .unwrap()
    };
    let hiding_sink = Arc::new(MemorySink::new());
    let hiding = build(&hiding_sink, false);
    let showing_sink = Arc::new(MemorySink::new());
    let showing = build(&showing_sink, true);

    let (_, events) = run(&hiding, &hiding_sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:2", "complete:2/0"]);

    let (_, events) = run(&showing, &showing_sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:3", "complete:3/0"]);
    assert!(delivered(&events).iter().any(|e| e.name == ".secret"));

    let (_, events) = run(&hiding, &hiding_sink, home.path()).await;
    assert_eq!(shape(&events), vec!["start", "batch:2", "complete:2/0"]);
    assert_eq!(cache.stats().hits, 2);
}

// ============================================================================
// First-page latency
// ============================================================================

/// Records events, and holds the emitting job on its first `Batch` until released.
struct PausingSink {
    events: MemorySink,
    pause: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl Sink for PausingSink {
    fn emit(&self, event: SessionEvent) {
        let is_batch = matches!(event.event, ListingEvent::Batch { .. });
        self.events.emit(event);
        let pause = if is_batch { self.pause.lock().unwrap().take() } else { None };
        if let Some((reached, release)) = pause {
            let _ = reached.send(());
            let _ = release.recv();
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_first_page_reaches_consumer_before_hydration_finishes() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 1_000);
    let (reached_tx, reached_rx) = channel();
    let (release_tx, release_rx) = channel();
    let sink = Arc::new(PausingSink {
        events: MemorySink::new(),
        pause: Mutex::new(Some((reached_tx, release_rx))),
    });
    let coordinator = StreamCoordinator::builder(sink.clone())
        .home(Arc::new(FixedHomeResolver(home.path().to_path_buf())))
        .build()
        .unwrap();

    let ctx = coordinator.navigate(&home.path().to_string_lossy());
    tokio::task::spawn_blocking(move || reached_rx.recv()).await.unwrap().unwrap();

    assert_eq!(shape(&sink.events.events_for(ctx.id())), vec!["start", "batch:100"]);
    assert!(!ctx.is_finished());
    assert_eq!(ctx.state(), ListingState::FirstPageReady);

    release_tx.send(()).unwrap();
    ctx.wait_finished().await;
    let events = sink.events.events_for(ctx.id());
    assert_eq!(events.len(), 1 + 1 + 900 / 50 + 1);
    assert_eq!(shape(&events).last().unwrap(), "complete:1000/0");
}

// ============================================================================
// Path resolution and errors
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_path_lists_home() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 1);
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());

    let ctx = coordinator.navigate("");
    ctx.wait_finished().await;
    let events = sink.events_for(ctx.id());
    assert_eq!(
        events[0],
        ListingEvent::Start {
            path: home.path().to_string_lossy().to_string()
        }
    );
    assert_eq!(shape(&events).last().unwrap(), "complete:1/0");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_path_reports_error() {
    let home = tempfile::tempdir().unwrap();
    let missing = home.path().join("missing");
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());

    let (ctx, events) = run(&coordinator, &sink, &missing).await;
    let expected = ListingError::NotFound(missing.to_string_lossy().to_string()).to_string();
    assert_eq!(events, vec![ListingEvent::Error { message: expected }]);
    assert_eq!(ctx.state(), ListingState::Error);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_path_reports_not_a_directory() {
    let home = tempfile::tempdir().unwrap();
    make_files(home.path(), 1);
    let file = home.path().join("file_00000.txt");
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());

    let (_, events) = run(&coordinator, &sink, &file).await;
    assert!(matches!(&events[..], [ListingEvent::Error { message }] if message.starts_with("Not a directory")));
}

struct PanickingEnumerator;

impl PathEnumerator for PanickingEnumerator {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn enumerate(&self, _dir: &Path) -> Result<Vec<Entry>, ListingError> {
        panic!("enumerator blew up")
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_panicked_job_reports_error_before_finishing() {
    let home = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let coordinator = StreamCoordinator::builder(sink.clone())
        .enumerator(Arc::new(PanickingEnumerator))
        .home(Arc::new(FixedHomeResolver(home.path().to_path_buf())))
        .build()
        .unwrap();

    let (ctx, events) = run(&coordinator, &sink, home.path()).await;
    assert_eq!(ctx.state(), ListingState::Error);
    assert!(matches!(&events[..], [ListingEvent::Error { message }] if message.contains("task failed")));
}

// ============================================================================
// Supersession
// ============================================================================

/// Blocks enumeration of one directory until released.
struct GatedEnumerator {
    gated: PathBuf,
    release: Mutex<Receiver<()>>,
    entered: Mutex<Sender<()>>,
}

impl PathEnumerator for GatedEnumerator {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn enumerate(&self, dir: &Path) -> Result<Vec<Entry>, ListingError> {
        if dir == self.gated {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
        }
        PortableEnumerator.enumerate(dir)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_superseded_request_goes_quiet() {
    let root = tempfile::tempdir().unwrap();
    let slow = root.path().join("slow");
    let fast = root.path().join("fast");
    fs::create_dir(&slow).unwrap();
    fs::create_dir(&fast).unwrap();
    make_files(&slow, 200);
    make_files(&fast, 3);

    let (release_tx, release_rx) = channel();
    let (entered_tx, entered_rx) = channel();
    let enumerator = Arc::new(GatedEnumerator {
        gated: slow.clone(),
        release: Mutex::new(release_rx),
        entered: Mutex::new(entered_tx),
    });
    let sink = Arc::new(MemorySink::new());
    let coordinator = StreamCoordinator::builder(sink.clone())
        .enumerator(enumerator)
        .home(Arc::new(FixedHomeResolver(root.path().to_path_buf())))
        .build()
        .unwrap();

    let first = coordinator.navigate(&slow.to_string_lossy());
    tokio::task::spawn_blocking(move || entered_rx.recv()).await.unwrap().unwrap();

    let second = coordinator.navigate(&fast.to_string_lossy());
    assert!(first.is_cancelled());
    second.wait_finished().await;

    release_tx.send(()).unwrap();
    first.wait_finished().await;

    assert!(sink.events_for(first.id()).is_empty());
    assert_eq!(shape(&sink.events_for(second.id())), vec!["start", "batch:3", "complete:3/0"]);
    assert!(!coordinator.cache().contains(&slow));
    assert!(coordinator.cache().contains(&fast));
    assert_eq!(coordinator.active_request().map(|r| r.id()), Some(second.id()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_ids_increase() {
    let home = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let coordinator = coordinator(&sink, home.path());

    let a = coordinator.navigate("");
    let b = coordinator.navigate("");
    assert!(b.id() > a.id());
    a.wait_finished().await;
    b.wait_finished().await;
    coordinator.cancel_active();
    assert!(coordinator.active_request().is_none());
    assert!(b.is_cancelled());
}

// ============================================================================
// State machine
// ============================================================================

#[test]
fn test_state_transitions() {
    use ListingState::*;
    assert!(Idle.can_transition_to(Enumerating));
    assert!(Enumerating.can_transition_to(FirstPageReady));
    assert!(FirstPageReady.can_transition_to(Complete));
    assert!(FirstPageReady.can_transition_to(Hydrating));
    assert!(Hydrating.can_transition_to(Complete));
    assert!(Enumerating.can_transition_to(Error));
    assert!(Hydrating.can_transition_to(Error));

    assert!(!Idle.can_transition_to(Complete));
    assert!(!Enumerating.can_transition_to(Complete));
    assert!(!Complete.can_transition_to(Error));
    assert!(!Error.can_transition_to(Enumerating));
    assert!(Complete.is_terminal());
}
