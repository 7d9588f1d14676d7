//! Volume mount/unmount monitor.
//!
//! Watches the host's mount roots with `notify` where they exist, and polls on a coarse
//! interval either way. Every trigger re-reads the volume list and compares it with the
//! last one sent. Only a real difference reaches the sink.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::file_system::listing::events::{ListingEvent, SessionEvent, Sink};
use crate::ignore_poison::IgnorePoison;
use crate::volumes::listing::{Volume, VolumeSource, same_volumes};

#[cfg(target_os = "macos")]
const MOUNT_ROOTS: &[&str] = &["/Volumes"];
#[cfg(target_os = "linux")]
const MOUNT_ROOTS: &[&str] = &["/media", "/run/media", "/mnt"];
#[cfg(not(any(target_os = "macos", target_os = "linux")))]
const MOUNT_ROOTS: &[&str] = &[];

/// Mount events come in bursts; wait this long and re-check once.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Sends `VolumesChanged` when the set of mounted volumes changes.
pub struct VolumeMonitor {
    source: Arc<dyn VolumeSource>,
    sink: Arc<dyn Sink>,
    last: Mutex<Option<Vec<Volume>>>,
}

impl VolumeMonitor {
    pub fn new(source: Arc<dyn VolumeSource>, sink: Arc<dyn Sink>) -> Self {
        Self {
            source,
            sink,
            last: Mutex::new(None),
        }
    }

    /// The last volume list sent to the sink, if any.
    pub fn last_sent(&self) -> Option<Vec<Volume>> {
        self.last.lock_ignore_poison().clone()
    }

    /// Reads the current volumes and notifies if they differ from the last list sent.
    /// The first check always notifies. Returns whether it notified.
    pub fn check_now(&self) -> bool {
        let current = self.source.volumes();
        let mut last = self.last.lock_ignore_poison();
        if let Some(previous) = last.as_ref()
            && same_volumes(previous, &current)
        {
            return false;
        }

        match last.as_ref() {
            Some(previous) => log_diff(previous, &current),
            None => log::debug!("Initial volumes: {} mounted", current.len()),
        }
        *last = Some(current.clone());
        self.sink
            .emit(SessionEvent::session(ListingEvent::VolumesChanged { volumes: current }));
        true
    }

    /// Runs the monitor on the current tokio runtime until the handle is aborted.
    ///
    /// Checks once right away, then on every poll tick and after each burst of mount
    /// root events.
    pub fn spawn(self: Arc<Self>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        let (tx, rx) = unbounded_channel();
        let watcher = start_mount_watcher(tx);
        let mut triggers = watcher.as_ref().map(|_| rx);

        tokio::spawn(async move {
            // Dropping the watcher stops its event thread.
            let _watcher = watcher;
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    received = next_trigger(&mut triggers) => {
                        if received {
                            tokio::time::sleep(SETTLE_DELAY).await;
                            drain(&mut triggers);
                        } else {
                            log::debug!("Volume watcher stopped, polling only");
                            triggers = None;
                        }
                    }
                }

                let monitor = Arc::clone(&self);
                if let Err(e) = tokio::task::spawn_blocking(move || monitor.check_now()).await {
                    log::error!("Volume check failed: {}", e);
                }
            }
        })
    }
}

async fn next_trigger(triggers: &mut Option<UnboundedReceiver<()>>) -> bool {
    match triggers.as_mut() {
        Some(rx) => rx.recv().await.is_some(),
        None => std::future::pending().await,
    }
}

fn drain(triggers: &mut Option<UnboundedReceiver<()>>) {
    if let Some(rx) = triggers.as_mut() {
        while rx.try_recv().is_ok() {}
    }
}

/// Watches every mount root that exists. None if there's nothing to watch.
fn start_mount_watcher(tx: UnboundedSender<()>) -> Option<RecommendedWatcher> {
    let roots: Vec<&Path> = MOUNT_ROOTS.iter().map(Path::new).filter(|p| p.is_dir()).collect();
    if roots.is_empty() {
        log::debug!("No mount roots to watch, polling only");
        return None;
    }

    let mut watcher = match notify::recommended_watcher(move |result: Result<Event, notify::Error>| match result {
        Ok(event) if is_mount_event(&event.kind) => {
            let _ = tx.send(());
        }
        Ok(_) => {}
        Err(e) => log::error!("Volume watcher error: {}", e),
    }) {
        Ok(watcher) => watcher,
        Err(e) => {
            log::error!("Failed to create volume watcher: {}", e);
            return None;
        }
    };

    let mut watching = 0;
    for root in roots {
        match watcher.watch(root, RecursiveMode::NonRecursive) {
            Ok(()) => {
                log::debug!("Watching {} for mounts", root.display());
                watching += 1;
            }
            Err(e) => log::warn!("Failed to watch {}: {}", root.display(), e),
        }
    }
    (watching > 0).then_some(watcher)
}

fn is_mount_event(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_))
}

fn log_diff(previous: &[Volume], current: &[Volume]) {
    for volume in current {
        if !previous.iter().any(|p| p.identity() == volume.identity()) {
            log::debug!("Volume mounted: {}", volume.mount_point);
        }
    }
    for volume in previous {
        if !current.iter().any(|c| c.identity() == volume.identity()) {
            log::debug!("Volume unmounted: {}", volume.mount_point);
        }
    }
}
