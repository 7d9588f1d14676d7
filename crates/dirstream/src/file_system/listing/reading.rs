//! Low-level directory reading.
//!
//! Two enumerators sit behind the [`PathEnumerator`] trait:
//! - [`NativeEnumerator`]: one pass over the OS directory stream. On Windows the
//!   `FindNextFileW` record already carries attributes, size and mtime, so entries come
//!   back fully populated without a stat per file. Elsewhere it relies on `d_type` and
//!   returns minimal entries, leaving the stat work to the hydrator.
//! - [`PortableEnumerator`]: list, then stat each child. A failed stat still yields a
//!   minimal entry instead of dropping the child.
//!
//! The enumerator is picked once at startup by [`select_enumerator`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::file_system::listing::error::ListingError;
use crate::file_system::listing::hydration::MetadataHydrator;
use crate::file_system::listing::metadata::{DirectorySnapshot, Entry, is_hidden};

/// OS pseudo-entries that are never shown, whatever the hidden-files setting says.
/// Compared case-insensitively.
const SYSTEM_ENTRY_NAMES: &[&str] = &[
    // Windows
    "$recycle.bin",
    "$windows.~bt",
    "$windows.~ws",
    "system volume information",
    "pagefile.sys",
    "hiberfil.sys",
    "swapfile.sys",
    "dumpstack.log.tmp",
    "recycler",
    // macOS
    ".spotlight-v100",
    ".fseventsd",
    ".trashes",
    ".documentrevisions-v100",
    ".temporaryitems",
    ".vol",
    // Linux
    "swapfile",
    ".trash-1000",
];

/// Returns true for OS pseudo-files and directories that are filtered unconditionally.
pub fn is_system_entry(name: &str) -> bool {
    let lower = name.to_lowercase();
    SYSTEM_ENTRY_NAMES.contains(&lower.as_str())
}

/// Lists direct children of a directory.
pub trait PathEnumerator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Lists the direct children of `dir`, an absolute, cleaned directory path.
    ///
    /// System pseudo-entries are already filtered out. Entries come back in no
    /// particular order.
    fn enumerate(&self, dir: &Path) -> Result<Vec<Entry>, ListingError>;
}

/// Which enumerator to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnumeratorKind {
    /// Native when it initializes, portable otherwise.
    #[default]
    Auto,
    Native,
    Portable,
}

impl std::str::FromStr for EnumeratorKind {
    type Err = ListingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "portable" => Ok(Self::Portable),
            other => Err(ListingError::Config(format!("unknown enumerator: {}", other))),
        }
    }
}

/// Opens the directory stream, mapping failures onto the listing taxonomy.
fn open_dir(dir: &Path) -> Result<fs::ReadDir, ListingError> {
    let display = dir.to_string_lossy();
    match fs::read_dir(dir) {
        Ok(iter) => Ok(iter),
        Err(e) => {
            // Some platforms report ENOTDIR as a generic error; look for ourselves.
            if dir.is_file() {
                return Err(ListingError::NotADirectory(display.to_string()));
            }
            Err(ListingError::from_io(&e, &display))
        }
    }
}

/// Something a directory stream yields. Implemented for `fs::DirEntry`.
pub(super) trait NamedItem {
    fn item_name(&self) -> String;
}

impl NamedItem for fs::DirEntry {
    fn item_name(&self) -> String {
        self.file_name().to_string_lossy().to_string()
    }
}

/// The loop both enumerators share. An item the stream fails to read is logged and
/// skipped, so one bad entry doesn't fail the whole listing. System entries are dropped.
pub(super) fn collect_entries<T: NamedItem>(
    label: &str,
    dir: &Path,
    items: impl Iterator<Item = std::io::Result<T>>,
    to_entry: impl Fn(&str, &T) -> Entry,
) -> Vec<Entry> {
    let started = std::time::Instant::now();
    let mut entries = Vec::new();

    for item in items {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                log::warn!("{} enumerate: skipping unreadable entry in {}: {}", label, dir.display(), e);
                continue;
            }
        };
        let name = item.item_name();
        if is_system_entry(&name) {
            continue;
        }
        entries.push(to_entry(&name, &item));
    }

    log::debug!(
        "{} enumerate: path={}, entries={}, took={}ms",
        label,
        dir.display(),
        entries.len(),
        started.elapsed().as_millis()
    );
    entries
}

// ============================================================================
// Native enumerator
// ============================================================================

/// Single-pass enumerator over the OS directory stream.
#[derive(Debug)]
pub struct NativeEnumerator {
    _private: (),
}

impl NativeEnumerator {
    /// Initializes the native fast path, or fails with `Unsupported` on hosts without one.
    pub fn new() -> Result<Self, ListingError> {
        if cfg!(any(unix, windows)) {
            Ok(Self { _private: () })
        } else {
            Err(ListingError::Unsupported("no native directory enumeration on this platform".into()))
        }
    }
}

impl PathEnumerator for NativeEnumerator {
    fn name(&self) -> &'static str {
        "native"
    }

    fn enumerate(&self, dir: &Path) -> Result<Vec<Entry>, ListingError> {
        let items = open_dir(dir)?;
        Ok(collect_entries("native", dir, items, |name, item| native_entry(dir, name, item)))
    }
}

/// On Windows, `DirEntry::metadata` reads the attributes the find record already holds.
#[cfg(windows)]
fn native_entry(dir: &Path, name: &str, item: &fs::DirEntry) -> Entry {
    match item.metadata() {
        Ok(metadata) => Entry::from_metadata(dir, name, &metadata),
        Err(_) => {
            let is_dir = item.file_type().map(|t| t.is_dir()).unwrap_or(false);
            Entry::minimal(dir, name, is_dir, is_hidden(name, None))
        }
    }
}

/// `DirEntry::file_type` comes from `d_type` where the filesystem reports it, so this
/// costs no stat. Symlinks to directories count as directories, which does need one.
#[cfg(not(windows))]
fn native_entry(dir: &Path, name: &str, item: &fs::DirEntry) -> Entry {
    let is_dir = match item.file_type() {
        Ok(t) if t.is_symlink() => fs::metadata(item.path()).map(|m| m.is_dir()).unwrap_or(false),
        Ok(t) => t.is_dir(),
        Err(_) => false,
    };
    Entry::minimal(dir, name, is_dir, is_hidden(name, None))
}

// ============================================================================
// Portable enumerator
// ============================================================================

/// List-then-stat enumerator. Works everywhere, costs one stat per child.
#[derive(Debug, Default)]
pub struct PortableEnumerator;

impl PathEnumerator for PortableEnumerator {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn enumerate(&self, dir: &Path) -> Result<Vec<Entry>, ListingError> {
        let items = open_dir(dir)?;
        Ok(collect_entries("portable", dir, items, |name, item| portable_entry(dir, name, item)))
    }
}

/// Follows symlinks so a link to a directory lists as a directory. A broken link or a
/// failed stat falls back to what the directory stream told us.
fn portable_entry(dir: &Path, name: &str, item: &fs::DirEntry) -> Entry {
    let path = item.path();
    match fs::metadata(&path).or_else(|_| fs::symlink_metadata(&path)) {
        Ok(metadata) => Entry::from_metadata(dir, name, &metadata),
        Err(e) => {
            log::debug!("portable enumerate: stat failed for {}: {}", path.display(), e);
            let is_dir = item.file_type().map(|t| t.is_dir()).unwrap_or(false);
            Entry::minimal(dir, name, is_dir, is_hidden(name, None))
        }
    }
}

// ============================================================================
// Selection and uncached listing
// ============================================================================

/// Picks the enumerator for this host.
///
/// `Auto` and `Native` try the native fast path first and fall back to the portable
/// enumerator when it can't initialize.
pub fn select_enumerator(kind: EnumeratorKind) -> Arc<dyn PathEnumerator> {
    match kind {
        EnumeratorKind::Portable => Arc::new(PortableEnumerator),
        EnumeratorKind::Auto | EnumeratorKind::Native => match NativeEnumerator::new() {
            Ok(native) => Arc::new(native),
            Err(e) => {
                log::warn!("Native enumerator unavailable ({}), using portable enumerator", e);
                Arc::new(PortableEnumerator)
            }
        },
    }
}

/// Lists a directory without the cache or the event stream, fully hydrated.
///
/// Reference listing for the streaming path, and the CLI's `--snapshot` mode.
pub fn list_directory(
    enumerator: &dyn PathEnumerator,
    hydrator: &MetadataHydrator,
    dir: &Path,
    include_hidden: bool,
) -> Result<DirectorySnapshot, ListingError> {
    let mut entries = enumerator.enumerate(dir)?;
    if !include_hidden {
        entries.retain(|e| !e.is_hidden);
    }
    let mut entries = hydrator.hydrate_inline(entries);
    // OS hidden flags only show up once the entry is stat'ed.
    if !include_hidden {
        entries.retain(|e| !e.is_hidden);
    }
    Ok(DirectorySnapshot::from_entries(dir, entries))
}
