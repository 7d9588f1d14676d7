//! Entry types and the classifier helpers that fill them in.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::Metadata;
use std::path::Path;
use std::sync::{LazyLock, RwLock};
use std::time::UNIX_EPOCH;

use crate::file_system::listing::sorting::split_and_sort;
use crate::file_system::validation::parent_path;
use crate::ignore_poison::IgnorePoisonRw;

/// Upper bound for each classifier cache. Reaching it clears the cache.
pub const MAX_CLASSIFIER_CACHE_ENTRIES: usize = 4096;

/// Estimated in-memory cost of one cached entry, in bytes.
pub const AVERAGE_ENTRY_BYTES: usize = 256;

/// Cache for raw extension → lowercase extension.
static EXTENSION_CACHE: LazyLock<RwLock<HashMap<String, String>>> = LazyLock::new(|| RwLock::new(HashMap::new()));
/// Cache for (is_dir, mode bits) → permission descriptor.
static PERMISSION_CACHE: LazyLock<RwLock<HashMap<(bool, u32), String>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// One filesystem child.
///
/// `size`, `mod_time` and `permissions` stay at their zero values until the entry is
/// hydrated. A hydrated entry always has a non-empty permission descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    /// Bytes. Always 0 for directories.
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mod_time: u64,
    pub permissions: String,
    /// Lowercase, without the dot. Empty for directories.
    pub extension: String,
    pub is_hidden: bool,
}

impl Entry {
    /// Builds an entry with only the fields a directory read gives us for free.
    pub fn minimal(dir: &Path, name: &str, is_dir: bool, is_hidden: bool) -> Self {
        Self {
            name: name.to_string(),
            path: dir.join(name).to_string_lossy().to_string(),
            is_dir,
            size: 0,
            mod_time: 0,
            permissions: String::new(),
            extension: extension_for(name, is_dir),
            is_hidden,
        }
    }

    /// Builds a fully populated entry from metadata already at hand.
    pub fn from_metadata(dir: &Path, name: &str, metadata: &Metadata) -> Self {
        let is_dir = metadata.is_dir();
        let is_hidden = is_hidden(name, Some(metadata));
        Self::minimal(dir, name, is_dir, is_hidden).hydrated_with(metadata)
    }

    /// Returns a copy with size, modification time and permissions filled in from
    /// `metadata`.
    pub fn hydrated_with(mut self, metadata: &Metadata) -> Self {
        self.size = if metadata.is_dir() { 0 } else { metadata.len() };
        self.mod_time = modified_secs(metadata);
        self.permissions = permission_string(metadata);
        self.is_hidden = self.is_hidden || is_hidden(&self.name, Some(metadata));
        self
    }

    pub fn is_hydrated(&self) -> bool {
        !self.permissions.is_empty()
    }
}

/// The response to one listing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySnapshot {
    pub path: String,
    /// Empty at the filesystem root.
    pub parent: String,
    pub directories: Vec<Entry>,
    pub files: Vec<Entry>,
    pub dir_count: usize,
    pub file_count: usize,
}

impl DirectorySnapshot {
    pub fn from_entries(path: &Path, entries: Vec<Entry>) -> Self {
        let (directories, files) = split_and_sort(entries);
        Self {
            path: path.to_string_lossy().to_string(),
            parent: parent_path(path),
            dir_count: directories.len(),
            file_count: files.len(),
            directories,
            files,
        }
    }

    /// Total number of entries (directories and files).
    pub fn len(&self) -> usize {
        self.dir_count + self.file_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Lowercase extension of `name`, or empty for directories, dotfiles like `.bashrc`
/// and names without a dot.
pub fn extension_for(name: &str, is_dir: bool) -> String {
    if is_dir {
        return String::new();
    }
    let Some(dot_pos) = name.rfind('.') else {
        return String::new();
    };
    if dot_pos == 0 || dot_pos == name.len() - 1 {
        return String::new();
    }
    let raw = &name[dot_pos + 1..];

    if let Some(ext) = EXTENSION_CACHE.read_ignore_poison().get(raw) {
        return ext.clone();
    }
    let ext = raw.to_lowercase();
    let mut cache = EXTENSION_CACHE.write_ignore_poison();
    if cache.len() >= MAX_CLASSIFIER_CACHE_ENTRIES {
        cache.clear();
    }
    cache.insert(raw.to_string(), ext.clone());
    ext
}

/// Whether an entry is hidden: dot-prefixed names everywhere, plus the OS hidden flag
/// where the platform has one (`UF_HIDDEN` on macOS, `FILE_ATTRIBUTE_HIDDEN` on Windows).
pub fn is_hidden(name: &str, metadata: Option<&Metadata>) -> bool {
    if name.starts_with('.') {
        return true;
    }
    metadata.is_some_and(has_hidden_attribute)
}

#[cfg(target_os = "macos")]
fn has_hidden_attribute(metadata: &Metadata) -> bool {
    use std::os::macos::fs::MetadataExt;
    const UF_HIDDEN: u32 = 0x0000_8000;
    metadata.st_flags() & UF_HIDDEN != 0
}

#[cfg(windows)]
fn has_hidden_attribute(metadata: &Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

#[cfg(not(any(target_os = "macos", windows)))]
fn has_hidden_attribute(_metadata: &Metadata) -> bool {
    false
}

/// Modification time in whole seconds since the Unix epoch, or 0 if unavailable.
pub fn modified_secs(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Short permission descriptor, `ls`-style (`drwxr-xr-x`, `-rw-r--r--`).
pub fn permission_string(metadata: &Metadata) -> String {
    let is_dir = metadata.is_dir();
    let mode = mode_bits(metadata);

    if let Some(s) = PERMISSION_CACHE.read_ignore_poison().get(&(is_dir, mode)) {
        return s.clone();
    }
    let s = format_mode(is_dir, mode);
    let mut cache = PERMISSION_CACHE.write_ignore_poison();
    if cache.len() >= MAX_CLASSIFIER_CACHE_ENTRIES {
        cache.clear();
    }
    cache.insert((is_dir, mode), s.clone());
    s
}

#[cfg(unix)]
fn mode_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn mode_bits(metadata: &Metadata) -> u32 {
    // Without POSIX modes the best we know is whether the entry is writable.
    if metadata.permissions().readonly() { 0o444 } else { 0o666 }
}

/// Renders the low nine mode bits, prefixed with `d` for directories.
pub fn format_mode(is_dir: bool, mode: u32) -> String {
    const FLAGS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    let mut s = String::with_capacity(10);
    s.push(if is_dir { 'd' } else { '-' });
    for (bit, ch) in FLAGS {
        s.push(if mode & bit != 0 { ch } else { '-' });
    }
    s
}

/// Clears the classifier caches. Called from the periodic sweep.
pub fn clear_classifier_caches() {
    EXTENSION_CACHE.write_ignore_poison().clear();
    PERMISSION_CACHE.write_ignore_poison().clear();
}
