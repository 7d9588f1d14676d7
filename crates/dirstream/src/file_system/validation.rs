//! Path cleaning and validation for listing requests.
//!
//! Turns whatever the consumer sent into an absolute, lexically cleaned directory path,
//! and captures the directory fingerprint used by the listing cache.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::file_system::listing::ListingError;

/// Resolves the user's home directory. Used for empty and `~` request paths.
pub trait HomeDirResolver: Send + Sync {
    fn home_dir(&self) -> Option<PathBuf>;
}

/// Home directory resolution via the `dirs` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirsHomeResolver;

impl HomeDirResolver for DirsHomeResolver {
    fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}

/// Fixed home directory, for tests and embedders with their own notion of "home".
#[derive(Debug, Clone)]
pub struct FixedHomeResolver(pub PathBuf);

impl HomeDirResolver for FixedHomeResolver {
    fn home_dir(&self) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

/// Cheap comparable proxy for "has this directory changed": its modification time in
/// nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u128);

/// Lexically cleans a path: drops `.` components, resolves `..` against the preceding
/// component (never above the root) and strips trailing separators.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    let mut normal_depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => cleaned.push(prefix.as_os_str()),
            Component::RootDir => cleaned.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if normal_depth > 0 {
                    cleaned.pop();
                    normal_depth -= 1;
                } else if !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            Component::Normal(part) => {
                cleaned.push(part);
                normal_depth += 1;
            }
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// Resolves a raw request path to an absolute, cleaned path.
///
/// An empty path means the home directory. `~` and `~/...` expand against it, and
/// relative paths are taken relative to it.
pub fn resolve_request_path(raw: &str, home: &dyn HomeDirResolver) -> Result<PathBuf, ListingError> {
    let trimmed = raw.trim();
    let home_dir = || home.home_dir().ok_or_else(|| ListingError::NotFound("home directory".to_string()));

    let resolved = if trimmed.is_empty() || trimmed == "~" {
        home_dir()?
    } else if let Some(rest) = trimmed.strip_prefix("~/") {
        home_dir()?.join(rest)
    } else {
        let path = Path::new(trimmed);
        if path.is_absolute() { path.to_path_buf() } else { home_dir()?.join(path) }
    };
    Ok(clean_path(&resolved))
}

/// Parent of `path` as a string, or the empty-string sentinel at the filesystem root.
pub fn parent_path(path: &Path) -> String {
    path.parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Normalized cache key for a directory path.
pub fn cache_key(path: &Path) -> String {
    let key = clean_path(path).to_string_lossy().to_string();
    // NTFS is case-insensitive, so differently cased requests share one record.
    if cfg!(windows) { key.to_lowercase() } else { key }
}

/// Checks that `path` is an existing directory and returns its fingerprint.
pub fn directory_fingerprint(path: &Path) -> Result<Fingerprint, ListingError> {
    let display = path.to_string_lossy();
    let metadata = fs::metadata(path).map_err(|e| ListingError::from_io(&e, &display))?;
    if !metadata.is_dir() {
        return Err(ListingError::NotADirectory(display.to_string()));
    }
    let nanos = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok(Fingerprint(nanos))
}
