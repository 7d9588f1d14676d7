//! Error taxonomy for directory listing.

use std::io;

/// Error type for listing operations.
///
/// `NotFound`, `NotADirectory`, `AccessDenied` and `EnumerationFailed` end a request and
/// reach the consumer verbatim as an error event. `PartialHydrationFailure` is per-entry
/// and only ever logged. `Unsupported` is raised by an enumerator that can't run on this
/// host and makes the caller fall back to the portable one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingError {
    /// Path does not exist
    NotFound(String),
    /// Path exists but is not a directory
    NotADirectory(String),
    /// Permission denied
    AccessDenied(String),
    /// Generic OS failure while reading the directory
    EnumerationFailed(String),
    /// Stat failed for one entry during hydration
    PartialHydrationFailure { path: String, message: String },
    /// Enumerator not available on this platform
    Unsupported(String),
    /// Invalid configuration value or file
    Config(String),
}

impl ListingError {
    /// Builds a listing error from an I/O error, attributing it to `path`.
    pub fn from_io(err: &io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => Self::AccessDenied(path.to_string()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path.to_string()),
            _ => Self::EnumerationFailed(format!("{}: {}", path, err)),
        }
    }

    /// Whether this error ends the request it occurred in.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PartialHydrationFailure { .. })
    }
}

impl std::fmt::Display for ListingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "Path not found: {}", path),
            Self::NotADirectory(path) => write!(f, "Not a directory: {}", path),
            Self::AccessDenied(path) => write!(f, "Permission denied: {}", path),
            Self::EnumerationFailed(msg) => write!(f, "Couldn't read directory: {}", msg),
            Self::PartialHydrationFailure { path, message } => {
                write!(f, "Couldn't read metadata for {}: {}", path, message)
            }
            Self::Unsupported(msg) => write!(f, "Not supported: {}", msg),
            Self::Config(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ListingError {}

impl From<io::Error> for ListingError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            io::ErrorKind::PermissionDenied => Self::AccessDenied(err.to_string()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(err.to_string()),
            _ => Self::EnumerationFailed(err.to_string()),
        }
    }
}
