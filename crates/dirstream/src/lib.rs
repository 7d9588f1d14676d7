//! Streaming directory listing engine.
//!
//! A [`StreamCoordinator`] turns a path into an ordered stream of listing events: the
//! first page of entries as soon as the directory is read, the rest as their metadata
//! is hydrated on a small worker pool. Completed listings land in a bounded
//! [`DirectoryCache`] keyed by path and checked against the directory's modification
//! time. A [`NavigationClient`] consumes the stream on the UI side, and a
//! [`VolumeMonitor`] reports mount changes on the same sink.

// Warn on unused code to catch dead code early
#![warn(unused)]
// Warn on unused dependencies to catch platform-specific cfg mismatches
#![warn(unused_crate_dependencies)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

//noinspection RsUnusedImport
// Silence false positives for dev dependencies (used only in benches/, not lib)
#[cfg(test)]
use criterion as _;
//noinspection RsUnusedImport
// env_logger is only initialized by the binary
use env_logger as _;

pub mod config;
pub mod file_system;
mod ignore_poison;
pub mod navigation;
pub mod volumes;

pub use config::ListingConfig;
pub use file_system::listing::{
    CacheStats, DirectoryCache, DirectorySnapshot, Entry, ListingError, ListingEvent, RequestContext, SessionEvent,
    Sink, StreamCoordinator,
};
pub use navigation::{NavigationClient, NavigationStats};
pub use volumes::{Volume, VolumeMonitor};
