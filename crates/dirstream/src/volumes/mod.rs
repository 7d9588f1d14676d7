//! Mounted volumes and change notification.

pub mod listing;
pub mod watcher;

pub use listing::{SysinfoVolumeSource, Volume, VolumeSource};
pub use watcher::VolumeMonitor;
