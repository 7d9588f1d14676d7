//! Directory listing: reading, hydration, caching, sorting, streaming.

pub mod caching;
pub mod error;
pub mod events;
pub mod hydration;
pub mod metadata;
pub mod reading;
pub mod sorting;
pub mod streaming;

pub use caching::{CacheConfig, CacheRecord, CacheStats, DirectoryCache, spawn_cache_sweeper};
pub use error::ListingError;
pub use events::{ChannelSink, JsonLinesSink, ListingEvent, MemorySink, RequestId, SessionEvent, Sink};
pub use hydration::{HydrationSummary, MetadataHydrator};
pub use metadata::{DirectorySnapshot, Entry};
pub use reading::{
    EnumeratorKind, NativeEnumerator, PathEnumerator, PortableEnumerator, list_directory, select_enumerator,
};
pub use streaming::{ListingState, RequestContext, StreamCoordinator, StreamCoordinatorBuilder};

#[cfg(test)]
mod streaming_test;
