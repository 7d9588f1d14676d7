//! Consumer-side navigation state.

pub mod client;

pub use client::{NavigationClient, NavigationStats, Navigator};
