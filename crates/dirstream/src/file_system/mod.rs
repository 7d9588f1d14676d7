//! File system access: path handling and directory listing.

pub mod listing;
pub mod validation;
