//! In-memory configuration cache
//!
//! Settings and feature flags are held in immutable snapshots that the
//! client swaps atomically on reload.

pub mod entry;
pub mod features;

pub use entry::*;
pub use features::*;
