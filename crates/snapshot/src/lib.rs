//! Snapshot lifecycle management
//!
//! This crate provides:
//! - The `Snapshot` model and its age
//! - The `SnapshotProvider` seam (list / create / delete) and a provider that
//!   shells out to configured commands
//! - `SnapshotManager`: freshest-snapshot selection, creation when nothing
//!   qualifies, and cleanup restricted to snapshots this tool created

pub mod manager;
pub mod model;
pub mod provider;

// Re-exports
pub use manager::{freshest, CleanupReport, Origin, Selection, SnapshotManager};
pub use model::{Creation, Snapshot};
pub use provider::{CommandProvider, CommandProviderConfig, SnapshotProvider};

/// Result type for snapshot operations
pub type Result<T> = stage_core::Result<T>;
