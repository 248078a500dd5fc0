//! Shared types for rsync-stage
//!
//! This crate provides:
//! - Volume identity and per-volume configuration
//! - Snapshot identifiers
//! - Canonical forward-slash path normalization for filter rules
//! - The error taxonomy shared by the pipeline and snapshot crates

pub mod error;
pub mod path;
pub mod volume;

// Re-exports
pub use error::{IoOp, ProviderOp, Result, Stage, StageError, VolumeFailure};
pub use path::{ancestors, normalize_entry, EntryError};
pub use volume::{SnapshotId, VolumeConfig, VolumeId};
