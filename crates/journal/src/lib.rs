//! Change-list consolidation pipeline
//!
//! This crate provides:
//! - Journal drain (input queue -> durable intermediate queue)
//! - Closure builder (intermediate queue -> ancestor-closed rsync filter list)
//! - Filter file rule format and completion check
//! - Queue file helpers (clear, count)

pub mod closure;
pub mod drain;
pub mod filter;
pub mod queue;

// Re-exports
pub use closure::{build_closure, ClosureOutcome, PathClosureSet, QueueRetention};
pub use drain::{drain, DrainOutcome};
pub use filter::{is_complete, FilterWriter};

/// Result type for journal operations
pub type Result<T> = stage_core::Result<T>;
