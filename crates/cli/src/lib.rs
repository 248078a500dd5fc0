//! rsync-stage library surface
//!
//! Everything the `rsync-stage` binary does is reachable from here so the
//! full cycle can be driven from integration tests.

pub mod hooks;
pub mod locks;
pub mod logs;
pub mod records;
pub mod rsyncd;
pub mod runner;
pub mod settings;
pub mod util;

pub use runner::{BackupResult, BackupType, CleanupSummary, Orchestrator, RunReport};
pub use settings::Settings;
