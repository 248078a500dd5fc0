//! Error types shared across the staging pipeline
//!
//! A missing queue file and a malformed journal line are outcomes, not errors:
//! they are reported through the pipeline's result types and logged at `info`.

use crate::volume::VolumeId;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// File operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Open,
    Read,
    Append,
    Clear,
    Truncate,
    Write,
    Sync,
    Rename,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoOp::Open => "open",
            IoOp::Read => "read",
            IoOp::Append => "append",
            IoOp::Clear => "clear",
            IoOp::Truncate => "truncate",
            IoOp::Write => "write",
            IoOp::Sync => "sync",
            IoOp::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// Snapshot provider call that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOp {
    List,
    Create,
    Delete,
}

impl fmt::Display for ProviderOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderOp::List => "list",
            ProviderOp::Create => "create",
            ProviderOp::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Per-volume stage a failure was captured in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Drain + closure build
    Pipeline,
    /// Snapshot selection or creation
    Snapshot,
    /// Post-backup snapshot deletion
    Cleanup,
    /// Log cycling
    Logs,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pipeline => "pipeline",
            Stage::Snapshot => "snapshot",
            Stage::Cleanup => "cleanup",
            Stage::Logs => "logs",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while staging a backup cycle
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{op} failed for {}: {source}", .path.display())]
    Io {
        op: IoOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot provider {op} failed for volume {volume}: {reason}")]
    Provider {
        volume: VolumeId,
        op: ProviderOp,
        reason: String,
    },

    #[error("snapshot provider {op} for volume {volume} timed out after {}s", .timeout.as_secs())]
    ProviderTimeout {
        volume: VolumeId,
        op: ProviderOp,
        timeout: Duration,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("volume task did not complete: {0}")]
    TaskAborted(String),

    #[error("{} volume operation(s) failed: {}", .0.len(), summarize(.0))]
    Aggregate(Vec<VolumeFailure>),
}

impl StageError {
    /// Build an I/O error with the operation and file it happened on
    pub fn io(op: IoOp, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StageError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// True for enumerate/create/delete failures, including timeouts
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            StageError::Provider { .. } | StageError::ProviderTimeout { .. }
        )
    }
}

/// A failure captured for one volume after all volumes were attempted
#[derive(Debug)]
pub struct VolumeFailure {
    pub volume: VolumeId,
    pub stage: Stage,
    pub error: Box<StageError>,
}

impl VolumeFailure {
    pub fn new(volume: VolumeId, stage: Stage, error: StageError) -> Self {
        Self {
            volume,
            stage,
            error: Box::new(error),
        }
    }
}

impl fmt::Display for VolumeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}] {}", self.volume, self.stage, self.error)
    }
}

fn summarize(failures: &[VolumeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for staging operations
pub type Result<T> = std::result::Result<T, StageError>;
