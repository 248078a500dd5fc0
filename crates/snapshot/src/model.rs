//! Snapshot data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stage_core::{SnapshotId, VolumeId};
use std::time::Duration;

/// A read-only point-in-time view of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Provider-assigned ID
    pub id: SnapshotId,
    /// Volume the snapshot was taken of
    pub volume: VolumeId,
    /// When the provider created it
    pub created_at: DateTime<Utc>,
    /// Device path the snapshot is mounted or exposed at
    pub device_path: String,
}

impl Snapshot {
    /// Age relative to `now`; a creation time in the future counts as zero
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Outcome of asking a provider to create a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Creation {
    Created(Snapshot),
    Failed { reason: String },
}
