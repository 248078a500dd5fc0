//! Snapshot provider seam
//!
//! The provider is the only component that talks to the platform's snapshot
//! service (VSS, LVM, ZFS, ...). Every call is scoped to one volume or one
//! snapshot and can fail independently.

use crate::model::{Creation, Snapshot};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stage_core::{ProviderOp, SnapshotId, StageError, VolumeId};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

/// Enumerates, creates and deletes snapshots
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// All snapshots currently present for the volume
    async fn list(&self, volume: &VolumeId) -> Result<Vec<Snapshot>>;

    /// Create a new snapshot of the volume
    ///
    /// A provider that ran but refused reports [`Creation::Failed`]; `Err` is
    /// reserved for failing to reach the provider at all.
    async fn create(&self, volume: &VolumeId) -> Result<Creation>;

    /// Delete a snapshot; `Ok(false)` when the provider did not delete it
    async fn delete(&self, volume: &VolumeId, id: &SnapshotId) -> Result<bool>;
}

/// Command lines for [`CommandProvider`]
///
/// Each entry is an argv. `{volume}` and `{id}` are substituted in every
/// argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandProviderConfig {
    /// Prints a JSON array of snapshots for `{volume}`
    #[serde(default)]
    pub list: Vec<String>,
    /// Prints the created snapshot as a JSON object; non-zero exit = refused
    #[serde(default)]
    pub create: Vec<String>,
    /// Deletes snapshot `{id}` of `{volume}`; exit status 0 = deleted
    #[serde(default)]
    pub delete: Vec<String>,
}

/// Snapshot record as printed by provider commands
#[derive(Debug, Deserialize)]
struct SnapshotRecord {
    id: String,
    #[serde(default)]
    volume: Option<String>,
    created_at: DateTime<Utc>,
    device_path: String,
}

impl SnapshotRecord {
    fn into_snapshot(self, volume: &VolumeId) -> Snapshot {
        Snapshot {
            id: SnapshotId::new(self.id),
            volume: self.volume.map(VolumeId::new).unwrap_or_else(|| volume.clone()),
            created_at: self.created_at,
            device_path: self.device_path,
        }
    }
}

/// Provider backed by external commands
pub struct CommandProvider {
    config: CommandProviderConfig,
}

impl CommandProvider {
    pub fn new(config: CommandProviderConfig) -> Self {
        Self { config }
    }

    async fn run(
        &self,
        argv: &[String],
        volume: &VolumeId,
        id: Option<&SnapshotId>,
        op: ProviderOp,
    ) -> Result<Output> {
        let provider_err = |reason: String| StageError::Provider {
            volume: volume.clone(),
            op,
            reason,
        };

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| provider_err(format!("no {} command configured", op)))?;

        let expand = |arg: &String| {
            let arg = arg.replace("{volume}", volume.as_str());
            match id {
                Some(id) => arg.replace("{id}", id.as_str()),
                None => arg,
            }
        };

        debug!(volume = %volume, %op, program = %program, "Running snapshot provider command");

        Command::new(expand(program))
            .args(args.iter().map(expand))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| provider_err(format!("failed to run {}: {}", program, e)))
    }
}

#[async_trait]
impl SnapshotProvider for CommandProvider {
    async fn list(&self, volume: &VolumeId) -> Result<Vec<Snapshot>> {
        let output = self.run(&self.config.list, volume, None, ProviderOp::List).await?;
        if !output.status.success() {
            return Err(StageError::Provider {
                volume: volume.clone(),
                op: ProviderOp::List,
                reason: failure_reason(&output),
            });
        }

        let records: Vec<SnapshotRecord> =
            serde_json::from_slice(&output.stdout).map_err(|e| StageError::Provider {
                volume: volume.clone(),
                op: ProviderOp::List,
                reason: format!("unparseable snapshot list: {}", e),
            })?;

        Ok(records
            .into_iter()
            .map(|r| r.into_snapshot(volume))
            .filter(|s| {
                let own = s.volume == *volume;
                if !own {
                    warn!(volume = %volume, snapshot = %s.id, snapshot_volume = %s.volume, "Provider listed a snapshot of another volume");
                }
                own
            })
            .collect())
    }

    async fn create(&self, volume: &VolumeId) -> Result<Creation> {
        let output = self
            .run(&self.config.create, volume, None, ProviderOp::Create)
            .await?;
        if !output.status.success() {
            return Ok(Creation::Failed {
                reason: failure_reason(&output),
            });
        }

        match serde_json::from_slice::<SnapshotRecord>(&output.stdout) {
            Ok(record) => Ok(Creation::Created(record.into_snapshot(volume))),
            Err(e) => Ok(Creation::Failed {
                reason: format!("provider did not report a snapshot: {}", e),
            }),
        }
    }

    async fn delete(&self, volume: &VolumeId, id: &SnapshotId) -> Result<bool> {
        let output = self
            .run(&self.config.delete, volume, Some(id), ProviderOp::Delete)
            .await?;
        if !output.status.success() {
            warn!(volume = %volume, snapshot = %id, reason = %failure_reason(&output), "Provider did not delete snapshot");
            return Ok(false);
        }
        Ok(true)
    }
}

fn failure_reason(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        format!("exited with {}: {}", output.status, stderr)
    }
}
