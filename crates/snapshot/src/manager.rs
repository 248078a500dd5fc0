//! Snapshot selection, creation and cleanup
//!
//! Selection: the youngest existing snapshot under the volume's maximum usable
//! age wins; if none qualifies a new one is created. Cleanup: only snapshots
//! recorded in the volume's `snapshots_created` are ever deleted.
//!
//! The manager never writes the record itself. Newly created IDs and the
//! post-cleanup record are handed back to the caller to persist.

use crate::model::{Creation, Snapshot};
use crate::provider::SnapshotProvider;
use crate::Result;
use chrono::{DateTime, Utc};
use stage_core::{ProviderOp, SnapshotId, StageError, VolumeConfig, VolumeId};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How the selected snapshot came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Reused an existing snapshot
    Existing,
    /// Created by this run; must be recorded for cleanup
    Created,
}

/// The snapshot a volume will be backed up from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub snapshot: Snapshot,
    pub origin: Origin,
}

impl Selection {
    /// ID to add to the volume's `snapshots_created` record, if any
    pub fn newly_created(&self) -> Option<&SnapshotId> {
        match self.origin {
            Origin::Created => Some(&self.snapshot.id),
            Origin::Existing => None,
        }
    }
}

/// Result of cleaning up one volume
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Snapshots the provider deleted
    pub deleted: Vec<SnapshotId>,
    /// Recorded snapshots the provider no longer enumerates
    pub gone: Vec<SnapshotId>,
    /// Recorded snapshots whose deletion failed
    pub failed: Vec<(SnapshotId, StageError)>,
    /// What the volume's `snapshots_created` record should hold afterwards
    pub remaining: BTreeSet<SnapshotId>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pick the youngest snapshot strictly younger than `max_age`
///
/// Equal ages are broken by the smaller ID so the choice is deterministic.
pub fn freshest(snapshots: &[Snapshot], max_age: Duration, now: DateTime<Utc>) -> Option<&Snapshot> {
    snapshots
        .iter()
        .filter(|s| s.age(now) < max_age)
        .min_by(|a, b| a.age(now).cmp(&b.age(now)).then_with(|| a.id.cmp(&b.id)))
}

/// Keep only the snapshots of `volume`, logging any the provider mixed in
fn of_volume(listed: Vec<Snapshot>, volume: &VolumeId) -> Vec<Snapshot> {
    let (own, foreign): (Vec<_>, Vec<_>) = listed.into_iter().partition(|s| s.volume == *volume);
    for other in &foreign {
        warn!(
            volume = %volume,
            snapshot = %other.id,
            snapshot_volume = %other.volume,
            "Ignoring snapshot of another volume"
        );
    }
    own
}

/// Drives a [`SnapshotProvider`] for selection and cleanup
#[derive(Clone)]
pub struct SnapshotManager {
    provider: Arc<dyn SnapshotProvider>,
    timeout: Option<Duration>,
}

impl SnapshotManager {
    /// `timeout` bounds every provider call; `None` waits indefinitely
    pub fn new(provider: Arc<dyn SnapshotProvider>, timeout: Option<Duration>) -> Self {
        Self { provider, timeout }
    }

    /// Select (or create) the snapshot to back the volume up from
    pub async fn select(&self, volume: &VolumeConfig) -> Result<Selection> {
        self.select_at(volume, Utc::now()).await
    }

    /// [`SnapshotManager::select`] with an explicit clock
    pub async fn select_at(&self, volume: &VolumeConfig, now: DateTime<Utc>) -> Result<Selection> {
        let id = &volume.id;
        let listed = self
            .bounded(id, ProviderOp::List, self.provider.list(id))
            .await?;
        let snapshots = of_volume(listed, id);

        if let Some(snapshot) = freshest(&snapshots, volume.max_usable_snapshot_age, now) {
            info!(
                volume = %id,
                snapshot = %snapshot.id,
                age_secs = snapshot.age(now).as_secs(),
                "Using existing snapshot"
            );
            return Ok(Selection {
                snapshot: snapshot.clone(),
                origin: Origin::Existing,
            });
        }

        info!(
            volume = %id,
            existing = snapshots.len(),
            "No suitable existing snapshot, creating one"
        );

        match self
            .bounded(id, ProviderOp::Create, self.provider.create(id))
            .await?
        {
            Creation::Created(snapshot) => {
                info!(volume = %id, snapshot = %snapshot.id, "Created snapshot");
                Ok(Selection {
                    snapshot,
                    origin: Origin::Created,
                })
            }
            Creation::Failed { reason } => {
                error!(volume = %id, %reason, "Snapshot creation failed");
                Err(StageError::Provider {
                    volume: id.clone(),
                    op: ProviderOp::Create,
                    reason,
                })
            }
        }
    }

    /// Delete the snapshots this tool recorded creating for the volume
    ///
    /// Snapshots the provider enumerates but that are not in the record are
    /// left alone regardless of age. An enumeration failure fails the whole
    /// volume and leaves the record untouched; individual deletion failures
    /// are collected and their IDs stay recorded for the next cleanup.
    pub async fn cleanup(&self, volume: &VolumeConfig) -> Result<CleanupReport> {
        let id = &volume.id;
        let mut report = CleanupReport::default();

        if volume.snapshots_created.is_empty() {
            info!(volume = %id, "No recorded snapshots to clean up");
            return Ok(report);
        }

        let listed = self
            .bounded(id, ProviderOp::List, self.provider.list(id))
            .await?;
        let snapshots = of_volume(listed, id);
        let present: BTreeSet<&SnapshotId> = snapshots.iter().map(|s| &s.id).collect();

        for recorded in &volume.snapshots_created {
            if !present.contains(recorded) {
                info!(volume = %id, snapshot = %recorded, "Recorded snapshot no longer exists");
                report.gone.push(recorded.clone());
                continue;
            }

            let outcome = self
                .bounded(id, ProviderOp::Delete, self.provider.delete(id, recorded))
                .await;

            match outcome {
                Ok(true) => {
                    info!(volume = %id, snapshot = %recorded, "Deleted snapshot");
                    report.deleted.push(recorded.clone());
                }
                Ok(false) => {
                    warn!(volume = %id, snapshot = %recorded, "Provider declined to delete snapshot");
                    report.failed.push((
                        recorded.clone(),
                        StageError::Provider {
                            volume: id.clone(),
                            op: ProviderOp::Delete,
                            reason: format!("snapshot {} was not deleted", recorded),
                        },
                    ));
                    report.remaining.insert(recorded.clone());
                }
                Err(e) => {
                    error!(volume = %id, snapshot = %recorded, error = %e, "Snapshot deletion failed");
                    report.failed.push((recorded.clone(), e));
                    report.remaining.insert(recorded.clone());
                }
            }
        }

        Ok(report)
    }

    async fn bounded<T, F>(&self, volume: &VolumeId, op: ProviderOp, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                error!(volume = %volume, %op, timeout_secs = limit.as_secs(), "Snapshot provider timed out");
                StageError::ProviderTimeout {
                    volume: volume.clone(),
                    op,
                    timeout: limit,
                }
            })?,
            None => call.await,
        }
    }
}
