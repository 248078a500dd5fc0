//! In-memory snapshot provider

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snapshot::{Creation, Snapshot, SnapshotProvider};
use stage_core::{ProviderOp, SnapshotId, StageError, VolumeId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Snapshot provider keeping its snapshots in memory
///
/// Individual volumes can be made to fail enumeration, creation or deletion.
#[derive(Default)]
pub struct FakeProvider {
    snapshots: Mutex<BTreeMap<VolumeId, Vec<Snapshot>>>,
    next_id: Mutex<u32>,
    fail_list: Mutex<BTreeSet<VolumeId>>,
    refuse_create: Mutex<BTreeSet<VolumeId>>,
    refuse_delete: Mutex<BTreeSet<VolumeId>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a snapshot that was not created by rsync-stage
    pub fn seed(&self, volume: &str, id: &str, created_at: DateTime<Utc>) {
        let volume = VolumeId::new(volume);
        self.snapshots
            .lock()
            .unwrap()
            .entry(volume.clone())
            .or_default()
            .push(Snapshot {
                id: SnapshotId::new(id),
                device_path: format!("/snap/{}", id),
                volume,
                created_at,
            });
    }

    pub fn ids(&self, volume: &str) -> Vec<String> {
        self.snapshots
            .lock()
            .unwrap()
            .get(&VolumeId::new(volume))
            .map(|snaps| snaps.iter().map(|s| s.id.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn fail_list(&self, volume: &str, fail: bool) {
        toggle(&self.fail_list, volume, fail);
    }

    pub fn refuse_create(&self, volume: &str, refuse: bool) {
        toggle(&self.refuse_create, volume, refuse);
    }

    pub fn refuse_delete(&self, volume: &str, refuse: bool) {
        toggle(&self.refuse_delete, volume, refuse);
    }
}

fn toggle(set: &Mutex<BTreeSet<VolumeId>>, volume: &str, on: bool) {
    let mut set = set.lock().unwrap();
    if on {
        set.insert(VolumeId::new(volume));
    } else {
        set.remove(&VolumeId::new(volume));
    }
}

#[async_trait]
impl SnapshotProvider for FakeProvider {
    async fn list(&self, volume: &VolumeId) -> snapshot::Result<Vec<Snapshot>> {
        if self.fail_list.lock().unwrap().contains(volume) {
            return Err(StageError::Provider {
                volume: volume.clone(),
                op: ProviderOp::List,
                reason: "snapshot service unavailable".to_string(),
            });
        }
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(volume)
            .cloned()
            .unwrap_or_default())
    }

    async fn create(&self, volume: &VolumeId) -> snapshot::Result<Creation> {
        if self.refuse_create.lock().unwrap().contains(volume) {
            return Ok(Creation::Failed {
                reason: "insufficient storage".to_string(),
            });
        }

        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("created-{}", *next)
        };
        let snapshot = Snapshot {
            id: SnapshotId::new(id.clone()),
            volume: volume.clone(),
            created_at: Utc::now(),
            device_path: format!(r"\\?\GLOBALROOT\Device\{}", id),
        };
        self.snapshots
            .lock()
            .unwrap()
            .entry(volume.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(Creation::Created(snapshot))
    }

    async fn delete(&self, volume: &VolumeId, id: &SnapshotId) -> snapshot::Result<bool> {
        if self.refuse_delete.lock().unwrap().contains(volume) {
            return Ok(false);
        }
        let mut snapshots = self.snapshots.lock().unwrap();
        let Some(snaps) = snapshots.get_mut(volume) else {
            return Ok(false);
        };
        let before = snaps.len();
        snaps.retain(|s| &s.id != id);
        Ok(snaps.len() < before)
    }
}
