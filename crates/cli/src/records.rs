//! Persistent record of snapshots this tool created
//!
//! Only snapshots listed here are ever deleted by post-backup cleanup.

use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use stage_core::{IoOp, SnapshotId, StageError, VolumeId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

const RECORDS_FILE: &str = "snapshots-created.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordFile {
    #[serde(default)]
    volumes: BTreeMap<VolumeId, BTreeSet<SnapshotId>>,
}

/// JSON-backed `volume -> created snapshot IDs` map
pub struct SnapshotRecordStore {
    path: PathBuf,
}

impl SnapshotRecordStore {
    /// Store kept in `<state_dir>/snapshots-created.json`
    pub fn open(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(RECORDS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every volume's record; empty when nothing was recorded yet
    pub fn load_all(&self) -> stage_core::Result<BTreeMap<VolumeId, BTreeSet<SnapshotId>>> {
        Ok(self.read()?.volumes)
    }

    pub fn get(&self, volume: &VolumeId) -> stage_core::Result<BTreeSet<SnapshotId>> {
        Ok(self.read()?.volumes.remove(volume).unwrap_or_default())
    }

    /// Add `id` to the volume's record; returns false if it was already there
    pub fn record_created(&self, volume: &VolumeId, id: &SnapshotId) -> stage_core::Result<bool> {
        let mut file = self.read()?;
        let inserted = file
            .volumes
            .entry(volume.clone())
            .or_default()
            .insert(id.clone());
        if inserted {
            self.write(&file)?;
            debug!(volume = %volume, snapshot = %id, "Recorded created snapshot");
        }
        Ok(inserted)
    }

    /// Replace the volume's record; an empty set removes the volume
    pub fn set(&self, volume: &VolumeId, ids: BTreeSet<SnapshotId>) -> stage_core::Result<()> {
        let mut file = self.read()?;
        if ids.is_empty() {
            file.volumes.remove(volume);
        } else {
            file.volumes.insert(volume.clone(), ids);
        }
        self.write(&file)
    }

    fn read(&self) -> stage_core::Result<RecordFile> {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RecordFile::default()),
            Err(e) => return Err(StageError::io(IoOp::Read, &self.path, e)),
        };

        serde_json::from_slice(&contents).map_err(|e| {
            StageError::Config(format!(
                "corrupt snapshot record {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn write(&self, file: &RecordFile) -> stage_core::Result<()> {
        let serialized = serde_json::to_vec_pretty(file).map_err(|e| {
            StageError::Config(format!("failed to serialize snapshot record: {}", e))
        })?;
        atomic_write(&self.path, &serialized)
    }
}
