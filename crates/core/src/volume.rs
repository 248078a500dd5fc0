//! Volume identity and per-volume configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identifier of a volume, e.g. `C:` or `/dev/vg0/data`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(String);

impl VolumeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Provider-assigned identifier of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Everything the pipeline and snapshot manager need to know about one volume
///
/// Built once per invocation by the caller. The core never writes it back;
/// changes to `snapshots_created` are returned as values and persisted by the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeConfig {
    /// Volume this configuration belongs to
    pub id: VolumeId,
    /// Journal queue written by the change-tracking service
    pub input_queue: PathBuf,
    /// Durable queue holding drained but not yet consolidated entries
    pub intermediate_queue: PathBuf,
    /// Include/exclude filter list handed to rsync
    pub output_filter: PathBuf,
    /// Existing snapshots at least this old are not reused
    pub max_usable_snapshot_age: Duration,
    /// Snapshots created by this tool (and only those)
    pub snapshots_created: BTreeSet<SnapshotId>,
    /// Base path of the change-tracking service's logs
    pub log_to_file: Option<PathBuf>,
}

impl VolumeConfig {
    /// Create a config with the intermediate queue and filter derived from the
    /// input queue path
    ///
    /// `changes.in` yields `changes.queue` and `changes`. An input without an
    /// extension yields `<input>.queue` and `<input>.filter`.
    pub fn new(id: VolumeId, input_queue: impl Into<PathBuf>, max_usable_snapshot_age: Duration) -> Self {
        let input_queue = input_queue.into();
        let (intermediate_queue, output_filter) = derive_queue_paths(&input_queue);

        Self {
            id,
            input_queue,
            intermediate_queue,
            output_filter,
            max_usable_snapshot_age,
            snapshots_created: BTreeSet::new(),
            log_to_file: None,
        }
    }

    pub fn with_intermediate_queue(mut self, path: impl Into<PathBuf>) -> Self {
        self.intermediate_queue = path.into();
        self
    }

    pub fn with_output_filter(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_filter = path.into();
        self
    }

    pub fn with_log_to_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_to_file = Some(path.into());
        self
    }

    pub fn with_snapshots_created<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = SnapshotId>,
    {
        self.snapshots_created = ids.into_iter().collect();
        self
    }

    /// Whether this tool recorded creating the given snapshot
    pub fn created_snapshot(&self, id: &SnapshotId) -> bool {
        self.snapshots_created.contains(id)
    }
}

fn derive_queue_paths(input: &Path) -> (PathBuf, PathBuf) {
    if input.extension().is_some() {
        (input.with_extension("queue"), input.with_extension(""))
    } else {
        let mut queue = input.as_os_str().to_owned();
        queue.push(".queue");
        let mut filter = input.as_os_str().to_owned();
        filter.push(".filter");
        (PathBuf::from(queue), PathBuf::from(filter))
    }
}
