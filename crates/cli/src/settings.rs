//! Configuration file for rsync-stage
//!
//! One TOML file describes every volume plus the global knobs. It is loaded
//! once into an immutable [`Settings`] value and passed explicitly to every
//! component.

use anyhow::{Context, Result};
use journal::QueueRetention;
use serde::{Deserialize, Serialize};
use snapshot::CommandProviderConfig;
use stage_core::{SnapshotId, VolumeConfig, VolumeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the default config location
pub const CONFIG_ENV: &str = "RSYNC_STAGE_CONFIG";

const MAX_PARALLEL_VOLUMES: usize = 64;

/// Whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub settings: GlobalSettings,
    #[serde(default)]
    pub rsync: RsyncSettings,
    #[serde(default)]
    pub provider: CommandProviderConfig,
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeSettings>,

    /// Directory the file was loaded from, used to resolve relative paths
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// `[settings]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Snapshots older than this are never reused
    pub max_usable_snapshot_age_secs: u64,
    /// Directory holding pre/post hook scripts
    pub hook_scripts_dir: Option<PathBuf>,
    /// Upper bound for each snapshot provider call (0 = unbounded)
    pub provider_timeout_secs: u64,
    /// Volumes processed concurrently
    pub max_parallel_volumes: usize,
    /// Snapshot records and the run lock live here
    pub state_dir: Option<PathBuf>,
    pub queue_retention: QueueRetention,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            max_usable_snapshot_age_secs: 3600,
            hook_scripts_dir: None,
            provider_timeout_secs: 300,
            max_parallel_volumes: 4,
            state_dir: None,
            queue_retention: QueueRetention::default(),
        }
    }
}

/// `[rsync]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsyncSettings {
    pub conf_path: PathBuf,
    pub lock_path: String,
    pub log_path: String,
    pub max_connections: u32,
    pub module_prefix: String,
    /// argv run after rsyncd.conf has been rewritten
    pub restart_command: Vec<String>,
}

impl Default for RsyncSettings {
    fn default() -> Self {
        Self {
            conf_path: PathBuf::from(r"C:\cygwin\etc\rsyncd.conf"),
            lock_path: "/var/run/rsyncd.lock".to_string(),
            log_path: "/var/log/rsyncd.log".to_string(),
            max_connections: 2,
            module_prefix: "VSS".to_string(),
            restart_command: Vec::new(),
        }
    }
}

/// `[volumes."<id>"]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSettings {
    /// Journal queue written by the change-tracking service
    pub output_to_file: PathBuf,
    #[serde(default)]
    pub log_to_file: Option<PathBuf>,
    #[serde(default)]
    pub intermediate_queue: Option<PathBuf>,
    #[serde(default)]
    pub output_filter: Option<PathBuf>,
    #[serde(default)]
    pub max_usable_snapshot_age_secs: Option<u64>,
}

impl Settings {
    /// Load and validate the file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut settings = Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        Ok(settings)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(contents).context("Failed to parse TOML")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.settings.max_usable_snapshot_age_secs == 0 {
            anyhow::bail!("settings.max_usable_snapshot_age_secs must be greater than 0");
        }

        let parallel = self.settings.max_parallel_volumes;
        if !(1..=MAX_PARALLEL_VOLUMES).contains(&parallel) {
            anyhow::bail!(
                "settings.max_parallel_volumes must be between 1 and {} (got {})",
                MAX_PARALLEL_VOLUMES,
                parallel
            );
        }

        // Volumes never share queue files, otherwise parallel pipelines race
        let mut owners: HashMap<PathBuf, &str> = HashMap::new();
        for (id, volume) in &self.volumes {
            if volume.max_usable_snapshot_age_secs == Some(0) {
                anyhow::bail!("volumes.\"{}\".max_usable_snapshot_age_secs must be greater than 0", id);
            }

            let config = volume.to_config(id, Duration::from_secs(1));
            for path in [
                &config.input_queue,
                &config.intermediate_queue,
                &config.output_filter,
            ] {
                if let Some(other) = owners.insert(path.clone(), id) {
                    anyhow::bail!(
                        "{} is used by both volume \"{}\" and volume \"{}\"",
                        path.display(),
                        other,
                        id
                    );
                }
            }
        }

        Ok(())
    }

    /// Where snapshot records and the run lock are kept
    pub fn state_dir(&self) -> PathBuf {
        match (&self.settings.state_dir, &self.base_dir) {
            (Some(dir), Some(base)) => base.join(dir),
            (Some(dir), None) => dir.clone(),
            (None, Some(base)) => base.join("state"),
            (None, None) => PathBuf::from("state"),
        }
    }

    /// Provider call bound, `None` when disabled
    pub fn provider_timeout(&self) -> Option<Duration> {
        match self.settings.provider_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn hook_scripts_dir(&self) -> Option<PathBuf> {
        let dir = self.settings.hook_scripts_dir.as_ref()?;
        Some(match &self.base_dir {
            Some(base) => base.join(dir),
            None => dir.clone(),
        })
    }

    /// Per-volume configuration, with each volume's recorded snapshot IDs
    pub fn volume_configs(
        &self,
        records: &BTreeMap<VolumeId, BTreeSet<SnapshotId>>,
    ) -> Vec<VolumeConfig> {
        let default_age = Duration::from_secs(self.settings.max_usable_snapshot_age_secs);

        self.volumes
            .iter()
            .map(|(id, volume)| {
                let config = volume.to_config(id, default_age);
                match records.get(&config.id) {
                    Some(created) => config.with_snapshots_created(created.clone()),
                    None => config,
                }
            })
            .collect()
    }

    /// Commented example configuration
    pub fn example() -> &'static str {
        EXAMPLE
    }
}

impl VolumeSettings {
    fn to_config(&self, id: &str, default_age: Duration) -> VolumeConfig {
        let age = self
            .max_usable_snapshot_age_secs
            .map(Duration::from_secs)
            .unwrap_or(default_age);

        let mut config = VolumeConfig::new(VolumeId::new(id), self.output_to_file.clone(), age);
        if let Some(path) = &self.intermediate_queue {
            config = config.with_intermediate_queue(path.clone());
        }
        if let Some(path) = &self.output_filter {
            config = config.with_output_filter(path.clone());
        }
        if let Some(path) = &self.log_to_file {
            config = config.with_log_to_file(path.clone());
        }
        config
    }
}

/// Resolve the config file: `--config`, then `$RSYNC_STAGE_CONFIG`, then the
/// per-user config directory
pub fn config_file_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join("rsync-stage").join("config.toml"))
}

const EXAMPLE: &str = r#"# rsync-stage configuration

[settings]
# Existing snapshots younger than this are reused instead of creating one
max_usable_snapshot_age_secs = 3600
# Scripts named pre-snapshot*, post-snapshot*, post-backup* run from here
# hook_scripts_dir = "hooks"
# Bound on every snapshot provider call (0 = no bound)
provider_timeout_secs = 300
max_parallel_volumes = 4
# Defaults to "state" next to this file
# state_dir = "state"
# "clear-after-build" or "keep-until-backup-succeeds"
queue_retention = "clear-after-build"

[rsync]
conf_path = 'C:\cygwin\etc\rsyncd.conf'
lock_path = "/var/run/rsyncd.lock"
log_path = "/var/log/rsyncd.log"
max_connections = 2
module_prefix = "VSS"
# restart_command = ["cygrunsrv", "--stop", "rsyncd"]

[provider]
# Prints a JSON array: [{"id": "...", "created_at": "RFC 3339", "device_path": "..."}]
list = ["snapshot-tool", "list", "{volume}"]
# Prints the created snapshot as a JSON object; non-zero exit means refused
create = ["snapshot-tool", "create", "{volume}"]
# Exit status 0 means deleted
delete = ["snapshot-tool", "delete", "{volume}", "{id}"]

[volumes."C:"]
# Journal queue appended to by the change-tracking service.
# The filter list defaults to this path without its extension and the
# intermediate queue to this path with a .queue extension.
output_to_file = 'C:\rsync-stage\C.txt'
log_to_file = 'C:\rsync-stage\logs\C'
"#;
