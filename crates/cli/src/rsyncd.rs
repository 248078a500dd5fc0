//! rsync daemon configuration
//!
//! One read-only module per volume, rooted at the selected snapshot. In
//! incremental mode each module reads its include rules from the volume's
//! filter list.

use crate::settings::RsyncSettings;
use crate::util::atomic_write;
use anyhow::{Context, Result};
use stage_core::VolumeId;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

const GLOBALROOT_PREFIX: &str = r"\\?\GLOBALROOT\";
const CYGWIN_GLOBALROOT: &str = "/proc/sys/";

/// One `[module]` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsyncModule {
    pub name: String,
    pub path: String,
    pub include_from: Option<PathBuf>,
}

impl RsyncModule {
    /// Module for `volume` exposing the snapshot at `device_path`
    pub fn new(prefix: &str, volume: &VolumeId, device_path: &str) -> Self {
        Self {
            name: module_name(prefix, volume),
            path: module_path(device_path),
            include_from: None,
        }
    }

    pub fn with_include_from(mut self, filter: impl Into<PathBuf>) -> Self {
        self.include_from = Some(filter.into());
        self
    }
}

/// Whole rsyncd.conf
#[derive(Debug, Clone)]
pub struct RsyncdConf {
    pub max_connections: u32,
    pub use_chroot: bool,
    pub log_file: String,
    pub lock_file: String,
    modules: Vec<RsyncModule>,
}

impl RsyncdConf {
    pub fn new(settings: &RsyncSettings) -> Self {
        Self {
            max_connections: settings.max_connections,
            use_chroot: false,
            log_file: settings.log_path.clone(),
            lock_file: settings.lock_path.clone(),
            modules: Vec::new(),
        }
    }

    pub fn add_module(&mut self, module: RsyncModule) {
        self.modules.push(module);
    }

    pub fn modules(&self) -> &[RsyncModule] {
        &self.modules
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail
        let _ = writeln!(out, "max connections = {}", self.max_connections);
        let _ = writeln!(out, "use chroot = {}", self.use_chroot);
        let _ = writeln!(out, "log file = {}", self.log_file);
        let _ = writeln!(out, "lock file = {}", self.lock_file);

        for module in &self.modules {
            let _ = writeln!(out);
            let _ = writeln!(out, "[{}]", module.name);
            let _ = writeln!(out, "\tpath = {}", module.path);
            let _ = writeln!(out, "\tread only = true");
            let _ = writeln!(out, "\tlist = false");
            if let Some(filter) = &module.include_from {
                let _ = writeln!(out, "\tinclude from = {}", filter.display());
            }
        }
        out
    }

    /// Atomically replace the config file at `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write(path, self.render().as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), modules = self.modules.len(), "Wrote rsyncd.conf");
        Ok(())
    }
}

/// `<prefix><volume without ':'>`, e.g. `VSSC` for `C:`
pub fn module_name(prefix: &str, volume: &VolumeId) -> String {
    format!("{}{}", prefix, volume.as_str().replace(':', ""))
}

/// Snapshot device path as rsync under cygwin needs it
///
/// `\\?\GLOBALROOT\` maps to `/proc/sys/`, separators become `/`, and `/\./`
/// is appended so rsync treats the device as a directory root.
pub fn module_path(device_path: &str) -> String {
    let path = match device_path.strip_prefix(GLOBALROOT_PREFIX) {
        Some(rest) => format!("{}{}", CYGWIN_GLOBALROOT, rest),
        None => device_path.to_string(),
    };
    let path = path.replace('\\', "/");
    format!("{}/\\./", path.trim_end_matches('/'))
}

/// Run the configured restart command, if any
pub async fn restart(argv: &[String]) -> Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };

    let status = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| format!("Failed to run rsyncd restart command {}", program))?;

    if !status.success() {
        warn!(program = %program, %status, "rsyncd restart command failed");
        anyhow::bail!("rsyncd restart command {} exited with {}", program, status);
    }
    info!(program = %program, "Restarted rsyncd");
    Ok(())
}
