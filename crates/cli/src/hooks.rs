//! User hook scripts run around snapshot and backup phases

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Named points in a cycle where hook scripts run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    PreSnapshot,
    PostSnapshot,
    PostBackup,
    PostBackupSuccess,
    PostBackupFailed,
}

impl Hook {
    pub fn name(&self) -> &'static str {
        match self {
            Hook::PreSnapshot => "pre-snapshot",
            Hook::PostSnapshot => "post-snapshot",
            Hook::PostBackup => "post-backup",
            Hook::PostBackupSuccess => "post-backup-success",
            Hook::PostBackupFailed => "post-backup-failed",
        }
    }
}

/// Runs scripts from the configured hook directory
#[derive(Debug, Clone)]
pub struct HookRunner {
    dir: Option<PathBuf>,
}

impl HookRunner {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Scripts for `hook`: regular files named `<hook>` or `<hook>.<anything>`,
    /// sorted by name
    pub fn scripts(&self, hook: Hook) -> Vec<PathBuf> {
        let Some(dir) = &self.dir else {
            return Vec::new();
        };

        let name = hook.name();
        let prefix = format!("{}.", name);

        let mut scripts: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let file_name = e.file_name().to_string_lossy();
                file_name == name || file_name.starts_with(&prefix)
            })
            .map(|e| e.into_path())
            .collect();
        scripts.sort();
        scripts
    }

    /// Run every script for `hook` in order; returns how many succeeded
    ///
    /// Failures are logged and never stop the cycle.
    pub async fn run(&self, hook: Hook) -> usize {
        let scripts = self.scripts(hook);
        if scripts.is_empty() {
            debug!(hook = hook.name(), "No hook scripts");
            return 0;
        }

        let mut succeeded = 0;
        for script in &scripts {
            if run_script(script, hook).await {
                succeeded += 1;
            }
        }
        succeeded
    }
}

async fn run_script(script: &Path, hook: Hook) -> bool {
    info!(hook = hook.name(), script = %script.display(), "Running hook script");

    match Command::new(script).kill_on_drop(true).status().await {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!(hook = hook.name(), script = %script.display(), %status, "Hook script failed");
            false
        }
        Err(e) => {
            warn!(hook = hook.name(), script = %script.display(), error = %e, "Failed to start hook script");
            false
        }
    }
}
