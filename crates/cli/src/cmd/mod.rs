//! CLI command implementations

pub mod config;
pub mod post_backup;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use cli_lib::settings::{self, Settings};
use cli_lib::Orchestrator;
use snapshot::CommandProvider;
use std::path::Path;
use std::sync::Arc;

/// Load the config file the user pointed at (or the default one)
pub fn load_settings(config: Option<&Path>) -> Result<Arc<Settings>> {
    let path = settings::config_file_path(config)?;
    let settings = Settings::load(&path)
        .context("Failed to load configuration (see `rsync-stage config example`)")?;
    Ok(Arc::new(settings))
}

/// Orchestrator backed by the configured provider commands
pub fn orchestrator(settings: Arc<Settings>) -> Orchestrator {
    let provider = Arc::new(CommandProvider::new(settings.provider.clone()));
    Orchestrator::new(settings, provider)
}
