//! Configuration helpers

use anyhow::Result;
use cli_lib::settings::{self, Settings};
use owo_colors::OwoColorize;
use std::path::Path;

/// Print the example configuration
pub fn run_example() -> Result<()> {
    print!("{}", Settings::example());
    Ok(())
}

/// Print which config file would be used and whether it exists
pub fn run_path(config: Option<&Path>) -> Result<()> {
    let path = settings::config_file_path(config)?;
    if path.exists() {
        println!("{}", path.display());
    } else {
        println!("{} {}", path.display(), "(missing)".yellow());
    }
    Ok(())
}
