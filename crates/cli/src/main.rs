//! rsync-stage CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli_lib::{BackupResult, BackupType};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod cmd;

/// rsync-stage - snapshot and change-list staging for rsync backups
#[derive(Parser)]
#[command(name = "rsync-stage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: $RSYNC_STAGE_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain journals, build filter lists, pick snapshots and write rsyncd.conf
    Run {
        /// Backup type the following rsync pass performs
        #[arg(long = "type", value_enum, default_value = "incr")]
        backup_type: BackupType,
    },
    /// Delete snapshots created by the last run
    PostBackup {
        /// Result of the rsync pass
        #[arg(value_enum)]
        result: BackupResult,
    },
    /// Show pending journal entries, filter lists and recorded snapshots
    Status,
    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print an example configuration file
    Example,
    /// Print the config file path in use
    Path,
}

fn init_tracing(log_file: Option<&PathBuf>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return Ok(None);
    };

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", path.display(), e))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Held until exit so buffered log lines reach the file
    let _guard = init_tracing(cli.log_file.as_ref())?;

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run { backup_type } => cmd::run::run(config, backup_type).await,
        Commands::PostBackup { result } => cmd::post_backup::run(config, result).await,
        Commands::Status => cmd::status::run(config).await,
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Example => cmd::config::run_example(),
            ConfigCommands::Path => cmd::config::run_path(config),
        },
    }
}
