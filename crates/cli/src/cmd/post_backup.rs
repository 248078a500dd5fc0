//! Post-backup snapshot cleanup

use anyhow::Result;
use cli_lib::BackupResult;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(config: Option<&Path>, result: BackupResult) -> Result<()> {
    let settings = super::load_settings(config)?;
    let orchestrator = super::orchestrator(settings);

    let summary = orchestrator.post_backup(result).await?;

    for volume in &summary.volumes {
        print!(
            "{:<12} deleted {}  gone {}  kept {}",
            volume.volume.to_string().bold(),
            volume.deleted.green(),
            volume.gone,
            if volume.kept > 0 {
                volume.kept.yellow().to_string()
            } else {
                volume.kept.to_string()
            }
        );
        if volume.queue_cleared {
            print!("  {}", "queue cleared".dimmed());
        }
        println!();
    }

    if !summary.failures.is_empty() {
        eprintln!("{}", "Cleanup incomplete:".red().bold());
        for failure in &summary.failures {
            eprintln!("  {}", failure);
        }
    }

    summary.into_result()?;
    Ok(())
}
