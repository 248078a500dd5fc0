//! Normal staging run

use anyhow::Result;
use cli_lib::BackupType;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(config: Option<&Path>, backup_type: BackupType) -> Result<()> {
    let settings = super::load_settings(config)?;
    let orchestrator = super::orchestrator(settings);

    let report = orchestrator.run(backup_type).await?;

    for volume in &report.volumes {
        let snapshot = match &volume.selection {
            Some(selection) => selection.snapshot.id.to_string().cyan().to_string(),
            None => "none".red().to_string(),
        };
        let filter = match &volume.closure {
            Some(closure) => format!("{} rules", closure.rules_written),
            None => "incomplete".yellow().to_string(),
        };
        println!(
            "{:<12} snapshot {}  filter {}  drained {}",
            volume.volume.to_string().bold(),
            snapshot,
            filter,
            volume.drained.as_ref().map_or(0, |d| d.lines())
        );
    }
    println!("{} rsyncd module(s) written", report.modules);

    if !report.failures.is_empty() {
        eprintln!("{}", "Some volumes failed:".red().bold());
        for failure in &report.failures {
            eprintln!("  {}", failure);
        }
    }

    report.into_result()?;
    Ok(())
}
