//! Show per-volume staging state

use anyhow::{Context, Result};
use cli_lib::records::SnapshotRecordStore;
use journal::{is_complete, queue};
use owo_colors::OwoColorize;
use std::path::Path;

fn line_count(count: Option<usize>) -> String {
    match count {
        Some(n) => n.to_string(),
        None => "absent".dimmed().to_string(),
    }
}

pub async fn run(config: Option<&Path>) -> Result<()> {
    let settings = super::load_settings(config)?;
    let records = SnapshotRecordStore::open(&settings.state_dir())
        .load_all()
        .context("Failed to load snapshot records")?;

    println!("{}", "Volume Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let volumes = settings.volume_configs(&records);
    if volumes.is_empty() {
        println!("{}", "No volumes configured".yellow());
        return Ok(());
    }

    for volume in &volumes {
        let pending = queue::count_lines(&volume.input_queue).await?;
        let intermediate = queue::count_lines(&volume.intermediate_queue).await?;
        let complete = is_complete(&volume.output_filter).await?;

        println!();
        println!("{}", volume.id.to_string().cyan().bold());
        println!("  Journal:       {}  ({})", line_count(pending), volume.input_queue.display());
        println!(
            "  Intermediate:  {}  ({})",
            line_count(intermediate),
            volume.intermediate_queue.display()
        );
        print!("  Filter list:   ");
        if complete {
            println!("{}", "complete ✓".green());
        } else {
            println!("{}", "incomplete or missing".yellow());
        }
        println!(
            "  Max age:       {}",
            cli_lib::util::format_duration(volume.max_usable_snapshot_age)
        );

        if volume.snapshots_created.is_empty() {
            println!("  Created:       {}", "none".dimmed());
        } else {
            println!("  Created:");
            for id in &volume.snapshots_created {
                println!("    {}", id.yellow());
            }
        }
    }

    Ok(())
}
