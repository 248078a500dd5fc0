//! Closure builder: intermediate queue -> rsync filter list
//!
//! rsync only descends into a directory if the directory itself is included,
//! so every changed path is emitted together with all of its ancestors.
//! Each path is emitted at most once per run.

use crate::filter::FilterWriter;
use crate::queue;
use crate::Result;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use stage_core::{ancestors, normalize_entry, EntryError};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// When the intermediate queue is cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueRetention {
    /// Cleared once the filter built from it is complete and synced
    #[default]
    ClearAfterBuild,
    /// Kept (and re-consolidated every run) until a backup reports success
    KeepUntilBackupSucceeds,
}

/// Set of normalized paths with every ancestor of every member also present
#[derive(Debug, Default, Clone)]
pub struct PathClosureSet {
    paths: AHashSet<String>,
}

impl PathClosureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path and its missing ancestors
    ///
    /// Returns the newly added paths in emission order: the path itself, then
    /// ancestors nearest first. The walk stops at the first ancestor already
    /// present, since its own ancestors are present too.
    pub fn insert_with_ancestors(&mut self, path: &str) -> Vec<String> {
        if self.paths.contains(path) {
            return Vec::new();
        }

        let mut added = vec![path.to_string()];
        self.paths.insert(path.to_string());

        for ancestor in ancestors(path) {
            if !self.paths.insert(ancestor.to_string()) {
                break;
            }
            added.push(ancestor.to_string());
        }

        added
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Result of one closure build
#[derive(Debug, Default)]
pub struct ClosureOutcome {
    /// Every path included by the filter
    pub closure: PathClosureSet,
    /// Include rules written (equals `closure.len()`)
    pub rules_written: usize,
    /// Lines read from the intermediate queue
    pub source_lines: usize,
    /// Lines dropped as malformed
    pub dropped: usize,
    /// Whether the intermediate queue was cleared afterwards
    pub queue_cleared: bool,
}

/// Consolidate `intermediate` into the filter list at `output`
///
/// The filter is always rewritten from scratch. A missing intermediate queue
/// yields a filter containing only the exclude-all rule. The intermediate
/// queue is cleared (under [`QueueRetention::ClearAfterBuild`]) only after the
/// filter, completion marker included, has been synced. An I/O failure leaves
/// the filter without its marker.
pub async fn build_closure(
    intermediate: &Path,
    output: &Path,
    retention: QueueRetention,
) -> Result<ClosureOutcome> {
    build_closure_with(intermediate, output, retention, |path| async move {
        queue::clear(&path).await
    })
    .await
}

async fn build_closure_with<C, F>(
    intermediate: &Path,
    output: &Path,
    retention: QueueRetention,
    clear_queue: C,
) -> Result<ClosureOutcome>
where
    C: FnOnce(PathBuf) -> F,
    F: Future<Output = Result<bool>>,
{
    let lines = match queue::read_lines(intermediate).await? {
        Some(lines) => lines,
        None => {
            info!(
                path = %intermediate.display(),
                "No intermediate queue, writing exclude-all filter"
            );
            FilterWriter::create(output).await?.finish().await?;
            return Ok(ClosureOutcome::default());
        }
    };

    let mut writer = FilterWriter::create(output).await?;
    let mut outcome = ClosureOutcome {
        source_lines: lines.len(),
        ..ClosureOutcome::default()
    };

    for line in &lines {
        let path = match normalize_entry(line) {
            Ok(path) => path,
            Err(EntryError::Blank) if line.is_empty() => continue,
            Err(reason) => {
                info!(
                    path = %intermediate.display(),
                    line = %line.escape_debug(),
                    %reason,
                    "Dropping malformed journal entry"
                );
                outcome.dropped += 1;
                continue;
            }
        };

        for added in outcome.closure.insert_with_ancestors(&path) {
            writer.include(&added).await?;
        }
    }

    outcome.rules_written = writer.finish().await?;

    if retention == QueueRetention::ClearAfterBuild {
        outcome.queue_cleared = match clear_queue(intermediate.to_path_buf()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    path = %intermediate.display(),
                    error = %e,
                    "Failed to clear intermediate queue; entries will be consolidated again"
                );
                false
            }
        };
    }

    debug!(
        output = %output.display(),
        rules = outcome.rules_written,
        dropped = outcome.dropped,
        "Filter list complete"
    );

    Ok(outcome)
}
