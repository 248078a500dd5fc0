//! rsync filter list format
//!
//! ```text
//! + /a/b/c.txt\r\n
//! + /a/b\r\n
//! + /a\r\n
//! - *\r\n
//! ```
//!
//! Include rules come first. The single trailing `- *` rule excludes everything
//! else and doubles as the completion marker: a filter file that does not end
//! with it was left behind by an aborted run.

use crate::Result;
use stage_core::{IoOp, StageError};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Line terminator used for every rule
pub const LINE_END: &str = "\r\n";

/// Catch-all exclude rule, always last
pub const EXCLUDE_ALL: &str = "- *\r\n";

/// Format an include rule for a normalized (no leading `/`) path
pub fn include_rule(path: &str) -> String {
    format!("+ /{}{}", path, LINE_END)
}

/// Single writer for one filter file
///
/// Creating the writer truncates the file. Nothing written is trusted until
/// [`FilterWriter::finish`] appends the exclude-all rule and syncs.
pub struct FilterWriter {
    path: PathBuf,
    out: BufWriter<File>,
    rules: usize,
}

impl FilterWriter {
    /// Open (create or truncate) the filter file
    pub async fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| StageError::io(IoOp::Truncate, path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            rules: 0,
        })
    }

    /// Append an include rule
    pub async fn include(&mut self, path: &str) -> Result<()> {
        self.out
            .write_all(include_rule(path).as_bytes())
            .await
            .map_err(|e| StageError::io(IoOp::Write, &self.path, e))?;
        self.rules += 1;
        Ok(())
    }

    /// Append the exclude-all rule and make the file durable
    ///
    /// Returns the number of include rules written.
    pub async fn finish(mut self) -> Result<usize> {
        self.out
            .write_all(EXCLUDE_ALL.as_bytes())
            .await
            .map_err(|e| StageError::io(IoOp::Write, &self.path, e))?;
        self.out
            .flush()
            .await
            .map_err(|e| StageError::io(IoOp::Write, &self.path, e))?;
        self.out
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| StageError::io(IoOp::Sync, &self.path, e))?;
        Ok(self.rules)
    }
}

/// Whether a filter file was written to completion
///
/// A missing file is reported as incomplete.
pub async fn is_complete(path: &Path) -> Result<bool> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StageError::io(IoOp::Read, path, e)),
    };

    let marker = EXCLUDE_ALL.as_bytes();
    if content == marker {
        return Ok(true);
    }
    let mut tail = LINE_END.as_bytes().to_vec();
    tail.extend_from_slice(marker);
    Ok(content.ends_with(&tail))
}
