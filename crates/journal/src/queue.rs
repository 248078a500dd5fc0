//! Queue file helpers
//!
//! Queue files are plain text, one path per line, LF or CRLF terminated.
//! They are cleared by truncation rather than removal so a producer holding
//! the file open keeps appending to the same inode.

use crate::Result;
use stage_core::{IoOp, StageError};
use std::path::Path;
use tokio::fs::OpenOptions;

/// Truncate a queue file to zero length
///
/// Returns `false` when the file does not exist.
pub async fn clear(path: &Path) -> Result<bool> {
    let file = match OpenOptions::new().write(true).open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StageError::io(IoOp::Clear, path, e)),
    };

    file.set_len(0)
        .await
        .map_err(|e| StageError::io(IoOp::Clear, path, e))?;
    file.sync_all()
        .await
        .map_err(|e| StageError::io(IoOp::Sync, path, e))?;
    Ok(true)
}

/// Read every line of a queue file, `None` if it does not exist
pub async fn read_lines(path: &Path) -> Result<Option<Vec<String>>> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StageError::io(IoOp::Read, path, e)),
    };

    Ok(Some(split_lines(&content)))
}

/// Number of non-empty lines in a queue file, `None` if it does not exist
pub async fn count_lines(path: &Path) -> Result<Option<usize>> {
    Ok(read_lines(path)
        .await?
        .map(|lines| lines.iter().filter(|l| !l.is_empty()).count()))
}

/// Split raw queue bytes into lines without their terminators
///
/// A trailing line without a terminator is kept. Invalid UTF-8 is replaced
/// rather than rejected; the closure builder decides what is usable.
pub(crate) fn split_lines(content: &[u8]) -> Vec<String> {
    let mut lines: Vec<String> = content
        .split(|&b| b == b'\n')
        .map(|raw| String::from_utf8_lossy(strip_cr(raw)).into_owned())
        .collect();

    // split() yields an empty tail after the final terminator
    if content.ends_with(b"\n") {
        lines.pop();
    }
    if content.is_empty() {
        lines.clear();
    }
    lines
}

pub(crate) fn strip_cr(raw: &[u8]) -> &[u8] {
    raw.strip_suffix(b"\r").unwrap_or(raw)
}
