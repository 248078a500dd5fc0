//! Journal drain: input queue -> intermediate queue
//!
//! Every line of the input queue is appended to the intermediate queue before
//! the next line is read. The input queue is cleared only after the
//! intermediate queue has been synced, so a crash at any point leaves each
//! entry in at least one of the two files. Entries may be delivered twice;
//! the closure builder deduplicates them.

use crate::queue::{self, strip_cr};
use crate::Result;
use stage_core::{IoOp, StageError};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Result of draining one input queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Input queue did not exist
    NothingNew,
    /// Lines were moved into the intermediate queue
    Drained {
        /// Lines appended to the intermediate queue
        lines: usize,
        /// Whether the input queue was truncated afterwards. When `false` the
        /// same lines will be drained again on the next run.
        input_cleared: bool,
    },
}

impl DrainOutcome {
    pub fn lines(&self) -> usize {
        match self {
            DrainOutcome::NothingNew => 0,
            DrainOutcome::Drained { lines, .. } => *lines,
        }
    }
}

/// Move all lines of `input` to the end of `intermediate`
///
/// Lines are copied verbatim, without deduplication. Empty lines are skipped.
/// A read or append failure leaves `input` untouched for a retry. A failure to
/// clear `input` is logged and reported through
/// `input_cleared`.
pub async fn drain(input: &Path, intermediate: &Path) -> Result<DrainOutcome> {
    drain_with(input, intermediate, || {}, |path| async move { queue::clear(&path).await }).await
}

/// [`drain`] with the end-of-input hook and the input clear supplied
///
/// `at_eof` runs every time the reader reaches the current end of `input`,
/// before the length re-check.
async fn drain_with<E, C, F>(
    input: &Path,
    intermediate: &Path,
    mut at_eof: E,
    clear_input: C,
) -> Result<DrainOutcome>
where
    E: FnMut(),
    C: FnOnce(PathBuf) -> F,
    F: Future<Output = Result<bool>>,
{
    let file = match File::open(input).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %input.display(), "No journal queue, nothing new");
            return Ok(DrainOutcome::NothingNew);
        }
        Err(e) => return Err(StageError::io(IoOp::Open, input, e)),
    };

    let mut reader = BufReader::new(file);
    let mut sink: Option<File> = None;
    let mut buf = Vec::new();
    let mut consumed: u64 = 0;
    let mut lines = 0usize;
    let mut rechecked = false;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| StageError::io(IoOp::Read, input, e))?;

        if n == 0 {
            at_eof();
            // The producer may have appended since EOF was hit; keep going
            // until the file length matches what was consumed.
            let len = reader
                .get_ref()
                .metadata()
                .await
                .map_err(|e| StageError::io(IoOp::Read, input, e))?
                .len();
            if len > consumed && !rechecked {
                debug!(path = %input.display(), "Journal queue grew while draining");
                rechecked = true;
                continue;
            }
            break;
        }
        consumed += n as u64;
        rechecked = false;

        let line = strip_cr(buf.strip_suffix(b"\n").unwrap_or(buf.as_slice()));
        if line.is_empty() {
            continue;
        }

        if sink.is_none() {
            sink = Some(open_append(intermediate).await?);
        }
        if let Some(out) = sink.as_mut() {
            append_line(out, intermediate, line).await?;
        }
        lines += 1;
    }

    if let Some(out) = sink {
        out.sync_all()
            .await
            .map_err(|e| StageError::io(IoOp::Sync, intermediate, e))?;
    }

    let input_cleared = match clear_input(input.to_path_buf()).await {
        Ok(_) => true,
        Err(e) => {
            warn!(
                path = %input.display(),
                error = %e,
                "Failed to clear journal queue; entries are safe and will be drained again"
            );
            false
        }
    };

    info!(
        input = %input.display(),
        intermediate = %intermediate.display(),
        lines,
        "Drained journal queue"
    );

    Ok(DrainOutcome::Drained { lines, input_cleared })
}

async fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| StageError::io(IoOp::Open, path, e))
}

async fn append_line(out: &mut File, path: &Path, line: &[u8]) -> Result<()> {
    let mut record = Vec::with_capacity(line.len() + 2);
    record.extend_from_slice(line);
    record.extend_from_slice(b"\r\n");

    out.write_all(&record)
        .await
        .map_err(|e| StageError::io(IoOp::Append, path, e))?;
    // tokio completes file writes in the background; wait for this one
    out.flush()
        .await
        .map_err(|e| StageError::io(IoOp::Append, path, e))
}
