//! Per-volume log file rotation
//!
//! `x` becomes `x.1`, `x.1` becomes `x.2` and so on. Generations beyond
//! [`KEEP_GENERATIONS`] are deleted.

use stage_core::{IoOp, StageError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rotated copies kept per log file
pub const KEEP_GENERATIONS: usize = 5;

/// Suffixes appended to a volume's `log_to_file` base
const VOLUME_LOG_SUFFIXES: [&str; 3] = [".verbose.log", ".errors.log", ".log"];

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn generation(path: &Path, n: usize) -> PathBuf {
    with_suffix(path, &format!(".{}", n))
}

async fn exists(path: &Path) -> stage_core::Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| StageError::io(IoOp::Open, path, e))
}

/// Rotate `path`, keeping `keep` old generations
///
/// Returns false when `path` does not exist; nothing is touched then.
pub async fn cycle(path: &Path, keep: usize) -> stage_core::Result<bool> {
    if !exists(path).await? {
        return Ok(false);
    }

    if keep == 0 {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| StageError::io(IoOp::Clear, path, e))?;
        return Ok(true);
    }

    let oldest = generation(path, keep);
    if exists(&oldest).await? {
        tokio::fs::remove_file(&oldest)
            .await
            .map_err(|e| StageError::io(IoOp::Clear, &oldest, e))?;
    }

    for n in (1..keep).rev() {
        let from = generation(path, n);
        if exists(&from).await? {
            let to = generation(path, n + 1);
            tokio::fs::rename(&from, &to)
                .await
                .map_err(|e| StageError::io(IoOp::Rename, &from, e))?;
        }
    }

    let first = generation(path, 1);
    tokio::fs::rename(path, &first)
        .await
        .map_err(|e| StageError::io(IoOp::Rename, path, e))?;

    debug!(path = %path.display(), "Cycled log file");
    Ok(true)
}

/// Rotate the verbose, error and summary logs under `base`
///
/// Returns the number of files rotated.
pub async fn cycle_volume_logs(base: &Path) -> stage_core::Result<usize> {
    let mut cycled = 0;
    for suffix in VOLUME_LOG_SUFFIXES {
        if cycle(&with_suffix(base, suffix), KEEP_GENERATIONS).await? {
            cycled += 1;
        }
    }
    Ok(cycled)
}
