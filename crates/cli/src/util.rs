//! Shared utilities for CLI commands

use stage_core::{IoOp, StageError};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Replace `path` with `content` so readers see either the old or the new file
///
/// The content is written to a sibling temp file, synced, then renamed over
/// the target.
pub fn atomic_write(path: &Path, content: &[u8]) -> stage_core::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| StageError::io(IoOp::Write, parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    let write_result = (|| -> stage_core::Result<()> {
        let mut file =
            fs::File::create(&temp_path).map_err(|e| StageError::io(IoOp::Open, &temp_path, e))?;
        file.write_all(content)
            .map_err(|e| StageError::io(IoOp::Write, &temp_path, e))?;
        file.sync_all()
            .map_err(|e| StageError::io(IoOp::Sync, &temp_path, e))
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StageError::io(IoOp::Rename, path, e)
    })
}

/// Format a duration as `1h 2m 3s`, dropping leading zero units
pub fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rsyncd.conf");
        std::fs::write(&path, "old").unwrap();

        atomic_write(&path, b"new").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_atomic_write_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/records.json");

        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_atomic_write_into_directory_target_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("inner"), "x").unwrap();

        let err = atomic_write(&path, b"data").unwrap_err();
        assert!(matches!(err, StageError::Io { op: IoOp::Rename, .. }));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
