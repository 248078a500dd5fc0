//! Run lock: one staging cycle at a time per state directory

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Exclusive `flock` on `<state_dir>/locks/run.lock`, held until dropped
///
/// The lock file itself is never removed. The kernel drops the `flock` when
/// the holder exits, so a file left behind by a dead run is simply locked
/// again by the next one.
pub struct RunLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

/// Lock file content
#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    pid: u32,
    started_at: u64,
}

impl RunLock {
    /// Acquire the run lock
    ///
    /// Fails if another process holds it. A failed `flock` always means a
    /// live holder; the holder's pid is only read for the error message and
    /// may be missing if that run has not written it yet.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        let lock_path = state_dir.join("locks/run.lock");

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create locks directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

        if !try_flock_exclusive(&file)? {
            match read_holder(&mut file) {
                Ok(h) => anyhow::bail!("Another rsync-stage run is in progress (pid {})", h.pid),
                Err(_) => anyhow::bail!("Another rsync-stage run is in progress"),
            }
        }

        write_holder(&mut file)?;

        Ok(Self {
            path: lock_path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_holder(file: &mut File) -> Result<()> {
    let holder = LockHolder {
        pid: std::process::id(),
        started_at: current_timestamp_ms(),
    };
    let serialized = serde_json::to_string(&holder).context("Failed to serialize lock content")?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn read_holder(file: &mut File) -> Result<LockHolder> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).context("Failed to deserialize lock content")
}

/// Try to acquire exclusive file lock (non-blocking)
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn try_flock_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}

fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp_dir = TempDir::new().unwrap();

        let lock1 = RunLock::acquire(temp_dir.path()).unwrap();

        let err = RunLock::acquire(temp_dir.path()).err().unwrap();
        assert!(err.to_string().contains(&std::process::id().to_string()));

        drop(lock1);
        assert!(RunLock::acquire(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_lock_file_kept_after_drop() {
        let temp_dir = TempDir::new().unwrap();

        let lock = RunLock::acquire(temp_dir.path()).unwrap();
        let lock_path = lock.path().to_path_buf();
        drop(lock);

        assert!(lock_path.exists());
        assert!(RunLock::acquire(temp_dir.path()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_held_flock_without_holder_content_blocks_acquire() {
        use nix::fcntl::{flock, FlockArg};
        use std::os::unix::io::AsRawFd;

        let temp_dir = TempDir::new().unwrap();
        let locks = temp_dir.path().join("locks");
        std::fs::create_dir_all(&locks).unwrap();
        let lock_path = locks.join("run.lock");

        // Another run that has locked the file but not yet written its pid
        let other = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .unwrap();
        flock(other.as_raw_fd(), FlockArg::LockExclusiveNonblock).unwrap();

        let err = RunLock::acquire(temp_dir.path()).err().unwrap();
        assert!(err.to_string().contains("in progress"));
        // The other run's lock file is left alone
        assert!(lock_path.exists());
        assert_eq!(std::fs::metadata(&lock_path).unwrap().len(), 0);

        drop(other);
        assert!(RunLock::acquire(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_holder_content() {
        let temp_dir = TempDir::new().unwrap();
        let lock_file = temp_dir.path().join("test.lock");

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_file)
            .unwrap();

        write_holder(&mut file).unwrap();
        let holder = read_holder(&mut file).unwrap();

        assert_eq!(holder.pid, std::process::id());
        assert!(holder.started_at > 0);
    }

    #[test]
    fn test_leftover_unlocked_file_is_reused() {
        let temp_dir = TempDir::new().unwrap();
        let locks = temp_dir.path().join("locks");
        std::fs::create_dir_all(&locks).unwrap();
        std::fs::write(locks.join("run.lock"), r#"{"pid":999999,"started_at":1}"#).unwrap();

        let lock = RunLock::acquire(temp_dir.path()).unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert!(content.contains(&std::process::id().to_string()));
        assert!(!content.contains("999999"));
    }
}
