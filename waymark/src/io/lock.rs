//! Single-writer lock over a project directory.
//!
//! The lock file holds `pid\ntimestamp`. A stale lock (owner no longer
//! running) is never removed automatically: auto-removal could race a
//! genuinely slow-starting process, so the user must delete it by hand.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use tracing::debug;

pub const LOCK_FILE_NAME: &str = ".lock";

/// A held project lock. Removed on drop (clean shutdown path).
#[derive(Debug)]
pub struct ProjectLock {
    path: PathBuf,
}

impl ProjectLock {
    /// Acquire the lock for `project_dir`.
    ///
    /// Refuses with "in use" when the owning process is alive, and with
    /// "stale lock" when it is not.
    pub fn acquire(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(LOCK_FILE_NAME);

        if path.exists() {
            let owner = read_owner(&path)?;
            if process_alive(owner.pid) {
                bail!(
                    "project is in use by process {} (since {})",
                    owner.pid,
                    owner.timestamp
                );
            }
            bail!(
                "stale lock at {} (owner process {} is gone); manual removal required",
                path.display(),
                owner.pid
            );
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("create lock {}", path.display()))?;
        let contents = format!("{}\n{}\n", std::process::id(), Utc::now().to_rfc3339());
        file.write_all(contents.as_bytes())
            .with_context(|| format!("write lock {}", path.display()))?;
        debug!(path = %path.display(), "lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file. Called automatically on drop; exposed for
    /// explicit release on shutdown paths that want the error.
    pub fn release(self) -> Result<()> {
        let path = self.path.clone();
        std::mem::forget(self);
        fs::remove_file(&path).with_context(|| format!("remove lock {}", path.display()))
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

struct LockOwner {
    pid: u32,
    timestamp: String,
}

fn read_owner(path: &Path) -> Result<LockOwner> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read lock {}", path.display()))?;
    let mut lines = contents.lines();
    let pid = lines
        .next()
        .and_then(|line| line.trim().parse::<u32>().ok())
        .ok_or_else(|| anyhow!("malformed lock file {} (expected pid on first line)", path.display()))?;
    let timestamp = lines.next().unwrap_or("unknown time").trim().to_string();
    Ok(LockOwner { pid, timestamp })
}

/// Whether a process with `pid` is currently running.
#[cfg(unix)]
#[allow(unsafe_code)]
fn process_alive(pid: u32) -> bool {
    // kill(pid, 0) probes existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No reliable probe on this platform; err on the side of "in use".
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_pid_and_timestamp() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = ProjectLock::acquire(temp.path()).expect("acquire");
        let contents = fs::read_to_string(lock.path()).expect("read");
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().expect("pid line"),
            std::process::id().to_string()
        );
        assert!(lines.next().expect("timestamp line").contains('T'));
    }

    #[test]
    fn second_acquire_is_refused_while_owner_alive() {
        let temp = tempfile::tempdir().expect("tempdir");
        // Our own pid is alive by definition.
        let _lock = ProjectLock::acquire(temp.path()).expect("acquire");
        let err = ProjectLock::acquire(temp.path()).unwrap_err();
        assert!(err.to_string().contains("in use"));
    }

    #[test]
    fn dead_owner_reports_stale_lock_without_removal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(LOCK_FILE_NAME);
        // A reaped child's pid is no longer running.
        let dead_pid = {
            let mut handle = std::process::Command::new("true").spawn().expect("spawn");
            let pid = handle.id();
            handle.wait().expect("wait");
            pid
        };
        fs::write(&path, format!("{dead_pid}\n2026-01-01T00:00:00Z\n")).expect("write");
        let err = ProjectLock::acquire(temp.path()).unwrap_err();
        assert!(err.to_string().contains("stale lock"));
        assert!(err.to_string().contains("manual removal"));
        assert!(path.exists(), "stale lock must never be auto-removed");
    }

    #[test]
    fn drop_removes_lock() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = {
            let lock = ProjectLock::acquire(temp.path()).expect("acquire");
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn release_removes_lock_and_reports_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = ProjectLock::acquire(temp.path()).expect("acquire");
        let path = lock.path().to_path_buf();
        lock.release().expect("release");
        assert!(!path.exists());
    }
}
