//! PID lock files
//!
//! A lock is a file holding the decimal PID of its owner. It is created
//! complete in one step (a temp file hard-linked into place), so a reader
//! never sees a half-written PID. A lock whose owner is no longer alive is
//! stale: it is reported and removed on the next acquisition attempt.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const CREATE_ATTEMPTS: usize = 3;
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("{} is held by process {pid}", path.display())]
    Held { path: PathBuf, pid: u32 },

    #[error("{} kept changing hands", path.display())]
    Contended { path: PathBuf },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An acquired lock; the file is removed on drop
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Take the lock at `path` without waiting.
    pub fn try_acquire(path: &Path) -> Result<Self, LockError> {
        for _ in 0..CREATE_ATTEMPTS {
            match create_with_pid(path) {
                Ok(()) => {
                    debug!(path = %path.display(), pid = std::process::id(), "lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(source) => {
                    return Err(LockError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }

            match read_holder(path) {
                Ok(Some(pid)) if is_process_running(pid) => {
                    return Err(LockError::Held {
                        path: path.to_path_buf(),
                        pid,
                    })
                }
                Ok(holder) => {
                    warn!(path = %path.display(), holder = ?holder, "removing stale lock");
                    remove_if_present(path).map_err(|source| LockError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
                }
                // Released between our create and read
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(LockError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }

        Err(LockError::Contended {
            path: path.to_path_buf(),
        })
    }

    /// Take the lock at `path`, retrying while a live holder keeps it, for at
    /// most `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let deadline = Instant::now() + timeout;
        loop {
            match Self::try_acquire(path) {
                Err(LockError::Held { .. }) | Err(LockError::Contended { .. })
                    if Instant::now() < deadline =>
                {
                    std::thread::sleep(RETRY_INTERVAL);
                }
                result => return result,
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(e) = remove_if_present(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

/// PID recorded in the lock at `path`, `None` when the content is unreadable
pub fn read_holder(path: &Path) -> io::Result<Option<u32>> {
    let content = fs::read_to_string(path)?;
    Ok(content.trim().parse().ok())
}

/// Whether a process with `pid` exists
pub fn is_process_running(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        // Signal 0 delivers nothing; EPERM means it exists under another user
        !matches!(kill(Pid::from_raw(raw), None), Err(Errno::ESRCH))
    }

    #[cfg(not(unix))]
    {
        false
    }
}

fn create_with_pid(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lock".to_string());
    let staged = dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));
    fs::write(&staged, std::process::id().to_string())?;

    // hard_link refuses an existing target, which makes the create exclusive
    let linked = fs::hard_link(&staged, path);
    let _ = fs::remove_file(&staged);
    linked
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_holds_pid_and_releases() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.pid");

        let lock = PidLock::try_acquire(&path).unwrap();
        assert_eq!(read_holder(&path).unwrap(), Some(std::process::id()));

        let err = PidLock::try_acquire(&path).unwrap_err();
        assert!(matches!(err, LockError::Held { pid, .. } if pid == std::process::id()));

        drop(lock);
        assert!(!path.exists());
        assert!(PidLock::try_acquire(&path).is_ok());
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.pid");
        // Beyond any real pid_max
        fs::write(&path, "2147483646").unwrap();

        let lock = PidLock::try_acquire(&path).unwrap();
        assert_eq!(read_holder(lock.path()).unwrap(), Some(std::process::id()));
    }

    #[test]
    fn test_garbage_lock_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.pid");
        fs::write(&path, "not a pid").unwrap();

        assert!(PidLock::try_acquire(&path).is_ok());
    }

    #[test]
    fn test_acquire_times_out_on_live_holder() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.pid");
        let _held = PidLock::try_acquire(&path).unwrap();

        let err = PidLock::acquire(&path, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, LockError::Held { .. }));
    }

    #[test]
    fn test_no_staging_files_left() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.pid");
        let _lock = PidLock::try_acquire(&path).unwrap();

        let names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["agent.pid".to_string()]);
    }
}
