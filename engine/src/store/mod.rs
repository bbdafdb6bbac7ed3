//! Durable storage for the agent memory.
//!
//! The whole [`Memory`] aggregate lives in one JSON file and is always read
//! and written as a unit:
//! - `save` writes a uniquely named temp file in the same directory, syncs
//!   it and renames it over the target, so a crash never leaves a partial file
//! - `load` never fails; a missing file yields a fresh memory and a corrupt
//!   one is renamed to `<file>.corrupt-<timestamp>` before starting fresh
//! - `update` runs a load-modify-save sequence under an in-process mutex and
//!   a `<file>.lock` PID lock, so concurrent enqueues, stop requests and loop
//!   iterations never lose writes, even across processes
//!
//! Readers never take the lock: the rename makes every read observe either
//! the previous or the current snapshot.

pub mod lock;
mod memory;

pub use lock::{LockError, PidLock};
pub use memory::{LogEntry, Memory, Mode, State};

use chrono::Utc;
use sdk::errors::EngineError;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// How long a writer waits for another process to finish its update
const WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-file backed memory store
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Store {
    /// Create a store backed by `path`. Nothing is touched on disk until
    /// the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at the configured memory path
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.memory_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<memory file>.<suffix>`, next to the memory file
    pub fn sibling_path(&self, suffix: &str) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".");
        path.push(suffix);
        PathBuf::from(path)
    }

    /// Load the current memory, falling back to an empty one.
    pub fn load(&self) -> Memory {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no memory file yet, starting fresh");
                return Memory::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read memory file, using empty memory");
                return Memory::default();
            }
        };

        match serde_json::from_str::<Memory>(&contents) {
            Ok(memory) => memory,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "memory file is corrupt, reinitializing");
                self.quarantine();
                Memory::default()
            }
        }
    }

    /// Persist `memory`, replacing the previous snapshot atomically.
    pub fn save(&self, memory: &Memory) -> Result<()> {
        let _guard = self.lock()?;
        self.write_atomic(memory)
    }

    /// Load, apply `f`, and save while holding the write lock.
    ///
    /// Returns `f`'s result together with the saved memory. On a write
    /// failure nothing is persisted and the error is returned.
    pub fn update<R>(&self, f: impl FnOnce(&mut Memory) -> R) -> Result<(R, Memory)> {
        let _guard = self.lock()?;
        let mut memory = self.load();
        let result = f(&mut memory);
        self.write_atomic(&memory)?;
        Ok((result, memory))
    }

    fn lock(&self) -> Result<(MutexGuard<'_, ()>, PidLock)> {
        // The guarded section holds no data; a poisoned lock is still usable
        let guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let file_lock = PidLock::acquire(&self.sibling_path("lock"), WRITE_LOCK_TIMEOUT)
            .map_err(|e| EngineError::Persistence(format!("lock memory file: {}", e)))?;
        Ok((guard, file_lock))
    }

    fn write_atomic(&self, memory: &Memory) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| {
            EngineError::Persistence(format!("create directory {}: {}", dir.display(), e))
        })?;

        let mut buf = serde_json::to_string_pretty(memory)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        buf.push('\n');

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "memory".to_string());
        let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let written = File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(buf.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp_path, &self.path));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(EngineError::Persistence(format!(
                "replace {}: {}",
                self.path.display(),
                e
            )));
        }

        debug!(
            path = %self.path.display(),
            tasks = memory.tasks.len(),
            logs = memory.logs.len(),
            "memory saved"
        );
        Ok(())
    }

    /// Move an unreadable file aside so it can be inspected later.
    fn quarantine(&self) {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut target = self.path.clone().into_os_string();
        target.push(format!(".corrupt-{}", stamp));
        let target = PathBuf::from(target);

        match fs::rename(&self.path, &target) {
            Ok(()) => warn!(backup = %target.display(), "corrupt memory file preserved"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to preserve corrupt memory file"),
        }
    }
}
