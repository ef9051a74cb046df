//! Cooperative file-scope locks over a shared filesystem.
//!
//! Each lock is a file under `locks/`, created with exclusive-create
//! semantics and reclaimed when stale (mtime older than a threshold)
//! rather than through OS advisory locks, which are unreliable on some of
//! the filesystems the target repository may live on.
//!
//! Lock file names encode the locked path with `/` replaced by `_`. The
//! encoding is not injective — `src/a.rs` and `src_a.rs` collide — which
//! matches the source behavior and is acceptable because colliding locks
//! only ever over-serialize, never under-serialize.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Staleness threshold applied when an acquire finds an existing lock.
const ACQUIRE_STALE: Duration = Duration::from_secs(30);
/// Poll interval while waiting for a lock to free up.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Hard ceiling on any single acquire wait.
const MAX_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct LockManager {
    lock_dir: PathBuf,
    /// Locks acquired by this process, by normalized path.
    held: Mutex<HashSet<String>>,
}

impl LockManager {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Result<Self> {
        let lock_dir = lock_dir.into();
        fs::create_dir_all(&lock_dir).context("Failed to create lock directory")?;
        Ok(Self {
            lock_dir,
            held: Mutex::new(HashSet::new()),
        })
    }

    /// Acquire a lock on `filepath` for `owner`, waiting up to `timeout`
    /// (clamped to 30 s). Returns whether the lock was acquired; a timeout
    /// is not an error — callers skip the conflicting work instead.
    pub async fn acquire(&self, filepath: &str, owner: &str, timeout: Duration) -> bool {
        let normalized = normalize_path(filepath);
        let lock_file = self.lock_path(&normalized);
        let deadline = SystemTime::now() + timeout.min(MAX_ACQUIRE_TIMEOUT);

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_file)
            {
                Ok(mut file) => {
                    let contents = format!(
                        "owner={owner}\ntimestamp={}\nfilepath={filepath}\n",
                        crate::util::now_iso()
                    );
                    // A lock without its owner record is no lock at all:
                    // back the file out and report the acquire as failed.
                    if let Err(e) = file.write_all(contents.as_bytes()) {
                        warn!(filepath, error = %e, "failed to write lock metadata");
                        drop(file);
                        let _ = fs::remove_file(&lock_file);
                        return false;
                    }
                    self.held.lock().unwrap().insert(normalized);
                    debug!(filepath, owner, "lock acquired");
                    return true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&lock_file, ACQUIRE_STALE) {
                        let _ = fs::remove_file(&lock_file);
                        continue;
                    }
                }
                Err(e) => {
                    warn!(filepath, error = %e, "lock acquire failed");
                    return false;
                }
            }

            if SystemTime::now() >= deadline {
                debug!(filepath, owner, "lock acquire timed out");
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Release the lock on `filepath`. Silent when no lock exists.
    pub fn release(&self, filepath: &str) {
        let normalized = normalize_path(filepath);
        let lock_file = self.lock_path(&normalized);
        if lock_file.exists()
            && let Err(e) = fs::remove_file(&lock_file)
        {
            warn!(filepath, error = %e, "failed to remove lock file");
        }
        self.held.lock().unwrap().remove(&normalized);
    }

    /// Release every lock this process still holds. Invoked on shutdown
    /// and on interrupt.
    pub fn release_all(&self) {
        let held: Vec<String> = self.held.lock().unwrap().iter().cloned().collect();
        for path in held {
            self.release(&path);
        }
    }

    /// Whether a non-stale lock exists for `filepath`.
    pub fn is_locked(&self, filepath: &str) -> bool {
        let lock_file = self.lock_path(&normalize_path(filepath));
        lock_file.exists() && !is_stale(&lock_file, ACQUIRE_STALE)
    }

    /// The task id holding the lock on `filepath`, if any.
    pub fn owner(&self, filepath: &str) -> Option<String> {
        let lock_file = self.lock_path(&normalize_path(filepath));
        let content = fs::read_to_string(lock_file).ok()?;
        content
            .lines()
            .find_map(|line| line.strip_prefix("owner="))
            .map(str::to_string)
    }

    /// Paths currently covered by a non-stale lock file.
    pub fn locked_files(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.lock_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "lock"))
            .filter(|p| !is_stale(p, ACQUIRE_STALE))
            .filter_map(|p| {
                let content = fs::read_to_string(&p).ok()?;
                content
                    .lines()
                    .find_map(|line| line.strip_prefix("filepath="))
                    .map(str::to_string)
            })
            .collect()
    }

    /// Remove all lock files older than `threshold`; returns the count
    /// removed. Run once per iteration by the driver.
    pub fn cleanup_stale(&self, threshold: Duration) -> usize {
        let Ok(entries) = fs::read_dir(&self.lock_dir) else {
            return 0;
        };
        let mut removed = 0;
        for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
            if path.extension().is_some_and(|ext| ext == "lock")
                && is_stale(&path, threshold)
                && fs::remove_file(&path).is_ok()
            {
                removed += 1;
            }
        }
        removed
    }

    fn lock_path(&self, normalized: &str) -> PathBuf {
        self.lock_dir
            .join(format!("{}.lock", normalized.replace('/', "_")))
    }
}

/// Strip leading/trailing separators and forward-slashize.
fn normalize_path(filepath: &str) -> String {
    filepath.replace('\\', "/").trim_matches('/').to_string()
}

/// A lock is stale when its mtime is older than `threshold`. Unreadable
/// metadata counts as stale so a broken lock never wedges the system.
fn is_stale(lock_file: &Path, threshold: Duration) -> bool {
    match lock_file.metadata().and_then(|m| m.modified()) {
        Ok(mtime) => SystemTime::now()
            .duration_since(mtime)
            .map(|age| age > threshold)
            .unwrap_or(false),
        Err(_) => true,
    }
}
