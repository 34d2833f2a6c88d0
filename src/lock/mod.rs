// src/lock/mod.rs

//! Cross-process lock manager
//!
//! Advisory file locks coordinate concurrent installers sharing one store.
//! Each key maps to a lock file under the store's lock directory; node locks
//! are keyed by content hash, the database lock by [`DB_KEY`]. Locks are
//! reentrant within a thread (a held lock can be re-acquired in a compatible
//! mode); other threads contend on the underlying file lock through their own
//! descriptors. Acquisition with a timeout polls with backoff rather than
//! blocking forever.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Key for the install-database lock
pub const DB_KEY: &str = "db";

const POLL_INITIAL: Duration = Duration::from_millis(10);
const POLL_MAX: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Whether a lock held in `self` mode covers a request for `wanted`
    fn covers(self, wanted: LockMode) -> bool {
        match self {
            LockMode::Exclusive => true,
            LockMode::Shared => wanted == LockMode::Shared,
        }
    }
}

struct HeldLock {
    file: File,
    mode: LockMode,
    count: usize,
}

struct Inner {
    dir: PathBuf,
    /// Locks held by this process, keyed per acquiring thread so reentrancy
    /// never bridges two threads
    held: Mutex<HashMap<(String, ThreadId), HeldLock>>,
}

/// Handle to the store's lock directory; cheap to clone across workers
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<Inner>,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                held: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Acquire the lock for `key`, waiting up to `timeout` (forever if `None`)
    ///
    /// Re-acquiring a key this thread already holds succeeds immediately when
    /// the held mode covers the request; upgrading a held shared lock to
    /// exclusive would self-deadlock and fails without waiting.
    pub fn lock(
        &self,
        key: &str,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<LockGuard> {
        let start = Instant::now();
        let owner = thread::current().id();
        {
            let mut held = self.inner.held.lock().expect("lock table poisoned");
            if let Some(entry) = held.get_mut(&(key.to_string(), owner)) {
                if entry.mode.covers(mode) {
                    entry.count += 1;
                    trace!(key, count = entry.count, "reentrant lock acquire");
                    return Ok(LockGuard {
                        manager: self.clone(),
                        key: key.to_string(),
                        owner,
                    });
                }
                return Err(Error::LockTimeout {
                    key: key.to_string(),
                    waited_ms: 0,
                });
            }
        }

        let path = self.inner.dir.join(format!("{key}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut poll = POLL_INITIAL;
        loop {
            // UFCS: std has grown inherent File locking methods with a
            // different error type, so name the fs2 trait explicitly
            let attempt = match mode {
                LockMode::Shared => fs2::FileExt::try_lock_shared(&file),
                LockMode::Exclusive => fs2::FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => break,
                Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                    if let Some(limit) = timeout {
                        if start.elapsed() >= limit {
                            debug!(key, waited_ms = start.elapsed().as_millis() as u64,
                                "lock acquisition timed out");
                            return Err(Error::LockTimeout {
                                key: key.to_string(),
                                waited_ms: start.elapsed().as_millis() as u64,
                            });
                        }
                    }
                    std::thread::sleep(poll);
                    poll = (poll * 2).min(POLL_MAX);
                }
                Err(err) => return Err(err.into()),
            }
        }

        trace!(key, ?mode, waited_ms = start.elapsed().as_millis() as u64, "lock acquired");
        let mut held = self.inner.held.lock().expect("lock table poisoned");
        held.insert(
            (key.to_string(), owner),
            HeldLock {
                file,
                mode,
                count: 1,
            },
        );
        Ok(LockGuard {
            manager: self.clone(),
            key: key.to_string(),
            owner,
        })
    }

    /// Shared lock on the database key
    pub fn read_db(&self, timeout: Option<Duration>) -> Result<LockGuard> {
        self.lock(DB_KEY, LockMode::Shared, timeout)
    }

    /// Exclusive lock on the database key
    pub fn write_db(&self, timeout: Option<Duration>) -> Result<LockGuard> {
        self.lock(DB_KEY, LockMode::Exclusive, timeout)
    }

    fn release(&self, key: &str, owner: ThreadId) {
        let mut held = self.inner.held.lock().expect("lock table poisoned");
        let slot = (key.to_string(), owner);
        let Some(entry) = held.get_mut(&slot) else {
            return;
        };
        entry.count -= 1;
        if entry.count == 0 {
            let entry = held.remove(&slot).expect("entry present");
            // Unlock errors on drop are not actionable
            let _ = fs2::FileExt::unlock(&entry.file);
            trace!(key, "lock released");
        }
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("dir", &self.inner.dir)
            .finish()
    }
}

/// RAII guard; the lock is released (or its reentrant count decremented) on drop
#[derive(Debug)]
pub struct LockGuard {
    manager: LockManager,
    key: String,
    owner: ThreadId,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.manager.release(&self.key, self.owner);
    }
}
