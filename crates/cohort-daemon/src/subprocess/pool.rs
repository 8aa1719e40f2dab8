//! Semaphore-based pool bounding Claude subprocesses across all groups.
//!
//! Each running group has its own concurrency cap; the [`ProcessPool`] is the
//! only thing groups share, and it limits how many `claude` processes exist
//! at once on this machine. It also tracks which group session owns each
//! slot so active processes can be listed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, info};

/// Default maximum number of concurrent Claude subprocesses.
const DEFAULT_MAX_PROCESSES: usize = 8;

/// A permit granting the right to run one subprocess.
///
/// When dropped, the permit is automatically returned to the pool.
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
}

/// A process currently holding a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub group_id: String,
    pub session_id: String,
    pub pid: Option<u32>,
}

impl PoolEntry {
    fn key(&self) -> String {
        entry_key(&self.group_id, &self.session_id)
    }
}

fn entry_key(group_id: &str, session_id: &str) -> String {
    format!("{group_id}/{session_id}")
}

/// Semaphore-based concurrency pool for Claude subprocesses.
pub struct ProcessPool {
    semaphore: Arc<Semaphore>,
    max_processes: usize,
    entries: RwLock<HashMap<String, PoolEntry>>,
}

impl ProcessPool {
    /// Create a pool with the given limit; `0` selects the default.
    pub fn new(max_processes: usize) -> Self {
        let limit = if max_processes == 0 {
            DEFAULT_MAX_PROCESSES
        } else {
            max_processes
        };

        info!(max_processes = limit, "ProcessPool created");

        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            max_processes: limit,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Acquire a permit without waiting. `None` when the pool is full.
    pub fn try_acquire(&self) -> Option<PoolPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(PoolPermit { _permit: permit })
    }

    /// Acquire a permit, waiting until one becomes available.
    pub async fn acquire(&self) -> Result<PoolPermit, PoolError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(PoolPermit { _permit: permit })
    }

    /// Record the process that now owns a slot.
    pub async fn register(&self, entry: PoolEntry) {
        debug!(group_id = %entry.group_id, session_id = %entry.session_id, pid = ?entry.pid, "Registering process in pool");
        self.entries.write().await.insert(entry.key(), entry);
    }

    pub async fn unregister(&self, group_id: &str, session_id: &str) -> Option<PoolEntry> {
        debug!(group_id, session_id, "Unregistering process from pool");
        self.entries
            .write()
            .await
            .remove(&entry_key(group_id, session_id))
    }

    pub async fn active_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub const fn max_processes(&self) -> usize {
        self.max_processes
    }

    /// Number of available permits (slots) remaining.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Stop handing out permits; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for ProcessPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PROCESSES)
    }
}

/// Errors from the process pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The semaphore was closed (pool shut down).
    #[error("Process pool has been closed")]
    Closed,
}
