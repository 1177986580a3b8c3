//! Per-path mutual exclusion for record file operations.
//!
//! Every read, write, and delete against one physical path must hold that
//! path's permit, so two operations addressed at the same file never touch the
//! filesystem concurrently within this process. Operations on distinct paths
//! proceed in parallel. Waiters on one path are served in arrival order
//! (tokio's mutex queues fairly). The map entry for a path is created lazily
//! on first acquisition and removed again once no task holds or awaits it.
//!
//! This gate is in-process only; it offers no protection against other
//! processes touching the same files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lazily-populated map of physical path to its exclusion lock.
#[derive(Default)]
pub struct PathLockMap {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl PathLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`. The returned permit releases the
    /// path on drop. Queue depth per path is unbounded.
    pub async fn acquire(&self, path: &Path) -> PathPermit<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        let guard = lock.lock_owned().await;
        PathPermit {
            map: self,
            path: path.to_path_buf(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_paths(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one physical path, released on drop.
pub struct PathPermit<'a> {
    map: &'a PathLockMap,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathPermit<'_> {
    fn drop(&mut self) {
        // Release under the map mutex so the drained-queue check cannot race
        // a concurrent acquire cloning the entry.
        let mut locks = self.map.locks.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();
        if let Some(lock) = locks.get(&self.path) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.path);
            }
        }
    }
}
