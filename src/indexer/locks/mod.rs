// Per-project locks shared by index builds, removals and searches.
// `ProjectLocks` serialises tasks in one process; `ProjectFileLock` extends
// the same reader/writer rule to other processes sharing the data directory.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use fs2::FileExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{IndexError, Result};

const LOCK_FILE_EXTENSION: &str = "lock";

static GLOBAL_LOCKS: LazyLock<ProjectLocks> = LazyLock::new(ProjectLocks::default);

/// Registry handing out one `RwLock` per project id.
///
/// A build holds the write side for its whole run; searches hold the read side.
#[derive(Debug, Clone, Default)]
pub struct ProjectLocks {
    locks: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl ProjectLocks {
    /// The registry shared by every builder and searcher in this process
    #[inline]
    pub fn global() -> Self {
        GLOBAL_LOCKS.clone()
    }

    #[inline]
    pub fn lock_for(&self, project_id: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(project_id.to_owned()).or_default())
    }

    /// Drop the entry for `project_id` unless someone still holds its lock.
    /// Returns whether the entry was removed.
    #[inline]
    pub fn evict(&self, project_id: &str) -> bool {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = locks
            .get(project_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(project_id);
        }
        idle
    }

    #[inline]
    pub fn tracked_projects(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Where the advisory lock file for `project_id` lives under `index_dir`
#[inline]
pub fn lock_file_path(index_dir: &Path, project_id: &str) -> PathBuf {
    index_dir.join(format!("{project_id}.{LOCK_FILE_EXTENSION}"))
}

/// Advisory `flock`-style lock on `<index_dir>/<project_id>.lock`, released on drop.
///
/// The lock file is never deleted: unlinking it while another process waits
/// on it would let two holders lock different inodes.
#[derive(Debug)]
pub struct ProjectFileLock {
    file: File,
}

impl ProjectFileLock {
    /// Block until this process holds the project's lock exclusively
    #[inline]
    pub async fn exclusive(index_dir: &Path, project_id: &str) -> Result<Self> {
        tokio::fs::create_dir_all(index_dir).await?;
        let path = lock_file_path(index_dir, project_id);

        tokio::task::spawn_blocking(move || -> Result<Self> {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            debug!("Acquired exclusive lock {}", path.display());
            Ok(Self { file })
        })
        .await
        .map_err(|e| IndexError::Other(anyhow::anyhow!("lock task failed: {e}")))?
    }

    /// Block until no other process builds or removes the project.
    ///
    /// Returns `None` when no lock file exists yet, which means no build has
    /// ever started for the project under `index_dir`.
    #[inline]
    pub async fn shared(index_dir: &Path, project_id: &str) -> Result<Option<Self>> {
        let path = lock_file_path(index_dir, project_id);

        tokio::task::spawn_blocking(move || -> Result<Option<Self>> {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            FileExt::lock_shared(&file)?;
            Ok(Some(Self { file }))
        })
        .await
        .map_err(|e| IndexError::Other(anyhow::anyhow!("lock task failed: {e}")))?
    }
}

impl Drop for ProjectFileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release project lock: {}", e);
        }
    }
}
