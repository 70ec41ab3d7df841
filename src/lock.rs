//! Process-wide exclusion of concurrent runs against one repository branch.
//!
//! Two runs against the same `(repo, branch)` would list the tree at
//! different moments and delete each other's files during orphan
//! reconciliation. A run takes the lock for its key up front and fails
//! fast with `Busy` when it is already held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{NoteSyncError, NoteSyncResult};

type RepoKey = (String, String);

type Registry = Mutex<HashMap<RepoKey, Arc<AsyncMutex<()>>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> MutexGuard<'static, HashMap<RepoKey, Arc<AsyncMutex<()>>>> {
    REGISTRY
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn key_for(repo: &str, branch: &str) -> RepoKey {
    (repo.trim().to_lowercase(), branch.trim().to_string())
}

/// Held for the duration of one run; released on drop
#[derive(Debug)]
pub struct RepoLockGuard {
    key: RepoKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RepoLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the registry still refers to the slot: forget the key
        let mut map = registry();
        if map.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            map.remove(&self.key);
        }
    }
}

impl RepoLockGuard {
    pub fn repo(&self) -> &str {
        &self.key.0
    }

    pub fn branch(&self) -> &str {
        &self.key.1
    }
}

/// Take the lock for `(repo, branch)` without waiting.
pub fn try_lock_repo(repo: &str, branch: &str) -> NoteSyncResult<RepoLockGuard> {
    let key = key_for(repo, branch);

    let slot = Arc::clone(registry().entry(key.clone()).or_default());

    let guard = slot
        .try_lock_owned()
        .map_err(|_| NoteSyncError::Busy(format!("{} on branch {}", key.0, key.1)))?;

    tracing::debug!(repo = %key.0, branch = %key.1, "Acquired repository lock");
    Ok(RepoLockGuard {
        key,
        guard: Some(guard),
    })
}
