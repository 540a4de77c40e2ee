//! Advisory per-dataset write locks.
//!
//! Every structural mutation (import, transform commit, join, undo,
//! delete) must hold its dataset's exclusive lock for the duration so
//! concurrent writers serialize instead of interleaving. Reads never take
//! the lock. Locks on different datasets are fully independent.

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::{Result, StoreError};
use crate::store::Id;

#[derive(Debug, Default)]
struct Registry {
    busy: Mutex<BTreeSet<Id>>,
    released: Condvar,
}

impl Registry {
    fn busy_set(&self) -> MutexGuard<'_, BTreeSet<Id>> {
        // A poisoned lock only means another writer panicked; the set of
        // busy ids itself is still consistent.
        self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registry of advisory dataset locks, cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct DatasetLocks {
    registry: Arc<Registry>,
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the dataset's exclusive lock, blocking until the current
    /// holder releases it.
    pub fn lock(&self, dataset: Id) -> DatasetGuard {
        let mut busy = self.registry.busy_set();
        while busy.contains(&dataset) {
            busy = self
                .registry
                .released
                .wait(busy)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        busy.insert(dataset);
        DatasetGuard {
            registry: Arc::clone(&self.registry),
            dataset,
        }
    }

    /// Fail-fast variant: errors with [`StoreError::Busy`] when another
    /// writer holds the lock.
    pub fn try_lock(&self, dataset: Id) -> Result<DatasetGuard> {
        let mut busy = self.registry.busy_set();
        if !busy.insert(dataset) {
            return Err(StoreError::Busy(dataset));
        }
        Ok(DatasetGuard {
            registry: Arc::clone(&self.registry),
            dataset,
        })
    }
}

/// Held for the duration of one structural mutation; releases on drop.
#[derive(Debug)]
pub struct DatasetGuard {
    registry: Arc<Registry>,
    dataset: Id,
}

impl Drop for DatasetGuard {
    fn drop(&mut self) {
        self.registry.busy_set().remove(&self.dataset);
        self.registry.released.notify_all();
    }
}
