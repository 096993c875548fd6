//! Per-owner exclusive scopes.
//!
//! Every check-then-act sequence on an owner's tree (name availability,
//! quota, physical rename/delete and the matching metadata write) runs
//! while holding that owner's scope. The scope covers all of the owner's
//! subtrees at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Registry of per-owner locks.
#[derive(Debug, Default)]
pub struct OwnerLocks {
    owners: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

/// Exclusive access to one owner's tree; released on drop.
#[derive(Debug)]
pub struct OwnerGuard {
    owner_id: i64,
    _guard: OwnedMutexGuard<()>,
}

impl OwnerGuard {
    /// The owner this scope belongs to.
    pub fn owner_id(&self) -> i64 {
        self.owner_id
    }
}

impl OwnerLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the owner's exclusive scope.
    pub async fn acquire(&self, owner_id: i64) -> OwnerGuard {
        let lock = {
            let mut owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
            // drop locks nobody holds or waits on
            owners.retain(|id, lock| *id == owner_id || Arc::strong_count(lock) > 1);
            Arc::clone(owners.entry(owner_id).or_default())
        };

        trace!(owner_id, "acquiring owner scope");
        OwnerGuard {
            owner_id,
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of owners currently tracked.
    pub fn tracked(&self) -> usize {
        self.owners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
