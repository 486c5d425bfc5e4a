//! Per-transaction mutual exclusion.
//!
//! One async mutex per [`TransactionId`], held in a sharded map and shared by
//! all services. Work on different ids never contends; entries are removed
//! again once nobody holds or waits for them.

use std::sync::Arc;

use dashmap::DashMap;
use ledger_sync_types::TransactionId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Sharded lock map keyed by transaction id.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<TransactionId, Arc<Mutex<()>>>,
}

/// Exclusive access to one transaction id until dropped.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: TransactionId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `id`.
    pub async fn lock(&self, id: &TransactionId) -> KeyGuard<'_> {
        let mut waiter = Waiter {
            owner: self,
            key: id,
            acquired: false,
        };
        // Declared after `waiter`, so a dropped future releases it first.
        let acquire = self.locks.entry(id.clone()).or_default().clone().lock_owned();
        let guard = acquire.await;
        waiter.acquired = true;
        KeyGuard {
            owner: self,
            key: id.clone(),
            guard: Some(guard),
        }
    }

    fn release_unused(&self, key: &TransactionId) {
        // Only the map itself still references the mutex: nobody holds or waits.
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of ids currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &TransactionId {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.owner.release_unused(&self.key);
    }
}

/// Cleans up after a `lock` call abandoned before it got the mutex.
struct Waiter<'a> {
    owner: &'a KeyedLocks,
    key: &'a TransactionId,
    acquired: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if !self.acquired {
            self.owner.release_unused(self.key);
        }
    }
}
