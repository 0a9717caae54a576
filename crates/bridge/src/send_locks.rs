use std::{collections::HashMap, future::Future, sync::Arc};

use shared::domain::UserId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Per-sender mutual exclusion.
///
/// Locks are created on first use and kept for the lifetime of the process.
/// The registry itself sits behind a mutex so two concurrent first events
/// from the same sender always end up sharing one lock.
#[derive(Default)]
pub struct SendLocks {
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl SendLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, sender: &UserId) -> Arc<Mutex<()>> {
        let mut registry = self.locks.lock().await;
        registry
            .entry(sender.clone())
            .or_insert_with(|| {
                debug!(%sender, "creating send lock");
                Arc::new(Mutex::new(()))
            })
            .clone()
    }

    pub async fn acquire(&self, sender: &UserId) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(sender).await;
        let guard = lock.lock_owned().await;
        debug!(%sender, "acquired send lock");
        guard
    }

    /// Runs `f` while holding `sender`'s lock. The guard is dropped on every
    /// exit path of the future, including unwinding.
    pub async fn with_sender_lock<F, Fut, T>(&self, sender: &UserId, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(sender).await;
        let output = f().await;
        debug!(%sender, "releasing send lock");
        output
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
#[path = "tests/send_locks_tests.rs"]
mod tests;
