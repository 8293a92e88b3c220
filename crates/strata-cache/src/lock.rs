//! Mutual exclusion keyed by string
//!
//! The indexer serializes work on a layer by locking its digest. `lock`
//! blocks until the key is held; `try_lock` returns immediately. Every
//! acquisition hands back a guard whose [`CancellationToken`] fires if the
//! lock is lost out from under the holder. A process-local lock never loses
//! its key, but a store-backed one does when the backing session drops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use strata_core::Result;

/// Held lock. Dropping it releases the key.
pub struct LockGuard {
    token: CancellationToken,
    _held: Box<dyn std::any::Any + Send + Sync>,
}

impl LockGuard {
    /// Wrap a backend's release-on-drop state
    pub fn new(token: CancellationToken, held: Box<dyn std::any::Any + Send + Sync>) -> Self {
        Self {
            token,
            _held: held,
        }
    }

    /// Token that fires if the lock is lost while held
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Source of keyed locks
#[async_trait]
pub trait LockSource: Send + Sync {
    /// Block until the key is acquired
    async fn lock(&self, key: &str) -> Result<LockGuard>;

    /// Acquire the key only if it is free
    async fn try_lock(&self, key: &str) -> Result<Option<LockGuard>>;
}

/// Process-local locks: a shared map of per-key mutexes
pub struct LocalLocks {
    keys: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut keys = self.keys.lock().expect("lock map poisoned");
        // drop slots nobody holds or waits on before growing the map
        keys.retain(|_, slot| Arc::strong_count(slot) > 1);
        keys.entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

impl Default for LocalLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockSource for LocalLocks {
    async fn lock(&self, key: &str) -> Result<LockGuard> {
        let slot = self.slot(key);
        let held = slot.lock_owned().await;
        // a local lock cannot be lost while the guard lives
        Ok(LockGuard::new(CancellationToken::new(), Box::new(held)))
    }

    async fn try_lock(&self, key: &str) -> Result<Option<LockGuard>> {
        let slot = self.slot(key);
        match slot.try_lock_owned() {
            Ok(held) => Ok(Some(LockGuard::new(
                CancellationToken::new(),
                Box::new(held),
            ))),
            Err(_) => Ok(None),
        }
    }
}
