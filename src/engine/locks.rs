//! Per-token critical sections
//!
//! Requests for the same token queue behind one async mutex; different tokens
//! never contend. Entries are dropped once nobody holds or waits on them.
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default, Clone)]
pub struct TokenLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub struct TokenLockGuard {
    token: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TokenLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, token: &str) -> TokenLockGuard {
        let mutex = self
            .inner
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        TokenLockGuard {
            token: token.to_string(),
            guard: Some(guard),
            locks: self.inner.clone(),
        }
    }

    /// Tokens with a live lock entry
    pub fn active(&self) -> usize {
        self.inner.len()
    }
}

impl Drop for TokenLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map itself still references the mutex: no holder, no waiter
        self.locks
            .remove_if(&self.token, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
