//! Per-identity serialization of exists-then-mutate pairs.
//!
//! Servers are discovered concurrently and may reference the same downstream
//! node. Holding the identity's lock across `exists` and the mutation that
//! follows keeps two tasks from both seeing "absent" and both creating it.
//! Callers hold at most one identity lock at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one identity key.
    pub async fn lock(&self, identity_key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(identity_key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn active(locks: &IdentityLocks) -> usize {
        let locks = locks.locks.lock().unwrap();
        locks.values().filter(|l| Arc::strong_count(l) > 1).count()
    }

    #[tokio::test]
    async fn test_same_identity_is_exclusive() {
        let locks = Arc::new(IdentityLocks::new());
        let guard = locks.lock("Server{name: \"a\"}").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("Server{name: \"a\"}").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_distinct_identities_do_not_block() {
        let locks = IdentityLocks::new();
        let _a = locks.lock("a").await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock("b"))
            .await
            .unwrap();
        assert_eq!(active(&locks), 2);
    }

    #[tokio::test]
    async fn test_released_identities_are_pruned() {
        let locks = IdentityLocks::new();
        drop(locks.lock("a").await);
        drop(locks.lock("b").await);
        assert_eq!(active(&locks), 0);
    }
}
