//! Per-namespace critical sections
//!
//! Serialises check-then-create of shared resources within one process.
//! Replicas do not see each other's locks; AlreadyExists handling at the API
//! boundary covers that case.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily created async mutex per namespace
#[derive(Default)]
pub struct NamespaceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NamespaceLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the namespace's lock; released when the guard drops
    pub async fn lock(&self, namespace: &str) -> OwnedMutexGuard<()> {
        // clone out of the map so no shard guard is held across the await
        let mutex = self
            .locks
            .entry(namespace.to_string())
            .or_default()
            .clone();
        mutex.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn story_same_namespace_is_exclusive() {
        let locks = Arc::new(NamespaceLocks::new());
        let guard = locks.lock("media").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("media").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn story_different_namespaces_do_not_block() {
        let locks = NamespaceLocks::new();
        let _media = locks.lock("media").await;
        let ops = tokio::time::timeout(Duration::from_millis(100), locks.lock("ops")).await;
        assert!(ops.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
