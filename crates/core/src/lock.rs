//! Per-key async locks for serializing read-modify-write updates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A lazily populated map of async mutexes, one per key.
///
/// Holding the guard returned by [`KeyedLocks::lock`] excludes every other
/// holder of the same key; different keys never block each other.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.to_string()).or_default().clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn run_pair(locks: Arc<KeyedLocks>, keys: [&'static str; 2]) -> usize {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let locks = locks.clone();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _guard = locks.lock(key).await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        assert_eq!(run_pair(locks, ["alice", "alice"]).await, 1);
    }

    #[tokio::test]
    async fn different_keys_run_concurrently() {
        let locks = Arc::new(KeyedLocks::new());
        assert_eq!(run_pair(locks, ["alice", "bob"]).await, 2);
    }

    #[tokio::test]
    async fn lock_is_reusable_after_release() {
        let locks = KeyedLocks::new();
        drop(locks.lock("alice").await);
        let _again = locks.lock("alice").await;
    }
}
