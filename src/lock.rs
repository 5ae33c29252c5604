//! Per-key serialization of git mutations.
//!
//! Git's ref database is not safe for concurrent writers, so every mutating
//! operation on one project repository must run alone. `KeyedLocks` keeps a
//! map from project id to a fair async mutex: acquisitions on the same key
//! queue up FIFO, different keys never contend, and a key's entry is pruned
//! from the map once the last holder or waiter is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
struct Entry {
    lock: Arc<AsyncMutex<()>>,
    // Holders plus waiters. The map entry is removed when this hits zero.
    pending: usize,
}

type LockMap = Arc<Mutex<HashMap<String, Entry>>>;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: LockMap,
}

/// RAII guard for one key. Dropping it releases the lock and prunes the
/// map entry if nobody else is queued behind it.
pub struct KeyedLockGuard {
    key: String,
    map: LockMap,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behind any in-flight operation on `key` and return a guard once
    /// it is this caller's turn. Tokio's mutex wakes waiters in FIFO order,
    /// which gives the strict per-key submission ordering we rely on.
    pub async fn acquire(&self, key: &str) -> KeyedLockGuard {
        let lock = {
            let mut map = self.inner.lock().expect("lock map poisoned");
            let entry = map.entry(key.to_string()).or_default();
            entry.pending += 1;
            Arc::clone(&entry.lock)
        };

        let guard = lock.lock_owned().await;
        KeyedLockGuard {
            key: key.to_string(),
            map: Arc::clone(&self.inner),
            _guard: guard,
        }
    }

    /// Number of keys currently tracked (held or queued).
    pub fn tracked(&self) -> usize {
        self.inner.lock().expect("lock map poisoned").len()
    }
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        let mut map = self.map.lock().expect("lock map poisoned");
        if let Some(entry) = map.get_mut(&self.key) {
            entry.pending -= 1;
            if entry.pending == 0 {
                map.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release_prunes_entry() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.acquire("p1").await;
            assert_eq!(locks.tracked(), 1);
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_same_key_operations_never_overlap() {
        let locks = KeyedLocks::new();
        let windows = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let locks = locks.clone();
            let windows = Arc::clone(&windows);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("p1").await;
                let start = std::time::Instant::now();
                tokio::time::sleep(Duration::from_millis(20)).await;
                windows
                    .lock()
                    .unwrap()
                    .push((start, std::time::Instant::now()));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut windows = windows.lock().unwrap().clone();
        windows.sort_by_key(|(start, _)| *start);
        for pair in windows.windows(2) {
            assert!(
                pair[0].1 <= pair[1].0,
                "operations on the same key overlapped"
            );
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_proceed_in_parallel() {
        let locks = KeyedLocks::new();
        let slow = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("p1").await;
                tokio::time::sleep(Duration::from_millis(200)).await;
            })
        };

        // An unrelated key must not wait for p1's 200ms hold.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let start = std::time::Instant::now();
        let _guard = locks.acquire("p2").await;
        assert!(start.elapsed() < Duration::from_millis(100));

        slow.await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_ordering_within_key() {
        let locks = KeyedLocks::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.acquire("p1").await;
        let mut handles = Vec::new();
        for i in 0..3 {
            let locks = locks.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("p1").await;
                order.lock().unwrap().push(i);
            }));
            // Let each task reach the wait queue before spawning the next.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
