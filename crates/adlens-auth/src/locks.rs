use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key async mutual exclusion with self-cleaning entries. When the last
/// guard for a key drops and nobody else holds a reference to that key's
/// mutex, the entry is removed, so the map does not grow with every key the
/// process has ever seen.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Callers on the same key are
    /// serialized; distinct keys proceed independently.
    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        let lock = self
            .inner
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        KeyedGuard {
            map: Arc::clone(&self.inner),
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Held for the duration of the critical section. Dropping it releases the
/// mutex, then evicts the map entry if no other caller holds the key.
pub struct KeyedGuard {
    map: Arc<DashMap<String, Arc<Mutex<()>>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release the mutex first so the entry's strong count reflects only
        // the map itself plus any waiters.
        self.guard.take();
        // remove_if holds the shard write lock, so no concurrent acquire can
        // clone the Arc between the count check and the removal.
        self.map
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn entry_is_removed_after_the_last_guard_drops() {
        let locks = KeyedLocks::new();

        let guard = locks.acquire("u1").await;
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn waiter_keeps_the_entry_alive_and_acquires_next() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.acquire("u1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("u1").await;
            })
        };
        // Let the waiter reach the lock before we release it
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(locks.len(), 1);

        drop(guard);
        waiter.await.expect("waiter should finish");
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let locks = KeyedLocks::new();

        let a = locks.acquire("u1").await;
        let b = locks.acquire("u2").await;
        assert_eq!(locks.len(), 2);

        drop(a);
        drop(b);
        assert!(locks.is_empty());
    }
}
