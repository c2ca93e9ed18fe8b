//! Per-key in-process lock table
//!
//! Serializes mutations of a shared sub-resource list (e.g., appending a
//! route to a route table) between tasks of the same process. It gives no
//! protection against other processes. Pass the table explicitly to the code
//! that needs it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

type Table = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Table of named async mutexes, created on first use
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    table: Arc<Mutex<Table>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting for the current holder if any
    pub async fn lock(&self, key: impl Into<String>) -> KeyedGuard {
        let key = key.into();
        let entry = self.entries().entry(key.clone()).or_default().clone();

        tracing::debug!("Waiting for lock {}", key);
        let guard = entry.lock_owned().await;
        tracing::debug!("Acquired lock {}", key);

        KeyedGuard {
            key,
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    /// Acquire the lock for `key` only if nobody holds it
    pub fn try_lock(&self, key: impl Into<String>) -> Option<KeyedGuard> {
        let key = key.into();
        let entry = self.entries().entry(key.clone()).or_default().clone();
        let guard = entry.try_lock_owned().ok()?;
        Some(KeyedGuard {
            key,
            table: self.table.clone(),
            guard: Some(guard),
        })
    }

    /// Number of keys currently held or waited on
    pub fn active_keys(&self) -> usize {
        self.entries().len()
    }

    fn entries(&self) -> MutexGuard<'_, Table> {
        lock_table(&self.table)
    }
}

/// RAII guard for one key; released on drop, on every exit path
pub struct KeyedGuard {
    key: String,
    table: Arc<Mutex<Table>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut table = lock_table(&self.table);
        // Only the table itself still references an idle entry.
        let idle = table
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1);
        if idle {
            table.remove(&self.key);
        }
        tracing::debug!("Released lock {}", self.key);
    }
}

fn lock_table(table: &Mutex<Table>) -> MutexGuard<'_, Table> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("rt-1").await;

        assert!(locks.try_lock("rt-1").is_none());
        assert!(locks.try_lock("rt-2").is_some());

        drop(guard);
        assert!(locks.try_lock("rt-1").is_some());
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.lock("a").await;
            let _b = locks.lock("b").await;
            assert_eq!(locks.active_keys(), 2);
        }
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_released_on_error_path() {
        async fn failing(locks: &KeyedLocks) -> Result<(), String> {
            let _guard = locks.lock("rt-1").await;
            Err("append failed".to_string())
        }

        let locks = KeyedLocks::new();
        assert!(failing(&locks).await.is_err());
        assert!(locks.try_lock("rt-1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serializes_concurrent_holders() {
        let locks = KeyedLocks::new();
        let inside = Arc::new(AtomicU32::new(0));
        let max_inside = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("rt-1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_keys(), 0);
    }
}
