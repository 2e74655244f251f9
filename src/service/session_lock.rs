//! Per-session mutual exclusion for merges.
//!
//! Completion of one upload session must never run twice at the same time,
//! while different sessions merge independently. Each token gets its own
//! async mutex; the entry is dropped again once nobody holds or waits for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Clone, Default)]
pub struct SessionLocks {
    table: LockTable,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the session is free and take it. The guard is `Send` and may
    /// be moved into a blocking task.
    pub async fn acquire(&self, token: &str) -> SessionGuard {
        let lock = {
            let mut table = self.table.lock().unwrap();
            Arc::clone(
                table
                    .entry(token.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = lock.lock_owned().await;
        SessionGuard {
            token: token.to_string(),
            table: Arc::clone(&self.table),
            guard: Some(guard),
        }
    }

    /// Take the session only if nobody holds it right now. Does not wait.
    pub fn try_acquire(&self, token: &str) -> Option<SessionGuard> {
        let lock = {
            let mut table = self.table.lock().unwrap();
            Arc::clone(
                table
                    .entry(token.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        // Whoever holds it prunes the entry on release.
        let guard = lock.try_lock_owned().ok()?;
        Some(SessionGuard {
            token: token.to_string(),
            table: Arc::clone(&self.table),
            guard: Some(guard),
        })
    }

    /// Whether a merge currently holds or waits on the session
    pub fn is_locked(&self, token: &str) -> bool {
        let table = self.table.lock().unwrap();
        // A holder or waiter always owns a clone besides the table's own.
        table
            .get(token)
            .map(|entry| Arc::strong_count(entry) > 1)
            .unwrap_or(false)
    }

    /// Number of sessions currently held or waited on
    pub fn active(&self) -> usize {
        let table = self.table.lock().unwrap();
        table.values().filter(|entry| Arc::strong_count(entry) > 1).count()
    }
}

pub struct SessionGuard {
    token: String,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionGuard {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap();
        // Release first so that the only remaining references are the table's
        // and those of waiters that cloned the entry under this same lock.
        self.guard.take();
        if let Some(entry) = table.get(&self.token) {
            if Arc::strong_count(entry) == 1 {
                table.remove(&self.token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = SessionLocks::new();
        {
            let guard = locks.acquire("a").await;
            assert_eq!(guard.token(), "a");
            assert!(locks.is_locked("a"));
        }
        assert!(!locks.is_locked("a"));
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_same_token_is_serialized() {
        let locks = SessionLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                tokio::spawn(async move {
                    let _guard = locks.acquire("shared").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_try_acquire_does_not_wait() {
        let locks = SessionLocks::new();
        let held = locks.acquire("a").await;
        assert!(locks.try_acquire("a").is_none());
        assert!(locks.is_locked("a"));

        drop(held);
        let claimed = locks.try_acquire("a").unwrap();
        assert_eq!(claimed.token(), "a");
        drop(claimed);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_distinct_tokens_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }
}
