//! Async mutual exclusion keyed by string.
//!
//! Each key gets its own `tokio` mutex on first use. The entry is removed once the last guard or
//! waiter for that key goes away, so the table only holds keys that are currently contended.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type Table = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Table of per-key async locks.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    table: Table,
}

impl KeyedLocks {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Access ends when the guard is dropped.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();
        let entry = Entry {
            key: key.to_string(),
            mutex: Some(mutex.clone()),
            table: self.table.clone(),
        };
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            _guard: guard,
            _entry: entry,
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no key is held or awaited.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key of a [`KeyedLocks`] table.
pub struct KeyedGuard {
    // Field order matters: the mutex guard is released before the entry is cleaned up.
    _guard: OwnedMutexGuard<()>,
    _entry: Entry,
}

struct Entry {
    key: String,
    mutex: Option<Arc<tokio::sync::Mutex<()>>>,
    table: Table,
}

impl Drop for Entry {
    fn drop(&mut self) {
        // Release this holder's reference first so the last holder to get here sees a count of one.
        drop(self.mutex.take());
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            table.remove(&self.key);
        }
    }
}
