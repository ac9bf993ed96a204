use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::persist::{replay, DatabaseAction, Keyed, PersistentStore};

/// In-memory store that keeps every batch it receives, in order.
pub struct MemoryStore<T> {
    seed: Mutex<Vec<T>>,
    batches: Mutex<Vec<Vec<DatabaseAction<T>>>>,
    fail_next: AtomicUsize,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self { seed: Mutex::new(Vec::new()), batches: Mutex::new(Vec::new()), fail_next: AtomicUsize::new(0) }
    }
}

impl<T: Keyed + Clone + Send> MemoryStore<T> {
    pub fn new() -> Self { Self::default() }

    /// Start from `items`, as if a previous generation had persisted them.
    pub fn with_items(items: Vec<T>) -> Self {
        let s = Self::default();
        *s.seed.lock() = items;
        s
    }

    pub fn batches(&self) -> Vec<Vec<DatabaseAction<T>>> { self.batches.lock().clone() }

    pub fn batch_count(&self) -> usize { self.batches.lock().len() }

    /// Make the next `n` enqueue calls fail.
    pub fn fail_next(&self, n: usize) { self.fail_next.store(n, Ordering::SeqCst); }
}

impl<T: Keyed + Clone + Send> PersistentStore<T> for MemoryStore<T> {
    fn enqueue(&self, batch: Vec<DatabaseAction<T>>) -> Result<()> {
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(anyhow!("memory store configured to fail"));
        }
        self.batches.lock().push(batch);
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<T>> {
        let mut state = BTreeMap::new();
        for item in self.seed.lock().iter() { state.insert(item.identity(), item.clone()); }
        for b in self.batches.lock().iter() { replay(&mut state, b); }
        Ok(state.into_values().collect())
    }
}
