//! In-process tensor store.

use super::{StoreError, StoreResult, TensorStore};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Shared {
    tensors: Mutex<HashMap<String, Vec<f32>>>,
    changed: Condvar,
}

/// Thread-safe in-memory tensor store.
///
/// Clones share the same underlying map, so a solver thread and the
/// environment can each hold a handle.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tensors currently stored.
    pub fn len(&self) -> usize {
        self.shared.tensors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of stored keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.tensors.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl TensorStore for InMemoryStore {
    fn put_tensor(&self, key: &str, data: &[f32]) -> StoreResult<()> {
        self.shared
            .tensors
            .lock()
            .insert(key.to_string(), data.to_vec());
        self.shared.changed.notify_all();
        Ok(())
    }

    fn get_tensor(&self, key: &str) -> StoreResult<Vec<f32>> {
        self.shared
            .tensors
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    fn delete_tensor(&self, key: &str) -> StoreResult<()> {
        self.shared.tensors.lock().remove(key);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn tensor_exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.shared.tensors.lock().contains_key(key))
    }

    // Waits out the whole `interval * attempts` budget. Writes to other keys
    // wake the waiter but do not shorten the deadline.
    fn poll_tensor(&self, key: &str, interval: Duration, attempts: u32) -> StoreResult<bool> {
        let deadline = Instant::now() + interval * attempts;
        let mut tensors = self.shared.tensors.lock();
        while !tensors.contains_key(key) {
            if self
                .shared
                .changed
                .wait_until(&mut tensors, deadline)
                .timed_out()
            {
                return Ok(tensors.contains_key(key));
            }
        }
        Ok(true)
    }
}
