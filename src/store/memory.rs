use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{KeyValueStore, StoreError};

/// Process-local store. A single map mutex is acceptable here because every
/// operation is a short map access; per-record exclusion lives in the ledger.
#[derive(Debug)]
pub struct InMemoryKvStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage of the backing store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(self
            .map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

impl KeyValueStore for InMemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self.guard()?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut map = self.guard()?;
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.guard()?;
        map.remove(key);
        Ok(())
    }

    fn get_keys(&self) -> Result<Vec<String>, StoreError> {
        let map = self.guard()?;
        Ok(map.keys().cloned().collect())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError> {
        let mut map = self.guard()?;
        if map.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        map.insert(key.to_string(), new.to_vec());
        Ok(true)
    }
}
