// src/store/mod.rs
// Key-value contract shared by the device ledger, rate counters and config.

mod memory;

pub use memory::InMemoryKvStore;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key-value store unavailable")]
    Unavailable,
    #[error("compare-and-swap contention on key {key} after {attempts} attempts")]
    Contention { key: String, attempts: u32 },
    #[error("corrupt value stored under key {key}")]
    Corrupt { key: String },
    #[error("failed to serialize value for key {key}: {reason}")]
    Serialization { key: String, reason: String },
}

/// Byte-oriented store used for every piece of shared mutable state.
///
/// Implementations backed by an external shared store must make
/// `compare_and_swap` atomic with respect to all other writers of the same
/// key; the ledger and rate governor rely on it to avoid lost updates.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn get_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    /// Writes `new` only when the current value equals `expected`
    /// (`None` meaning "key absent"). Returns whether the write happened.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn get_keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).get_keys()
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, StoreError> {
        (**self).compare_and_swap(key, expected, new)
    }
}
