use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::{DeviceCounts, DeviceLedger, DeviceRecord, DeviceSeed};
use crate::config::LedgerBounds;
use crate::signals::fingerprint::Fingerprint;
use crate::store::{KeyValueStore, StoreError};

/// Attempts before a contended compare-and-swap gives up.
pub const MAX_CAS_ATTEMPTS: u32 = 16;

/// Ledger persisted in a [`KeyValueStore`] as JSON, one key per device.
///
/// Atomicity comes from the store's compare-and-swap: a mutation reads the
/// current bytes, applies the closure to a decoded copy and commits only if
/// the bytes are unchanged, retrying otherwise.
pub struct KvLedger<S> {
    store: S,
    site_id: String,
    bounds: LedgerBounds,
}

impl<S: KeyValueStore> KvLedger<S> {
    pub fn new(store: S, site_id: &str, bounds: LedgerBounds) -> Self {
        KvLedger {
            store,
            site_id: site_id.to_string(),
            bounds,
        }
    }

    fn record_key(&self, fingerprint: &Fingerprint) -> String {
        format!("device:{}:{}", self.site_id, fingerprint)
    }

    fn record_prefix(&self) -> String {
        format!("device:{}:", self.site_id)
    }

    fn origin_key(&self, origin: &str) -> String {
        format!("origin_index:{}:{}", self.site_id, origin)
    }

    fn read_modify_write<F>(
        &self,
        fingerprint: &Fingerprint,
        seed: Option<&DeviceSeed>,
        mut mutate: F,
    ) -> Result<Option<DeviceRecord>, StoreError>
    where
        F: FnMut(&mut DeviceRecord),
    {
        let key = self.record_key(fingerprint);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.get(&key)?;
            let existing = match current.as_deref() {
                Some(bytes) => match decode::<DeviceRecord>(&key, bytes) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        warn!(key = %key, error = %err, "discarding unreadable device record");
                        None
                    }
                },
                None => None,
            };
            let mut record = match (existing, seed) {
                (Some(record), _) => record,
                (None, Some(seed)) => DeviceRecord::new(fingerprint.clone(), seed),
                (None, None) => return Ok(None),
            };
            mutate(&mut record);
            let encoded = encode(&key, &record)?;
            if self
                .store
                .compare_and_swap(&key, current.as_deref(), &encoded)?
            {
                return Ok(Some(record));
            }
        }
        warn!(key = %key, attempts = MAX_CAS_ATTEMPTS, "device record update contended");
        Err(StoreError::Contention {
            key,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}

impl<S: KeyValueStore> DeviceLedger for KvLedger<S> {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<DeviceRecord>, StoreError> {
        let key = self.record_key(fingerprint);
        match self.store.get(&key)? {
            Some(bytes) => decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put(&self, fingerprint: &Fingerprint, record: DeviceRecord) -> Result<(), StoreError> {
        let key = self.record_key(fingerprint);
        let encoded = encode(&key, &record)?;
        self.store.set(&key, &encoded)
    }

    fn get_or_create(
        &self,
        fingerprint: &Fingerprint,
        seed: &DeviceSeed,
    ) -> Result<DeviceRecord, StoreError> {
        let key = self.record_key(fingerprint);
        for _ in 0..MAX_CAS_ATTEMPTS {
            if let Some(bytes) = self.store.get(&key)? {
                return decode(&key, &bytes);
            }
            let record = DeviceRecord::new(fingerprint.clone(), seed);
            let encoded = encode(&key, &record)?;
            if self.store.compare_and_swap(&key, None, &encoded)? {
                return Ok(record);
            }
        }
        Err(StoreError::Contention {
            key,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    fn update<F>(
        &self,
        fingerprint: &Fingerprint,
        seed: &DeviceSeed,
        mutate: F,
    ) -> Result<DeviceRecord, StoreError>
    where
        F: FnMut(&mut DeviceRecord),
    {
        let key = self.record_key(fingerprint);
        self.read_modify_write(fingerprint, Some(seed), mutate)?
            .ok_or(StoreError::Corrupt { key })
    }

    fn update_existing<F>(
        &self,
        fingerprint: &Fingerprint,
        mutate: F,
    ) -> Result<Option<DeviceRecord>, StoreError>
    where
        F: FnMut(&mut DeviceRecord),
    {
        self.read_modify_write(fingerprint, None, mutate)
    }

    fn index_origin(&self, origin: &str, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        let key = self.origin_key(origin);
        let cap = self.bounds.max_fingerprints_per_origin.max(1);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.get(&key)?;
            let mut seen: Vec<Fingerprint> = match current.as_deref() {
                Some(bytes) => decode(&key, bytes).unwrap_or_default(),
                None => Vec::new(),
            };
            if seen.contains(fingerprint) {
                return Ok(());
            }
            if seen.len() >= cap {
                let excess = seen.len() + 1 - cap;
                seen.drain(..excess);
            }
            seen.push(fingerprint.clone());
            let encoded = encode(&key, &seen)?;
            if self
                .store
                .compare_and_swap(&key, current.as_deref(), &encoded)?
            {
                return Ok(());
            }
        }
        Err(StoreError::Contention {
            key,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    fn fingerprints_for_origin(&self, origin: &str) -> Result<Vec<Fingerprint>, StoreError> {
        let key = self.origin_key(origin);
        match self.store.get(&key)? {
            Some(bytes) => decode(&key, &bytes),
            None => Ok(Vec::new()),
        }
    }

    fn counts(&self) -> Result<DeviceCounts, StoreError> {
        let prefix = self.record_prefix();
        let mut counts = DeviceCounts::default();
        for key in self.store.get_keys()? {
            if !key.starts_with(&prefix) {
                continue;
            }
            let Some(bytes) = self.store.get(&key)? else {
                continue;
            };
            match decode::<DeviceRecord>(&key, &bytes) {
                Ok(record) => counts.tally(record.status),
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping unreadable device record")
                }
            }
        }
        Ok(counts)
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
    })
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|err| StoreError::Serialization {
        key: key.to_string(),
        reason: err.to_string(),
    })
}
