use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{DeviceCounts, DeviceLedger, DeviceRecord, DeviceSeed};
use crate::config::LedgerBounds;
use crate::signals::fingerprint::Fingerprint;
use crate::store::StoreError;

const SHARD_COUNT: usize = 64;

type Slot = Arc<Mutex<Option<DeviceRecord>>>;

/// Per-shard origin index with insertion order for eviction.
#[derive(Default)]
struct OriginShard {
    fingerprints: HashMap<String, VecDeque<Fingerprint>>,
    order: VecDeque<String>,
}

/// In-process ledger. Shard locks only guard slot lookup/insertion; each
/// fingerprint's record is mutated under its own slot mutex.
pub struct InMemoryLedger {
    shards: Vec<Mutex<HashMap<Fingerprint, Slot>>>,
    origins: Vec<Mutex<OriginShard>>,
    bounds: LedgerBounds,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(LedgerBounds::default())
    }
}

impl InMemoryLedger {
    pub fn new(bounds: LedgerBounds) -> Self {
        InMemoryLedger {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            origins: (0..SHARD_COUNT).map(|_| Mutex::new(OriginShard::default())).collect(),
            bounds,
        }
    }

    fn slot(&self, fingerprint: &Fingerprint) -> Slot {
        let mut shard = lock(&self.shards[shard_index(fingerprint)]);
        shard
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn existing_slot(&self, fingerprint: &Fingerprint) -> Option<Slot> {
        let shard = lock(&self.shards[shard_index(fingerprint)]);
        shard.get(fingerprint).cloned()
    }

    fn origins_per_shard(&self) -> usize {
        self.bounds.max_indexed_origins.div_ceil(SHARD_COUNT).max(1)
    }

    pub(crate) fn indexed_origins(&self) -> usize {
        self.origins
            .iter()
            .map(|shard| lock(shard).fingerprints.len())
            .sum()
    }
}

impl DeviceLedger for InMemoryLedger {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<DeviceRecord>, StoreError> {
        Ok(self
            .existing_slot(fingerprint)
            .and_then(|slot| lock(&slot).clone()))
    }

    fn put(&self, fingerprint: &Fingerprint, record: DeviceRecord) -> Result<(), StoreError> {
        let slot = self.slot(fingerprint);
        *lock(&slot) = Some(record);
        Ok(())
    }

    fn get_or_create(
        &self,
        fingerprint: &Fingerprint,
        seed: &DeviceSeed,
    ) -> Result<DeviceRecord, StoreError> {
        let slot = self.slot(fingerprint);
        let mut guard = lock(&slot);
        Ok(guard
            .get_or_insert_with(|| DeviceRecord::new(fingerprint.clone(), seed))
            .clone())
    }

    fn update<F>(
        &self,
        fingerprint: &Fingerprint,
        seed: &DeviceSeed,
        mut mutate: F,
    ) -> Result<DeviceRecord, StoreError>
    where
        F: FnMut(&mut DeviceRecord),
    {
        let slot = self.slot(fingerprint);
        let mut guard = lock(&slot);
        let record = guard.get_or_insert_with(|| DeviceRecord::new(fingerprint.clone(), seed));
        mutate(record);
        Ok(record.clone())
    }

    fn update_existing<F>(
        &self,
        fingerprint: &Fingerprint,
        mut mutate: F,
    ) -> Result<Option<DeviceRecord>, StoreError>
    where
        F: FnMut(&mut DeviceRecord),
    {
        let Some(slot) = self.existing_slot(fingerprint) else {
            return Ok(None);
        };
        let mut guard = lock(&slot);
        Ok(guard.as_mut().map(|record| {
            mutate(record);
            record.clone()
        }))
    }

    fn index_origin(&self, origin: &str, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        let cap = self.bounds.max_fingerprints_per_origin.max(1);
        let origin_cap = self.origins_per_shard();
        let mut guard = lock(&self.origins[origin_shard_index(origin)]);
        let shard = &mut *guard;
        if !shard.fingerprints.contains_key(origin) {
            while shard.fingerprints.len() >= origin_cap {
                let Some(evicted) = shard.order.pop_front() else {
                    break;
                };
                shard.fingerprints.remove(&evicted);
            }
            shard.order.push_back(origin.to_string());
        }
        let seen = shard.fingerprints.entry(origin.to_string()).or_default();
        if seen.iter().any(|fp| fp == fingerprint) {
            return Ok(());
        }
        while seen.len() >= cap {
            seen.pop_front();
        }
        seen.push_back(fingerprint.clone());
        Ok(())
    }

    fn fingerprints_for_origin(&self, origin: &str) -> Result<Vec<Fingerprint>, StoreError> {
        let shard = lock(&self.origins[origin_shard_index(origin)]);
        Ok(shard
            .fingerprints
            .get(origin)
            .map(|seen| seen.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn counts(&self) -> Result<DeviceCounts, StoreError> {
        let mut counts = DeviceCounts::default();
        for shard in &self.shards {
            let slots: Vec<Slot> = lock(shard).values().cloned().collect();
            for slot in slots {
                if let Some(record) = lock(&slot).as_ref() {
                    counts.tally(record.status);
                }
            }
        }
        Ok(counts)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn shard_index(fingerprint: &Fingerprint) -> usize {
    hash_index(fingerprint.as_str())
}

fn origin_shard_index(origin: &str) -> usize {
    hash_index(origin)
}

fn hash_index(value: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    (hasher.finish() % SHARD_COUNT as u64) as usize
}
