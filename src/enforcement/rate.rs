// src/enforcement/rate.rs
// Fixed-window request ceiling per network origin.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::RateLimit;
use crate::signals::ip_identity;
use crate::store::{KeyValueStore, StoreError};

const MAX_CAS_ATTEMPTS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Admitted; `count` is this request's position in the window.
    Allowed { count: u32 },
    /// Ceiling reached; `count` is the window's recorded total.
    Limited { count: u32 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Counters live in the injected store under
/// `rate:{site_id}:{origin}:{window_index}`. The first request of a new
/// window deletes every counter older than the previous window.
pub struct RateGovernor<S> {
    store: S,
    site_id: String,
    limit: RateLimit,
    pruned_through: AtomicU64,
}

impl<S: KeyValueStore> RateGovernor<S> {
    pub fn new(store: S, site_id: &str, limit: RateLimit) -> Self {
        RateGovernor {
            store,
            site_id: site_id.to_string(),
            limit,
            pruned_through: AtomicU64::new(0),
        }
    }

    pub fn admit(&self, origin: &str) -> RateDecision {
        self.admit_at(origin, now_ts())
    }

    pub fn admit_at(&self, origin: &str, now: u64) -> RateDecision {
        let window_index = self.window_index(now);
        if self.pruned_through.fetch_max(window_index, Ordering::AcqRel) < window_index {
            self.prune_before(window_index.saturating_sub(1));
        }

        let key = self.window_key(origin, now);
        match self.increment(&key) {
            Ok(decision) => {
                if let RateDecision::Limited { count } = decision {
                    debug!(key = %key, count, ceiling = self.limit.ceiling, "rate ceiling reached");
                }
                decision
            }
            // Contention means the ceiling is being raced; never admit past it.
            Err(err @ StoreError::Contention { .. }) => {
                warn!(key = %key, error = %err, "rate counter contended; limiting request");
                RateDecision::Limited {
                    count: self.limit.ceiling,
                }
            }
            Err(err) => {
                warn!(key = %key, error = %err, "rate counter unavailable; admitting request");
                RateDecision::Allowed { count: 0 }
            }
        }
    }

    /// Requests already counted for `origin` in the window containing `now`.
    pub fn current_usage(&self, origin: &str, now: u64) -> u32 {
        let key = self.window_key(origin, now);
        self.store
            .get(&key)
            .ok()
            .flatten()
            .and_then(|bytes| parse_count(&bytes))
            .unwrap_or(0)
    }

    pub fn window_start(&self, now: u64) -> u64 {
        let window = self.limit.window_secs.max(1);
        (now / window) * window
    }

    /// Counter key part for an origin: the normalized address, or its
    /// network prefix when bucketing is enabled.
    pub fn origin_key(&self, origin: &str) -> String {
        let normalized = ip_identity::normalize_origin(origin);
        if self.limit.bucket_origins {
            ip_identity::bucket_ip(&normalized)
        } else {
            normalized
        }
    }

    fn window_index(&self, now: u64) -> u64 {
        now / self.limit.window_secs.max(1)
    }

    fn key_prefix(&self) -> String {
        format!("rate:{}:", self.site_id)
    }

    fn window_key(&self, origin: &str, now: u64) -> String {
        format!(
            "{}{}:{}",
            self.key_prefix(),
            self.origin_key(origin),
            self.window_index(now)
        )
    }

    /// Deletes this site's counters for windows before `oldest_kept`.
    fn prune_before(&self, oldest_kept: u64) {
        let keys = match self.store.get_keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "cannot list rate counters for pruning");
                return;
            }
        };
        let prefix = self.key_prefix();
        let stale = keys.iter().filter(|key| {
            key.strip_prefix(&prefix)
                .and_then(|rest| rest.rsplit_once(':'))
                .and_then(|(_, window)| window.parse::<u64>().ok())
                .is_some_and(|window| window < oldest_kept)
        });
        for key in stale {
            if let Err(err) = self.store.delete(key) {
                warn!(key = %key, error = %err, "failed to delete stale rate counter");
            }
        }
    }

    /// Every failed swap means another writer advanced the counter, and the
    /// counter stops moving at the ceiling, so `ceiling` extra attempts
    /// cover every competing increment.
    fn increment(&self, key: &str) -> Result<RateDecision, StoreError> {
        let attempts = MAX_CAS_ATTEMPTS.saturating_add(self.limit.ceiling);
        for _ in 0..attempts {
            let current = self.store.get(key)?;
            let count = current.as_deref().and_then(parse_count).unwrap_or(0);
            if count >= self.limit.ceiling {
                return Ok(RateDecision::Limited { count });
            }
            let next = count + 1;
            if self
                .store
                .compare_and_swap(key, current.as_deref(), next.to_string().as_bytes())?
            {
                return Ok(RateDecision::Allowed { count: next });
            }
        }
        Err(StoreError::Contention {
            key: key.to_string(),
            attempts,
        })
    }
}

fn parse_count(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.trim().parse::<u32>().ok()
}

pub(crate) fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryKvStore;
    use std::sync::Arc;
    use std::thread;

    fn governor(ceiling: u32, window_secs: u64) -> RateGovernor<Arc<InMemoryKvStore>> {
        RateGovernor::new(
            Arc::new(InMemoryKvStore::new()),
            "testsite",
            RateLimit {
                window_secs,
                ceiling,
                bucket_origins: false,
            },
        )
    }

    #[test]
    fn admits_exactly_ceiling_then_limits() {
        let rate = governor(5, 60);
        let now = 6_000;
        for expected in 1..=5 {
            assert_eq!(
                rate.admit_at("81.2.69.160", now),
                RateDecision::Allowed { count: expected }
            );
        }
        assert_eq!(
            rate.admit_at("81.2.69.160", now + 1),
            RateDecision::Limited { count: 5 }
        );
        assert_eq!(rate.current_usage("81.2.69.160", now), 5);
    }

    #[test]
    fn new_window_restarts_at_one() {
        let rate = governor(2, 60);
        let now = 6_000;
        rate.admit_at("81.2.69.160", now);
        rate.admit_at("81.2.69.160", now);
        assert!(!rate.admit_at("81.2.69.160", now + 59).is_allowed());
        assert_eq!(
            rate.admit_at("81.2.69.160", now + 60),
            RateDecision::Allowed { count: 1 }
        );
    }

    #[test]
    fn origins_are_counted_independently() {
        let rate = governor(1, 60);
        assert!(rate.admit_at("81.2.69.160", 0).is_allowed());
        assert!(rate.admit_at("81.2.69.161", 0).is_allowed());
        assert!(!rate.admit_at("81.2.69.160", 0).is_allowed());
    }

    #[test]
    fn bucketing_shares_a_counter_across_a_prefix() {
        let rate = RateGovernor::new(
            InMemoryKvStore::new(),
            "testsite",
            RateLimit {
                window_secs: 60,
                ceiling: 1,
                bucket_origins: true,
            },
        );
        assert!(rate.admit_at("81.2.69.160", 0).is_allowed());
        assert!(!rate.admit_at("81.2.69.199", 0).is_allowed());
        assert_eq!(rate.origin_key("81.2.69.199"), "81.2.69.0");
    }

    #[test]
    fn zero_ceiling_limits_everything() {
        let rate = governor(0, 60);
        assert_eq!(
            rate.admit_at("81.2.69.160", 0),
            RateDecision::Limited { count: 0 }
        );
    }

    #[test]
    fn store_outage_admits() {
        let store = Arc::new(InMemoryKvStore::new());
        let rate = RateGovernor::new(Arc::clone(&store), "testsite", RateLimit::default());
        store.set_available(false);
        assert!(rate.admit_at("81.2.69.160", 0).is_allowed());
        assert_eq!(rate.current_usage("81.2.69.160", 0), 0);
    }

    #[test]
    fn concurrent_admissions_never_exceed_ceiling() {
        let rate = Arc::new(governor(100, 60));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let rate = Arc::clone(&rate);
                thread::spawn(move || {
                    (0..25)
                        .filter(|_| rate.admit_at("81.2.69.160", 120).is_allowed())
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert_eq!(rate.current_usage("81.2.69.160", 120), 100);
    }

    /// Store whose swaps always lose, as under a writer that never yields.
    struct ContendedStore(InMemoryKvStore);

    impl KeyValueStore for ContendedStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            self.0.set(key, value)
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key)
        }

        fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<&[u8]>,
            _new: &[u8],
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[test]
    fn exhausted_swaps_limit_instead_of_admitting() {
        let rate = RateGovernor::new(
            ContendedStore(InMemoryKvStore::new()),
            "testsite",
            RateLimit::default(),
        );
        assert_eq!(
            rate.admit_at("81.2.69.160", 0),
            RateDecision::Limited {
                count: RateLimit::default().ceiling
            }
        );
    }

    #[test]
    fn stale_windows_are_pruned_on_rollover() {
        let store = Arc::new(InMemoryKvStore::new());
        let rate = RateGovernor::new(
            Arc::clone(&store),
            "testsite",
            RateLimit {
                window_secs: 60,
                ceiling: 10,
                bucket_origins: false,
            },
        );
        for window in 0..5_000u64 {
            rate.admit_at("81.2.69.160", window * 60);
        }
        assert!(store.get_keys().unwrap().len() <= 2);
        assert_eq!(rate.current_usage("81.2.69.160", 4_999 * 60), 1);
    }

    #[test]
    fn pruning_drops_idle_origins_and_spares_other_sites() {
        let store = Arc::new(InMemoryKvStore::new());
        let limit = RateLimit {
            window_secs: 60,
            ceiling: 10,
            bucket_origins: false,
        };
        let rate = RateGovernor::new(Arc::clone(&store), "testsite", limit.clone());
        let other = RateGovernor::new(Arc::clone(&store), "othersite", limit);
        for host in 0..100u32 {
            rate.admit_at(&format!("81.2.69.{}", host), 60);
        }
        other.admit_at("81.2.69.160", 60);
        rate.admit_at("81.2.69.160", 180);

        let keys = store.get_keys().unwrap();
        assert_eq!(keys.iter().filter(|k| k.starts_with("rate:testsite:")).count(), 1);
        assert_eq!(keys.iter().filter(|k| k.starts_with("rate:othersite:")).count(), 1);
    }

    #[test]
    fn window_start_aligns_to_boundary() {
        let rate = governor(10, 60);
        assert_eq!(rate.window_start(119), 60);
        assert_eq!(rate.window_start(120), 120);
    }
}
