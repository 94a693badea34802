// src/ledger/mod.rs
// Longitudinal device records keyed by fingerprint, behind a pluggable store.

mod kv;
mod memory;

pub use kv::KvLedger;
pub use memory::InMemoryLedger;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::signals::fingerprint::Fingerprint;
use crate::store::StoreError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Trusted,
    Suspicious,
    Blocked,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Trusted => "trusted",
            DeviceStatus::Suspicious => "suspicious",
            DeviceStatus::Blocked => "blocked",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Weight of one event of this severity in the recent-event penalty.
    pub fn multiplier(self) -> f64 {
        match self {
            Severity::Low => 0.5,
            Severity::Medium => 1.0,
            Severity::High => 2.0,
            Severity::Critical => 4.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskEventKind {
    OriginChanged,
    IdentifierChanged,
    RateExceeded,
    ManualBlock,
    ManualTrust,
    AutoBlocked,
    PrincipalLinked,
}

impl RiskEventKind {
    /// Device behavior, as opposed to operator actions and account linking.
    /// Only behavioral events weigh on the trust score.
    pub fn is_behavioral(self) -> bool {
        matches!(
            self,
            RiskEventKind::OriginChanged
                | RiskEventKind::IdentifierChanged
                | RiskEventKind::RateExceeded
                | RiskEventKind::AutoBlocked
        )
    }
}

/// Immutable log entry recording a notable behavioral change.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiskEvent {
    pub kind: RiskEventKind,
    pub ts: u64,
    pub severity: Severity,
    pub detail: String,
}

impl RiskEvent {
    pub fn new(kind: RiskEventKind, ts: u64, severity: Severity, detail: impl Into<String>) -> Self {
        RiskEvent {
            kind,
            ts,
            severity,
            detail: detail.into(),
        }
    }
}

/// Values used when a record is created on first sighting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSeed {
    pub now: u64,
    pub trust_score: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub principal_id: Option<String>,
    pub request_count: u64,
    pub first_seen: u64,
    pub last_seen: u64,
    #[serde(default)]
    pub known_origins: VecDeque<String>,
    #[serde(default)]
    pub known_identifiers: VecDeque<String>,
    #[serde(default)]
    pub risk_events: VecDeque<RiskEvent>,
    pub trust_score: f64,
    pub status: DeviceStatus,
    /// Consecutive requests at or above the warn threshold.
    #[serde(default)]
    pub risky_streak: u32,
    /// Events ever appended, including ones since evicted from the log.
    #[serde(default)]
    pub events_logged: u64,
    /// Prefix of `events_logged` already charged against the trust score.
    #[serde(default)]
    pub events_charged: u64,
}

impl DeviceRecord {
    pub fn new(fingerprint: Fingerprint, seed: &DeviceSeed) -> Self {
        let trust_score = if seed.trust_score.is_finite() {
            seed.trust_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        DeviceRecord {
            fingerprint,
            principal_id: None,
            request_count: 0,
            first_seen: seed.now,
            last_seen: seed.now,
            known_origins: VecDeque::new(),
            known_identifiers: VecDeque::new(),
            risk_events: VecDeque::new(),
            trust_score,
            status: DeviceStatus::Trusted,
            risky_streak: 0,
            events_logged: 0,
            events_charged: 0,
        }
    }

    /// Appends an event, dropping the oldest once `cap` is reached.
    pub fn push_event(&mut self, event: RiskEvent, cap: usize) {
        let cap = cap.max(1);
        while self.risk_events.len() >= cap {
            self.risk_events.pop_front();
        }
        self.risk_events.push_back(event);
        self.events_logged = self.events_logged.saturating_add(1);
    }

    /// Returns true when the origin had not been seen before.
    pub fn remember_origin(&mut self, origin: &str, cap: usize) -> bool {
        remember(&mut self.known_origins, origin, cap)
    }

    /// Returns true when the identifier had not been seen before.
    pub fn remember_identifier(&mut self, identifier: &str, cap: usize) -> bool {
        remember(&mut self.known_identifiers, identifier, cap)
    }

    /// Events appended since the trust score last absorbed them.
    pub fn uncharged_events(&self) -> impl Iterator<Item = &RiskEvent> {
        let pending = self.events_logged.saturating_sub(self.events_charged);
        let pending = usize::try_from(pending).unwrap_or(usize::MAX);
        let skip = self.risk_events.len().saturating_sub(pending);
        self.risk_events.iter().skip(skip)
    }

    pub fn events_of(&self, kind: RiskEventKind) -> usize {
        self.risk_events.iter().filter(|e| e.kind == kind).count()
    }
}

fn remember(seen: &mut VecDeque<String>, value: &str, cap: usize) -> bool {
    if seen.iter().any(|v| v == value) {
        return false;
    }
    let cap = cap.max(1);
    while seen.len() >= cap {
        seen.pop_front();
    }
    seen.push_back(value.to_string());
    true
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCounts {
    pub total: u64,
    pub trusted: u64,
    pub suspicious: u64,
    pub blocked: u64,
}

impl DeviceCounts {
    pub(crate) fn tally(&mut self, status: DeviceStatus) {
        self.total += 1;
        match status {
            DeviceStatus::Trusted => self.trusted += 1,
            DeviceStatus::Suspicious => self.suspicious += 1,
            DeviceStatus::Blocked => self.blocked += 1,
        }
    }
}

/// Registry of device records.
///
/// Every mutation of a single fingerprint is atomic: `update` runs its
/// closure against the latest stored record and either commits the result
/// or retries with a fresh copy, so closures must be free of side effects.
/// Implementations must never serialize unrelated fingerprints behind one
/// lock for the duration of a mutation.
pub trait DeviceLedger: Send + Sync {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<DeviceRecord>, StoreError>;

    fn put(&self, fingerprint: &Fingerprint, record: DeviceRecord) -> Result<(), StoreError>;

    /// Returns the stored record, creating it from `seed` exactly once when
    /// absent, even under concurrent callers.
    fn get_or_create(
        &self,
        fingerprint: &Fingerprint,
        seed: &DeviceSeed,
    ) -> Result<DeviceRecord, StoreError>;

    /// Atomic read-modify-write, creating the record from `seed` if absent.
    fn update<F>(
        &self,
        fingerprint: &Fingerprint,
        seed: &DeviceSeed,
        mutate: F,
    ) -> Result<DeviceRecord, StoreError>
    where
        F: FnMut(&mut DeviceRecord);

    /// Atomic read-modify-write of an existing record; `Ok(None)` if absent.
    fn update_existing<F>(
        &self,
        fingerprint: &Fingerprint,
        mutate: F,
    ) -> Result<Option<DeviceRecord>, StoreError>
    where
        F: FnMut(&mut DeviceRecord);

    /// Remembers that `fingerprint` was seen from `origin` (bounded per origin).
    fn index_origin(&self, origin: &str, fingerprint: &Fingerprint) -> Result<(), StoreError>;

    fn fingerprints_for_origin(&self, origin: &str) -> Result<Vec<Fingerprint>, StoreError>;

    fn counts(&self) -> Result<DeviceCounts, StoreError>;
}
