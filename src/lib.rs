// src/lib.rs
// Request-time device fingerprinting, risk scoring and longitudinal trust
// gating for multi-tenant services.

pub mod admin;
pub mod config;
pub mod enforcement;
pub mod ledger;
pub mod observability;
mod runtime;
pub mod signals;
pub mod store;
pub mod trust;

#[cfg(test)]
mod lib_tests;
#[cfg(test)]
pub(crate) mod test_support;

pub use admin::AdminError;
pub use config::{Config, ConfigLoadError};
pub use enforcement::block_page::{BlockPayload, BLOCK_STATUS};
pub use enforcement::decision::{Decision, Outcome};
pub use enforcement::rate::{RateDecision, RateGovernor};
pub use ledger::{
    DeviceCounts, DeviceLedger, DeviceRecord, DeviceStatus, InMemoryLedger, KvLedger, RiskEvent,
    RiskEventKind, Severity,
};
pub use observability::{AlertSink, SecurityAlert, TracingAlertSink};
pub use runtime::gate::TrustGate;
pub use signals::fingerprint::{derive, Fingerprint};
pub use signals::observation::{ClientAttributes, RequestObservation, ScreenGeometry};
pub use signals::request_risk::{score, InstantaneousRisk, ScoringError};
pub use store::{InMemoryKvStore, KeyValueStore, StoreError};
