// src/admin/mod.rs
// Operator actions on device records: manual block/trust, principal
// linking, lookups and aggregate counts.

use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::ledger::{
    DeviceCounts, DeviceLedger, DeviceRecord, DeviceStatus, RiskEvent, RiskEventKind, Severity,
};
use crate::signals::fingerprint::Fingerprint;
use crate::store::StoreError;
use crate::trust;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdminError {
    #[error("not a valid device fingerprint: {0}")]
    InvalidFingerprint(String),
    #[error("no device recorded for fingerprint {0}")]
    UnknownDevice(String),
    #[error("status {0:?} cannot be set manually")]
    UnsupportedStatus(DeviceStatus),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn parse_fingerprint(raw: &str) -> Result<Fingerprint, AdminError> {
    Fingerprint::parse(raw).ok_or_else(|| AdminError::InvalidFingerprint(raw.to_string()))
}

/// Forces a device to Blocked or Trusted. Trusted also lifts the score to at
/// least the configured floor so the next automatic transition keeps it.
pub fn force_status<L: DeviceLedger>(
    ledger: &L,
    cfg: &Config,
    fingerprint: &str,
    status: DeviceStatus,
    actor: &str,
    now: u64,
) -> Result<DeviceRecord, AdminError> {
    let fp = parse_fingerprint(fingerprint)?;
    let max_events = cfg.ledger.max_risk_events;
    let floor = cfg.trust.manual_trust_floor;
    let actor = if actor.trim().is_empty() {
        "admin"
    } else {
        actor.trim()
    };

    let updated = match status {
        DeviceStatus::Suspicious => return Err(AdminError::UnsupportedStatus(status)),
        DeviceStatus::Blocked => ledger.update_existing(&fp, |record| {
            record.status = DeviceStatus::Blocked;
            record.push_event(
                RiskEvent::new(RiskEventKind::ManualBlock, now, Severity::Critical, actor),
                max_events,
            );
        })?,
        DeviceStatus::Trusted => ledger.update_existing(&fp, |record| {
            record.status = DeviceStatus::Trusted;
            record.trust_score = record.trust_score.max(floor).clamp(0.0, 1.0);
            record.risky_streak = 0;
            record.push_event(
                RiskEvent::new(RiskEventKind::ManualTrust, now, Severity::Low, actor),
                max_events,
            );
        })?,
    };

    let record = updated.ok_or_else(|| AdminError::UnknownDevice(fp.to_string()))?;
    info!(
        fingerprint = %fp,
        status = status.as_str(),
        actor,
        trust = record.trust_score,
        "device status forced"
    );
    Ok(record)
}

pub fn link_principal<L: DeviceLedger>(
    ledger: &L,
    cfg: &Config,
    fingerprint: &str,
    principal_id: &str,
    now: u64,
) -> Result<DeviceRecord, AdminError> {
    let fp = parse_fingerprint(fingerprint)?;
    let max_events = cfg.ledger.max_risk_events;
    ledger
        .update_existing(&fp, |record| {
            trust::link_principal(record, principal_id, now, max_events);
        })?
        .ok_or_else(|| AdminError::UnknownDevice(fp.to_string()))
}

pub fn device<L: DeviceLedger>(
    ledger: &L,
    fingerprint: &str,
) -> Result<Option<DeviceRecord>, AdminError> {
    let fp = parse_fingerprint(fingerprint)?;
    Ok(ledger.get(&fp)?)
}

pub fn counts<L: DeviceLedger>(ledger: &L) -> Result<DeviceCounts, AdminError> {
    Ok(ledger.counts()?)
}
