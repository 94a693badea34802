// src/enforcement/decision.rs
// Status transitions and the Allow/Warn/Block verdict.

use serde::Serialize;

use super::block_page::BlockPayload;
use crate::config::DecisionThresholds;
use crate::ledger::{DeviceRecord, DeviceStatus};
use crate::signals::fingerprint::Fingerprint;
use crate::signals::request_risk::InstantaneousRisk;

pub const FLAG_RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
pub const FLAG_LEDGER_UNAVAILABLE: &str = "LEDGER_UNAVAILABLE";
pub const FLAG_INTERNAL_SCORING_ERROR: &str = "INTERNAL_SCORING_ERROR";

pub const HEADER_FINGERPRINT: &str = "X-Device-Fingerprint";
pub const HEADER_TRUST_SCORE: &str = "X-Device-Trust-Score";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Warn,
    Block,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::Warn => "warn",
            Outcome::Block => "block",
        }
    }
}

/// Per-request verdict; never persisted.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Decision {
    pub fingerprint: Fingerprint,
    pub instantaneous_risk: f64,
    pub trust_score: f64,
    pub status: DeviceStatus,
    pub outcome: Outcome,
    pub flags: Vec<&'static str>,
    pub confidence: f64,
    /// Origin exceeded its request ceiling; callers may answer 429.
    pub rate_limited: bool,
    /// Ledger was unreachable and the verdict is stateless.
    pub degraded: bool,
    pub request_count: u64,
}

/// Automatic transition applied before every decision. Blocked is sticky.
pub fn apply_status(
    current: DeviceStatus,
    trust_score: f64,
    thresholds: &DecisionThresholds,
) -> DeviceStatus {
    match current {
        DeviceStatus::Blocked => DeviceStatus::Blocked,
        _ if trust_score < thresholds.suspicious_trust => DeviceStatus::Suspicious,
        _ => DeviceStatus::Trusted,
    }
}

/// First match wins: block, then warn, then allow.
pub fn outcome_for(status: DeviceStatus, risk: f64, thresholds: &DecisionThresholds) -> Outcome {
    if status == DeviceStatus::Blocked || risk >= thresholds.block {
        Outcome::Block
    } else if risk >= thresholds.warn || status == DeviceStatus::Suspicious {
        Outcome::Warn
    } else {
        Outcome::Allow
    }
}

pub fn decide(
    record: &DeviceRecord,
    risk: &InstantaneousRisk,
    thresholds: &DecisionThresholds,
) -> Decision {
    let status = apply_status(record.status, record.trust_score, thresholds);
    Decision {
        fingerprint: record.fingerprint.clone(),
        instantaneous_risk: risk.value,
        trust_score: record.trust_score,
        status,
        outcome: outcome_for(status, risk.value, thresholds),
        flags: risk.flags.clone(),
        confidence: risk.confidence,
        rate_limited: false,
        degraded: false,
        request_count: record.request_count,
    }
}

impl Decision {
    /// Stateless verdict used while the ledger is unreachable: the device is
    /// treated as Suspicious but only a blocking risk level is enforced.
    pub fn stateless(
        fingerprint: Fingerprint,
        risk: &InstantaneousRisk,
        trust_score: f64,
        thresholds: &DecisionThresholds,
    ) -> Decision {
        let outcome = if risk.value >= thresholds.block {
            Outcome::Block
        } else {
            Outcome::Allow
        };
        let mut flags = risk.flags.clone();
        flags.push(FLAG_LEDGER_UNAVAILABLE);
        Decision {
            fingerprint,
            instantaneous_risk: risk.value,
            trust_score,
            status: DeviceStatus::Suspicious,
            outcome,
            flags,
            confidence: risk.confidence,
            rate_limited: false,
            degraded: true,
            request_count: 0,
        }
    }

    /// Verdict for an unexpected internal fault: allow with zero risk.
    pub fn internal_fault(fingerprint: Fingerprint) -> Decision {
        Decision {
            fingerprint,
            instantaneous_risk: 0.0,
            trust_score: 0.0,
            status: DeviceStatus::Suspicious,
            outcome: Outcome::Allow,
            flags: vec![FLAG_INTERNAL_SCORING_ERROR],
            confidence: 0.0,
            rate_limited: false,
            degraded: true,
            request_count: 0,
        }
    }

    pub fn mark_rate_limited(&mut self) {
        self.rate_limited = true;
        if !self.flags.contains(&FLAG_RATE_LIMIT_EXCEEDED) {
            self.flags.push(FLAG_RATE_LIMIT_EXCEEDED);
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| *f == flag)
    }

    /// Correlation and diagnostic headers for the caller's response.
    pub fn response_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (HEADER_FINGERPRINT, self.fingerprint.to_string()),
            (HEADER_TRUST_SCORE, format!("{:.3}", self.trust_score)),
        ]
    }

    pub fn block_payload(&self) -> Option<BlockPayload> {
        match self.outcome {
            Outcome::Block => Some(BlockPayload::for_decision(self)),
            _ => None,
        }
    }
}
