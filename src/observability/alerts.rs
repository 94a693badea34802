// src/observability/alerts.rs
// Structured security alerts for Warn and Block verdicts.

use serde::Serialize;
use tracing::warn;

use crate::enforcement::decision::{Decision, Outcome};
use crate::signals::observation::RequestObservation;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SecurityAlert {
    pub fingerprint: String,
    pub origin: String,
    pub instantaneous_risk: f64,
    pub flags: Vec<&'static str>,
    pub trust_score: f64,
    pub request_count: u64,
    pub endpoint: Option<String>,
    pub principal_id: Option<String>,
    pub outcome: Outcome,
    pub ts: u64,
}

impl SecurityAlert {
    /// Alert for a Warn or Block verdict; `None` for Allow.
    pub fn from_decision(
        decision: &Decision,
        observation: &RequestObservation,
        principal_id: Option<&str>,
        ts: u64,
    ) -> Option<SecurityAlert> {
        if decision.outcome == Outcome::Allow {
            return None;
        }
        Some(SecurityAlert {
            fingerprint: decision.fingerprint.to_string(),
            origin: observation.origin.clone(),
            instantaneous_risk: decision.instantaneous_risk,
            flags: decision.flags.clone(),
            trust_score: decision.trust_score,
            request_count: decision.request_count,
            endpoint: observation.endpoint.clone(),
            principal_id: principal_id
                .or(observation.principal_id.as_deref())
                .map(str::to_string),
            outcome: decision.outcome,
            ts,
        })
    }
}

/// Destination for security alerts, injected into the gate.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &SecurityAlert);
}

/// Default sink: one structured `warn` event per alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, alert: &SecurityAlert) {
        let flags = alert.flags.join(",");
        warn!(
            outcome = alert.outcome.as_str(),
            fingerprint = %alert.fingerprint,
            origin = %alert.origin,
            risk = alert.instantaneous_risk,
            trust = alert.trust_score,
            requests = alert.request_count,
            endpoint = alert.endpoint.as_deref().unwrap_or("-"),
            principal = alert.principal_id.as_deref().unwrap_or("-"),
            flags = %flags,
            "device security alert"
        );
    }
}
