// src/runtime/gate.rs
// Single entry point: fingerprint, rate ceiling, risk, ledger update, trust,
// decision. Total by construction; nothing escapes `evaluate`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::admin::{self, AdminError};
use crate::config::Config;
use crate::enforcement::decision::{decide, Decision};
use crate::enforcement::rate::{now_ts, RateDecision, RateGovernor};
use crate::ledger::{DeviceCounts, DeviceLedger, DeviceRecord, DeviceStatus, InMemoryLedger};
use crate::observability::{AlertSink, SecurityAlert, TracingAlertSink};
use crate::signals::fingerprint::{self, Fingerprint};
use crate::signals::observation::RequestObservation;
use crate::signals::request_risk::{self, InstantaneousRisk, ScoringError};
use crate::store::{InMemoryKvStore, KeyValueStore, StoreError};
use crate::trust;

/// Request gate over an injected device ledger and rate-counter store.
pub struct TrustGate<L, S> {
    cfg: Config,
    ledger: L,
    rate: RateGovernor<S>,
    alerts: Arc<dyn AlertSink>,
}

impl TrustGate<InMemoryLedger, InMemoryKvStore> {
    /// Process-local gate for a single instance.
    pub fn in_memory(cfg: Config) -> Self {
        let ledger = InMemoryLedger::new(cfg.ledger.clone());
        TrustGate::new(cfg, ledger, InMemoryKvStore::new())
    }
}

impl<L: DeviceLedger, S: KeyValueStore> TrustGate<L, S> {
    pub fn new(cfg: Config, ledger: L, rate_store: S) -> Self {
        let cfg = cfg.normalized();
        let rate = RateGovernor::new(rate_store, &cfg.site_id, cfg.rate_limit.clone());
        TrustGate {
            cfg,
            ledger,
            rate,
            alerts: Arc::new(TracingAlertSink),
        }
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = sink;
        self
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn rate_governor(&self) -> &RateGovernor<S> {
        &self.rate
    }

    pub fn evaluate(&self, observation: &RequestObservation) -> Decision {
        self.evaluate_at(observation, now_ts())
    }

    pub fn evaluate_at(&self, observation: &RequestObservation, now: u64) -> Decision {
        let fingerprint =
            match panic::catch_unwind(AssertUnwindSafe(|| fingerprint::derive(observation))) {
                Ok(fp) => fp,
                Err(payload) => {
                    return self.internal_fault(
                        Fingerprint::unidentified(),
                        observation,
                        &panic_reason(payload.as_ref()),
                    )
                }
            };

        let (decision, principal) = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_pipeline(observation, &fingerprint, now)
        })) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                return self.internal_fault(fingerprint, observation, &err.to_string())
            }
            Err(payload) => {
                return self.internal_fault(
                    fingerprint,
                    observation,
                    &panic_reason(payload.as_ref()),
                )
            }
        };

        self.emit_alert(&decision, observation, principal.as_deref(), now);
        decision
    }

    pub fn force_status(
        &self,
        fingerprint: &str,
        status: DeviceStatus,
        actor: &str,
    ) -> Result<DeviceRecord, AdminError> {
        admin::force_status(&self.ledger, &self.cfg, fingerprint, status, actor, now_ts())
    }

    pub fn link_principal(
        &self,
        fingerprint: &str,
        principal_id: &str,
    ) -> Result<DeviceRecord, AdminError> {
        admin::link_principal(&self.ledger, &self.cfg, fingerprint, principal_id, now_ts())
    }

    pub fn device(&self, fingerprint: &str) -> Result<Option<DeviceRecord>, AdminError> {
        admin::device(&self.ledger, fingerprint)
    }

    pub fn counts(&self) -> Result<DeviceCounts, AdminError> {
        admin::counts(&self.ledger)
    }

    fn run_pipeline(
        &self,
        observation: &RequestObservation,
        fingerprint: &Fingerprint,
        now: u64,
    ) -> Result<(Decision, Option<String>), ScoringError> {
        let rate = self.rate.admit_at(&observation.origin, now);
        let risk = request_risk::score(observation, &self.cfg)?;

        let (mut decision, principal) =
            match self.record_observation(observation, fingerprint, &risk, rate, now) {
                Ok(record) => (
                    decide(&record, &risk, &self.cfg.thresholds),
                    record.principal_id,
                ),
                Err(err) => {
                    error!(
                        fingerprint = %fingerprint,
                        origin = %observation.origin,
                        error = %err,
                        "device ledger unavailable; using stateless verdict"
                    );
                    let seed = trust::seed(&risk, &self.cfg, now);
                    let decision = Decision::stateless(
                        fingerprint.clone(),
                        &risk,
                        seed.trust_score,
                        &self.cfg.thresholds,
                    );
                    (decision, None)
                }
            };

        if let RateDecision::Limited { count } = rate {
            decision.mark_rate_limited();
            self.broadcast_rate_breach(observation, fingerprint, count, now);
        }

        Ok((decision, principal))
    }

    /// A failing sink is logged and never changes the decision.
    fn emit_alert(
        &self,
        decision: &Decision,
        observation: &RequestObservation,
        principal: Option<&str>,
        now: u64,
    ) {
        let Some(alert) = SecurityAlert::from_decision(decision, observation, principal, now)
        else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.alerts.emit(&alert))) {
            error!(
                fingerprint = %decision.fingerprint,
                outcome = decision.outcome.as_str(),
                reason = %panic_reason(payload.as_ref()),
                "alert sink failed"
            );
        }
    }

    fn record_observation(
        &self,
        observation: &RequestObservation,
        fingerprint: &Fingerprint,
        risk: &InstantaneousRisk,
        rate: RateDecision,
        now: u64,
    ) -> Result<DeviceRecord, StoreError> {
        let seed = trust::seed(risk, &self.cfg, now);
        let window_start = self.rate.window_start(now);
        let max_events = self.cfg.ledger.max_risk_events;
        let mut delta = None;

        let record = self.ledger.update(fingerprint, &seed, |record| {
            if let RateDecision::Limited { count } = rate {
                trust::record_rate_breach(record, window_start, now, count, max_events);
            }
            delta = Some(trust::update(record, observation, risk, &self.cfg, now));
        })?;

        let origin_key = self.rate.origin_key(&observation.origin);
        if let Err(err) = self.ledger.index_origin(&origin_key, fingerprint) {
            warn!(origin = %origin_key, error = %err, "failed to index device origin");
        }

        if let Some(delta) = delta {
            debug!(
                fingerprint = %fingerprint,
                previous = delta.previous,
                current = delta.current,
                events = delta.events_added,
                requests = record.request_count,
                "device trust updated"
            );
            if delta.auto_blocked {
                warn!(
                    fingerprint = %fingerprint,
                    streak = record.risky_streak,
                    "device blocked after consecutive risky requests"
                );
            }
        }
        Ok(record)
    }

    /// Adds a RateExceeded event to the other devices seen from the origin.
    fn broadcast_rate_breach(
        &self,
        observation: &RequestObservation,
        current: &Fingerprint,
        count: u32,
        now: u64,
    ) {
        let origin_key = self.rate.origin_key(&observation.origin);
        let window_start = self.rate.window_start(now);
        let max_events = self.cfg.ledger.max_risk_events;
        let fingerprints = match self.ledger.fingerprints_for_origin(&origin_key) {
            Ok(fingerprints) => fingerprints,
            Err(err) => {
                warn!(origin = %origin_key, error = %err, "cannot list devices for rate breach");
                return;
            }
        };
        for other in fingerprints.iter().filter(|fp| *fp != current) {
            let result = self.ledger.update_existing(other, |record| {
                trust::record_rate_breach(record, window_start, now, count, max_events);
            });
            if let Err(err) = result {
                warn!(fingerprint = %other, error = %err, "failed to record rate breach");
            }
        }
    }

    fn internal_fault(
        &self,
        fingerprint: Fingerprint,
        observation: &RequestObservation,
        reason: &str,
    ) -> Decision {
        error!(
            fingerprint = %fingerprint,
            origin = %observation.origin,
            reason,
            "internal scoring fault; allowing request"
        );
        Decision::internal_fault(fingerprint)
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
