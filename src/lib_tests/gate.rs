// src/lib_tests/gate.rs
// End-to-end behavior of the request gate.

use std::sync::Arc;
use std::thread;

use crate::config::Config;
use crate::enforcement::decision::{
    Outcome, FLAG_INTERNAL_SCORING_ERROR, FLAG_LEDGER_UNAVAILABLE, FLAG_RATE_LIMIT_EXCEEDED,
    HEADER_FINGERPRINT,
};
use crate::ledger::{DeviceLedger, DeviceStatus, InMemoryLedger, KvLedger, RiskEventKind};
use crate::signals::fingerprint::derive;
use crate::signals::observation::RequestObservation;
use crate::signals::request_risk::FLAG_BOT_DETECTED;
use crate::store::InMemoryKvStore;
use crate::test_support::{
    desktop_observation, PanickingAlertSink, PanickingLedger, RecordingAlertSink,
};
use crate::TrustGate;

const NOW: u64 = 1_700_000_040;
const ORIGIN: &str = "81.2.69.160";
const CRAWLER: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

fn gate_with_sink() -> (TrustGate<InMemoryLedger, InMemoryKvStore>, Arc<RecordingAlertSink>) {
    let sink = Arc::new(RecordingAlertSink::default());
    let gate = TrustGate::in_memory(Config::default()).with_alert_sink(sink.clone());
    (gate, sink)
}

#[test]
fn first_plausible_request_is_allowed_and_recorded() {
    let (gate, sink) = gate_with_sink();
    let decision = gate.evaluate_at(&desktop_observation(ORIGIN), NOW);
    assert_eq!(decision.outcome, Outcome::Allow);
    assert_eq!(decision.instantaneous_risk, 0.0);
    assert_eq!(decision.request_count, 1);
    assert_eq!(decision.status, DeviceStatus::Trusted);
    assert_eq!(decision.confidence, 1.0);
    assert!(decision.flags.is_empty());
    assert!(sink.alerts().is_empty());

    let record = gate.ledger().get(&decision.fingerprint).unwrap().unwrap();
    assert_eq!(record.request_count, 1);
    assert_eq!(record.first_seen, NOW);
    assert_eq!(
        decision.response_headers()[0],
        (HEADER_FINGERPRINT, decision.fingerprint.to_string())
    );
}

#[test]
fn returning_clean_device_earns_trust_slowly() {
    let (gate, _) = gate_with_sink();
    let obs = desktop_observation(ORIGIN);
    let first = gate.evaluate_at(&obs, NOW);
    let mut last = first.clone();
    for i in 1..10 {
        last = gate.evaluate_at(&obs, NOW + i);
    }
    assert_eq!(last.fingerprint, first.fingerprint);
    assert_eq!(last.request_count, 10);
    assert!(last.trust_score > first.trust_score);
    assert!(last.trust_score - first.trust_score <= 9.0 * gate.config().trust.tenure_gain);
}

#[test]
fn automation_identifier_is_flagged_and_alerted() {
    let (gate, sink) = gate_with_sink();
    let obs = RequestObservation::new(ORIGIN, Some(CRAWLER)).with_endpoint("/api/orders");
    let decision = gate.evaluate_at(&obs, NOW);
    assert!(decision.has_flag(FLAG_BOT_DETECTED));
    assert!(decision.instantaneous_risk >= 0.5);
    assert_ne!(decision.outcome, Outcome::Allow);

    let alerts = sink.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].endpoint.as_deref(), Some("/api/orders"));
    assert_eq!(alerts[0].fingerprint, decision.fingerprint.to_string());
    assert!(alerts[0].flags.contains(&FLAG_BOT_DETECTED));
}

#[test]
fn manual_block_overrides_zero_risk_until_manual_trust() {
    let (gate, sink) = gate_with_sink();
    let obs = desktop_observation(ORIGIN);
    let fp = gate.evaluate_at(&obs, NOW).fingerprint;

    gate.force_status(fp.as_str(), DeviceStatus::Blocked, "ops").unwrap();
    let blocked = gate.evaluate_at(&obs, NOW + 1);
    assert_eq!(blocked.instantaneous_risk, 0.0);
    assert_eq!(blocked.outcome, Outcome::Block);
    assert!(blocked.block_payload().is_some());
    assert_eq!(sink.outcomes(), vec![Outcome::Block]);

    gate.force_status(fp.as_str(), DeviceStatus::Trusted, "ops").unwrap();
    let restored = gate.evaluate_at(&obs, NOW + 2);
    assert_eq!(restored.outcome, Outcome::Allow);
    assert_eq!(restored.status, DeviceStatus::Trusted);

    let counts = gate.counts().unwrap();
    assert_eq!(counts.total, 1);
    assert_eq!(counts.trusted, 1);
}

#[test]
fn ledger_outage_falls_back_to_stateless_verdict() {
    let ledger_store = Arc::new(InMemoryKvStore::new());
    let ledger = KvLedger::new(Arc::clone(&ledger_store), "default", Default::default());
    let sink = Arc::new(RecordingAlertSink::default());
    let gate = TrustGate::new(Config::default(), ledger, InMemoryKvStore::new())
        .with_alert_sink(sink.clone());
    ledger_store.set_available(false);

    let clean = gate.evaluate_at(&desktop_observation(ORIGIN), NOW);
    assert_eq!(clean.outcome, Outcome::Allow);
    assert_eq!(clean.status, DeviceStatus::Suspicious);
    assert!(clean.degraded);
    assert!(clean.has_flag(FLAG_LEDGER_UNAVAILABLE));

    let scripted = gate.evaluate_at(&RequestObservation::new(ORIGIN, Some("curl/8.4")), NOW);
    assert_eq!(scripted.outcome, Outcome::Block);
    assert!(scripted.degraded);

    ledger_store.set_available(true);
    let recovered = gate.evaluate_at(&desktop_observation(ORIGIN), NOW + 1);
    assert!(!recovered.degraded);
    assert_eq!(recovered.request_count, 1);
}

#[test]
fn rate_breach_marks_every_device_behind_the_origin() {
    let (gate, _) = gate_with_sink();
    let neighbour = desktop_observation(ORIGIN).with_attributes(Default::default());
    let neighbour_fp = gate.evaluate_at(&neighbour, NOW).fingerprint;

    let obs = desktop_observation(ORIGIN);
    let ceiling = gate.config().rate_limit.ceiling as usize;
    let decisions: Vec<_> = (0..150).map(|_| gate.evaluate_at(&obs, NOW)).collect();

    // The neighbour already consumed one slot of the window.
    let first_limited = decisions.iter().position(|d| d.rate_limited).unwrap();
    assert_eq!(first_limited, ceiling - 1);
    assert!(decisions[first_limited].has_flag(FLAG_RATE_LIMIT_EXCEEDED));
    assert!(decisions[first_limited..].iter().all(|d| d.rate_limited));

    let own = gate.ledger().get(&derive(&obs)).unwrap().unwrap();
    assert_eq!(own.events_of(RiskEventKind::RateExceeded), 1);
    assert_eq!(own.request_count, 150);
    let other = gate.ledger().get(&neighbour_fp).unwrap().unwrap();
    assert_eq!(other.events_of(RiskEventKind::RateExceeded), 1);
}

#[test]
fn internal_fault_allows_with_flag() {
    let sink = Arc::new(RecordingAlertSink::default());
    let gate = TrustGate::new(Config::default(), PanickingLedger, InMemoryKvStore::new())
        .with_alert_sink(sink.clone());
    let decision = gate.evaluate_at(&RequestObservation::new(ORIGIN, Some("curl/8.4")), NOW);
    assert_eq!(decision.outcome, Outcome::Allow);
    assert_eq!(decision.instantaneous_risk, 0.0);
    assert_eq!(decision.flags, vec![FLAG_INTERNAL_SCORING_ERROR]);
    assert!(sink.alerts().is_empty());
}

#[test]
fn failing_alert_sink_keeps_the_block() {
    let obs = desktop_observation(ORIGIN);
    let gate =
        TrustGate::in_memory(Config::default()).with_alert_sink(Arc::new(PanickingAlertSink));
    let fp = gate.evaluate_at(&obs, NOW).fingerprint;
    gate.force_status(fp.as_str(), DeviceStatus::Blocked, "ops").unwrap();

    let decision = gate.evaluate_at(&obs, NOW + 1);
    assert_eq!(decision.outcome, Outcome::Block);
    assert_eq!(decision.status, DeviceStatus::Blocked);
    assert_eq!(decision.request_count, 2);
    assert!(!decision.has_flag(FLAG_INTERNAL_SCORING_ERROR));

    let crawler = gate.evaluate_at(&RequestObservation::new(ORIGIN, Some(CRAWLER)), NOW + 2);
    assert!(crawler.has_flag(FLAG_BOT_DETECTED));
    assert_ne!(crawler.outcome, Outcome::Allow);
}

#[test]
fn neighbour_burst_costs_a_shared_origin_device_one_event() {
    let (gate, _) = gate_with_sink();
    let neighbour = desktop_observation(ORIGIN);
    for _ in 0..51 {
        gate.evaluate_at(&neighbour, NOW);
    }
    let before = gate.ledger().get(&derive(&neighbour)).unwrap().unwrap();

    let burster = RequestObservation::new(ORIGIN, Some(CRAWLER));
    for _ in 0..101 {
        gate.evaluate_at(&burster, NOW);
    }
    let mut last = None;
    for minute in 1..=120 {
        last = Some(gate.evaluate_at(&neighbour, NOW + minute * 60));
    }
    let last = last.unwrap();

    let after = gate.ledger().get(&derive(&neighbour)).unwrap().unwrap();
    assert_eq!(after.events_of(RiskEventKind::RateExceeded), 1);
    let one_event = gate.config().trust.event_penalty * crate::ledger::Severity::High.multiplier();
    assert!(
        after.trust_score >= before.trust_score - one_event,
        "trust fell from {} to {}",
        before.trust_score,
        after.trust_score
    );
    assert_eq!(last.status, DeviceStatus::Trusted);
}

#[test]
fn principal_on_observation_is_linked_and_alerted() {
    let (gate, sink) = gate_with_sink();
    let obs = RequestObservation::new(ORIGIN, Some(CRAWLER)).with_principal("user-17");
    let decision = gate.evaluate_at(&obs, NOW);
    let record = gate.device(decision.fingerprint.as_str()).unwrap().unwrap();
    assert_eq!(record.principal_id.as_deref(), Some("user-17"));
    assert_eq!(sink.alerts()[0].principal_id.as_deref(), Some("user-17"));
}

#[test]
fn concurrent_requests_for_one_device_lose_no_updates() {
    let mut cfg = Config::default();
    cfg.rate_limit.ceiling = 10_000;
    let gate = Arc::new(TrustGate::in_memory(cfg));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let obs = desktop_observation(ORIGIN);
                for _ in 0..25 {
                    gate.evaluate_at(&obs, NOW);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let fp = derive(&desktop_observation(ORIGIN));
    let record = gate.ledger().get(&fp).unwrap().unwrap();
    assert_eq!(record.request_count, 200);
    assert_eq!(gate.counts().unwrap().total, 1);
}
