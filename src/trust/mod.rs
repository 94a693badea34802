// src/trust/mod.rs
// Longitudinal trust update: slow to earn, fast to lose, damped per request.

use crate::config::Config;
use crate::config::TrustTuning;
use crate::enforcement::decision::apply_status;
use crate::ledger::{DeviceRecord, DeviceSeed, DeviceStatus, RiskEvent, RiskEventKind, Severity};
use crate::signals::ip_identity::normalize_origin;
use crate::signals::observation::RequestObservation;
use crate::signals::request_risk::InstantaneousRisk;


/// Known-origin count above which a new origin is logged as High severity.
const ORIGIN_FANOUT_HIGH: usize = 3;
const TENURE_FLOOR: f64 = 0.5;

/// Summary of one update, for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustDelta {
    pub previous: f64,
    pub current: f64,
    pub events_added: usize,
    pub auto_blocked: bool,
}

/// Seed for a never-seen fingerprint: `seed_ceiling * (1 - risk)`.
pub fn seed(risk: &InstantaneousRisk, cfg: &Config, now: u64) -> DeviceSeed {
    let risk_value = clamp_unit(risk.value);
    DeviceSeed {
        now,
        trust_score: clamp_unit(cfg.trust.seed_ceiling * (1.0 - risk_value)),
    }
}

/// Ramps from 0.5 to 1.0 as the device accumulates history.
pub fn tenure_factor(request_count: u64, saturation: u64) -> f64 {
    if saturation == 0 {
        return 1.0;
    }
    let progress = (request_count.min(saturation) as f64) / saturation as f64;
    TENURE_FLOOR + (1.0 - TENURE_FLOOR) * progress
}

/// Clean requests needed before one maximal-risk request can be offset.
pub fn min_recovery_requests(tuning: &TrustTuning) -> u64 {
    if tuning.tenure_gain <= 0.0 || !tuning.tenure_gain.is_finite() {
        return u64::MAX;
    }
    (tuning.risk_damping / tuning.tenure_gain).ceil().max(1.0) as u64
}

/// Applies one observation to the record. Must stay free of side effects:
/// ledger implementations may replay it against a fresher copy.
pub fn update(
    record: &mut DeviceRecord,
    observation: &RequestObservation,
    risk: &InstantaneousRisk,
    cfg: &Config,
    now: u64,
) -> TrustDelta {
    let tuning = &cfg.trust;
    let bounds = &cfg.ledger;
    let previous = record.trust_score;
    let events_before = record.risk_events.len();
    let first_sighting = record.request_count == 0;
    let risk_value = clamp_unit(risk.value);

    let origin = normalize_origin(&observation.origin);
    if record.remember_origin(&origin, bounds.max_known_origins) && !first_sighting {
        let severity = if record.known_origins.len() > ORIGIN_FANOUT_HIGH {
            Severity::High
        } else {
            Severity::Medium
        };
        record.push_event(
            RiskEvent::new(RiskEventKind::OriginChanged, now, severity, origin.clone()),
            bounds.max_risk_events,
        );
    }

    if let Some(identifier) = observation.identifier_str() {
        if record.remember_identifier(identifier, bounds.max_known_identifiers) && !first_sighting
        {
            record.push_event(
                RiskEvent::new(
                    RiskEventKind::IdentifierChanged,
                    now,
                    Severity::Medium,
                    identifier,
                ),
                bounds.max_risk_events,
            );
        }
    }

    if let Some(principal) = observation.principal_id.as_deref() {
        link_principal(record, principal, now, bounds.max_risk_events);
    }

    let risky = risk_value >= cfg.thresholds.warn;
    record.risky_streak = if risky {
        record.risky_streak.saturating_add(1)
    } else {
        0
    };

    if !first_sighting {
        record.trust_score = next_score(record, risk_value, risky, cfg, now);
        record.events_charged = record.events_logged;
    }

    let mut auto_blocked = false;
    if tuning.auto_block_streak > 0
        && record.risky_streak >= tuning.auto_block_streak
        && record.status != DeviceStatus::Blocked
    {
        record.status = DeviceStatus::Blocked;
        record.push_event(
            RiskEvent::new(
                RiskEventKind::AutoBlocked,
                now,
                Severity::Critical,
                format!("{} consecutive risky requests", record.risky_streak),
            ),
            bounds.max_risk_events,
        );
        auto_blocked = true;
    }

    record.status = apply_status(record.status, record.trust_score, &cfg.thresholds);
    record.request_count = record.request_count.saturating_add(1);
    record.last_seen = record.last_seen.max(now);

    TrustDelta {
        previous,
        current: record.trust_score,
        events_added: record.risk_events.len().saturating_sub(events_before),
        auto_blocked,
    }
}

/// Links `principal` to the record, logging the change. Returns false when
/// it was already linked.
pub fn link_principal(
    record: &mut DeviceRecord,
    principal: &str,
    now: u64,
    max_events: usize,
) -> bool {
    let principal = principal.trim();
    if principal.is_empty() || record.principal_id.as_deref() == Some(principal) {
        return false;
    }
    let severity = if record.principal_id.is_some() {
        Severity::Medium
    } else {
        Severity::Low
    };
    record.principal_id = Some(principal.to_string());
    record.push_event(
        RiskEvent::new(RiskEventKind::PrincipalLinked, now, severity, principal),
        max_events,
    );
    true
}

/// Logs a rate-ceiling breach at most once per window. Returns whether an
/// event was appended.
pub fn record_rate_breach(
    record: &mut DeviceRecord,
    window_start: u64,
    now: u64,
    count: u32,
    max_events: usize,
) -> bool {
    let already_logged = record
        .risk_events
        .iter()
        .any(|event| event.kind == RiskEventKind::RateExceeded && event.ts >= window_start);
    if already_logged {
        return false;
    }
    record.push_event(
        RiskEvent::new(
            RiskEventKind::RateExceeded,
            now,
            Severity::High,
            format!("{} requests in window", count),
        ),
        max_events,
    );
    true
}

fn next_score(
    record: &DeviceRecord,
    risk_value: f64,
    risky: bool,
    cfg: &Config,
    now: u64,
) -> f64 {
    let tuning = &cfg.trust;
    let current = clamp_unit(record.trust_score);

    let gain = if risky {
        0.0
    } else {
        tuning.tenure_gain
            * (1.0 - current)
            * tenure_factor(record.request_count, tuning.tenure_saturation_requests)
    };

    // Each event is charged once, on the first update after it is logged.
    let cutoff = now.saturating_sub(tuning.recent_event_window_secs);
    let event_weight: f64 = record
        .uncharged_events()
        .filter(|event| event.ts >= cutoff && event.kind.is_behavioral())
        .map(|event| event.severity.multiplier())
        .sum();
    let event_penalty = tuning.event_penalty * event_weight;

    let compounding = record.risky_streak.clamp(1, tuning.compound_cap.max(1)) as f64;
    let risk_penalty = risk_value * tuning.risk_damping * compounding;

    let next = current + gain - event_penalty - risk_penalty;
    if next.is_finite() {
        next.clamp(0.0, 1.0)
    } else {
        current
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
