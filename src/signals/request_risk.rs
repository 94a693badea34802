// src/signals/request_risk.rs
// Stateless per-request risk score built from additive, configurable rules.

use serde::Serialize;
use thiserror::Error;

use super::botness::{RiskSignal, SignalAccumulator};
use super::ip_identity;
use super::observation::RequestObservation;
use super::user_agent;
use crate::config::Config;

pub const FLAG_PRIVATE_ORIGIN: &str = "PRIVATE_ORIGIN";
pub const FLAG_MISSING_IDENTIFIER: &str = "MISSING_IDENTIFIER";
pub const FLAG_SHORT_IDENTIFIER: &str = "SHORT_IDENTIFIER";
pub const FLAG_BOT_DETECTED: &str = "BOT_DETECTED";
pub const FLAG_PLATFORM_MISMATCH: &str = "PLATFORM_MISMATCH";
pub const FLAG_COOKIES_DISABLED: &str = "COOKIES_DISABLED";
pub const FLAG_DO_NOT_TRACK: &str = "DO_NOT_TRACK";
pub const FLAG_HEADLESS_SUSPECTED: &str = "HEADLESS_SUSPECTED";
pub const FLAG_IMPLAUSIBLE_CPU_COUNT: &str = "IMPLAUSIBLE_CPU_COUNT";
pub const FLAG_IMPLAUSIBLE_DEVICE_MEMORY: &str = "IMPLAUSIBLE_DEVICE_MEMORY";

const RULE_COUNT: usize = 9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("risk rules produced a non-finite total ({0})")]
    NonFiniteScore(f64),
}

/// Stateless suspicion for a single request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InstantaneousRisk {
    pub value: f64,
    /// Names of the rules that fired, in evaluation order.
    pub flags: Vec<&'static str>,
    pub signals: Vec<RiskSignal>,
    /// Share of optional attributes present; never part of `value`.
    pub confidence: f64,
}

impl InstantaneousRisk {
    pub fn zero() -> Self {
        InstantaneousRisk {
            value: 0.0,
            flags: Vec::new(),
            signals: Vec::new(),
            confidence: 0.0,
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| *f == flag)
    }
}

pub fn score(
    observation: &RequestObservation,
    cfg: &Config,
) -> Result<InstantaneousRisk, ScoringError> {
    let weights = &cfg.risk_weights;
    let limits = &cfg.risk_limits;
    let attrs = &observation.attributes;
    let identifier = observation.identifier_str();
    let mut acc = SignalAccumulator::with_capacity(RULE_COUNT);

    acc.push(RiskSignal::scored(
        FLAG_PRIVATE_ORIGIN,
        "Origin in private or reserved range",
        ip_identity::is_private_or_reserved(&observation.origin),
        weights.private_origin,
    ));

    acc.push(match identifier {
        None => RiskSignal::scored(
            FLAG_MISSING_IDENTIFIER,
            "Identifying string absent",
            true,
            weights.missing_identifier,
        ),
        Some(id) => RiskSignal::scored(
            FLAG_SHORT_IDENTIFIER,
            "Identifying string implausibly short",
            id.chars().count() < limits.min_identifier_len,
            weights.missing_identifier,
        ),
    });

    acc.push(match identifier {
        Some(id) => RiskSignal::scored(
            FLAG_BOT_DETECTED,
            "Automation signature in identifying string",
            user_agent::automation_signature(id, &limits.automation_signatures).is_some(),
            weights.automation_signature,
        ),
        None => RiskSignal::unavailable(FLAG_BOT_DETECTED, "Automation signature in identifying string"),
    });

    acc.push(match (identifier, attrs.platform.as_deref()) {
        (Some(id), Some(platform)) => RiskSignal::scored(
            FLAG_PLATFORM_MISMATCH,
            "Declared platform contradicts identifying string",
            user_agent::platform_mismatch(id, platform),
            weights.platform_mismatch,
        ),
        _ => RiskSignal::unavailable(
            FLAG_PLATFORM_MISMATCH,
            "Declared platform contradicts identifying string",
        ),
    });

    acc.push(match attrs.cookies_enabled {
        Some(enabled) => RiskSignal::scored(
            FLAG_COOKIES_DISABLED,
            "Cookies disabled",
            !enabled,
            weights.cookies_disabled,
        ),
        None => RiskSignal::unavailable(FLAG_COOKIES_DISABLED, "Cookies disabled"),
    });

    // Do-not-track is recorded for explanation only and never penalized.
    acc.push(match attrs.do_not_track {
        Some(dnt) => RiskSignal::informational(FLAG_DO_NOT_TRACK, "Do-not-track requested", dnt),
        None => RiskSignal::unavailable(FLAG_DO_NOT_TRACK, "Do-not-track requested"),
    });

    let graphics_absent = attrs.canvas_signature.is_none() && attrs.webgl_signature.is_none();
    let sparse_fonts = attrs
        .fonts
        .as_ref()
        .map(|fonts| fonts.len() < limits.min_font_count)
        .unwrap_or(false);
    acc.push(RiskSignal::scored(
        FLAG_HEADLESS_SUSPECTED,
        "Rendering signatures absent or sparse font list",
        graphics_absent || sparse_fonts,
        weights.headless,
    ));

    acc.push(match attrs.hardware_concurrency {
        Some(cpus) => RiskSignal::scored(
            FLAG_IMPLAUSIBLE_CPU_COUNT,
            "Logical CPU count above consumer ceiling",
            cpus > limits.max_hardware_concurrency,
            weights.implausible_cpu,
        ),
        None => RiskSignal::unavailable(
            FLAG_IMPLAUSIBLE_CPU_COUNT,
            "Logical CPU count above consumer ceiling",
        ),
    });

    acc.push(match attrs.device_memory {
        Some(memory) => RiskSignal::scored(
            FLAG_IMPLAUSIBLE_DEVICE_MEMORY,
            "Device memory above consumer ceiling",
            memory > limits.max_device_memory_gb,
            weights.implausible_memory,
        ),
        None => RiskSignal::unavailable(
            FLAG_IMPLAUSIBLE_DEVICE_MEMORY,
            "Device memory above consumer ceiling",
        ),
    });

    let raw = acc.raw_score();
    if !raw.is_finite() {
        return Err(ScoringError::NonFiniteScore(raw));
    }
    let (value, signals) = acc.finish();
    let flags = signals
        .iter()
        .filter(|signal| signal.active)
        .map(|signal| signal.key)
        .collect();

    Ok(InstantaneousRisk {
        value,
        flags,
        signals,
        confidence: attrs.confidence(),
    })
}
