// src/config/mod.rs
// Tunables for risk scoring, trust updates, rate ceilings and decisions.
// Every weight and threshold is configurable; defaults are illustrative.

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::store::{KeyValueStore, StoreError};

const WEIGHT_MIN: f64 = 0.0;
const WEIGHT_MAX: f64 = 1.0;
const RATE_WINDOW_MIN_SECS: u64 = 1;
const RATE_WINDOW_MAX_SECS: u64 = 86_400;
const MAX_RISK_EVENTS_MIN: usize = 1;
const MAX_RISK_EVENTS_MAX: usize = 1_024;
const MAX_TRACKED_MIN: usize = 1;
const MAX_TRACKED_MAX: usize = 256;
const MAX_INDEXED_ORIGINS_MIN: usize = 64;
const MAX_INDEXED_ORIGINS_MAX: usize = 16_777_216;
const COMPOUND_CAP_MIN: u32 = 1;
const COMPOUND_CAP_MAX: u32 = 20;

const DEFAULT_AUTOMATION_SIGNATURES: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "headless",
    "phantomjs",
    "selenium",
    "webdriver",
    "puppeteer",
    "playwright",
    "curl/",
    "wget/",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "go-http-client",
    "scrapy",
    "httpclient",
    "libwww-perl",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigLoadError {
    #[error("configuration unavailable (store error)")]
    StoreUnavailable,
    #[error("configuration missing for site {0}")]
    MissingConfig(String),
    #[error("invalid configuration document: {0}")]
    InvalidConfig(String),
}

impl From<StoreError> for ConfigLoadError {
    fn from(_: StoreError) -> Self {
        ConfigLoadError::StoreUnavailable
    }
}

/// Additive weights for each request risk rule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiskWeights {
    #[serde(default = "default_weight_private_origin")]
    pub private_origin: f64,
    #[serde(default = "default_weight_identifier")]
    pub missing_identifier: f64,
    #[serde(default = "default_weight_automation")]
    pub automation_signature: f64,
    #[serde(default = "default_weight_platform_mismatch")]
    pub platform_mismatch: f64,
    #[serde(default = "default_weight_cookies_disabled")]
    pub cookies_disabled: f64,
    #[serde(default = "default_weight_headless")]
    pub headless: f64,
    #[serde(default = "default_weight_implausible_hardware")]
    pub implausible_cpu: f64,
    #[serde(default = "default_weight_implausible_hardware")]
    pub implausible_memory: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        RiskWeights {
            private_origin: default_weight_private_origin(),
            missing_identifier: default_weight_identifier(),
            automation_signature: default_weight_automation(),
            platform_mismatch: default_weight_platform_mismatch(),
            cookies_disabled: default_weight_cookies_disabled(),
            headless: default_weight_headless(),
            implausible_cpu: default_weight_implausible_hardware(),
            implausible_memory: default_weight_implausible_hardware(),
        }
    }
}

/// Plausibility limits the scorer compares declared attributes against.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiskLimits {
    #[serde(default = "default_min_identifier_len")]
    pub min_identifier_len: usize,
    #[serde(default = "default_min_font_count")]
    pub min_font_count: usize,
    #[serde(default = "default_max_hardware_concurrency")]
    pub max_hardware_concurrency: u32,
    #[serde(default = "default_max_device_memory_gb")]
    pub max_device_memory_gb: f64,
    #[serde(default = "default_automation_signatures")]
    pub automation_signatures: Vec<String>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits {
            min_identifier_len: default_min_identifier_len(),
            min_font_count: default_min_font_count(),
            max_hardware_concurrency: default_max_hardware_concurrency(),
            max_device_memory_gb: default_max_device_memory_gb(),
            automation_signatures: default_automation_signatures(),
        }
    }
}

/// Longitudinal trust update parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrustTuning {
    /// Trust assigned to a zero-risk first sighting.
    #[serde(default = "default_seed_ceiling")]
    pub seed_ceiling: f64,
    /// Upper bound on the per-request tenure increment.
    #[serde(default = "default_tenure_gain")]
    pub tenure_gain: f64,
    #[serde(default = "default_tenure_saturation_requests")]
    pub tenure_saturation_requests: u64,
    #[serde(default = "default_recent_event_window_secs")]
    pub recent_event_window_secs: u64,
    #[serde(default = "default_event_penalty")]
    pub event_penalty: f64,
    /// Fraction of instantaneous risk charged against trust per request.
    #[serde(default = "default_risk_damping")]
    pub risk_damping: f64,
    /// Cap on the multiplier applied to consecutive risky requests.
    #[serde(default = "default_compound_cap")]
    pub compound_cap: u32,
    #[serde(default = "default_manual_trust_floor")]
    pub manual_trust_floor: f64,
    /// Consecutive risky requests that block a device outright; 0 disables.
    #[serde(default)]
    pub auto_block_streak: u32,
}

impl Default for TrustTuning {
    fn default() -> Self {
        TrustTuning {
            seed_ceiling: default_seed_ceiling(),
            tenure_gain: default_tenure_gain(),
            tenure_saturation_requests: default_tenure_saturation_requests(),
            recent_event_window_secs: default_recent_event_window_secs(),
            event_penalty: default_event_penalty(),
            risk_damping: default_risk_damping(),
            compound_cap: default_compound_cap(),
            manual_trust_floor: default_manual_trust_floor(),
            auto_block_streak: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DecisionThresholds {
    #[serde(default = "default_block_threshold")]
    pub block: f64,
    #[serde(default = "default_warn_threshold")]
    pub warn: f64,
    #[serde(default = "default_suspicious_trust_threshold")]
    pub suspicious_trust: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        DecisionThresholds {
            block: default_block_threshold(),
            warn: default_warn_threshold(),
            suspicious_trust: default_suspicious_trust_threshold(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rate_ceiling")]
    pub ceiling: u32,
    /// Count IPv4 /24 and IPv6 /64 prefixes together instead of exact origins.
    #[serde(default)]
    pub bucket_origins: bool,
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit {
            window_secs: default_rate_window_secs(),
            ceiling: default_rate_ceiling(),
            bucket_origins: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LedgerBounds {
    #[serde(default = "default_max_risk_events")]
    pub max_risk_events: usize,
    #[serde(default = "default_max_tracked")]
    pub max_known_origins: usize,
    #[serde(default = "default_max_tracked")]
    pub max_known_identifiers: usize,
    #[serde(default = "default_max_fingerprints_per_origin")]
    pub max_fingerprints_per_origin: usize,
    /// Origins kept in the in-process origin index; oldest evicted first.
    #[serde(default = "default_max_indexed_origins")]
    pub max_indexed_origins: usize,
}

impl Default for LedgerBounds {
    fn default() -> Self {
        LedgerBounds {
            max_risk_events: default_max_risk_events(),
            max_known_origins: default_max_tracked(),
            max_known_identifiers: default_max_tracked(),
            max_fingerprints_per_origin: default_max_fingerprints_per_origin(),
            max_indexed_origins: default_max_indexed_origins(),
        }
    }
}

/// Configuration for one tenant site.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_site_id")]
    pub site_id: String,
    #[serde(default)]
    pub risk_weights: RiskWeights,
    #[serde(default)]
    pub risk_limits: RiskLimits,
    #[serde(default)]
    pub trust: TrustTuning,
    #[serde(default)]
    pub thresholds: DecisionThresholds,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub ledger: LedgerBounds,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            site_id: default_site_id(),
            risk_weights: RiskWeights::default(),
            risk_limits: RiskLimits::default(),
            trust: TrustTuning::default(),
            thresholds: DecisionThresholds::default(),
            rate_limit: RateLimit::default(),
            ledger: LedgerBounds::default(),
        }
    }
}

impl Config {
    pub fn from_json(bytes: &[u8]) -> Result<Config, ConfigLoadError> {
        serde_json::from_slice::<Config>(bytes)
            .map(Config::normalized)
            .map_err(|err| ConfigLoadError::InvalidConfig(err.to_string()))
    }

    /// Loads the JSON document stored at `config:{site_id}`.
    pub fn load<S: KeyValueStore + ?Sized>(
        store: &S,
        site_id: &str,
    ) -> Result<Config, ConfigLoadError> {
        let key = config_key(site_id);
        let bytes = store
            .get(&key)?
            .ok_or_else(|| ConfigLoadError::MissingConfig(site_id.to_string()))?;
        let mut cfg = Config::from_json(&bytes)?;
        cfg.site_id = site_id.to_string();
        Ok(cfg)
    }

    pub fn load_or_default<S: KeyValueStore + ?Sized>(store: &S, site_id: &str) -> Config {
        match Config::load(store, site_id) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(site_id, error = %err, "falling back to default configuration");
                Config {
                    site_id: site_id.to_string(),
                    ..Config::default()
                }
            }
        }
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<(), StoreError> {
        let key = config_key(&self.site_id);
        let bytes = serde_json::to_vec(self).map_err(|err| StoreError::Serialization {
            key: key.clone(),
            reason: err.to_string(),
        })?;
        store.set(&key, &bytes)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| env::var(name).ok());
    }

    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env_number::<u32>(lookup("DEVICE_TRUST_RATE_CEILING")) {
            self.rate_limit.ceiling = v;
        }
        if let Some(v) = parse_env_number::<u64>(lookup("DEVICE_TRUST_RATE_WINDOW_SECS")) {
            self.rate_limit.window_secs = v;
        }
        if let Some(v) = lookup("DEVICE_TRUST_BUCKET_ORIGINS") {
            self.rate_limit.bucket_origins = parse_bool_env(Some(v.as_str()));
        }
        if let Some(v) = parse_env_number::<f64>(lookup("DEVICE_TRUST_BLOCK_THRESHOLD")) {
            self.thresholds.block = v;
        }
        if let Some(v) = parse_env_number::<f64>(lookup("DEVICE_TRUST_WARN_THRESHOLD")) {
            self.thresholds.warn = v;
        }
        if let Some(v) = parse_env_number::<f64>(lookup("DEVICE_TRUST_SUSPICIOUS_THRESHOLD")) {
            self.thresholds.suspicious_trust = v;
        }
        if let Some(v) = parse_env_number::<u32>(lookup("DEVICE_TRUST_AUTO_BLOCK_STREAK")) {
            self.trust.auto_block_streak = v;
        }
        *self = std::mem::take(self).normalized();
    }

    /// Clamps every tunable into its valid range; non-finite numbers fall
    /// back to their defaults.
    pub fn normalized(mut self) -> Config {
        let w = &mut self.risk_weights;
        w.private_origin = clamp_weight(w.private_origin, default_weight_private_origin());
        w.missing_identifier = clamp_weight(w.missing_identifier, default_weight_identifier());
        w.automation_signature = clamp_weight(w.automation_signature, default_weight_automation());
        w.platform_mismatch =
            clamp_weight(w.platform_mismatch, default_weight_platform_mismatch());
        w.cookies_disabled = clamp_weight(w.cookies_disabled, default_weight_cookies_disabled());
        w.headless = clamp_weight(w.headless, default_weight_headless());
        w.implausible_cpu = clamp_weight(w.implausible_cpu, default_weight_implausible_hardware());
        w.implausible_memory =
            clamp_weight(w.implausible_memory, default_weight_implausible_hardware());

        let limits = &mut self.risk_limits;
        if !limits.max_device_memory_gb.is_finite() || limits.max_device_memory_gb <= 0.0 {
            limits.max_device_memory_gb = default_max_device_memory_gb();
        }
        limits.automation_signatures = limits
            .automation_signatures
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let t = &mut self.trust;
        t.seed_ceiling = clamp_weight(t.seed_ceiling, default_seed_ceiling());
        t.tenure_gain = clamp_weight(t.tenure_gain, default_tenure_gain());
        t.tenure_saturation_requests = t.tenure_saturation_requests.max(1);
        t.event_penalty = clamp_weight(t.event_penalty, default_event_penalty());
        t.risk_damping = clamp_weight(t.risk_damping, default_risk_damping());
        t.compound_cap = t.compound_cap.clamp(COMPOUND_CAP_MIN, COMPOUND_CAP_MAX);
        t.manual_trust_floor = clamp_weight(t.manual_trust_floor, default_manual_trust_floor());

        let th = &mut self.thresholds;
        th.block = clamp_weight(th.block, default_block_threshold());
        th.warn = clamp_weight(th.warn, default_warn_threshold()).min(th.block);
        th.suspicious_trust =
            clamp_weight(th.suspicious_trust, default_suspicious_trust_threshold());

        self.rate_limit.window_secs = self
            .rate_limit
            .window_secs
            .clamp(RATE_WINDOW_MIN_SECS, RATE_WINDOW_MAX_SECS);

        let l = &mut self.ledger;
        l.max_risk_events = l
            .max_risk_events
            .clamp(MAX_RISK_EVENTS_MIN, MAX_RISK_EVENTS_MAX);
        l.max_known_origins = l.max_known_origins.clamp(MAX_TRACKED_MIN, MAX_TRACKED_MAX);
        l.max_known_identifiers = l
            .max_known_identifiers
            .clamp(MAX_TRACKED_MIN, MAX_TRACKED_MAX);
        l.max_fingerprints_per_origin = l
            .max_fingerprints_per_origin
            .clamp(MAX_TRACKED_MIN, MAX_TRACKED_MAX);
        l.max_indexed_origins = l
            .max_indexed_origins
            .clamp(MAX_INDEXED_ORIGINS_MIN, MAX_INDEXED_ORIGINS_MAX);

        if self.site_id.trim().is_empty() {
            self.site_id = default_site_id();
        }
        self
    }
}

pub(crate) fn config_key(site_id: &str) -> String {
    format!("config:{}", site_id)
}

fn clamp_weight(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(WEIGHT_MIN, WEIGHT_MAX)
    } else {
        fallback
    }
}

pub(crate) fn parse_bool_env(value: Option<&str>) -> bool {
    value
        .map(|v| v.trim() == "1" || v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_env_number<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse::<T>().ok())
}

fn default_site_id() -> String {
    "default".to_string()
}

fn default_weight_private_origin() -> f64 {
    0.1
}

fn default_weight_identifier() -> f64 {
    0.3
}

fn default_weight_automation() -> f64 {
    0.6
}

fn default_weight_platform_mismatch() -> f64 {
    0.3
}

fn default_weight_cookies_disabled() -> f64 {
    0.1
}

fn default_weight_headless() -> f64 {
    0.3
}

fn default_weight_implausible_hardware() -> f64 {
    0.1
}

fn default_min_identifier_len() -> usize {
    10
}

fn default_min_font_count() -> usize {
    3
}

fn default_max_hardware_concurrency() -> u32 {
    64
}

fn default_max_device_memory_gb() -> f64 {
    64.0
}

fn default_automation_signatures() -> Vec<String> {
    DEFAULT_AUTOMATION_SIGNATURES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_seed_ceiling() -> f64 {
    0.6
}

fn default_tenure_gain() -> f64 {
    0.02
}

fn default_tenure_saturation_requests() -> u64 {
    200
}

fn default_recent_event_window_secs() -> u64 {
    86_400
}

fn default_event_penalty() -> f64 {
    0.005
}

fn default_risk_damping() -> f64 {
    0.15
}

fn default_compound_cap() -> u32 {
    5
}

fn default_manual_trust_floor() -> f64 {
    0.5
}

fn default_block_threshold() -> f64 {
    0.9
}

fn default_warn_threshold() -> f64 {
    0.5
}

fn default_suspicious_trust_threshold() -> f64 {
    0.3
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_rate_ceiling() -> u32 {
    100
}

fn default_max_risk_events() -> usize {
    50
}

fn default_max_tracked() -> usize {
    16
}

fn default_max_fingerprints_per_origin() -> usize {
    32
}

fn default_max_indexed_origins() -> usize {
    65_536
}
