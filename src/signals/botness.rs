use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalAvailability {
    Active,
    Disabled,
    Unavailable,
}

/// Outcome of one risk rule. `key` doubles as the flag name when active.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RiskSignal {
    pub key: &'static str,
    pub label: &'static str,
    pub active: bool,
    pub contribution: f64,
    pub availability: SignalAvailability,
}

impl RiskSignal {
    /// A zero weight switches the rule off entirely.
    pub fn scored(key: &'static str, label: &'static str, active: bool, weight: f64) -> Self {
        if weight == 0.0 {
            return Self::disabled(key, label);
        }
        let contribution = if active { weight } else { 0.0 };
        Self {
            key,
            label,
            active,
            contribution,
            availability: SignalAvailability::Active,
        }
    }

    /// Active but never contributes to the score.
    pub fn informational(key: &'static str, label: &'static str, active: bool) -> Self {
        Self {
            key,
            label,
            active,
            contribution: 0.0,
            availability: SignalAvailability::Active,
        }
    }

    pub fn disabled(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            active: false,
            contribution: 0.0,
            availability: SignalAvailability::Disabled,
        }
    }

    /// The attribute the rule reads was not declared by the client.
    pub fn unavailable(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            active: false,
            contribution: 0.0,
            availability: SignalAvailability::Unavailable,
        }
    }
}

#[derive(Debug, Default)]
pub struct SignalAccumulator {
    score: f64,
    signals: Vec<RiskSignal>,
}

impl SignalAccumulator {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            score: 0.0,
            signals: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, signal: RiskSignal) {
        self.score += signal.contribution;
        self.signals.push(signal);
    }

    /// Raw (unclamped) total; may be non-finite if a weight was.
    pub fn raw_score(&self) -> f64 {
        self.score
    }

    pub fn finish(self) -> (f64, Vec<RiskSignal>) {
        (self.score.clamp(0.0, 1.0), self.signals)
    }
}

#[cfg(test)]
mod tests {
    use super::{RiskSignal, SignalAccumulator, SignalAvailability};

    #[test]
    fn accumulator_keeps_signal_order_and_score() {
        let mut accumulator = SignalAccumulator::with_capacity(2);
        accumulator.push(RiskSignal::scored("a", "A", true, 0.3));
        accumulator.push(RiskSignal::scored("b", "B", false, 0.3));

        let (score, signals) = accumulator.finish();
        assert!((score - 0.3).abs() < 1e-9);
        assert_eq!(signals[0].key, "a");
        assert_eq!(signals[1].key, "b");
        assert_eq!(signals[0].availability, SignalAvailability::Active);
        assert_eq!(signals[1].contribution, 0.0);
    }

    #[test]
    fn accumulator_saturates_to_unit_interval() {
        let mut accumulator = SignalAccumulator::with_capacity(2);
        accumulator.push(RiskSignal::scored("a", "A", true, 0.9));
        accumulator.push(RiskSignal::scored("b", "B", true, 0.9));

        let (score, _signals) = accumulator.finish();
        assert_eq!(score, 1.0);
    }

    #[test]
    fn informational_signals_are_active_with_zero_contribution() {
        let signal = RiskSignal::informational("dnt", "Do-not-track", true);
        assert!(signal.active);
        assert_eq!(signal.contribution, 0.0);
    }

    #[test]
    fn disabled_and_unavailable_signals_are_explicit_zero_contribution() {
        let disabled = RiskSignal::disabled("a", "A");
        let unavailable = RiskSignal::unavailable("b", "B");

        assert_eq!(disabled.contribution, 0.0);
        assert!(!disabled.active);
        assert_eq!(disabled.availability, SignalAvailability::Disabled);

        assert_eq!(unavailable.contribution, 0.0);
        assert!(!unavailable.active);
        assert_eq!(unavailable.availability, SignalAvailability::Unavailable);
    }
}
