//! Alert codes, states and the per-stream alert state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::threshold::Thresholds;

/// Alert codes handed to listeners.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum AlertCode {
    #[default]
    None = 0,
    Warning = 1,
    Drift = 2,
}

impl AlertCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Warning),
            2 => Some(Self::Drift),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warning => "warning",
            Self::Drift => "drift",
        }
    }
}

/// State of a stream after a batch was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    #[default]
    Stable,
    Warning,
    Drift,
    /// Quiet batch while drift alerts are suppressed.
    Cooldown,
}

/// Notification for one alerting batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub stream: Uuid,
    pub batch: u64,
    pub code: AlertCode,
    pub message: String,
    pub score: f64,
    /// Cutoff the score crossed.
    pub cutoff: f64,
    pub raised_at: DateTime<Utc>,
}

/// Result of evaluating one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub state: AlertState,
    pub code: AlertCode,
    /// A drift-level score was held back by the cooldown.
    pub suppressed: bool,
    /// Cooldown batches left after this one.
    pub cooldown_remaining: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AlertStateMachine {
    cooldown_cycles: u32,
    suppress_warnings: bool,
    remaining: u32,
    state: AlertState,
    transitions: u64,
}

impl AlertStateMachine {
    pub fn new(cooldown_cycles: u32, suppress_warnings: bool) -> Self {
        Self {
            cooldown_cycles,
            suppress_warnings,
            remaining: 0,
            state: AlertState::Stable,
            transitions: 0,
        }
    }

    /// Advance by exactly one batch.
    ///
    /// `thresholds` is `None` while the tracker is still cold; such batches
    /// never alert but still consume a cooldown cycle.
    pub fn step(&mut self, score: f64, thresholds: Option<&Thresholds>) -> Decision {
        let cooling = self.remaining > 0;
        if cooling {
            self.remaining -= 1;
        }

        let mut suppressed = false;
        let code = match thresholds {
            None => AlertCode::None,
            Some(t) if score >= t.drift && !cooling => {
                self.remaining = self.cooldown_cycles;
                AlertCode::Drift
            }
            Some(t) if score >= t.warn => {
                suppressed = cooling && score >= t.drift;
                if cooling && self.suppress_warnings {
                    AlertCode::None
                } else {
                    AlertCode::Warning
                }
            }
            Some(_) => AlertCode::None,
        };

        self.state = match code {
            AlertCode::Drift => AlertState::Drift,
            AlertCode::Warning => AlertState::Warning,
            AlertCode::None if cooling => AlertState::Cooldown,
            AlertCode::None => AlertState::Stable,
        };
        self.transitions += 1;

        Decision {
            state: self.state,
            code,
            suppressed,
            cooldown_remaining: self.remaining,
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn cooldown_remaining(&self) -> u32 {
        self.remaining
    }

    pub fn in_cooldown(&self) -> bool {
        self.remaining > 0
    }

    /// Batches evaluated so far.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cutoffs(warn: f64, drift: f64) -> Thresholds {
        Thresholds {
            mean: 0.0,
            std_dev: 1.0,
            warn,
            drift,
        }
    }

    #[test]
    fn test_cold_tracker_never_alerts() {
        let mut sm = AlertStateMachine::new(0, false);
        let d = sm.step(1e9, None);
        assert_eq!(d.code, AlertCode::None);
        assert_eq!(d.state, AlertState::Stable);
    }

    #[test]
    fn test_levels() {
        let t = cutoffs(2.0, 3.0);
        let mut sm = AlertStateMachine::new(0, false);
        assert_eq!(sm.step(1.0, Some(&t)).code, AlertCode::None);
        assert_eq!(sm.step(2.0, Some(&t)).code, AlertCode::Warning);
        assert_eq!(sm.step(3.0, Some(&t)).code, AlertCode::Drift);
        // No cooldown configured: drift can fire again straight away.
        assert_eq!(sm.step(3.0, Some(&t)).code, AlertCode::Drift);
        assert_eq!(sm.transitions(), 4);
    }

    #[test]
    fn test_equal_factors_report_drift() {
        let t = cutoffs(2.0, 2.0);
        let mut sm = AlertStateMachine::new(0, false);
        assert_eq!(sm.step(2.0, Some(&t)).code, AlertCode::Drift);
    }

    #[test]
    fn test_cooldown_suppresses_drift_for_exactly_c_batches() {
        let t = cutoffs(2.0, 3.0);
        let mut sm = AlertStateMachine::new(3, false);

        let first = sm.step(10.0, Some(&t));
        assert_eq!(first.code, AlertCode::Drift);
        assert_eq!(first.cooldown_remaining, 3);

        for left in [2, 1, 0] {
            let d = sm.step(10.0, Some(&t));
            assert_eq!(d.code, AlertCode::Warning, "drift surfaces as warning while cooling");
            assert!(d.suppressed);
            assert_eq!(d.cooldown_remaining, left);
        }

        assert_eq!(sm.step(10.0, Some(&t)).code, AlertCode::Drift);
    }

    #[test]
    fn test_quiet_batches_during_cooldown() {
        let t = cutoffs(2.0, 3.0);
        let mut sm = AlertStateMachine::new(2, false);
        sm.step(5.0, Some(&t));
        assert_eq!(sm.state(), AlertState::Drift);

        let d = sm.step(0.0, Some(&t));
        assert_eq!(d.state, AlertState::Cooldown);
        let d = sm.step(0.0, None);
        assert_eq!(d.state, AlertState::Cooldown);
        assert!(!sm.in_cooldown());
        assert_eq!(sm.step(0.0, Some(&t)).state, AlertState::Stable);
    }

    #[test]
    fn test_cooldown_can_silence_warnings() {
        let t = cutoffs(2.0, 3.0);
        let mut sm = AlertStateMachine::new(1, true);
        sm.step(5.0, Some(&t));
        let d = sm.step(5.0, Some(&t));
        assert_eq!(d.code, AlertCode::None);
        assert_eq!(d.state, AlertState::Cooldown);
        assert!(d.suppressed);
    }

    #[test]
    fn test_code_round_trip() {
        for code in [AlertCode::None, AlertCode::Warning, AlertCode::Drift] {
            assert_eq!(AlertCode::from_u8(code.as_u8()), Some(code));
        }
        assert_eq!(AlertCode::Warning.as_u8(), 1);
        assert_eq!(AlertCode::Drift.as_u8(), 2);
        assert_eq!(AlertCode::from_u8(7), None);
    }
}
