use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// DCC congestion states, least to most congested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionState {
    Relaxed,
    Active,
    Restrictive,
}

impl CongestionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CongestionState::Relaxed => "relaxed",
            CongestionState::Active => "active",
            CongestionState::Restrictive => "restrictive",
        }
    }
}

impl fmt::Display for CongestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hysteresis thresholds on the channel busy ratio.
///
/// Field order matches the action vector exchanged with the agent:
/// `[relaxed_to_active, active_to_relaxed, active_to_restrictive, restrictive_to_active]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSet {
    pub relaxed_to_active: f64,
    pub active_to_relaxed: f64,
    pub active_to_restrictive: f64,
    pub restrictive_to_active: f64,
}

impl ThresholdSet {
    pub const LEN: usize = 4;

    /// Builds a set from an action vector; `None` unless it holds exactly four values.
    pub fn from_action(values: &[f64]) -> Option<Self> {
        match *values {
            [relaxed_to_active, active_to_relaxed, active_to_restrictive, restrictive_to_active] => {
                Some(Self {
                    relaxed_to_active,
                    active_to_relaxed,
                    active_to_restrictive,
                    restrictive_to_active,
                })
            }
            _ => None,
        }
    }

    pub fn to_action(&self) -> [f64; Self::LEN] {
        [
            self.relaxed_to_active,
            self.active_to_relaxed,
            self.active_to_restrictive,
            self.restrictive_to_active,
        ]
    }
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            relaxed_to_active: 0.3,
            active_to_relaxed: 0.2,
            active_to_restrictive: 0.6,
            restrictive_to_active: 0.5,
        }
    }
}

/// Beacon interval used in each congestion state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeaconIntervals {
    pub relaxed: Duration,
    pub active: Duration,
    pub restrictive: Duration,
}

impl BeaconIntervals {
    pub fn for_state(&self, state: CongestionState) -> Duration {
        match state {
            CongestionState::Relaxed => self.relaxed,
            CongestionState::Active => self.active,
            CongestionState::Restrictive => self.restrictive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CongestionState,
    pub to: CongestionState,
}

pub struct CongestionMachine {
    state: CongestionState,
    transitions: u64,
}

impl CongestionMachine {
    /// Starts in `Restrictive` until occupancy data says otherwise.
    pub fn new() -> Self {
        Self {
            state: CongestionState::Restrictive,
            transitions: 0,
        }
    }

    pub fn state(&self) -> CongestionState {
        self.state
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Evaluates one sampling tick. At most one state change happens per call.
    ///
    /// `ratio_up` comes from the short (ramp-up) window, `ratio_down` from the
    /// long (ramp-down) window. Escalation is checked before de-escalation.
    pub fn tick(
        &mut self,
        ratio_up: f64,
        ratio_down: f64,
        thresholds: &ThresholdSet,
    ) -> Option<Transition> {
        let next = match self.state {
            CongestionState::Relaxed if ratio_up >= thresholds.relaxed_to_active => {
                CongestionState::Active
            }
            CongestionState::Active if ratio_up >= thresholds.active_to_restrictive => {
                CongestionState::Restrictive
            }
            CongestionState::Active if ratio_down < thresholds.active_to_relaxed => {
                CongestionState::Relaxed
            }
            CongestionState::Restrictive if ratio_down < thresholds.restrictive_to_active => {
                CongestionState::Active
            }
            _ => return None,
        };

        let transition = Transition {
            from: self.state,
            to: next,
        };
        debug!(
            "DCC state {} -> {} (up {:.3}, down {:.3})",
            transition.from, transition.to, ratio_up, ratio_down
        );
        self.state = next;
        self.transitions += 1;
        Some(transition)
    }
}

impl Default for CongestionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> ThresholdSet {
        ThresholdSet::default()
    }

    #[test]
    fn test_starts_restrictive() {
        let machine = CongestionMachine::new();
        assert_eq!(machine.state(), CongestionState::Restrictive);
        assert_eq!(machine.transitions(), 0);
    }

    #[test]
    fn test_restrictive_steps_down_once_per_tick() {
        let mut machine = CongestionMachine::new();
        let t = thresholds();
        // far below every threshold: still only one step
        let tr = machine.tick(0.0, 0.0, &t);
        assert_eq!(
            tr,
            Some(Transition {
                from: CongestionState::Restrictive,
                to: CongestionState::Active
            })
        );
        assert_eq!(machine.state(), CongestionState::Active);

        machine.tick(0.0, 0.0, &t);
        assert_eq!(machine.state(), CongestionState::Relaxed);
        assert_eq!(machine.transitions(), 2);
    }

    #[test]
    fn test_restrictive_holds_above_threshold() {
        let mut machine = CongestionMachine::new();
        let t = thresholds();
        assert_eq!(machine.tick(0.0, t.restrictive_to_active, &t), None);
        assert_eq!(machine.state(), CongestionState::Restrictive);
    }

    #[test]
    fn test_escalation_takes_precedence() {
        let mut machine = CongestionMachine::new();
        let t = thresholds();
        machine.tick(0.0, 0.0, &t);
        assert_eq!(machine.state(), CongestionState::Active);

        // ratio_down alone would move to Relaxed
        let tr = machine.tick(t.active_to_restrictive, 0.0, &t);
        assert_eq!(tr.map(|t| t.to), Some(CongestionState::Restrictive));
    }

    #[test]
    fn test_relaxed_escalates_at_threshold() {
        let mut machine = CongestionMachine::new();
        let t = thresholds();
        machine.tick(0.0, 0.0, &t);
        machine.tick(0.0, 0.0, &t);
        assert_eq!(machine.state(), CongestionState::Relaxed);

        assert_eq!(machine.tick(t.relaxed_to_active - 0.01, 1.0, &t), None);
        // even a fully busy channel only moves one step
        let tr = machine.tick(1.0, 1.0, &t);
        assert_eq!(tr.map(|t| t.to), Some(CongestionState::Active));
    }

    #[test]
    fn test_active_holds_between_thresholds() {
        let mut machine = CongestionMachine::new();
        let t = thresholds();
        machine.tick(0.0, 0.0, &t);
        assert_eq!(machine.tick(0.4, 0.4, &t), None);
        assert_eq!(machine.state(), CongestionState::Active);
    }

    #[test]
    fn test_thresholds_follow_action_order() {
        let set = ThresholdSet::from_action(&[0.11, 0.22, 0.33, 0.44]).unwrap();
        assert_eq!(set.relaxed_to_active, 0.11);
        assert_eq!(set.active_to_relaxed, 0.22);
        assert_eq!(set.active_to_restrictive, 0.33);
        assert_eq!(set.restrictive_to_active, 0.44);
        assert_eq!(set.to_action(), [0.11, 0.22, 0.33, 0.44]);
    }

    #[test]
    fn test_action_of_wrong_length_is_rejected() {
        assert!(ThresholdSet::from_action(&[]).is_none());
        assert!(ThresholdSet::from_action(&[0.1, 0.2, 0.3]).is_none());
        assert!(ThresholdSet::from_action(&[0.1, 0.2, 0.3, 0.4, 0.5]).is_none());
    }

    #[test]
    fn test_interval_per_state() {
        let intervals = BeaconIntervals {
            relaxed: Duration::from_millis(100),
            active: Duration::from_millis(200),
            restrictive: Duration::from_millis(500),
        };
        assert_eq!(
            intervals.for_state(CongestionState::Restrictive),
            Duration::from_millis(500)
        );
        assert_eq!(
            intervals.for_state(CongestionState::Relaxed),
            Duration::from_millis(100)
        );
    }
}
