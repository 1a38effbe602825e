use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{trace, warn};

use crate::sim::SimTime;

/// How the estimator treats the part of a window with no recorded samples.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptyHistoryPolicy {
    /// Uncovered time counts as idle (empty history reads 0.0).
    Idle,
    /// Uncovered time counts as busy (empty history reads 1.0).
    #[default]
    Busy,
}

impl EmptyHistoryPolicy {
    fn uncovered_fill(self) -> f64 {
        match self {
            EmptyHistoryPolicy::Idle => 0.0,
            EmptyHistoryPolicy::Busy => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupancySample {
    pub at: SimTime,
    pub busy: bool,
}

/// Busy/idle transitions reported by the medium, oldest first.
///
/// Samples older than `retention` are pruned on every push, except for the
/// newest one at or before the cutoff: it defines the channel state at the
/// start of the longest window and must survive.
#[derive(Debug, Clone)]
pub struct OccupancyWindow {
    samples: VecDeque<OccupancySample>,
    retention: Duration,
    policy: EmptyHistoryPolicy,
}

impl OccupancyWindow {
    pub fn new(retention: Duration, policy: EmptyHistoryPolicy) -> Self {
        Self {
            samples: VecDeque::new(),
            retention,
            policy,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn latest(&self) -> Option<&OccupancySample> {
        self.samples.back()
    }

    pub fn push(&mut self, at: SimTime, busy: bool) {
        let at = match self.samples.back() {
            Some(last) if at < last.at => {
                warn!(
                    "Occupancy sample at {:?} older than newest {:?}, clamping",
                    at, last.at
                );
                last.at
            }
            _ => at,
        };
        self.samples.push_back(OccupancySample { at, busy });
        self.prune(at);
    }

    fn prune(&mut self, now: SimTime) {
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return;
        };
        // Drop the front while the next sample is still at or before the cutoff.
        while self.samples.len() > 1 && self.samples[1].at <= cutoff {
            self.samples.pop_front();
        }
    }

    /// Fraction of `[now - window, now]` during which the channel was busy.
    pub fn channel_busy_ratio(&self, now: SimTime, window: Duration) -> f64 {
        if window.is_zero() {
            return match self.samples.back() {
                Some(last) if last.busy => 1.0,
                Some(_) => 0.0,
                None => self.policy.uncovered_fill(),
            };
        }

        let window_secs = window.as_secs_f64();
        let window_start = now.as_secs_f64() - window_secs;
        let mut current = now.as_secs_f64();
        let mut busy_time = 0.0;
        let mut reached_start = false;

        for sample in self.samples.iter().rev() {
            let record_time = sample.at.as_secs_f64();
            if record_time <= window_start {
                if sample.busy {
                    busy_time += current - window_start;
                }
                reached_start = true;
                break;
            }
            if sample.busy {
                busy_time += current - record_time;
            }
            current = record_time;
        }

        if !reached_start {
            busy_time += (current - window_start) * self.policy.uncovered_fill();
        }

        trace!(
            "Channel busy time was {:.6}s for window {:?} ({} samples)",
            busy_time,
            window,
            self.samples.len()
        );
        (busy_time / window_secs).clamp(0.0, 1.0)
    }
}
