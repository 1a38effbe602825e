use rand::Rng;
use std::time::Duration;

use crate::sim::SimTime;

/// A pending beacon firing. Only the timer carrying the scheduler's current
/// generation is live; older ones are stale once rescheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconTimer {
    pub at: SimTime,
    pub generation: u64,
}

pub struct BeaconScheduler {
    interval: Duration,
    generation: u64,
    pending: Option<SimTime>,
    fired: u64,
}

impl BeaconScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            generation: 0,
            pending: None,
            fired: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[cfg(test)]
    pub fn pending(&self) -> Option<SimTime> {
        self.pending
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Arms the first firing at a random phase in `[0, interval)`.
    pub fn start(&mut self, now: SimTime, rng: &mut impl Rng) -> BeaconTimer {
        self.arm(now + random_phase(self.interval, rng))
    }

    /// Cancels the pending firing and arms a new one with `interval` and a
    /// fresh random phase.
    pub fn reschedule(
        &mut self,
        interval: Duration,
        now: SimTime,
        rng: &mut impl Rng,
    ) -> BeaconTimer {
        self.interval = interval;
        self.arm(now + random_phase(interval, rng))
    }

    /// Handles a timer expiry. Returns the follow-up timer when `timer` was
    /// live, `None` when it had been cancelled.
    pub fn fire(&mut self, timer: BeaconTimer) -> Option<BeaconTimer> {
        if timer.generation != self.generation || self.pending != Some(timer.at) {
            return None;
        }
        self.fired += 1;
        Some(self.arm(timer.at + self.interval))
    }

    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.pending = None;
    }

    fn arm(&mut self, at: SimTime) -> BeaconTimer {
        self.generation = self.generation.wrapping_add(1);
        self.pending = Some(at);
        BeaconTimer {
            at,
            generation: self.generation,
        }
    }
}

fn random_phase(interval: Duration, rng: &mut impl Rng) -> Duration {
    if interval.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rng.gen_range(0.0..interval.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_first_firing_within_one_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let mut sched = BeaconScheduler::new(Duration::from_millis(500));
            let now = Duration::from_secs(3);
            let timer = sched.start(now, &mut rng);
            assert!(timer.at >= now);
            assert!(timer.at < now + Duration::from_millis(500));
            assert_eq!(sched.pending(), Some(timer.at));
        }
    }

    #[test]
    fn test_firing_rearms_at_interval() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut sched = BeaconScheduler::new(Duration::from_millis(100));
        let first = sched.start(Duration::ZERO, &mut rng);
        let second = sched.fire(first).unwrap();
        assert_eq!(second.at, first.at + Duration::from_millis(100));
        let third = sched.fire(second).unwrap();
        assert_eq!(third.at, second.at + Duration::from_millis(100));
        assert_eq!(sched.fired(), 2);
    }

    #[test]
    fn test_reschedule_cancels_pending_timer() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut sched = BeaconScheduler::new(Duration::from_millis(100));
        let old = sched.start(Duration::ZERO, &mut rng);
        let now = Duration::from_millis(50);
        let new = sched.reschedule(Duration::from_millis(500), now, &mut rng);

        assert!(new.at >= now && new.at < now + Duration::from_millis(500));
        assert_eq!(sched.interval(), Duration::from_millis(500));
        // the old timer is dead, only the new one fires
        assert_eq!(sched.fire(old), None);
        let next = sched.fire(new).unwrap();
        assert_eq!(next.at, new.at + Duration::from_millis(500));
        assert_eq!(sched.fired(), 1);
    }

    #[test]
    fn test_cancel_disarms() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut sched = BeaconScheduler::new(Duration::from_millis(100));
        let timer = sched.start(Duration::ZERO, &mut rng);
        sched.cancel();
        assert_eq!(sched.pending(), None);
        assert_eq!(sched.fire(timer), None);
    }
}
