use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tracing::trace;

use crate::beacon::{BeaconScheduler, BeaconTimer};
use crate::config::DccConfig;
use crate::congestion::{BeaconIntervals, CongestionMachine, ThresholdSet};
use crate::mobility::{Mobility, Vec2};
use crate::neighbor::NeighborTable;
use crate::occupancy::OccupancyWindow;
use crate::sim::SimTime;
use crate::state::NodeReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Broadcast,
}

/// Periodic status broadcast sent by every node.
#[derive(Debug, Clone, PartialEq)]
pub struct Beacon {
    pub recipient: Recipient,
    pub payload_bits: u32,
    pub sender_position: Vec2,
    pub sender_velocity: Vec2,
    pub sender_id: String,
    pub sender_state: String,
    pub priority: u8,
}

/// One DCC application instance.
///
/// All methods are event callbacks driven by the simulation loop; none of
/// them run concurrently for the same node.
pub struct DccNode {
    id: String,
    mobility: Box<dyn Mobility>,
    occupancy: OccupancyWindow,
    machine: CongestionMachine,
    beacon: BeaconScheduler,
    neighbors: NeighborTable,
    thresholds: watch::Receiver<ThresholdSet>,
    intervals: BeaconIntervals,
    ramp_up_window: Duration,
    ramp_down_window: Duration,
    payload_bits: u32,
    priority: u8,
    neighbor_max_age: Option<Duration>,
    beacons_received: u64,
}

impl DccNode {
    /// `retention` bounds the occupancy history and must cover the longest
    /// window this node will be asked about.
    pub fn new(
        id: String,
        mobility: Box<dyn Mobility>,
        dcc: &DccConfig,
        retention: Duration,
        thresholds: watch::Receiver<ThresholdSet>,
    ) -> Self {
        let machine = CongestionMachine::new();
        let intervals = dcc.intervals();
        Self {
            id,
            mobility,
            occupancy: OccupancyWindow::new(retention, dcc.empty_history),
            beacon: BeaconScheduler::new(intervals.for_state(machine.state())),
            machine,
            neighbors: NeighborTable::new(dcc.aoi_scoring),
            thresholds,
            intervals,
            ramp_up_window: dcc.ramp_up_window,
            ramp_down_window: dcc.ramp_down_window,
            payload_bits: dcc.payload_bits(),
            priority: dcc.beacon_priority,
            neighbor_max_age: dcc.neighbor_max_age,
            beacons_received: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> crate::congestion::CongestionState {
        self.machine.state()
    }

    pub fn position(&self, now: SimTime) -> Vec2 {
        self.mobility.position_at(now)
    }

    #[cfg(test)]
    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn beacon_interval(&self) -> Duration {
        self.beacon.interval()
    }

    pub fn start(&mut self, now: SimTime, rng: &mut impl Rng) -> BeaconTimer {
        self.beacon.start(now, rng)
    }

    /// Disarms the beacon timer; any queued expiry becomes stale.
    pub fn stop(&mut self) {
        self.beacon.cancel();
    }

    pub fn on_channel_event(&mut self, now: SimTime, busy: bool) {
        trace!("{}: channel {} at {:?}", self.id, if busy { "busy" } else { "idle" }, now);
        self.occupancy.push(now, busy);
    }

    pub fn channel_busy_ratio(&self, now: SimTime, window: Duration) -> f64 {
        self.occupancy.channel_busy_ratio(now, window)
    }

    pub fn age_of_information_score(&self, now: SimTime, horizon: Duration) -> f64 {
        self.neighbors.age_of_information_score(now, horizon)
    }

    /// Sampling tick. Returns the replacement beacon timer when the state changed.
    pub fn on_state_check(&mut self, now: SimTime, rng: &mut impl Rng) -> Option<BeaconTimer> {
        if let Some(max_age) = self.neighbor_max_age {
            self.neighbors.evict_older_than(now, max_age);
        }

        let ratio_up = self.occupancy.channel_busy_ratio(now, self.ramp_up_window);
        let ratio_down = self.occupancy.channel_busy_ratio(now, self.ramp_down_window);
        let thresholds = *self.thresholds.borrow();

        let transition = self.machine.tick(ratio_up, ratio_down, &thresholds)?;
        let interval = self.intervals.for_state(transition.to);
        Some(self.beacon.reschedule(interval, now, rng))
    }

    /// Beacon timer expiry. Stale timers yield nothing.
    pub fn on_beacon_timer(
        &mut self,
        timer: BeaconTimer,
        now: SimTime,
    ) -> Option<(Beacon, BeaconTimer)> {
        let next = self.beacon.fire(timer)?;
        let beacon = Beacon {
            recipient: Recipient::Broadcast,
            payload_bits: self.payload_bits,
            sender_position: self.mobility.position_at(now),
            sender_velocity: self.mobility.velocity(),
            sender_id: self.id.clone(),
            sender_state: self.machine.state().to_string(),
            priority: self.priority,
        };
        Some((beacon, next))
    }

    pub fn on_beacon_received(&mut self, beacon: &Beacon, now: SimTime) {
        self.beacons_received += 1;
        self.neighbors.on_beacon(beacon, now);
    }

    pub fn report(&self, now: SimTime, horizon: Duration) -> NodeReport {
        NodeReport {
            id: self.id.clone(),
            state: self.machine.state(),
            transitions: self.machine.transitions(),
            beacon_interval_secs: self.beacon_interval().as_secs_f64(),
            beacons_sent: self.beacon.fired(),
            beacons_received: self.beacons_received,
            neighbors: self.neighbors.len(),
            busy_ratio: self.channel_busy_ratio(now, self.ramp_up_window),
            age_of_information: self.age_of_information_score(now, horizon),
        }
    }
}
