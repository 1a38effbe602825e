use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info};

use crate::beacon::BeaconTimer;
use crate::bridge::{BridgeError, BridgeSession};
use crate::config::Config;
use crate::medium::Medium;
use crate::mobility::LinearMobility;
use crate::node::{Beacon, DccNode};
use crate::scenario::Fleet;
use crate::state::RunReport;

/// Simulated time since the start of the run.
pub type SimTime = Duration;

#[derive(Debug, Clone)]
pub enum Event {
    BeaconTimer { node: usize, timer: BeaconTimer },
    StateCheck { node: usize },
    ChannelRelease { node: usize },
    Deliver { node: usize, beacon: Rc<Beacon> },
    BridgeStep,
}

struct Scheduled {
    at: SimTime,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // BinaryHeap is a max-heap; reverse so the earliest event pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending events ordered by time, FIFO among equal timestamps.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: SimTime, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { at, seq, event });
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|s| s.at)
    }

    pub fn pop(&mut self) -> Option<(SimTime, Event)> {
        self.heap.pop().map(|s| (s.at, s.event))
    }

    /// Pops the next event unless it lies after `limit`.
    pub fn pop_until(&mut self, limit: SimTime) -> Option<(SimTime, Event)> {
        match self.peek_time() {
            Some(at) if at <= limit => self.pop(),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Single-threaded discrete-event loop driving every node and the bridge.
///
/// The only await point is the bridge round trip, during which simulated
/// time does not advance.
pub struct Simulation {
    now: SimTime,
    end: SimTime,
    queue: EventQueue,
    fleet: Fleet,
    medium: Medium,
    bridge: BridgeSession,
    rng: StdRng,
    state_check_interval: Duration,
    step_interval: Duration,
    observation_window: Duration,
    aoi_horizon: Duration,
    events_processed: u64,
}

const YIELD_EVERY: u64 = 4096;

impl Simulation {
    pub fn new(config: &Config, bridge: BridgeSession) -> Self {
        let dcc = &config.dcc;
        let retention = dcc
            .ramp_up_window
            .max(dcc.ramp_down_window)
            .max(config.bridge.observation_window);

        let nodes: Vec<DccNode> = config
            .all_vehicles()
            .into_iter()
            .map(|v| {
                DccNode::new(
                    v.id,
                    Box::new(LinearMobility::new(v.position, v.velocity)),
                    dcc,
                    retention,
                    bridge.subscribe(),
                )
            })
            .collect();
        let medium = Medium::new(&config.medium, nodes.len());

        Self {
            now: Duration::ZERO,
            end: config.simulation.duration,
            queue: EventQueue::new(),
            fleet: Fleet::new(nodes),
            medium,
            bridge,
            rng: StdRng::seed_from_u64(config.simulation.seed),
            state_check_interval: dcc.state_check_interval,
            step_interval: config.bridge.step_interval,
            observation_window: config.bridge.observation_window,
            aoi_horizon: dcc.age_of_information_horizon,
            events_processed: 0,
        }
    }

    /// Runs the bridge handshake and arms every node's timers.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        let observation = self.fleet.mean_busy_ratio(self.now, self.observation_window);
        let reward = self.fleet.mean_age_of_information(self.now, self.aoi_horizon);
        self.bridge.init(vec![observation], vec![reward]).await?;

        for idx in 0..self.fleet.len() {
            let timer = self.fleet.node_mut(idx).start(self.now, &mut self.rng);
            self.queue.schedule(timer.at, Event::BeaconTimer { node: idx, timer });

            let offset = self.rng.gen_range(0.0..self.state_check_interval.as_secs_f64());
            self.queue.schedule(
                self.now + Duration::from_secs_f64(offset),
                Event::StateCheck { node: idx },
            );
        }
        self.queue
            .schedule(self.now + self.step_interval, Event::BridgeStep);

        info!(
            "Simulation started with {} nodes for {:?}",
            self.fleet.len(),
            self.end
        );
        Ok(())
    }

    /// Processes events until the end time is reached or the queue drains.
    pub async fn run(&mut self) -> Result<(), BridgeError> {
        while let Some((at, event)) = self.queue.pop_until(self.end) {
            self.now = at;
            self.handle(event).await?;

            self.events_processed += 1;
            if self.events_processed % YIELD_EVERY == 0 {
                // let signal handlers in between bridge steps
                tokio::task::yield_now().await;
            }
        }
        self.now = self.end;
        Ok(())
    }

    async fn handle(&mut self, event: Event) -> Result<(), BridgeError> {
        let now = self.now;
        match event {
            Event::BeaconTimer { node, timer } => {
                let Some((beacon, next)) = self.fleet.node_mut(node).on_beacon_timer(timer, now)
                else {
                    return Ok(());
                };
                self.queue
                    .schedule(next.at, Event::BeaconTimer { node, timer: next });
                self.transmit(node, beacon);
            }
            Event::StateCheck { node } => {
                if let Some(timer) = self.fleet.node_mut(node).on_state_check(now, &mut self.rng) {
                    self.queue
                        .schedule(timer.at, Event::BeaconTimer { node, timer });
                }
                self.queue
                    .schedule(now + self.state_check_interval, Event::StateCheck { node });
            }
            Event::ChannelRelease { node } => {
                if self.medium.end(node) {
                    self.fleet.node_mut(node).on_channel_event(now, false);
                }
            }
            Event::Deliver { node, beacon } => {
                self.fleet.node_mut(node).on_beacon_received(&beacon, now);
            }
            Event::BridgeStep => {
                let observation = self.fleet.mean_busy_ratio(now, self.observation_window);
                let reward = self.fleet.mean_age_of_information(now, self.aoi_horizon);
                debug!(
                    "Bridge step at {:?}: observation {:.3}, reward {:.3}",
                    now, observation, reward
                );
                self.bridge.step(vec![observation], vec![reward]).await?;
                self.queue.schedule(now + self.step_interval, Event::BridgeStep);
            }
        }
        Ok(())
    }

    fn transmit(&mut self, sender: usize, beacon: Beacon) {
        let now = self.now;
        let positions = self.fleet.positions(now);
        let tx = self.medium.transmit(sender, &positions, beacon.payload_bits);
        let done = now + tx.airtime;
        let beacon = Rc::new(beacon);

        for &listener in &tx.listeners {
            if self.medium.begin(listener) {
                self.fleet.node_mut(listener).on_channel_event(now, true);
            }
            self.queue
                .schedule(done, Event::ChannelRelease { node: listener });
            if listener != sender {
                self.queue.schedule(
                    done,
                    Event::Deliver {
                        node: listener,
                        beacon: Rc::clone(&beacon),
                    },
                );
            }
        }
    }

    /// Sends Shutdown to the agent and summarizes the run.
    pub async fn finish(&mut self) -> Result<RunReport, BridgeError> {
        for idx in 0..self.fleet.len() {
            self.fleet.node_mut(idx).stop();
        }
        self.bridge.shutdown().await?;
        Ok(self.report())
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            simulated_secs: self.now.as_secs_f64(),
            events_processed: self.events_processed,
            bridge_enabled: self.bridge.is_enabled(),
            bridge_steps: self.bridge.steps(),
            thresholds: self.bridge.thresholds(),
            mean_busy_ratio: self.fleet.mean_busy_ratio(self.now, self.observation_window),
            mean_age_of_information: self
                .fleet
                .mean_age_of_information(self.now, self.aoi_horizon),
            nodes: self
                .fleet
                .active_nodes()
                .map(|n| n.report(self.now, self.aoi_horizon))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Policy, serve_session};
    use crate::config::{BridgeConfig, FleetConfig};
    use crate::congestion::{CongestionState, ThresholdSet};
    use crate::transport::{FramedStream, bind_listener};

    fn config(count: usize, duration: Duration) -> Config {
        let mut cfg = Config {
            fleet: Some(FleetConfig {
                count,
                spacing_m: 20.0,
                speed_mps: 10.0,
            }),
            ..Config::default()
        };
        cfg.simulation.duration = duration;
        cfg
    }

    #[test]
    fn test_queue_orders_by_time_then_insertion() {
        let mut q = EventQueue::new();
        q.schedule(Duration::from_millis(20), Event::StateCheck { node: 2 });
        q.schedule(Duration::from_millis(10), Event::StateCheck { node: 0 });
        q.schedule(Duration::from_millis(10), Event::StateCheck { node: 1 });
        let order: Vec<_> = std::iter::from_fn(|| q.pop())
            .map(|(at, e)| match e {
                Event::StateCheck { node } => (at.as_millis(), node),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![(10, 0), (10, 1), (20, 2)]);
        assert!(q.is_empty());

        q.schedule(Duration::from_secs(2), Event::BridgeStep);
        assert!(q.pop_until(Duration::from_secs(1)).is_none());
        assert_eq!(q.len(), 1);
        assert!(q.pop_until(Duration::from_secs(2)).is_some());
    }

    #[tokio::test]
    async fn test_nodes_hear_each_other() {
        let cfg = config(3, Duration::from_secs(3));
        let bridge = BridgeSession::disabled(cfg.dcc.thresholds);
        let mut sim = Simulation::new(&cfg, bridge);
        sim.start().await.unwrap();
        sim.run().await.unwrap();
        let report = sim.finish().await.unwrap();

        assert_eq!(report.nodes.len(), 3);
        assert!(!report.bridge_enabled);
        assert_eq!(report.bridge_steps, 0);
        assert_eq!(report.simulated_secs, 3.0);
        for node in &report.nodes {
            assert!(node.beacons_sent > 0);
            assert_eq!(node.neighbors, 2);
            assert!(node.beacons_received > 0);
            assert!((0.0..=1.0).contains(&node.busy_ratio));
        }
    }

    #[tokio::test]
    async fn test_light_load_relaxes() {
        // a handful of short beacons keeps the channel almost idle
        let cfg = config(2, Duration::from_secs(10));
        let bridge = BridgeSession::disabled(cfg.dcc.thresholds);
        let mut sim = Simulation::new(&cfg, bridge);
        sim.start().await.unwrap();
        sim.run().await.unwrap();
        let report = sim.report();
        for node in &report.nodes {
            assert_eq!(node.state, CongestionState::Relaxed, "{:?}", node);
            assert_eq!(node.transitions, 2);
        }
    }

    #[tokio::test]
    async fn test_agent_thresholds_reach_every_node() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = listener.local_addr().unwrap().port();
        let agent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // nothing ever drops below 0, so no node leaves Restrictive
            let mut policy = Policy::Fixed([1.0, 0.0, 1.0, 0.0]);
            serve_session(FramedStream::new(stream).unwrap(), &mut policy).await
        });

        let mut cfg = config(3, Duration::from_millis(3500));
        cfg.bridge = BridgeConfig {
            enable: true,
            host: Some("127.0.0.1".to_string()),
            port: Some(port),
            ..BridgeConfig::default()
        };
        let bridge = BridgeSession::connect(&cfg.bridge, cfg.dcc.thresholds)
            .await
            .unwrap();
        let mut sim = Simulation::new(&cfg, bridge);
        sim.start().await.unwrap();
        sim.run().await.unwrap();
        let report = sim.finish().await.unwrap();

        // initial step plus one per second
        assert_eq!(report.bridge_steps, 4);
        assert_eq!(
            report.thresholds,
            ThresholdSet::from_action(&[1.0, 0.0, 1.0, 0.0]).unwrap()
        );
        for node in &report.nodes {
            assert_eq!(node.state, CongestionState::Restrictive);
            assert_eq!(node.transitions, 0);
        }

        let summary = agent.await.unwrap().unwrap();
        assert!(summary.shut_down);
        assert_eq!(summary.steps, 4);
        let obs = summary.last_observation[0];
        assert!((0.0..=1.0).contains(&obs));
    }
}
