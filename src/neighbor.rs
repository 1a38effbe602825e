use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::mobility::Vec2;
use crate::node::Beacon;
use crate::sim::SimTime;

/// Maps the age of a neighbor record to a freshness score in `[0, 1]`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AoiScoring {
    /// `max(0, 1 - age / horizon)`
    #[default]
    Linear,
    /// `exp(-age / horizon)`
    Exponential,
    /// 1 while `age <= horizon`, then 0
    Step,
}

impl AoiScoring {
    pub fn score(self, age: Duration, horizon: Duration) -> f64 {
        let age = age.as_secs_f64();
        let horizon = horizon.as_secs_f64();
        if horizon <= 0.0 {
            return if age <= 0.0 { 1.0 } else { 0.0 };
        }
        match self {
            AoiScoring::Linear => (1.0 - age / horizon).max(0.0),
            AoiScoring::Exponential => (-age / horizon).exp(),
            AoiScoring::Step => {
                if age <= horizon {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeighborRecord {
    pub peer_id: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub sender_state: String,
    pub last_heard: SimTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    New,
    Updated { elapsed: Duration },
}

pub struct NeighborTable {
    records: HashMap<String, NeighborRecord>,
    scoring: AoiScoring,
}

impl NeighborTable {
    pub fn new(scoring: AoiScoring) -> Self {
        Self {
            records: HashMap::new(),
            scoring,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, peer_id: &str) -> Option<&NeighborRecord> {
        self.records.get(peer_id)
    }

    pub fn on_beacon(&mut self, beacon: &Beacon, now: SimTime) -> Upsert {
        let record = NeighborRecord {
            peer_id: beacon.sender_id.clone(),
            position: beacon.sender_position,
            velocity: beacon.sender_velocity,
            sender_state: beacon.sender_state.clone(),
            last_heard: now,
        };
        match self.records.insert(beacon.sender_id.clone(), record) {
            None => {
                info!("New neighbor {}", beacon.sender_id);
                Upsert::New
            }
            Some(previous) => {
                let elapsed = now.saturating_sub(previous.last_heard);
                debug!(
                    "Neighbor {} heard again after {:?} ({})",
                    beacon.sender_id, elapsed, beacon.sender_state
                );
                Upsert::Updated { elapsed }
            }
        }
    }

    /// Mean freshness over all known neighbors, 0.0 when there are none.
    pub fn age_of_information_score(&self, now: SimTime, horizon: Duration) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .records
            .values()
            .map(|r| self.scoring.score(now.saturating_sub(r.last_heard), horizon))
            .sum();
        total / self.records.len() as f64
    }

    /// Drops records not heard from for longer than `max_age`. Returns how many went.
    pub fn evict_older_than(&mut self, now: SimTime, max_age: Duration) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, r| now.saturating_sub(r.last_heard) <= max_age);
        let evicted = before - self.records.len();
        if evicted > 0 {
            debug!("Evicted {} stale neighbors", evicted);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Recipient;

    fn beacon(id: &str, x: f64) -> Beacon {
        Beacon {
            recipient: Recipient::Broadcast,
            payload_bits: 2488,
            sender_position: Vec2::new(x, 0.0),
            sender_velocity: Vec2::new(10.0, 0.0),
            sender_id: id.to_string(),
            sender_state: "active".to_string(),
            priority: 3,
        }
    }

    #[test]
    fn test_upsert_latest_wins() {
        let mut table = NeighborTable::new(AoiScoring::Linear);
        let t1 = Duration::from_millis(100);
        let t2 = Duration::from_millis(350);

        assert_eq!(table.on_beacon(&beacon("v1", 1.0), t1), Upsert::New);
        assert_eq!(
            table.on_beacon(&beacon("v1", 2.0), t2),
            Upsert::Updated {
                elapsed: Duration::from_millis(250)
            }
        );

        assert_eq!(table.len(), 1);
        let record = table.get("v1").unwrap();
        assert_eq!(record.last_heard, t2);
        assert_eq!(record.position, Vec2::new(2.0, 0.0));
    }

    #[test]
    fn test_score_without_neighbors_is_zero() {
        let table = NeighborTable::new(AoiScoring::Linear);
        assert_eq!(
            table.age_of_information_score(Duration::from_secs(5), Duration::from_secs(1)),
            0.0
        );
    }

    #[test]
    fn test_linear_score_averages_neighbors() {
        let mut table = NeighborTable::new(AoiScoring::Linear);
        table.on_beacon(&beacon("v1", 0.0), Duration::from_millis(1000));
        table.on_beacon(&beacon("v2", 0.0), Duration::from_millis(1500));
        // ages 1.0s and 0.5s with a 2s horizon -> 0.5 and 0.75
        let score =
            table.age_of_information_score(Duration::from_secs(2), Duration::from_secs(2));
        assert!((score - 0.625).abs() < 1e-9, "score was {}", score);
    }

    #[test]
    fn test_scoring_functions() {
        let horizon = Duration::from_secs(1);
        let half = Duration::from_millis(500);
        let late = Duration::from_secs(3);

        assert!((AoiScoring::Linear.score(half, horizon) - 0.5).abs() < 1e-9);
        assert_eq!(AoiScoring::Linear.score(late, horizon), 0.0);
        assert!((AoiScoring::Exponential.score(half, horizon) - (-0.5f64).exp()).abs() < 1e-9);
        assert_eq!(AoiScoring::Step.score(half, horizon), 1.0);
        assert_eq!(AoiScoring::Step.score(late, horizon), 0.0);
        assert_eq!(AoiScoring::Linear.score(Duration::ZERO, horizon), 1.0);
    }

    #[test]
    fn test_eviction_by_age() {
        let mut table = NeighborTable::new(AoiScoring::Step);
        table.on_beacon(&beacon("v1", 0.0), Duration::from_secs(1));
        table.on_beacon(&beacon("v2", 0.0), Duration::from_secs(4));
        let evicted = table.evict_older_than(Duration::from_secs(5), Duration::from_secs(2));
        assert_eq!(evicted, 1);
        assert!(table.get("v1").is_none());
        assert!(table.get("v2").is_some());
    }
}
