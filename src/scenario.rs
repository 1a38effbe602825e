use std::time::Duration;

use crate::mobility::Vec2;
use crate::node::DccNode;
use crate::sim::SimTime;

/// The set of vehicles taking part in a run.
pub struct Fleet {
    nodes: Vec<DccNode>,
}

impl Fleet {
    pub fn new(nodes: Vec<DccNode>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = &DccNode> {
        self.nodes.iter()
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut DccNode {
        &mut self.nodes[idx]
    }

    pub fn positions(&self, now: SimTime) -> Vec<Vec2> {
        self.nodes.iter().map(|n| n.position(now)).collect()
    }

    /// Bridge observation: mean channel busy ratio over the fleet.
    pub fn mean_busy_ratio(&self, now: SimTime, window: Duration) -> f64 {
        self.mean(|n| n.channel_busy_ratio(now, window))
    }

    /// Bridge reward: mean age-of-information score over the fleet.
    pub fn mean_age_of_information(&self, now: SimTime, horizon: Duration) -> f64 {
        self.mean(|n| n.age_of_information_score(now, horizon))
    }

    fn mean(&self, f: impl Fn(&DccNode) -> f64) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        self.active_nodes().map(f).sum::<f64>() / self.nodes.len() as f64
    }
}
