use serde::{Deserialize, Serialize};

use crate::congestion::{CongestionState, ThresholdSet};

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RunReport {
    pub simulated_secs: f64,
    pub events_processed: u64,
    pub bridge_enabled: bool,
    pub bridge_steps: u64,
    pub thresholds: ThresholdSet,
    pub mean_busy_ratio: f64,
    pub mean_age_of_information: f64,
    pub nodes: Vec<NodeReport>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct NodeReport {
    pub id: String,
    pub state: CongestionState,
    pub transitions: u64,
    pub beacon_interval_secs: f64,
    pub beacons_sent: u64,
    pub beacons_received: u64,
    pub neighbors: usize,
    pub busy_ratio: f64,
    pub age_of_information: f64,
}
