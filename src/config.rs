use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::time::Duration;

use crate::congestion::{BeaconIntervals, ThresholdSet};
use crate::mobility::Vec2;
use crate::neighbor::AoiScoring;
use crate::occupancy::EmptyHistoryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub medium: MediumConfig,
    #[serde(default)]
    pub dcc: DccConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub vehicles: Vec<VehicleConfig>,
    pub fleet: Option<FleetConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulationConfig {
    #[serde(deserialize_with = "secs")]
    pub duration: Duration,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            seed: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MediumConfig {
    pub range_m: f64,
    pub bitrate_bps: f64,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            range_m: 500.0,
            bitrate_bps: 6_000_000.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DccConfig {
    #[serde(deserialize_with = "secs")]
    pub beacon_interval_relaxed: Duration,
    #[serde(deserialize_with = "secs")]
    pub beacon_interval_active: Duration,
    #[serde(deserialize_with = "secs")]
    pub beacon_interval_restrictive: Duration,
    #[serde(deserialize_with = "secs")]
    pub state_check_interval: Duration,
    #[serde(deserialize_with = "secs")]
    pub ramp_up_window: Duration,
    #[serde(deserialize_with = "secs")]
    pub ramp_down_window: Duration,
    pub header_length_bits: u32,
    pub beacon_length_bits: u32,
    pub beacon_priority: u8,
    pub empty_history: EmptyHistoryPolicy,
    #[serde(deserialize_with = "secs")]
    pub age_of_information_horizon: Duration,
    pub aoi_scoring: AoiScoring,
    // Unbounded retention unless set
    #[serde(deserialize_with = "opt_secs")]
    pub neighbor_max_age: Option<Duration>,
    pub thresholds: ThresholdSet,
}

impl Default for DccConfig {
    fn default() -> Self {
        Self {
            beacon_interval_relaxed: Duration::from_millis(100),
            beacon_interval_active: Duration::from_millis(200),
            beacon_interval_restrictive: Duration::from_millis(500),
            state_check_interval: Duration::from_millis(100),
            ramp_up_window: Duration::from_secs(1),
            ramp_down_window: Duration::from_secs(5),
            header_length_bits: 88,
            beacon_length_bits: 2400,
            beacon_priority: 3,
            empty_history: EmptyHistoryPolicy::Busy,
            age_of_information_horizon: Duration::from_secs(1),
            aoi_scoring: AoiScoring::Linear,
            neighbor_max_age: None,
            thresholds: ThresholdSet::default(),
        }
    }
}

impl DccConfig {
    pub fn intervals(&self) -> BeaconIntervals {
        BeaconIntervals {
            relaxed: self.beacon_interval_relaxed,
            active: self.beacon_interval_active,
            restrictive: self.beacon_interval_restrictive,
        }
    }

    pub fn payload_bits(&self) -> u32 {
        self.header_length_bits.saturating_add(self.beacon_length_bits)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    pub enable: bool,
    // Empty or missing falls back to VEINS_GYM_HOST / VEINS_GYM_PORT
    pub host: Option<String>,
    pub port: Option<u16>,
    pub observation_space: String,
    pub action_space: String,
    #[serde(deserialize_with = "secs")]
    pub step_interval: Duration,
    #[serde(deserialize_with = "secs")]
    pub observation_window: Duration,
    /// Zero waits forever.
    #[serde(deserialize_with = "secs")]
    pub timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enable: false,
            host: None,
            port: None,
            observation_space: "gym.spaces.Box(low=0.0, high=1.0, shape=(1,), dtype=np.float32)"
                .to_string(),
            action_space: "gym.spaces.Box(low=0.0, high=1.0, shape=(4,), dtype=np.float32)"
                .to_string(),
            step_interval: Duration::from_secs(1),
            observation_window: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VehicleConfig {
    pub id: String,
    pub position: Vec2,
    #[serde(default)]
    pub velocity: Vec2,
}

/// Generates a column of vehicles along the x axis.
#[derive(Debug, Deserialize, Clone)]
pub struct FleetConfig {
    pub count: usize,
    #[serde(default = "default_spacing")]
    pub spacing_m: f64,
    #[serde(default)]
    pub speed_mps: f64,
}

fn default_spacing() -> f64 {
    25.0
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Explicit vehicles first, then the generated fleet.
    pub fn all_vehicles(&self) -> Vec<VehicleConfig> {
        let mut vehicles = self.vehicles.clone();
        if let Some(fleet) = &self.fleet {
            let offset = vehicles.len();
            vehicles.extend((0..fleet.count).map(|i| VehicleConfig {
                id: format!("v{}", offset + i),
                position: Vec2::new(i as f64 * fleet.spacing_m, 0.0),
                velocity: Vec2::new(fleet.speed_mps, 0.0),
            }));
        }
        vehicles
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let dcc = &self.dcc;
        let positive = [
            ("simulation.duration", self.simulation.duration),
            ("dcc.beacon_interval_relaxed", dcc.beacon_interval_relaxed),
            ("dcc.beacon_interval_active", dcc.beacon_interval_active),
            (
                "dcc.beacon_interval_restrictive",
                dcc.beacon_interval_restrictive,
            ),
            ("dcc.state_check_interval", dcc.state_check_interval),
            ("dcc.ramp_up_window", dcc.ramp_up_window),
            ("dcc.ramp_down_window", dcc.ramp_down_window),
            ("bridge.step_interval", self.bridge.step_interval),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if !(self.medium.bitrate_bps > 0.0) {
            return Err(ConfigError::Invalid(
                "medium.bitrate_bps must be positive".to_string(),
            ));
        }
        if self.medium.range_m < 0.0 {
            return Err(ConfigError::Invalid(
                "medium.range_m must not be negative".to_string(),
            ));
        }

        let vehicles = self.all_vehicles();
        if vehicles.is_empty() {
            return Err(ConfigError::Invalid(
                "no vehicles configured, add [[vehicles]] or [fleet]".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for v in &vehicles {
            if !seen.insert(v.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate vehicle id '{}'", v.id)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(value).map_err(serde::de::Error::custom)
}

fn opt_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    match Option::<f64>::deserialize(deserializer)? {
        Some(value) => Duration::try_from_secs_f64(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
