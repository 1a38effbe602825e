use std::time::Duration;

use crate::config::MediumConfig;
use crate::mobility::Vec2;

/// Shared broadcast channel with a disc-shaped radio range.
///
/// Every node in range of a sender (the sender included) senses the channel
/// busy for the airtime of the frame. Overlapping transmissions are counted
/// so each node sees exactly one busy/idle pair per busy period.
pub struct Medium {
    range_m: f64,
    bitrate_bps: f64,
    active: Vec<u32>,
}

/// Who is affected by one transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    pub airtime: Duration,
    /// Nodes sensing the channel busy, sender included.
    pub listeners: Vec<usize>,
}

impl Medium {
    pub fn new(config: &MediumConfig, nodes: usize) -> Self {
        Self {
            range_m: config.range_m,
            bitrate_bps: config.bitrate_bps,
            active: vec![0; nodes],
        }
    }

    pub fn airtime(&self, bits: u32) -> Duration {
        Duration::from_secs_f64(bits as f64 / self.bitrate_bps)
    }

    pub fn transmit(&self, sender: usize, positions: &[Vec2], bits: u32) -> Transmission {
        let origin = positions[sender];
        let listeners = positions
            .iter()
            .enumerate()
            .filter(|(idx, pos)| *idx == sender || origin.distance(pos) <= self.range_m)
            .map(|(idx, _)| idx)
            .collect();
        Transmission {
            airtime: self.airtime(bits),
            listeners,
        }
    }

    /// Starts a busy period at `node`. True if the channel just turned busy there.
    pub fn begin(&mut self, node: usize) -> bool {
        self.active[node] += 1;
        self.active[node] == 1
    }

    /// Ends a busy period at `node`. True if the channel just turned idle there.
    pub fn end(&mut self, node: usize) -> bool {
        match self.active[node] {
            0 => false,
            n => {
                self.active[node] = n - 1;
                n == 1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn medium(nodes: usize) -> Medium {
        Medium::new(
            &MediumConfig {
                range_m: 100.0,
                bitrate_bps: 1_000_000.0,
            },
            nodes,
        )
    }

    #[test]
    fn test_airtime() {
        assert_eq!(medium(1).airtime(500_000), Duration::from_millis(500));
    }

    #[test]
    fn test_listeners_within_range() {
        let m = medium(3);
        let positions = [
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(250.0, 0.0),
        ];
        assert_eq!(m.transmit(0, &positions, 100).listeners, vec![0, 1]);
        assert_eq!(m.transmit(1, &positions, 100).listeners, vec![0, 1]);
        assert_eq!(m.transmit(2, &positions, 100).listeners, vec![2]);
    }

    #[test]
    fn test_overlapping_busy_periods() {
        let mut m = medium(1);
        assert!(m.begin(0));
        assert!(!m.begin(0));
        assert!(!m.end(0));
        assert!(m.end(0));
        assert!(!m.end(0));
    }
}
