use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

use crate::sim::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn distance(&self, other: &Vec2) -> f64 {
        (*self - *other).length()
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

/// Position source for a node.
pub trait Mobility {
    fn position_at(&self, t: SimTime) -> Vec2;
    fn velocity(&self) -> Vec2;
}

/// Straight-line motion at constant velocity from `origin` at time zero.
#[derive(Debug, Clone, Copy)]
pub struct LinearMobility {
    origin: Vec2,
    velocity: Vec2,
}

impl LinearMobility {
    pub fn new(origin: Vec2, velocity: Vec2) -> Self {
        Self { origin, velocity }
    }
}

impl Mobility for LinearMobility {
    fn position_at(&self, t: SimTime) -> Vec2 {
        self.origin + self.velocity * t.as_secs_f64()
    }

    fn velocity(&self) -> Vec2 {
        self.velocity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_linear_motion() {
        let m = LinearMobility::new(Vec2::new(10.0, 0.0), Vec2::new(5.0, -1.0));
        assert_eq!(m.position_at(Duration::ZERO), Vec2::new(10.0, 0.0));
        assert_eq!(m.position_at(Duration::from_secs(2)), Vec2::new(20.0, -2.0));
        assert_eq!(m.velocity(), Vec2::new(5.0, -1.0));
    }

    #[test]
    fn test_distance() {
        assert_eq!(Vec2::new(0.0, 0.0).distance(&Vec2::new(3.0, 4.0)), 5.0);
    }
}
