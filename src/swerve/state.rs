// Angles, module states and chassis speeds

use std::f64::consts::TAU;
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Planar angle, stored in rotations (the unit steer encoders report)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Angle {
    rotations: f64,
}

impl Angle {
    pub const ZERO: Angle = Angle { rotations: 0.0 };
    pub const HALF_TURN: Angle = Angle { rotations: 0.5 };

    pub fn from_rotations(rotations: f64) -> Self {
        Self { rotations }
    }

    pub fn from_degrees(degrees: f64) -> Self {
        Self::from_rotations(degrees / 360.0)
    }

    pub fn from_radians(radians: f64) -> Self {
        Self::from_rotations(radians / TAU)
    }

    pub fn rotations(self) -> f64 {
        self.rotations
    }

    pub fn degrees(self) -> f64 {
        self.rotations * 360.0
    }

    pub fn radians(self) -> f64 {
        self.rotations * TAU
    }

    pub fn cos(self) -> f64 {
        self.radians().cos()
    }

    pub fn sin(self) -> f64 {
        self.radians().sin()
    }

    /// Same direction, in [0, 1) rotations
    pub fn normalized(self) -> Self {
        let wrapped = self.rotations.rem_euclid(1.0);
        // rem_euclid can round tiny negatives up to exactly 1.0
        Self::from_rotations(if wrapped >= 1.0 { 0.0 } else { wrapped })
    }

    /// Shortest signed turn from `self` to `target`, degrees in (-180, 180]
    pub fn shortest_delta_degrees(self, target: Angle) -> f64 {
        let delta = (target.degrees() - self.degrees()).rem_euclid(360.0);
        if delta > 180.0 { delta - 360.0 } else { delta }
    }
}

impl Add for Angle {
    type Output = Angle;

    fn add(self, rhs: Angle) -> Angle {
        Angle::from_rotations(self.rotations + rhs.rotations)
    }
}

impl Sub for Angle {
    type Output = Angle;

    fn sub(self, rhs: Angle) -> Angle {
        Angle::from_rotations(self.rotations - rhs.rotations)
    }
}

impl Neg for Angle {
    type Output = Angle;

    fn neg(self) -> Angle {
        Angle::from_rotations(-self.rotations)
    }
}

/// Wheel speed and heading of one module
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleState {
    pub speed_mps: f64,
    pub angle: Angle,
}

impl ModuleState {
    pub fn new(speed_mps: f64, angle: Angle) -> Self {
        Self { speed_mps, angle }
    }
}

/// Cumulative wheel distance and heading of one module at one sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModulePosition {
    pub distance_m: f64,
    pub angle: Angle,
}

/// Robot-relative chassis velocity
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChassisSpeeds {
    /// Forward, m/s
    pub vx_mps: f64,
    /// Left, m/s
    pub vy_mps: f64,
    /// Counter-clockwise, rad/s
    pub omega_rad_per_s: f64,
}

impl ChassisSpeeds {
    pub fn new(vx_mps: f64, vy_mps: f64, omega_rad_per_s: f64) -> Self {
        Self {
            vx_mps,
            vy_mps,
            omega_rad_per_s,
        }
    }
}
