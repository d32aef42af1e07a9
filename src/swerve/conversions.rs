// Wheel unit conversions

use std::f64::consts::PI;

/// Linear wheel speed (m/s) -> wheel rotations per second
pub fn mps_to_rps(mps: f64, wheel_diameter_m: f64) -> f64 {
    mps / (PI * wheel_diameter_m)
}

/// Wheel rotations per second -> linear wheel speed (m/s)
pub fn rps_to_mps(rps: f64, wheel_diameter_m: f64) -> f64 {
    rps * PI * wheel_diameter_m
}

/// Wheel rotations -> distance rolled (m)
pub fn rotations_to_metres(rotations: f64, wheel_diameter_m: f64) -> f64 {
    rotations * PI * wheel_diameter_m
}
