// Module state optimization
//
// Pure functions applied to every new target state before it reaches the
// actuators: never steer through more than a quarter turn, and slow the wheel
// down while the steer axis is still catching up.

use super::state::{Angle, ModuleState};

/// Largest steer travel a target may require
pub const MAX_STEER_TRAVEL_DEG: f64 = 90.0;

/// Equivalent target that needs at most 90° of steering from `current`.
///
/// A target more than 90° away is reached faster by pointing the wheel the
/// other way and driving backwards. The returned angle is normalized to
/// [0, 1) rotations.
pub fn optimize(target: ModuleState, current: Angle) -> ModuleState {
    let delta = current.shortest_delta_degrees(target.angle);

    if delta.abs() > MAX_STEER_TRAVEL_DEG {
        ModuleState::new(-target.speed_mps, (target.angle + Angle::HALF_TURN).normalized())
    } else {
        ModuleState::new(target.speed_mps, target.angle.normalized())
    }
}

/// Scale `speed` by the cosine of the remaining steer error.
///
/// Full speed when aligned, approaching zero as the error nears 90°. The
/// factor is floored at zero so this step never reverses the wheel.
pub fn reduce_skew(speed_mps: f64, target: Angle, current: Angle) -> f64 {
    let error = Angle::from_degrees(current.shortest_delta_degrees(target));
    speed_mps * error.cos().max(0.0)
}
