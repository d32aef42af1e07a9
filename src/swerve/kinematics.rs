// Swerve inverse and forward kinematics for a four-module drivetrain
// Converts chassis velocities (vx, vy, omega) to per-module speed and heading.

use super::state::{Angle, ChassisSpeeds, ModuleState};

/// Number of modules on the drivetrain
pub const MODULE_COUNT: usize = 4;

/// Below this wheel speed (m/s) a module keeps its previous heading
const STATIONARY_SPEED_MPS: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    /// [x, y] of each module relative to the robot center, metres
    locations: [[f64; 2]; MODULE_COUNT],
    last_angles: [Angle; MODULE_COUNT],
}

impl SwerveKinematics {
    pub fn new(locations: [[f64; 2]; MODULE_COUNT]) -> Self {
        Self {
            locations,
            last_angles: [Angle::ZERO; MODULE_COUNT],
        }
    }

    pub fn locations(&self) -> &[[f64; 2]; MODULE_COUNT] {
        &self.locations
    }

    /// Chassis speeds -> module states
    ///
    /// Each module sees the chassis translation plus omega × r for its
    /// location. A module that would stand still keeps its last heading so
    /// stopping does not snap every wheel back to 0°.
    pub fn to_module_states(&mut self, speeds: ChassisSpeeds) -> [ModuleState; MODULE_COUNT] {
        let mut states = [ModuleState::default(); MODULE_COUNT];

        for (i, &[x, y]) in self.locations.iter().enumerate() {
            let vx = speeds.vx_mps - speeds.omega_rad_per_s * y;
            let vy = speeds.vy_mps + speeds.omega_rad_per_s * x;
            let speed = vx.hypot(vy);

            let angle = if speed < STATIONARY_SPEED_MPS {
                self.last_angles[i]
            } else {
                Angle::from_radians(vy.atan2(vx)).normalized()
            };

            self.last_angles[i] = angle;
            states[i] = ModuleState::new(if speed < STATIONARY_SPEED_MPS { 0.0 } else { speed }, angle);
        }

        states
    }

    /// Module states -> chassis speeds (least squares over all modules)
    pub fn to_chassis_speeds(&self, states: &[ModuleState; MODULE_COUNT]) -> ChassisSpeeds {
        let n = MODULE_COUNT as f64;
        let cx = self.locations.iter().map(|l| l[0]).sum::<f64>() / n;
        let cy = self.locations.iter().map(|l| l[1]).sum::<f64>() / n;

        let components: Vec<(f64, f64)> = states
            .iter()
            .map(|s| (s.speed_mps * s.angle.cos(), s.speed_mps * s.angle.sin()))
            .collect();

        let mean_vx = components.iter().map(|c| c.0).sum::<f64>() / n;
        let mean_vy = components.iter().map(|c| c.1).sum::<f64>() / n;

        // Fit omega about the module centroid
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (&[x, y], &(vx, vy)) in self.locations.iter().zip(&components) {
            let (rx, ry) = (x - cx, y - cy);
            numerator += rx * vy - ry * vx;
            denominator += rx * rx + ry * ry;
        }
        let omega = if denominator > 0.0 { numerator / denominator } else { 0.0 };

        ChassisSpeeds::new(mean_vx + omega * cy, mean_vy - omega * cx, omega)
    }
}

/// Scale all modules uniformly if any exceeds `max_speed_mps`, keeping the
/// commanded direction of travel.
pub fn desaturate_wheel_speeds(states: &mut [ModuleState], max_speed_mps: f64) {
    let fastest = states.iter().map(|s| s.speed_mps.abs()).fold(0.0f64, f64::max);

    if fastest > max_speed_mps {
        let scale = max_speed_mps / fastest;
        for state in states.iter_mut() {
            state.speed_mps *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HALF: f64 = 0.3;

    fn kinematics() -> SwerveKinematics {
        SwerveKinematics::new([[HALF, HALF], [HALF, -HALF], [-HALF, HALF], [-HALF, -HALF]])
    }

    #[test]
    fn test_zero_velocity() {
        let states = kinematics().to_module_states(ChassisSpeeds::default());
        for state in states {
            assert_eq!(state.speed_mps, 0.0);
            assert_eq!(state.angle, Angle::ZERO);
        }
    }

    #[test]
    fn test_forward_motion() {
        let states = kinematics().to_module_states(ChassisSpeeds::new(2.0, 0.0, 0.0));
        for state in states {
            assert!((state.speed_mps - 2.0).abs() < 1e-9);
            assert!(state.angle.rotations().abs() < 1e-9);
        }
    }

    #[test]
    fn test_strafe_left_points_wheels_at_90() {
        let states = kinematics().to_module_states(ChassisSpeeds::new(0.0, 1.0, 0.0));
        for state in states {
            assert!((state.angle.degrees() - 90.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rotation_only() {
        // Pure rotation: every wheel tangent to the circle, same speed
        let omega = 2.0;
        let states = kinematics().to_module_states(ChassisSpeeds::new(0.0, 0.0, omega));
        let expected_speed = omega * (2.0 * HALF * HALF).sqrt();

        for state in states {
            assert!((state.speed_mps - expected_speed).abs() < 1e-9);
        }
        // Front-left at (+x, +y) moves toward -x, +y: 135°
        assert!((states[0].angle.degrees() - 135.0).abs() < 1e-9);
        // Back-right at (-x, -y) moves toward +x, -y: 315°
        assert!((states[3].angle.degrees() - 315.0).abs() < 1e-9);
    }

    #[test]
    fn test_stopping_keeps_last_heading() {
        let mut kinematics = kinematics();
        kinematics.to_module_states(ChassisSpeeds::new(0.0, 1.0, 0.0));
        let states = kinematics.to_module_states(ChassisSpeeds::default());
        for state in states {
            assert_eq!(state.speed_mps, 0.0);
            assert!((state.angle.degrees() - 90.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_forward_kinematics_recovers_chassis_speeds() {
        let mut kinematics = kinematics();
        let commanded = ChassisSpeeds::new(1.2, -0.4, 0.8);
        let states = kinematics.to_module_states(commanded);
        let measured = kinematics.to_chassis_speeds(&states);

        assert!((measured.vx_mps - commanded.vx_mps).abs() < 1e-9);
        assert!((measured.vy_mps - commanded.vy_mps).abs() < 1e-9);
        assert!((measured.omega_rad_per_s - commanded.omega_rad_per_s).abs() < 1e-9);
    }

    #[test]
    fn test_max_velocity_desaturated() {
        let mut kinematics = kinematics();
        let mut states = kinematics.to_module_states(ChassisSpeeds::new(4.0, 0.0, 3.0));
        let before: Vec<f64> = states.iter().map(|s| s.speed_mps).collect();

        desaturate_wheel_speeds(&mut states, 4.5);

        let fastest = states.iter().map(|s| s.speed_mps).fold(0.0, f64::max);
        assert!((fastest - 4.5).abs() < 1e-9);
        // Ratios between modules are preserved
        let ratio = states[0].speed_mps / before[0];
        for (state, original) in states.iter().zip(before) {
            assert!((state.speed_mps / original - ratio).abs() < 1e-9);
        }
    }

    #[test]
    fn test_slow_velocity_untouched_by_desaturation() {
        let mut states = kinematics().to_module_states(ChassisSpeeds::new(0.5, 0.0, 0.0));
        desaturate_wheel_speeds(&mut states, 4.5);
        assert!(states.iter().all(|s| (s.speed_mps - 0.5).abs() < 1e-9));
    }
}
