// Swerve drivetrain control
//
// Provides:
// - Module state optimization (optimize, reduce_skew)
// - Chassis <-> module kinematics
// - SwerveModule: per-wheel control and odometry reconstruction
// - Drivetrain: four modules plus the gyro

mod conversions;
mod drivetrain;
mod gyro;
pub mod kinematics;
mod module;
pub mod optimize;
mod state;

pub use conversions::{mps_to_rps, rotations_to_metres, rps_to_mps};
pub use drivetrain::{simulated_drivetrain, Drivetrain, DrivetrainError, SimHardware, MODULE_NAMES};
pub use gyro::{GyroAdapter, GyroInputs};
pub use kinematics::{desaturate_wheel_speeds, SwerveKinematics, MODULE_COUNT};
pub use module::{DriveCharacterization, ModuleError, ModuleMode, SwerveModule};
pub use optimize::{optimize, reduce_skew};
pub use state::{Angle, ChassisSpeeds, ModulePosition, ModuleState};
