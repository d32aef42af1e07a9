// Message types exchanged with the rest of the robot

use serde::{Deserialize, Serialize};

use crate::swerve::{ChassisSpeeds, ModulePosition, MODULE_COUNT};

// Command from teleop/path follower -> runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChassisCommand {
    pub vx_mps: f64,
    pub vy_mps: f64,
    pub omega_rad_per_s: f64,
    /// Drive mode for this command; the runtime default applies when absent
    #[serde(default)]
    pub open_loop: Option<bool>,
}

impl From<&ChassisCommand> for ChassisSpeeds {
    fn from(cmd: &ChassisCommand) -> Self {
        ChassisSpeeds::new(cmd.vx_mps, cmd.vy_mps, cmd.omega_rad_per_s)
    }
}

/// Everything sampled since the previous update, runtime -> pose estimator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OdometryUpdate {
    /// Per module (front-left, front-right, back-left, back-right), oldest first
    pub modules: [Vec<ModulePosition>; MODULE_COUNT],
    /// Threaded gyro yaw, aligned with the module samples when present
    pub gyro_yaw_rotations: Option<Vec<f64>>,
}

impl OdometryUpdate {
    /// Samples per module in this update
    pub fn len(&self) -> usize {
        self.modules[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    OdometryDesync,
}
