// Hardware abstraction for swerve modules and the gyro
//
// Vendor drivers implement these traits. The control core only ever talks to
// the traits and to the `ReadFn` closures they hand out for the odometry sampler.

pub mod sim;

use std::fmt;

use crate::config::GyroConfig;
use crate::odometry::ReadFn;

/// Error types for device I/O
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HardwareError {
    #[error("Device {device} is not responding")]
    Disconnected { device: String },

    #[error("Timeout waiting for {signal} from {device}")]
    Timeout { device: String, signal: &'static str },

    #[error("Device {device} reported a fault: {reason}")]
    Fault { device: String, reason: String },
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Motor output modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Setpoint in volts
    Voltage,
    /// Setpoint in rotations per second
    Velocity,
    /// Setpoint in rotations
    Position,
}

/// Telemetry a motor controller can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorSignal {
    Position,
    Velocity,
    Voltage,
    Temperature,
}

impl MotorSignal {
    pub const ALL: [MotorSignal; 4] = [
        MotorSignal::Position,
        MotorSignal::Velocity,
        MotorSignal::Voltage,
        MotorSignal::Temperature,
    ];

    pub fn id(self) -> usize {
        match self {
            MotorSignal::Position => 0,
            MotorSignal::Velocity => 1,
            MotorSignal::Voltage => 2,
            MotorSignal::Temperature => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MotorSignal::Position => "position",
            MotorSignal::Velocity => "velocity",
            MotorSignal::Voltage => "voltage",
            MotorSignal::Temperature => "temperature",
        }
    }
}

/// Telemetry an absolute angle sensor can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderSignal {
    Position,
    Velocity,
}

impl EncoderSignal {
    pub fn id(self) -> usize {
        match self {
            EncoderSignal::Position => 0,
            EncoderSignal::Velocity => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EncoderSignal::Position => "position",
            EncoderSignal::Velocity => "velocity",
        }
    }
}

/// Telemetry a gyro can report, all in rotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GyroSignal {
    Yaw,
    Pitch,
    Roll,
}

impl GyroSignal {
    pub const ALL: [GyroSignal; 3] = [GyroSignal::Yaw, GyroSignal::Pitch, GyroSignal::Roll];

    pub fn id(self) -> usize {
        match self {
            GyroSignal::Yaw => 0,
            GyroSignal::Pitch => 1,
            GyroSignal::Roll => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GyroSignal::Yaw => "yaw",
            GyroSignal::Pitch => "pitch",
            GyroSignal::Roll => "roll",
        }
    }
}

impl fmt::Display for MotorSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for EncoderSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for GyroSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A drive or steer motor controller.
///
/// Positions and velocities are mechanism-side (after gearing): rotations and
/// rotations per second.
pub trait Motor: Send {
    fn device_id(&self) -> u32;

    fn set_output(&mut self, mode: ControlMode, setpoint: f64) -> Result<()>;

    /// Zero output (neutral)
    fn stop(&mut self) -> Result<()>;

    /// Instantaneous read of a signal
    fn read(&self, signal: MotorSignal) -> Result<f64>;

    fn set_update_frequency(&mut self, signal: MotorSignal, hz: f64) -> Result<()>;

    /// Independent reader for the odometry sampler thread
    fn reader(&self, signal: MotorSignal) -> ReadFn;
}

/// An absolute steer angle sensor, position in rotations
pub trait Encoder: Send {
    fn device_id(&self) -> u32;

    fn read(&self, signal: EncoderSignal) -> Result<f64>;

    fn set_update_frequency(&mut self, signal: EncoderSignal, hz: f64) -> Result<()>;

    fn reader(&self, signal: EncoderSignal) -> ReadFn;
}

pub trait Gyro: Send {
    fn device_id(&self) -> u32;

    /// Apply device configuration; readings are reported in the robot frame afterwards
    fn configure(&mut self, config: &GyroConfig) -> Result<()>;

    fn read(&self, signal: GyroSignal) -> Result<f64>;

    fn set_yaw(&mut self, yaw_rotations: f64) -> Result<()>;

    fn set_update_frequency(&mut self, signal: GyroSignal, hz: f64) -> Result<()>;

    fn reader(&self, signal: GyroSignal) -> ReadFn;
}
