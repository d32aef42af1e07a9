// Simulated motors, steer encoders and gyro
//
// Each device keeps its state behind an Arc so cloned handles (and the readers
// handed to the odometry sampler) observe the same device. Nothing moves until
// `step` is called, which keeps tests deterministic.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{ControlMode, Encoder, EncoderSignal, Gyro, GyroSignal, HardwareError, Motor, MotorSignal, Result};
use crate::config::{GyroConfig, MountPose};
use crate::odometry::{ReadFn, SignalError};

/// Bus voltage the simulated controllers run from
pub const SIM_NOMINAL_VOLTAGE: f64 = 12.0;

const AMBIENT_TEMPERATURE_C: f64 = 25.0;

#[derive(Debug)]
struct MotorState {
    output: Option<(ControlMode, f64)>,
    position: f64,
    velocity: f64,
    voltage: f64,
    temperature: f64,
    faulted: bool,
    update_hz: [f64; 4],
}

impl MotorState {
    fn read(&self, signal: MotorSignal) -> f64 {
        match signal {
            MotorSignal::Position => self.position,
            MotorSignal::Velocity => self.velocity,
            MotorSignal::Voltage => self.voltage,
            MotorSignal::Temperature => self.temperature,
        }
    }
}

/// Simulated motor controller with an instantaneous response
#[derive(Debug, Clone)]
pub struct SimMotor {
    id: u32,
    free_speed_rps: f64,
    state: Arc<Mutex<MotorState>>,
}

impl SimMotor {
    pub fn new(id: u32, free_speed_rps: f64) -> Self {
        Self {
            id,
            free_speed_rps,
            state: Arc::new(Mutex::new(MotorState {
                output: None,
                position: 0.0,
                velocity: 0.0,
                voltage: 0.0,
                temperature: AMBIENT_TEMPERATURE_C,
                faulted: false,
                update_hz: [0.0; 4],
            })),
        }
    }

    /// Last commanded (mode, setpoint), if any
    pub fn last_output(&self) -> Option<(ControlMode, f64)> {
        self.state.lock().output
    }

    pub fn set_temperature(&self, celsius: f64) {
        self.state.lock().temperature = celsius;
    }

    pub fn set_position(&self, rotations: f64) {
        self.state.lock().position = rotations;
    }

    /// A faulted motor rejects commands and times out on reads
    pub fn set_faulted(&self, faulted: bool) {
        self.state.lock().faulted = faulted;
    }

    pub fn update_frequency(&self, signal: MotorSignal) -> f64 {
        self.state.lock().update_hz[signal.id()]
    }

    /// Advance position by the current velocity
    pub fn step(&self, dt: Duration) {
        let mut state = self.state.lock();
        if !matches!(state.output, Some((ControlMode::Position, _))) {
            state.position += state.velocity * dt.as_secs_f64();
        }
    }

    /// Absolute encoder that reports this motor's position (steer axis)
    pub fn encoder(&self, id: u32) -> SimEncoder {
        SimEncoder {
            id,
            motor: Arc::clone(&self.state),
            faulted: Arc::new(Mutex::new(false)),
            update_hz: Arc::new(Mutex::new([0.0; 2])),
        }
    }

    fn device(&self) -> String {
        format!("sim-motor-{}", self.id)
    }
}

impl Motor for SimMotor {
    fn device_id(&self) -> u32 {
        self.id
    }

    fn set_output(&mut self, mode: ControlMode, setpoint: f64) -> Result<()> {
        let mut state = self.state.lock();
        if state.faulted {
            return Err(HardwareError::Fault {
                device: self.device(),
                reason: "output rejected".to_string(),
            });
        }

        match mode {
            ControlMode::Voltage => {
                let voltage = setpoint.clamp(-SIM_NOMINAL_VOLTAGE, SIM_NOMINAL_VOLTAGE);
                state.voltage = voltage;
                state.velocity = voltage / SIM_NOMINAL_VOLTAGE * self.free_speed_rps;
            }
            ControlMode::Velocity => {
                let velocity = setpoint.clamp(-self.free_speed_rps, self.free_speed_rps);
                state.velocity = velocity;
                state.voltage = velocity / self.free_speed_rps * SIM_NOMINAL_VOLTAGE;
            }
            ControlMode::Position => {
                state.position = setpoint;
                state.velocity = 0.0;
                state.voltage = 0.0;
            }
        }
        state.output = Some((mode, setpoint));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.output = Some((ControlMode::Voltage, 0.0));
        state.velocity = 0.0;
        state.voltage = 0.0;
        Ok(())
    }

    fn read(&self, signal: MotorSignal) -> Result<f64> {
        let state = self.state.lock();
        if state.faulted {
            return Err(HardwareError::Timeout {
                device: self.device(),
                signal: signal.name(),
            });
        }
        Ok(state.read(signal))
    }

    fn set_update_frequency(&mut self, signal: MotorSignal, hz: f64) -> Result<()> {
        self.state.lock().update_hz[signal.id()] = hz;
        Ok(())
    }

    fn reader(&self, signal: MotorSignal) -> ReadFn {
        let motor = self.clone();
        Box::new(move || motor.read(signal).map_err(SignalError::from))
    }
}

/// Simulated absolute encoder mounted on a steer motor
#[derive(Debug, Clone)]
pub struct SimEncoder {
    id: u32,
    motor: Arc<Mutex<MotorState>>,
    faulted: Arc<Mutex<bool>>,
    update_hz: Arc<Mutex<[f64; 2]>>,
}

impl SimEncoder {
    pub fn set_faulted(&self, faulted: bool) {
        *self.faulted.lock() = faulted;
    }

    pub fn update_frequency(&self, signal: EncoderSignal) -> f64 {
        self.update_hz.lock()[signal.id()]
    }
}

impl Encoder for SimEncoder {
    fn device_id(&self) -> u32 {
        self.id
    }

    fn read(&self, signal: EncoderSignal) -> Result<f64> {
        if *self.faulted.lock() {
            return Err(HardwareError::Timeout {
                device: format!("sim-encoder-{}", self.id),
                signal: signal.name(),
            });
        }

        let motor = self.motor.lock();
        Ok(match signal {
            EncoderSignal::Position => motor.position,
            EncoderSignal::Velocity => motor.velocity,
        })
    }

    fn set_update_frequency(&mut self, signal: EncoderSignal, hz: f64) -> Result<()> {
        self.update_hz.lock()[signal.id()] = hz;
        Ok(())
    }

    fn reader(&self, signal: EncoderSignal) -> ReadFn {
        let encoder = self.clone();
        Box::new(move || encoder.read(signal).map_err(SignalError::from))
    }
}

#[derive(Debug, Default)]
struct GyroState {
    /// Sensor-frame angles
    angles: [f64; 3],
    mount: [f64; 3],
    yaw_rate_rps: f64,
    faulted: bool,
    update_hz: [f64; 3],
}

impl GyroState {
    fn robot_angle(&self, signal: GyroSignal) -> f64 {
        self.angles[signal.id()] - self.mount[signal.id()]
    }
}

fn mount_angles(pose: &MountPose) -> [f64; 3] {
    let mut angles = [0.0; 3];
    angles[GyroSignal::Yaw.id()] = pose.yaw;
    angles[GyroSignal::Pitch.id()] = pose.pitch;
    angles[GyroSignal::Roll.id()] = pose.roll;
    angles
}

/// Simulated gyro, angles in rotations.
///
/// `set_angle` sets what the sensor itself measures; reads subtract the
/// configured mount offset per axis.
#[derive(Debug, Clone)]
pub struct SimGyro {
    id: u32,
    state: Arc<Mutex<GyroState>>,
}

impl SimGyro {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(GyroState::default())),
        }
    }

    pub fn set_angle(&self, signal: GyroSignal, rotations: f64) {
        self.state.lock().angles[signal.id()] = rotations;
    }

    pub fn set_yaw_rate(&self, rotations_per_second: f64) {
        self.state.lock().yaw_rate_rps = rotations_per_second;
    }

    pub fn set_faulted(&self, faulted: bool) {
        self.state.lock().faulted = faulted;
    }

    pub fn update_frequency(&self, signal: GyroSignal) -> f64 {
        self.state.lock().update_hz[signal.id()]
    }

    pub fn step(&self, dt: Duration) {
        let mut state = self.state.lock();
        state.angles[GyroSignal::Yaw.id()] += state.yaw_rate_rps * dt.as_secs_f64();
    }
}

impl Gyro for SimGyro {
    fn device_id(&self) -> u32 {
        self.id
    }

    fn read(&self, signal: GyroSignal) -> Result<f64> {
        let state = self.state.lock();
        if state.faulted {
            return Err(HardwareError::Timeout {
                device: format!("sim-gyro-{}", self.id),
                signal: signal.name(),
            });
        }
        Ok(state.robot_angle(signal))
    }

    fn configure(&mut self, config: &GyroConfig) -> Result<()> {
        self.state.lock().mount = mount_angles(&config.mount_offset);
        Ok(())
    }

    fn set_yaw(&mut self, yaw_rotations: f64) -> Result<()> {
        let mut state = self.state.lock();
        let yaw = GyroSignal::Yaw.id();
        state.angles[yaw] = yaw_rotations + state.mount[yaw];
        Ok(())
    }

    fn set_update_frequency(&mut self, signal: GyroSignal, hz: f64) -> Result<()> {
        self.state.lock().update_hz[signal.id()] = hz;
        Ok(())
    }

    fn reader(&self, signal: GyroSignal) -> ReadFn {
        let gyro = self.clone();
        Box::new(move || gyro.read(signal).map_err(SignalError::from))
    }
}
