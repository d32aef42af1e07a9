// Four-module swerve drivetrain
//
// Combines kinematics, the four modules and the gyro. Faults stay local: one
// module failing to take a command never stops the others from being commanded.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::gyro::{GyroAdapter, GyroInputs};
use super::kinematics::{desaturate_wheel_speeds, SwerveKinematics, MODULE_COUNT};
use super::module::{ModuleError, SwerveModule};
use super::state::{ChassisSpeeds, ModuleState};
use crate::config::{ConfigError, RuntimeConfig};
use crate::hardware::sim::{SimGyro, SimMotor};
use crate::hardware::{GyroSignal, HardwareError};
use crate::messages::OdometryUpdate;
use crate::odometry::{drain_together, OdometrySampler, SampleHandle};

/// Module names, in kinematics order
pub const MODULE_NAMES: [&str; MODULE_COUNT] = ["front_left", "front_right", "back_left", "back_right"];

#[derive(Debug, thiserror::Error)]
pub enum DrivetrainError {
    #[error("Invalid drivetrain configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Gyro error: {0}")]
    Gyro(#[from] HardwareError),

    #[error("{} module fault(s)", .0.len())]
    Modules(Vec<(&'static str, ModuleError)>),

    #[error("Odometry desynchronized across modules: {module} drained {actual} samples, expected {expected}")]
    UnequalModuleSamples {
        module: &'static str,
        expected: usize,
        actual: usize,
    },
}

pub struct Drivetrain {
    modules: [SwerveModule; MODULE_COUNT],
    kinematics: SwerveKinematics,
    gyro: GyroAdapter,
    max_drive_velocity_mps: f64,
}

impl Drivetrain {
    /// Yaw goes through the odometry sampler with the module signals; pitch
    /// and roll are read once per cycle.
    pub fn new(
        modules: [SwerveModule; MODULE_COUNT],
        mut gyro: GyroAdapter,
        config: &RuntimeConfig,
        sampler: &OdometrySampler,
    ) -> Result<Self, DrivetrainError> {
        config.geometry.validate()?;
        config.module.validate()?;
        config.gyro.validate()?;

        gyro.configure(&config.gyro)?;
        gyro.setup_signal(GyroSignal::Yaw, true, sampler)?;
        gyro.setup_signal(GyroSignal::Pitch, false, sampler)?;
        gyro.setup_signal(GyroSignal::Roll, false, sampler)?;

        Ok(Self {
            modules,
            kinematics: SwerveKinematics::new(config.geometry.module_locations_m),
            gyro,
            max_drive_velocity_mps: config.module.max_drive_velocity_mps,
        })
    }

    pub fn modules(&self) -> &[SwerveModule; MODULE_COUNT] {
        &self.modules
    }

    pub fn kinematics(&self) -> &SwerveKinematics {
        &self.kinematics
    }

    /// Start of a control cycle: modes must be re-asserted after this
    pub fn begin_cycle(&mut self) {
        for module in &mut self.modules {
            module.begin_cycle();
        }
    }

    pub fn set_open_loop(&mut self, open_loop: bool) {
        for module in &mut self.modules {
            module.set_open_loop(open_loop);
        }
    }

    /// Robot-relative chassis command
    pub fn drive(&mut self, speeds: ChassisSpeeds) -> Result<(), DrivetrainError> {
        let mut states = self.kinematics.to_module_states(speeds);
        desaturate_wheel_speeds(&mut states, self.max_drive_velocity_mps);
        self.set_module_states(states)
    }

    pub fn set_module_states(&mut self, states: [ModuleState; MODULE_COUNT]) -> Result<(), DrivetrainError> {
        self.for_each_module(|module, i| module.set_target_state(states[i]))
    }

    pub fn stop(&mut self) -> Result<(), DrivetrainError> {
        self.for_each_module(|module, _| module.stop())
    }

    pub fn set_gyro_yaw(&mut self, yaw_rotations: f64) -> Result<(), DrivetrainError> {
        self.gyro.set_yaw(yaw_rotations)?;
        Ok(())
    }

    pub fn current_states(&self) -> Result<[ModuleState; MODULE_COUNT], DrivetrainError> {
        let mut states = [ModuleState::default(); MODULE_COUNT];
        let mut faults = Vec::new();
        for (i, module) in self.modules.iter().enumerate() {
            match module.current_state() {
                Ok(state) => states[i] = state,
                Err(e) => faults.push((MODULE_NAMES[i], e)),
            }
        }
        if faults.is_empty() { Ok(states) } else { Err(DrivetrainError::Modules(faults)) }
    }

    /// Chassis speeds reconstructed from measured module states
    pub fn measured_chassis_speeds(&self) -> Result<ChassisSpeeds, DrivetrainError> {
        Ok(self.kinematics.to_chassis_speeds(&self.current_states()?))
    }

    /// Drain every odometry buffer at one tick boundary and pair the samples.
    ///
    /// Any module desync skips the whole update. Gyro yaw is attached only
    /// when its sample count matches the modules.
    pub fn odometry_update(&mut self) -> Result<(OdometryUpdate, GyroInputs), DrivetrainError> {
        let gyro_handles = self.gyro.threaded_handles();
        let mut handles: Vec<&SampleHandle> = self
            .modules
            .iter()
            .flat_map(|module| module.odometry_handles())
            .collect();
        handles.extend(gyro_handles.iter().map(|(_, h)| *h));

        let mut drained = drain_together(&handles).into_iter();

        let mut update = OdometryUpdate::default();
        let mut faults = Vec::new();
        for (i, module) in self.modules.iter().enumerate() {
            let drive = drained.next().unwrap_or_default();
            let steer = drained.next().unwrap_or_default();
            match module.positions_from_samples(&drive, &steer) {
                Ok(positions) => update.modules[i] = positions,
                Err(e) => faults.push((MODULE_NAMES[i], e)),
            }
        }

        let mut threaded: [Vec<f64>; GyroSignal::ALL.len()] = Default::default();
        let gyro_signals: Vec<GyroSignal> = gyro_handles.iter().map(|(signal, _)| *signal).collect();
        for (signal, samples) in gyro_signals.into_iter().zip(drained) {
            threaded[signal.id()] = samples;
        }
        let inputs = self.gyro.inputs_with(threaded);

        if !faults.is_empty() {
            for (module, e) in &faults {
                warn!(module, "Skipping odometry update: {}", e);
            }
            return Err(DrivetrainError::Modules(faults));
        }

        let samples = update.modules[0].len();
        if let Some((module, actual)) = MODULE_NAMES
            .into_iter()
            .zip(update.modules.iter().map(Vec::len))
            .find(|&(_, len)| len != samples)
        {
            warn!(module, "Skipping odometry update: modules drained unequal sample counts");
            return Err(DrivetrainError::UnequalModuleSamples {
                module,
                expected: samples,
                actual,
            });
        }

        if inputs.threaded_yaw_rotations.len() == samples {
            update.gyro_yaw_rotations = Some(inputs.threaded_yaw_rotations.clone());
        } else {
            debug!(
                "Gyro yaw drained {} samples vs {} module samples, omitting",
                inputs.threaded_yaw_rotations.len(),
                samples
            );
        }

        Ok((update, inputs))
    }

    fn for_each_module(
        &mut self,
        mut command: impl FnMut(&mut SwerveModule, usize) -> Result<(), ModuleError>,
    ) -> Result<(), DrivetrainError> {
        let mut faults = Vec::new();
        for (i, module) in self.modules.iter_mut().enumerate() {
            if let Err(e) = command(module, i) {
                warn!(module = MODULE_NAMES[i], "Module command failed: {}", e);
                faults.push((MODULE_NAMES[i], e));
            }
        }
        if faults.is_empty() { Ok(()) } else { Err(DrivetrainError::Modules(faults)) }
    }
}

impl std::fmt::Debug for Drivetrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drivetrain")
            .field("modules", &self.modules)
            .field("gyro", &self.gyro)
            .finish_non_exhaustive()
    }
}

/// Handles to the simulated devices behind a simulated drivetrain
#[derive(Debug, Clone)]
pub struct SimHardware {
    pub drive: [SimMotor; MODULE_COUNT],
    pub steer: [SimMotor; MODULE_COUNT],
    pub gyro: SimGyro,
}

impl SimHardware {
    pub fn step(&self, dt: Duration) {
        for motor in self.drive.iter().chain(&self.steer) {
            motor.step(dt);
        }
        self.gyro.step(dt);
    }
}

/// Build a drivetrain on simulated hardware. Device ids follow the usual
/// layout: drive 1-4, steer 5-8, encoders 9-12, gyro 20.
pub fn simulated_drivetrain(
    config: &RuntimeConfig,
    sampler: &OdometrySampler,
) -> Result<(Drivetrain, SimHardware), DrivetrainError> {
    config.module.validate()?;
    let drive_free_speed_rps = config.module.max_drive_velocity_mps / config.module.wheel_circumference_m();

    let drive: [SimMotor; MODULE_COUNT] =
        std::array::from_fn(|i| SimMotor::new(1 + i as u32, drive_free_speed_rps));
    let steer: [SimMotor; MODULE_COUNT] = std::array::from_fn(|i| SimMotor::new(5 + i as u32, 10.0));
    let gyro = SimGyro::new(20);

    let build = |i: usize| {
        SwerveModule::new(
            MODULE_NAMES[i],
            Box::new(drive[i].clone()),
            Box::new(steer[i].clone()),
            Box::new(steer[i].encoder(9 + i as u32)),
            config.module,
            sampler,
        )
        .map_err(|e| DrivetrainError::Modules(vec![(MODULE_NAMES[i], e)]))
    };
    let modules = [build(0)?, build(1)?, build(2)?, build(3)?];

    let drivetrain = Drivetrain::new(modules, GyroAdapter::new("gyro", Box::new(gyro.clone())), config, sampler)?;
    info!("Simulated drivetrain ready ({} odometry signals)", sampler.signal_count());

    Ok((drivetrain, SimHardware { drive, steer, gyro }))
}
