// One swerve wheel assembly: drive motor, steer motor, absolute steer encoder

use std::f64::consts::TAU;

use tracing::{debug, info, warn};

use super::conversions::{mps_to_rps, rotations_to_metres, rps_to_mps};
use super::optimize::{optimize, reduce_skew};
use super::state::{Angle, ModulePosition, ModuleState};
use crate::config::{ConfigError, ModuleConfig, DRIVE_TEMPERATURE_LIMIT_C};
use crate::hardware::{ControlMode, Encoder, EncoderSignal, HardwareError, Motor, MotorSignal};
use crate::odometry::{drain_together, OdometrySampler, RateTier, SampleHandle};

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("Invalid module configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error(
        "Odometry desynchronized on {module}: {drive_samples} drive samples vs {steer_samples} steer samples"
    )]
    Desynchronized {
        module: String,
        drive_samples: usize,
        steer_samples: usize,
    },
}

/// Drive motor telemetry recorded during characterization runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveCharacterization {
    pub voltage: f64,
    pub position_rotations: f64,
    pub velocity_rps: f64,
}

/// What the module was last told to do this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleMode {
    Idle,
    OpenLoopDriving,
    ClosedLoopDriving,
}

pub struct SwerveModule {
    name: String,
    drive: Box<dyn Motor>,
    steer: Box<dyn Motor>,
    encoder: Box<dyn Encoder>,
    config: ModuleConfig,
    target: ModuleState,
    mode: ModuleMode,
    overheating: bool,
    drive_position: SampleHandle,
    steer_position: SampleHandle,
}

impl SwerveModule {
    /// Validate the configuration and register the module's odometry signals.
    ///
    /// Drive position and steer position both go on the fast tier so their
    /// buffers fill in lockstep.
    pub fn new(
        name: impl Into<String>,
        mut drive: Box<dyn Motor>,
        mut steer: Box<dyn Motor>,
        mut encoder: Box<dyn Encoder>,
        config: ModuleConfig,
        sampler: &OdometrySampler,
    ) -> Result<Self, ModuleError> {
        let name = name.into();
        config.validate()?;

        let rates = *sampler.config();
        drive.set_update_frequency(MotorSignal::Position, rates.fast_hz)?;
        drive.set_update_frequency(MotorSignal::Velocity, rates.slow_hz)?;
        drive.set_update_frequency(MotorSignal::Voltage, rates.slow_hz)?;
        drive.set_update_frequency(MotorSignal::Temperature, rates.slow_hz)?;
        steer.set_update_frequency(MotorSignal::Position, rates.slow_hz)?;
        encoder.set_update_frequency(EncoderSignal::Position, rates.fast_hz)?;

        let drive_position = sampler.register(
            format!("{}/drive/position", name),
            RateTier::Fast,
            true,
            drive.reader(MotorSignal::Position),
        );
        let steer_position = sampler.register(
            format!("{}/steer/position", name),
            RateTier::Fast,
            true,
            encoder.reader(EncoderSignal::Position),
        );

        info!(
            "Swerve module {} ready (drive {}, steer {}, encoder {})",
            name,
            drive.device_id(),
            steer.device_id(),
            encoder.device_id()
        );

        Ok(Self {
            name,
            drive,
            steer,
            encoder,
            config,
            target: ModuleState::default(),
            mode: ModuleMode::Idle,
            overheating: false,
            drive_position,
            steer_position,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn mode(&self) -> ModuleMode {
        self.mode
    }

    /// Last target after optimization and skew reduction
    pub fn target_state(&self) -> ModuleState {
        self.target
    }

    pub fn is_overheating(&self) -> bool {
        self.overheating
    }

    pub fn set_open_loop(&mut self, open_loop: bool) {
        self.config.open_loop = open_loop;
    }

    /// Forget last cycle's mode. Called at the top of every control cycle so a
    /// mode only holds while it keeps being commanded.
    pub fn begin_cycle(&mut self) {
        self.mode = ModuleMode::Idle;
    }

    /// Optimize `state` against the measured angle, then command both axes
    pub fn set_target_state(&mut self, state: ModuleState) -> Result<(), ModuleError> {
        let current = self.current_angle()?;

        let mut target = optimize(state, current);
        target.speed_mps = reduce_skew(target.speed_mps, target.angle, current);
        self.target = target;

        self.set_target_angle(target.angle)?;
        self.set_target_velocity(target.speed_mps)
    }

    fn set_target_angle(&mut self, angle: Angle) -> Result<(), ModuleError> {
        self.steer.set_output(ControlMode::Position, angle.rotations())?;
        Ok(())
    }

    fn set_target_velocity(&mut self, speed_mps: f64) -> Result<(), ModuleError> {
        self.check_temperature();

        if self.config.open_loop {
            let saturation = self.config.voltage_saturation;
            let voltage =
                (saturation * speed_mps / self.config.max_drive_velocity_mps).clamp(-saturation, saturation);
            self.drive.set_output(ControlMode::Voltage, voltage)?;
            self.mode = ModuleMode::OpenLoopDriving;
        } else {
            let rps = mps_to_rps(speed_mps, self.config.wheel_diameter_m);
            self.drive.set_output(ControlMode::Velocity, rps)?;
            self.mode = ModuleMode::ClosedLoopDriving;
        }
        Ok(())
    }

    /// Warn (once per episode) when the drive motor runs hot; never blocks the command
    fn check_temperature(&mut self) {
        match self.drive.read(MotorSignal::Temperature) {
            Ok(celsius) if celsius >= DRIVE_TEMPERATURE_LIMIT_C => {
                if !self.overheating {
                    warn!(
                        module = %self.name,
                        drive = self.drive.device_id(),
                        celsius,
                        "Swerve module {} is TOO HOT",
                        self.name
                    );
                }
                self.overheating = true;
            }
            Ok(_) => {
                if self.overheating {
                    info!(module = %self.name, "Swerve module {} cooled down", self.name);
                }
                self.overheating = false;
            }
            Err(e) => debug!(module = %self.name, "Temperature read failed: {}", e),
        }
    }

    /// Raw drive voltage with no optimization. Characterization only.
    pub fn run_drive_for_characterization(&mut self, voltage: f64) -> Result<(), ModuleError> {
        self.drive.set_output(ControlMode::Voltage, voltage)?;
        self.mode = ModuleMode::OpenLoopDriving;
        Ok(())
    }

    /// Read back the drive motor while characterizing. Pairs with
    /// `run_drive_for_characterization`.
    pub fn characterization_sample(&self) -> Result<DriveCharacterization, ModuleError> {
        let sample = DriveCharacterization {
            voltage: self.drive.read(MotorSignal::Voltage)?,
            position_rotations: self.drive.read(MotorSignal::Position)?,
            velocity_rps: self.drive.read(MotorSignal::Velocity)?,
        };
        debug!(
            module = %self.name,
            drive = self.drive.device_id(),
            voltage = sample.voltage,
            position = sample.position_rotations,
            velocity = sample.velocity_rps,
            "Drive characterization sample"
        );
        Ok(sample)
    }

    /// Zero both axes. Safe to call repeatedly.
    pub fn stop(&mut self) -> Result<(), ModuleError> {
        let drive = self.drive.stop();
        let steer = self.steer.stop();
        self.mode = ModuleMode::Idle;
        drive.and(steer)?;
        Ok(())
    }

    pub fn current_angle(&self) -> Result<Angle, ModuleError> {
        Ok(Angle::from_rotations(self.encoder.read(EncoderSignal::Position)?))
    }

    /// Measured wheel speed and heading
    pub fn current_state(&self) -> Result<ModuleState, ModuleError> {
        let rps = self.drive.read(MotorSignal::Velocity)?;
        Ok(ModuleState::new(
            rps_to_mps(rps, self.config.wheel_diameter_m),
            self.current_angle()?,
        ))
    }

    pub fn drive_wheel_position_radians(&self) -> Result<f64, ModuleError> {
        Ok(TAU * self.drive.read(MotorSignal::Position)?)
    }

    /// Drive position and steer position handles, in that order
    pub fn odometry_handles(&self) -> [&SampleHandle; 2] {
        [&self.drive_position, &self.steer_position]
    }

    /// Every module position sampled since the last call, oldest first.
    ///
    /// Fails rather than pairing samples when the drive and steer buffers
    /// drained to different lengths.
    pub fn odometry_positions(&self) -> Result<Vec<ModulePosition>, ModuleError> {
        let drained = drain_together(&self.odometry_handles());
        self.positions_from_samples(&drained[0], &drained[1])
    }

    /// Pair drive rotations with steer rotations sample by sample
    pub fn positions_from_samples(
        &self,
        drive_rotations: &[f64],
        steer_rotations: &[f64],
    ) -> Result<Vec<ModulePosition>, ModuleError> {
        if drive_rotations.len() != steer_rotations.len() {
            return Err(ModuleError::Desynchronized {
                module: self.name.clone(),
                drive_samples: drive_rotations.len(),
                steer_samples: steer_rotations.len(),
            });
        }

        Ok(drive_rotations
            .iter()
            .zip(steer_rotations)
            .map(|(&drive, &steer)| ModulePosition {
                distance_m: rotations_to_metres(drive, self.config.wheel_diameter_m),
                angle: Angle::from_rotations(steer),
            })
            .collect())
    }
}

impl std::fmt::Debug for SwerveModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwerveModule")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("target", &self.target)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerConfig;
    use crate::hardware::sim::{SimEncoder, SimMotor};
    use std::f64::consts::PI;
    use std::time::Duration;

    struct Rig {
        sampler: OdometrySampler,
        drive: SimMotor,
        steer: SimMotor,
        encoder: SimEncoder,
        module: SwerveModule,
    }

    fn rig(config: ModuleConfig) -> Rig {
        let sampler = OdometrySampler::new(SamplerConfig::default()).unwrap();
        let drive = SimMotor::new(1, 100.0);
        let steer = SimMotor::new(2, 10.0);
        let encoder = steer.encoder(3);
        let module = SwerveModule::new(
            "front_left",
            Box::new(drive.clone()),
            Box::new(steer.clone()),
            Box::new(encoder.clone()),
            config,
            &sampler,
        )
        .unwrap();

        Rig {
            sampler,
            drive,
            steer,
            encoder,
            module,
        }
    }

    fn open_loop_config() -> ModuleConfig {
        ModuleConfig {
            wheel_diameter_m: 0.1,
            max_drive_velocity_mps: 4.0,
            open_loop: true,
            voltage_saturation: 12.0,
        }
    }

    #[test]
    fn test_open_loop_half_speed_is_half_saturation() {
        let mut rig = rig(open_loop_config());
        rig.module
            .set_target_state(ModuleState::new(2.0, Angle::ZERO))
            .unwrap();

        let (mode, volts) = rig.drive.last_output().unwrap();
        assert_eq!(mode, ControlMode::Voltage);
        assert!((volts - 6.0).abs() < 1e-9);
        assert_eq!(rig.module.mode(), ModuleMode::OpenLoopDriving);
    }

    #[test]
    fn test_closed_loop_commands_wheel_rps() {
        let mut rig = rig(ModuleConfig {
            open_loop: false,
            ..open_loop_config()
        });
        rig.module
            .set_target_state(ModuleState::new(2.0, Angle::ZERO))
            .unwrap();

        let (mode, rps) = rig.drive.last_output().unwrap();
        assert_eq!(mode, ControlMode::Velocity);
        assert!((rps - 2.0 / (PI * 0.1)).abs() < 1e-9);
        assert_eq!(rig.module.mode(), ModuleMode::ClosedLoopDriving);
    }

    #[test]
    fn test_target_behind_is_flipped_and_reversed() {
        let mut rig = rig(open_loop_config());
        rig.module
            .set_target_state(ModuleState::new(2.0, Angle::from_degrees(180.0)))
            .unwrap();

        let (mode, rotations) = rig.steer.last_output().unwrap();
        assert_eq!(mode, ControlMode::Position);
        assert!(rotations.abs() < 1e-9);
        assert!((rig.module.target_state().speed_mps + 2.0).abs() < 1e-9);
        assert!((rig.drive.last_output().unwrap().1 + 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_skew_reduced_while_steering() {
        let mut rig = rig(open_loop_config());
        rig.module
            .set_target_state(ModuleState::new(2.0, Angle::from_degrees(60.0)))
            .unwrap();

        // Measured 0°, target 60°: half speed -> quarter of saturation
        assert!((rig.module.target_state().speed_mps - 1.0).abs() < 1e-9);
        assert!((rig.drive.last_output().unwrap().1 - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_overheating_warns_but_still_drives() {
        let mut rig = rig(open_loop_config());
        rig.drive.set_temperature(95.0);

        rig.module
            .set_target_state(ModuleState::new(4.0, Angle::ZERO))
            .unwrap();
        assert!(rig.module.is_overheating());
        assert!((rig.drive.last_output().unwrap().1 - 12.0).abs() < 1e-9);

        rig.drive.set_temperature(40.0);
        rig.module
            .set_target_state(ModuleState::new(4.0, Angle::ZERO))
            .unwrap();
        assert!(!rig.module.is_overheating());
    }

    #[test]
    fn test_characterization_sample_reads_drive_motor() {
        let mut rig = rig(open_loop_config());
        rig.module.run_drive_for_characterization(6.0).unwrap();
        rig.drive.step(Duration::from_millis(100));

        let sample = rig.module.characterization_sample().unwrap();
        assert!((sample.voltage - 6.0).abs() < 1e-9);
        assert!((sample.velocity_rps - 50.0).abs() < 1e-9);
        assert!((sample.position_rotations - 5.0).abs() < 1e-9);

        rig.drive.set_faulted(true);
        assert!(matches!(rig.module.characterization_sample(), Err(ModuleError::Hardware(_))));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut rig = rig(open_loop_config());
        rig.module
            .set_target_state(ModuleState::new(1.0, Angle::ZERO))
            .unwrap();

        rig.module.stop().unwrap();
        rig.module.stop().unwrap();

        assert_eq!(rig.drive.last_output(), Some((ControlMode::Voltage, 0.0)));
        assert_eq!(rig.steer.last_output(), Some((ControlMode::Voltage, 0.0)));
        assert_eq!(rig.module.mode(), ModuleMode::Idle);
    }

    #[test]
    fn test_mode_drops_to_idle_each_cycle() {
        let mut rig = rig(open_loop_config());
        rig.module
            .set_target_state(ModuleState::new(1.0, Angle::ZERO))
            .unwrap();
        rig.module.begin_cycle();
        assert_eq!(rig.module.mode(), ModuleMode::Idle);
    }

    #[test]
    fn test_current_state_converts_units() {
        let mut rig = rig(ModuleConfig {
            open_loop: false,
            ..open_loop_config()
        });
        rig.steer.set_position(30.0 / 360.0);
        rig.module
            .set_target_state(ModuleState::new(1.5, Angle::from_degrees(30.0)))
            .unwrap();

        let state = rig.module.current_state().unwrap();
        assert!((state.speed_mps - 1.5).abs() < 1e-9);
        assert!((state.angle.degrees() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_odometry_positions_pair_samples() {
        let rig = rig(open_loop_config());
        rig.steer.set_position(0.25);

        rig.drive.set_position(1.0);
        rig.sampler.tick();
        rig.drive.set_position(2.0);
        rig.sampler.tick();

        let positions = rig.module.odometry_positions().unwrap();
        assert_eq!(positions.len(), 2);
        assert!((positions[0].distance_m - PI * 0.1).abs() < 1e-9);
        assert!((positions[1].distance_m - 2.0 * PI * 0.1).abs() < 1e-9);
        assert!((positions[1].angle.degrees() - 90.0).abs() < 1e-9);

        assert!(rig.module.odometry_positions().unwrap().is_empty());
    }

    #[test]
    fn test_odometry_desync_reports_failure() {
        let rig = rig(open_loop_config());

        rig.sampler.tick();
        rig.encoder.set_faulted(true);
        rig.sampler.tick(); // steer sample skipped
        rig.encoder.set_faulted(false);
        rig.sampler.tick();

        match rig.module.odometry_positions() {
            Err(ModuleError::Desynchronized {
                drive_samples,
                steer_samples,
                ..
            }) => {
                assert_eq!(drive_samples, 3);
                assert_eq!(steer_samples, 2);
            }
            other => panic!("expected desync, got {:?}", other),
        }
    }

    #[test]
    fn test_unequal_samples_never_truncated() {
        let rig = rig(open_loop_config());
        let result = rig.module.positions_from_samples(&[1.0, 2.0], &[0.0]);
        assert!(matches!(result, Err(ModuleError::Desynchronized { .. })));
    }

    #[test]
    fn test_zero_wheel_diameter_fails_at_construction() {
        let sampler = OdometrySampler::new(SamplerConfig::default()).unwrap();
        let steer = SimMotor::new(2, 10.0);
        let result = SwerveModule::new(
            "bad",
            Box::new(SimMotor::new(1, 100.0)),
            Box::new(steer.clone()),
            Box::new(steer.encoder(3)),
            ModuleConfig {
                wheel_diameter_m: 0.0,
                ..ModuleConfig::default()
            },
            &sampler,
        );
        assert!(matches!(result, Err(ModuleError::Config(_))));
        assert_eq!(sampler.signal_count(), 0);
    }

    #[test]
    fn test_registers_fast_update_rates() {
        let rig = rig(open_loop_config());
        assert_eq!(rig.drive.update_frequency(MotorSignal::Position), 200.0);
        assert_eq!(rig.encoder.update_frequency(EncoderSignal::Position), 200.0);
        assert_eq!(rig.drive.update_frequency(MotorSignal::Temperature), 50.0);
        assert_eq!(rig.sampler.signal_count(), 2);
    }
}
