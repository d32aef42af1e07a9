// Gyro adapter: instantaneous attitude plus high-rate threaded samples

use tracing::{info, warn};

use crate::config::GyroConfig;
use crate::hardware::{Gyro, GyroSignal, HardwareError};
use crate::odometry::{drain_together, OdometrySampler, RateTier, SampleHandle};

const SIGNAL_COUNT: usize = GyroSignal::ALL.len();

/// One refresh worth of gyro readings, rotations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GyroInputs {
    pub yaw_rotations: f64,
    pub pitch_rotations: f64,
    pub roll_rotations: f64,
    pub threaded_yaw_rotations: Vec<f64>,
    pub threaded_pitch_rotations: Vec<f64>,
    pub threaded_roll_rotations: Vec<f64>,
}

pub struct GyroAdapter {
    name: String,
    gyro: Box<dyn Gyro>,
    /// First half: instantaneous signals, second half: threaded signals
    signals_to_log: [bool; SIGNAL_COUNT * 2],
    threaded: [Option<SampleHandle>; SIGNAL_COUNT],
    latest: [f64; SIGNAL_COUNT],
    failing: [bool; SIGNAL_COUNT],
}

impl GyroAdapter {
    pub fn new(name: impl Into<String>, gyro: Box<dyn Gyro>) -> Self {
        Self {
            name: name.into(),
            gyro,
            signals_to_log: [false; SIGNAL_COUNT * 2],
            threaded: [None, None, None],
            latest: [0.0; SIGNAL_COUNT],
            failing: [false; SIGNAL_COUNT],
        }
    }

    /// Push the mount pose to the device so readings come back in the robot frame
    pub fn configure(&mut self, config: &GyroConfig) -> Result<(), HardwareError> {
        let offset = config.mount_offset;
        info!(
            gyro = %self.name,
            yaw = offset.yaw,
            pitch = offset.pitch,
            roll = offset.roll,
            "Configuring gyro {} mount offset",
            self.gyro.device_id()
        );
        self.gyro.configure(config)
    }

    /// Enable a signal at the slow rate, or at the fast rate with its samples
    /// routed through the odometry sampler.
    pub fn setup_signal(
        &mut self,
        signal: GyroSignal,
        use_faster_thread: bool,
        sampler: &OdometrySampler,
    ) -> Result<(), HardwareError> {
        let rates = sampler.config();
        let hz = if use_faster_thread { rates.fast_hz } else { rates.slow_hz };
        self.gyro.set_update_frequency(signal, hz)?;
        self.signals_to_log[signal.id()] = true;

        if !use_faster_thread {
            return Ok(());
        }

        self.signals_to_log[signal.id() + SIGNAL_COUNT] = true;
        if self.threaded[signal.id()].is_none() {
            self.threaded[signal.id()] = Some(sampler.register(
                format!("{}/{}", self.name, signal),
                RateTier::Fast,
                true,
                self.gyro.reader(signal),
            ));
        }
        Ok(())
    }

    pub fn signals_to_log(&self) -> &[bool] {
        &self.signals_to_log
    }

    pub fn set_yaw(&mut self, yaw_rotations: f64) -> Result<(), HardwareError> {
        self.gyro.set_yaw(yaw_rotations)?;
        self.latest[GyroSignal::Yaw.id()] = yaw_rotations;
        Ok(())
    }

    /// Threaded handles in signal order
    pub fn threaded_handles(&self) -> Vec<(GyroSignal, &SampleHandle)> {
        GyroSignal::ALL
            .iter()
            .filter_map(|&signal| self.threaded[signal.id()].as_ref().map(|h| (signal, h)))
            .collect()
    }

    /// Read instantaneous values and drain threaded samples
    pub fn refresh_inputs(&mut self) -> GyroInputs {
        let handles: Vec<&SampleHandle> = self.threaded_handles().into_iter().map(|(_, h)| h).collect();
        let drained = drain_together(&handles);

        let mut threaded: [Vec<f64>; SIGNAL_COUNT] = Default::default();
        for ((signal, _), samples) in self.threaded_handles().into_iter().zip(drained) {
            threaded[signal.id()] = samples;
        }
        self.inputs_with(threaded)
    }

    /// Read instantaneous values; threaded samples were already drained by the caller.
    /// A failed read keeps the last good value.
    pub(crate) fn inputs_with(&mut self, threaded: [Vec<f64>; SIGNAL_COUNT]) -> GyroInputs {
        for signal in GyroSignal::ALL {
            let id = signal.id();
            if !self.signals_to_log[id] {
                continue;
            }

            match self.gyro.read(signal) {
                Ok(value) => {
                    if self.failing[id] {
                        info!(gyro = %self.name, "Gyro {} read recovered", signal);
                    }
                    self.failing[id] = false;
                    self.latest[id] = value;
                }
                Err(e) => {
                    if !self.failing[id] {
                        warn!(gyro = %self.name, "Gyro {} read failed, holding last value: {}", signal, e);
                    }
                    self.failing[id] = true;
                }
            }
        }

        let [yaw, pitch, roll] = threaded;
        GyroInputs {
            yaw_rotations: self.latest[GyroSignal::Yaw.id()],
            pitch_rotations: self.latest[GyroSignal::Pitch.id()],
            roll_rotations: self.latest[GyroSignal::Roll.id()],
            threaded_yaw_rotations: yaw,
            threaded_pitch_rotations: pitch,
            threaded_roll_rotations: roll,
        }
    }
}

impl std::fmt::Debug for GyroAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GyroAdapter")
            .field("name", &self.name)
            .field("signals_to_log", &self.signals_to_log)
            .field("latest", &self.latest)
            .finish_non_exhaustive()
    }
}
