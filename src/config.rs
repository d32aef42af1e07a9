// Rates, timeouts, topics, drivetrain configuration
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Fastest main loop the millisecond-scale watchdog can meaningfully run
pub const MAX_LOOP_HZ: u64 = 1000;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Odometry sampler tiers
pub const ODOMETRY_FAST_HZ: f64 = 200.0;
pub const ODOMETRY_SLOW_HZ: f64 = 50.0;

// Per-buffer cap, ~5 s of fast-tier samples
pub const MAX_RETAINED_SAMPLES: usize = 1000;

// Drive motor temperature at or above which a module reports itself too hot
pub const DRIVE_TEMPERATURE_LIMIT_C: f64 = 80.0;

// Voltage that open-loop commands are scaled against
pub const VOLTAGE_COMPENSATION_SATURATION: f64 = 12.0;

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "swerve/cmd/drive"; // chassis commands
pub const TOPIC_ODOMETRY: &str = "swerve/rt/odometry"; // pose estimator feed
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a positive finite number, got {}", value),
        })
    }
}

fn require_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be finite, got {}", value),
        })
    }
}

/// Main loop period for `hz`, rejecting rates the loop can't run at
pub fn loop_period(hz: u64) -> Result<Duration, ConfigError> {
    if hz == 0 || hz > MAX_LOOP_HZ {
        return Err(ConfigError::Invalid {
            field: "loop_hz",
            reason: format!("must be between 1 and {} Hz, got {}", MAX_LOOP_HZ, hz),
        });
    }
    Ok(Duration::from_secs_f64(1.0 / hz as f64))
}

/// Per-module drive configuration
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub wheel_diameter_m: f64,
    pub max_drive_velocity_mps: f64,
    /// Drive by scaled voltage instead of closed-loop velocity
    pub open_loop: bool,
    pub voltage_saturation: f64,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            wheel_diameter_m: 0.1016, // 4 inch
            max_drive_velocity_mps: 4.5,
            open_loop: true,
            voltage_saturation: VOLTAGE_COMPENSATION_SATURATION,
        }
    }
}

impl ModuleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("wheel_diameter_m", self.wheel_diameter_m)?;
        require_positive("max_drive_velocity_mps", self.max_drive_velocity_mps)?;
        require_positive("voltage_saturation", self.voltage_saturation)
    }

    pub fn wheel_circumference_m(&self) -> f64 {
        std::f64::consts::PI * self.wheel_diameter_m
    }
}

/// Odometry sampler configuration
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub fast_hz: f64,
    pub slow_hz: f64,
    pub max_retained_samples: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            fast_hz: ODOMETRY_FAST_HZ,
            slow_hz: ODOMETRY_SLOW_HZ,
            max_retained_samples: MAX_RETAINED_SAMPLES,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("fast_hz", self.fast_hz)?;
        require_positive("slow_hz", self.slow_hz)?;

        if self.slow_hz > self.fast_hz {
            return Err(ConfigError::Invalid {
                field: "slow_hz",
                reason: format!(
                    "slow tier ({} Hz) cannot be faster than fast tier ({} Hz)",
                    self.slow_hz, self.fast_hz
                ),
            });
        }

        if self.max_retained_samples == 0 {
            return Err(ConfigError::Invalid {
                field: "max_retained_samples",
                reason: "must retain at least one sample".to_string(),
            });
        }

        Ok(())
    }

    /// Fast-tier tick period
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fast_hz)
    }

    /// Number of fast ticks between two slow-tier polls
    pub fn slow_divisor(&self) -> u64 {
        ((self.fast_hz / self.slow_hz).round() as u64).max(1)
    }
}

/// Module locations relative to the robot center, metres, x forward / y left.
/// Order: front-left, front-right, back-left, back-right.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct DrivetrainGeometry {
    pub module_locations_m: [[f64; 2]; 4],
}

impl Default for DrivetrainGeometry {
    fn default() -> Self {
        let half = 0.29;
        Self {
            module_locations_m: [[half, half], [half, -half], [-half, half], [-half, -half]],
        }
    }
}

impl DrivetrainGeometry {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, a) in self.module_locations_m.iter().enumerate() {
            if !a.iter().all(|v| v.is_finite()) {
                return Err(ConfigError::Invalid {
                    field: "module_locations_m",
                    reason: format!("module {} location is not finite", i),
                });
            }
            for b in &self.module_locations_m[i + 1..] {
                if a == b {
                    return Err(ConfigError::Invalid {
                        field: "module_locations_m",
                        reason: format!("two modules share location {:?}", a),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Sensor orientation relative to the robot frame, rotations
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MountPose {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Gyro device configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GyroConfig {
    pub mount_offset: MountPose,
}

impl GyroConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_finite("gyro.mount_offset.yaw", self.mount_offset.yaw)?;
        require_finite("gyro.mount_offset.pitch", self.mount_offset.pitch)?;
        require_finite("gyro.mount_offset.roll", self.mount_offset.roll)
    }
}

/// Everything the runtime needs, loadable from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub module: ModuleConfig,
    pub sampler: SamplerConfig,
    pub geometry: DrivetrainGeometry,
    pub gyro: GyroConfig,
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.module.validate()?;
        self.sampler.validate()?;
        self.geometry.validate()?;
        self.gyro.validate()
    }
}
