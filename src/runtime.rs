// 50 Hz control loop with watchdog
// Note: the watchdog stops the drivetrain when commands stop arriving, so a
// crashed teleop or path follower can't leave the robot driving.
//
// The odometry sampler runs on its own thread at a higher rate; each loop tick
// drains it and publishes everything sampled since the previous tick.

use std::f64::consts::TAU;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    loop_period, ConfigError, RuntimeConfig, CMD_TIMEOUT, LOOP_HZ, TOPIC_CMD_DRIVE, TOPIC_HEALTH, TOPIC_ODOMETRY,
};
use crate::messages::{ChassisCommand, RuntimeHealth};
use crate::odometry::OdometrySampler;
use crate::swerve::{simulated_drivetrain, ChassisSpeeds};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Startup options for `run`
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub config: RuntimeConfig,
    pub loop_hz: u64,
    /// Drive mode used when a command doesn't specify one
    pub open_loop: bool,
}

impl RuntimeSettings {
    /// Check everything before the loop starts; returns the loop period
    pub fn validate(&self) -> Result<Duration, ConfigError> {
        self.config.validate()?;
        loop_period(self.loop_hz)
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        let config = RuntimeConfig::default();
        Self {
            open_loop: config.module.open_loop,
            config,
            loop_hz: LOOP_HZ,
        }
    }
}

pub struct Runtime {
    latest_cmd: Option<ChassisCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
    default_open_loop: bool,
}

impl Runtime {
    pub fn new(default_open_loop: bool) -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            default_open_loop,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    pub fn on_command(&mut self, cmd: ChassisCommand) {
        self.on_command_at(cmd, Instant::now());
    }

    fn on_command_at(&mut self, cmd: ChassisCommand, now: Instant) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = now;
    }

    /// Speeds and drive mode to apply this tick, or None to stop (watchdog)
    pub fn compute_command(&mut self, now: Instant) -> Option<(ChassisSpeeds, bool)> {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the robot
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), stopping drivetrain", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            None
        } else if let Some(ref cmd) = self.latest_cmd {
            if self.health != RuntimeHealth::Ok {
                info!("Commands flowing, drivetrain enabled");
            }
            self.health = RuntimeHealth::Ok;
            Some((ChassisSpeeds::from(cmd), cmd.open_loop.unwrap_or(self.default_open_loop)))
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            None
        }
    }

    /// Health to publish this tick. A stale command outranks an odometry desync.
    pub fn tick_health(&self, odometry_ok: bool) -> RuntimeHealth {
        match self.health {
            RuntimeHealth::Ok if !odometry_ok => RuntimeHealth::OdometryDesync,
            health => health,
        }
    }
}

pub async fn run(settings: RuntimeSettings) -> Result<(), BoxError> {
    let period = settings.validate()?;

    let sampler = OdometrySampler::new(settings.config.sampler)?;
    let (mut drivetrain, hardware) = simulated_drivetrain(&settings.config, &sampler)?;
    drivetrain.set_open_loop(settings.open_loop);
    for (id, name) in sampler.loggable_signals() {
        debug!("Logging odometry signal {} {}", id, name);
    }

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let pub_odometry = session.declare_publisher(TOPIC_ODOMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(settings.open_loop);
    let mut tick = interval(period);

    sampler.start()?;
    info!(
        "Runtime started: {}Hz loop, {}Hz odometry, {}ms watchdog timeout",
        settings.loop_hz,
        settings.config.sampler.fast_hz,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_DRIVE);
    info!("Publishing to: {}, {}", TOPIC_ODOMETRY, TOPIC_HEALTH);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result: Result<(), BoxError> = loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break Ok(());
            }
        }

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ChassisCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Collect odometry sampled since the last tick
        drivetrain.begin_cycle();
        let odometry = drivetrain.odometry_update();

        // 3. Command the drivetrain (includes watchdog logic)
        let commanded = match runtime.compute_command(Instant::now()) {
            Some((speeds, open_loop)) => {
                drivetrain.set_open_loop(open_loop);
                drivetrain.drive(speeds)
            }
            None => drivetrain.stop(),
        };
        if let Err(e) = commanded {
            debug!("Drivetrain command incomplete: {}", e);
        }

        // 4. Advance the simulation; gyro yaw follows measured wheel motion
        hardware.step(period);
        match drivetrain.measured_chassis_speeds() {
            Ok(speeds) => hardware.gyro.set_yaw_rate(speeds.omega_rad_per_s / TAU),
            Err(e) => debug!("No chassis speed estimate this tick: {}", e),
        }

        // 5. Publish odometry and health
        if let Ok((update, _)) = &odometry {
            let odometry_json = match serde_json::to_string(update) {
                Ok(json) => json,
                Err(e) => break Err(e.into()),
            };
            if let Err(e) = pub_odometry.put(odometry_json).await {
                break Err(e);
            }
        }

        let health = runtime.tick_health(odometry.is_ok());

        let health_json = match serde_json::to_string(&health) {
            Ok(json) => json,
            Err(e) => break Err(e.into()),
        };
        if let Err(e) = pub_health.put(health_json).await {
            break Err(e);
        }
    };

    sampler.stop();
    if let Err(e) = drivetrain.stop() {
        warn!("Failed to stop drivetrain on shutdown: {}", e);
    }
    info!("Runtime stopped");

    result
}
