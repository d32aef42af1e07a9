use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use swerve_zenoh_runtime::config::{RuntimeConfig, LOOP_HZ};
use swerve_zenoh_runtime::runtime::{self, RuntimeSettings};

/// Swerve drivetrain runtime: chassis commands in, odometry out
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON config file (module, sampler, geometry); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Main control loop rate
    #[arg(long, default_value_t = LOOP_HZ)]
    loop_hz: u64,

    /// Drive with closed-loop velocity control unless a command says otherwise
    #[arg(long)]
    closed_loop: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init(); // installs the subscriber globally

    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(2);
            }
        },
        None => RuntimeConfig::default(),
    };

    let settings = RuntimeSettings {
        open_loop: config.module.open_loop && !args.closed_loop,
        config,
        loop_hz: args.loop_hz,
    };

    if let Err(e) = runtime::run(settings).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
