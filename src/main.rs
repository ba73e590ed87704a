//! CLI entry point for the bean bridge node.
//!
//! Run the bridge against the rig:
//! ```bash
//! bean-bridge run --port /dev/ttyUSB0
//! ```
//!
//! Bench run without a camera:
//! ```bash
//! bean-bridge run --camera mock
//! ```
//!
//! Show the effective configuration (defaults, file and environment merged):
//! ```bash
//! bean-bridge check-config --config config/bridge.toml
//! ```

use anyhow::{anyhow, bail, Context, Result};
use bean_bridge::camera::mock::MockCamera;
use bean_bridge::camera::CameraDevice;
use bean_bridge::config::{BridgeConfig, CameraConfig, DEFAULT_CONFIG_PATH};
use bean_bridge::operator::{spawn_stdin_source, HELP};
use bean_bridge::{logging, Bridge};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bean-bridge")]
#[command(about = "Camera and classifier bridge for the bean sorting rig", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the controller and camera and serve capture requests
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Serial port override
        #[arg(long)]
        port: Option<String>,

        /// Camera backend override (mock, v4l2)
        #[arg(long)]
        camera: Option<String>,
    },

    /// Load and validate configuration, then print it
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            port,
            camera,
        } => run(config, port, camera).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

async fn run(path: PathBuf, port: Option<String>, camera: Option<String>) -> Result<()> {
    let mut config = BridgeConfig::load_from(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(port) = port {
        config.serial.port = port;
    }
    if let Some(camera) = camera {
        config.camera.backend = camera;
    }
    config.validate()?;

    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;
    info!(
        name = %config.application.name,
        port = %config.serial.port,
        camera = %config.camera.backend,
        "Starting bridge"
    );

    let device = camera_device(&config.camera)?;
    let mut bridge = Bridge::connect(&config, device).await?;

    let flag = bridge.flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.stop("interrupted");
        }
    });

    let operator = spawn_stdin_source().context("starting operator input thread")?;
    println!("{HELP}");

    let summary = bridge.run(operator).await?;
    if summary.stats.failed > 0 {
        warn!(
            failed = summary.stats.failed,
            restarts = summary.camera_restarts,
            "Some captures fell back to the fail-safe label"
        );
    }
    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = BridgeConfig::load_from(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;

    println!("# Effective configuration ({})", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn camera_device(config: &CameraConfig) -> Result<Arc<dyn CameraDevice>> {
    match config.backend.as_str() {
        "mock" => Ok(Arc::new(MockCamera::new())),
        "v4l2" => v4l2_device(config),
        other => bail!("unknown camera backend '{other}'"),
    }
}

#[cfg(feature = "v4l2")]
fn v4l2_device(config: &CameraConfig) -> Result<Arc<dyn CameraDevice>> {
    use bean_bridge::camera::v4l2::V4l2Camera;
    Ok(Arc::new(V4l2Camera::new(
        config.device.clone(),
        config.warmup_frames,
    )))
}

#[cfg(not(feature = "v4l2"))]
fn v4l2_device(_config: &CameraConfig) -> Result<Arc<dyn CameraDevice>> {
    bail!("camera backend 'v4l2' requires the 'v4l2' feature (rebuild with --features v4l2, or use --camera mock)")
}
