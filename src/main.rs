//! Command-line shell for the skyfeed streaming stack.
//!
//! Loads `UserConfig.txt`, activates the flight controller, starts the
//! camera push stream, and reports delivery statistics until Ctrl-C.
//! Configuration problems and a rejected activation are fatal; a stream
//! that fails to start is reported and the shell keeps running, since the
//! activated link is still useful without video.
//!
//! # Usage
//!
//! ```bash
//! skyfeed --view fpv --stats-interval 10
//! SKYFEED_SERIAL_DEVICE=/dev/ttyACM0 skyfeed --config ./UserConfig.txt
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use skyfeed::config::UserConfig;
use skyfeed::logging;
use skyfeed::stream::{StreamController, StreamView};
use skyfeed::vehicle::mock::{MockCamera, MockVehicle};
use skyfeed::vehicle::Vehicle;

/// Interval between chunks produced by the demo camera.
const CAMERA_PACE: Duration = Duration::from_millis(33);

#[derive(Parser)]
#[command(name = "skyfeed")]
#[command(about = "Flight-controller camera streaming shell", version)]
struct Cli {
    /// Path to UserConfig.txt. Defaults to searching ./ then ../.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera view to stream: "main" or "fpv".
    #[arg(long, default_value = "main")]
    view: StreamView,

    /// Seconds between stream statistics reports.
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init("info").map_err(anyhow::Error::msg)?;

    let config = match &cli.config {
        Some(path) => UserConfig::load_from(path),
        None => UserConfig::load_default(),
    }
    .context("configuration is required for flight-controller activation")?;
    info!(
        app = %config.app_name,
        app_id = config.app_id,
        serial = %config.serial_device,
        baud = config.baud_rate,
        "skyfeed starting"
    );

    let vehicle = Arc::new(MockVehicle::with_camera(Arc::new(MockCamera::paced(
        CAMERA_PACE,
    ))));
    vehicle
        .activate(&config.credentials())
        .context("flight-controller activation failed")?;
    match vehicle.firmware_version() {
        Some(version) => info!(firmware = %version, "flight controller activated"),
        None => warn!("flight controller activated but firmware version is unknown"),
    }

    let vehicle: Arc<dyn Vehicle> = vehicle;
    let controller = StreamController::new(Arc::downgrade(&vehicle), cli.view);
    match controller.start() {
        Ok(()) => info!(view = %cli.view, "streaming; press Ctrl-C to stop"),
        Err(e) => error!(error = %e, "stream did not start; continuing without video"),
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.stats_interval.max(1)));
    ticker.tick().await; // the first tick completes immediately
    let mut last_frames = 0u64;
    let mut last_bytes = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let frames = controller.frames_delivered();
                let bytes = controller.bytes_delivered();
                info!(
                    active = controller.is_active(),
                    frames,
                    bytes,
                    frames_delta = frames - last_frames,
                    bytes_delta = bytes - last_bytes,
                    "stream stats"
                );
                last_frames = frames;
                last_bytes = bytes;
            }
        }
    }

    controller.stop();
    info!(
        frames = controller.frames_delivered(),
        bytes = controller.bytes_delivered(),
        "stream stopped; exiting"
    );
    Ok(())
}
