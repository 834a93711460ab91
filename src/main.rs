//! # Cold-Chain Tracker
//!
//! Records GPS fixes together with ambient temperature, pressure and humidity
//! and streams them to an MQTT broker in batches.
//!
//! Usage: `coldchain-tracker [CONFIG]` (defaults to `config/default.toml`)

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coldchain_tracker::app::{ColdChainApp, Devices};
use coldchain_tracker::config::{Config, LoggingConfig, SensorConfig};
use coldchain_tracker::sensors::iio::IioSensor;
use coldchain_tracker::sensors::EnvironmentalSensor;
use coldchain_tracker::serial::open_gnss_port;
use coldchain_tracker::telemetry::transport::MqttTransport;

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Log file name prefix inside `[logging].dir`
const LOG_FILE_PREFIX: &str = "coldchain-tracker.log";

/// Main entry point for the cold-chain tracker
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration and set up logging
///    - Open the GNSS serial port
///    - Probe the environmental sensor (runs without it if absent)
///    - Start the MQTT client
///    - Start the reader, pipeline and sampler tasks
///
/// 2. **Main Loop**
///    - Upload queued records every `upload_interval_s`, or right away after a
///      cadence change
///    - Handle Ctrl+C for graceful shutdown
///
/// # Errors
///
/// Returns error if:
/// - The configuration cannot be loaded or is invalid
/// - The serial port cannot be opened
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging)?;
    info!("Cold-chain tracker v{} starting...", env!("CARGO_PKG_VERSION"));

    let serial = open_gnss_port(&config.serial.port, config.serial.baud_rate)
        .context("GNSS receiver unavailable")?;
    let transport = Arc::new(MqttTransport::connect(&config.mqtt_settings()));

    let mut app = ColdChainApp::init(
        &config,
        Devices {
            serial: Box::new(serial),
            sensor: probe_sensor(&config.sensor),
            transport,
        },
    )
    .await?;

    info!("Press Ctrl+C to exit");

    tokio::select! {
        _ = app.run_upload_loop() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    app.shutdown();
    Ok(())
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level. When a log directory is set,
/// output is also written to a daily-rotated file; the returned guard must be
/// held until exit so buffered lines are flushed.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer());

    match &logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init()
                .context("Failed to install log subscriber")?;
            Ok(Some(guard))
        }
        None => {
            registry
                .try_init()
                .context("Failed to install log subscriber")?;
            Ok(None)
        }
    }
}

/// Bind the IIO sensor if enabled and present
fn probe_sensor(sensor: &SensorConfig) -> Option<Box<dyn EnvironmentalSensor>> {
    if !sensor.enabled {
        info!("Environmental sensor disabled");
        return None;
    }

    match IioSensor::probe(&sensor.iio_device) {
        Ok(device) => Some(Box::new(device)),
        Err(e) => {
            warn!("{}; continuing without environmental data", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path_is_checked_in() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        assert!(path.exists());
    }

    #[test]
    fn test_disabled_sensor_not_probed() {
        let sensor = SensorConfig {
            enabled: false,
            iio_device: "/nonexistent".into(),
        };
        assert!(probe_sensor(&sensor).is_none());
    }

    #[test]
    fn test_missing_sensor_tolerated() {
        let sensor = SensorConfig {
            enabled: true,
            iio_device: "/nonexistent/iio:device9".into(),
        };
        assert!(probe_sensor(&sensor).is_none());
    }
}
