//! # Application
//!
//! Wires the acquisition tasks together and exposes the upload entry points
//! driven by the main loop.
//!
//! ```text
//! serial reader ──RawLine──▶ fix pipeline ──record──▶ record queue ──▶ batch uploader ──▶ transport
//!                                 ▲
//! sampler ──▶ environmental cache ┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{FixPipeline, PipelineStats};
use crate::sensors::cache::EnvironmentalCache;
use crate::sensors::sampler::EnvironmentalSampler;
use crate::sensors::EnvironmentalSensor;
use crate::serial::framer::LineFramer;
use crate::serial::port_trait::SerialSource;
use crate::serial::SerialReader;
use crate::settings::CadenceSettings;
use crate::telemetry::batch::{BatchUploader, UploadError, UploadSummary};
use crate::telemetry::queue::record_queue;
use crate::telemetry::transport::Transport;

/// Devices the application runs on
pub struct Devices {
    /// GNSS receiver byte stream
    pub serial: Box<dyn SerialSource>,
    /// Environmental sensor, `None` when absent
    pub sensor: Option<Box<dyn EnvironmentalSensor>>,
    /// Cloud link
    pub transport: Arc<dyn Transport>,
}

/// Why the upload loop woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Upload interval elapsed
    Interval,
    /// A cadence setting changed
    SettingsChanged,
}

/// Running tracker
pub struct ColdChainApp {
    settings: Arc<CadenceSettings>,
    cache: EnvironmentalCache,
    uploader: BatchUploader,
    transport: Arc<dyn Transport>,
    stats: Arc<PipelineStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl ColdChainApp {
    /// Bind devices and start the background tasks
    ///
    /// Takes one environmental sample before the sampler starts so the first
    /// records already carry real readings. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the configured cadence is out of range
    pub async fn init(config: &Config, devices: Devices) -> Result<Self> {
        let settings = Arc::new(config.cadence_settings()?);
        let cache = EnvironmentalCache::new();

        let (line_tx, line_rx) = mpsc::channel(config.queue.raw_line_capacity);
        let (producer, consumer) = record_queue(config.queue.capacity);

        let mut sampler = EnvironmentalSampler::new(devices.sensor, cache.clone());
        let (ready_tx, ready_rx) = oneshot::channel();
        if sampler.has_sensor() {
            let first = sampler.sample_once().await;
            if first.is_complete() {
                info!(
                    "Initial environment: t={} p={} h={}",
                    first.temperature, first.pressure, first.humidity
                );
            } else {
                warn!("Initial environmental sample incomplete; failed channels are left out of records");
            }
            // Receiver is alive until the sampler task below starts
            let _ = ready_tx.send(());
        } else {
            warn!("No environmental sensor; records will carry no readings");
            drop(ready_tx);
        }

        let pipeline = FixPipeline::new(
            settings.clone(),
            cache.clone(),
            producer,
            config.pipeline_config(),
        );
        let stats = pipeline.stats();

        let reader = SerialReader::new(
            devices.serial,
            LineFramer::new(line_tx),
            Duration::from_millis(config.serial.reconnect_interval_ms),
        );

        let tasks = vec![
            tokio::spawn(pipeline.run(line_rx)),
            tokio::spawn(sampler.run(ready_rx)),
            tokio::spawn(reader.run()),
        ];

        info!(
            "Cold-chain tracker started (fix every {}s, upload every {}s)",
            settings.sample_interval_s(),
            settings.upload_interval_s()
        );

        Ok(Self {
            settings,
            cache,
            uploader: BatchUploader::new(consumer, config.batch_config()),
            transport: devices.transport,
            stats,
            tasks,
        })
    }

    /// Shared cadence settings, for delivering remote updates
    pub fn settings(&self) -> Arc<CadenceSettings> {
        self.settings.clone()
    }

    pub fn cache(&self) -> &EnvironmentalCache {
        &self.cache
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Records waiting for upload
    pub fn pending(&self) -> usize {
        self.uploader.pending()
    }

    /// One main-loop pass: upload the queue if the transport is connected
    ///
    /// # Errors
    ///
    /// Returns [`UploadError`] if a payload submit failed. The error is not
    /// fatal; the next pass continues with whatever is still queued.
    pub async fn read_and_stream(&mut self) -> std::result::Result<UploadSummary, UploadError> {
        if !self.transport.is_connected() {
            debug!("Transport offline; {} records held", self.uploader.pending());
            return Ok(UploadSummary::default());
        }
        self.uploader.upload(self.transport.as_ref()).await
    }

    /// Sleep until the upload interval elapses or a setting changes
    pub async fn wait_next_pass(&self) -> Wake {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.upload_interval()) => Wake::Interval,
            _ = self.settings.wait_for_change() => Wake::SettingsChanged,
        }
    }

    /// Upload forever at the configured cadence
    pub async fn run_upload_loop(&mut self) {
        loop {
            if let Err(e) = self.read_and_stream().await {
                warn!("Upload pass aborted: {}", e);
            }

            if self.wait_next_pass().await == Wake::SettingsChanged {
                debug!("Cadence changed; running upload pass early");
            }
        }
    }

    /// Stop the background tasks
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        info!(
            "Shutdown: {} records queued this run, {} dropped, {} still pending",
            self.stats.queued(),
            self.stats.dropped(),
            self.uploader.pending()
        );
    }
}
