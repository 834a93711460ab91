//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TrackerError};
use crate::pipeline::PipelineConfig;
use crate::settings::{CadenceSettings, Setting};
use crate::telemetry::batch::BatchConfig;
use crate::telemetry::transport::MqttSettings;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub cadence: CadenceConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GNSS receiver serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

/// Environmental sensor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    #[serde(default = "default_sensor_enabled")]
    pub enabled: bool,

    /// IIO device directory, e.g. `/sys/bus/iio/devices/iio:device0`
    #[serde(default = "default_iio_device")]
    pub iio_device: PathBuf,
}

/// Initial cadence values (remote updates may change them at runtime)
#[derive(Debug, Deserialize, Clone)]
pub struct CadenceConfig {
    #[serde(default = "default_sample_interval_s")]
    pub sample_interval_s: u32,

    #[serde(default = "default_upload_interval_s")]
    pub upload_interval_s: u32,
}

/// Queue sizes and bounded waits
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_record_capacity")]
    pub capacity: usize,

    #[serde(default = "default_raw_line_capacity")]
    pub raw_line_capacity: usize,

    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,

    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,
}

/// Batch upload configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default = "default_record_max_len")]
    pub record_max_len: usize,

    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,

    #[serde(default = "default_submit_timeout_s")]
    pub submit_timeout_s: u64,
}

/// MQTT broker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rotated log files; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyS0".to_string() }
fn default_baud_rate() -> u32 { crate::serial::GNSS_BAUD_RATE }
fn default_reconnect_interval_ms() -> u64 { 1000 }

fn default_sensor_enabled() -> bool { true }
fn default_iio_device() -> PathBuf { PathBuf::from("/sys/bus/iio/devices/iio:device0") }

fn default_sample_interval_s() -> u32 { crate::settings::DEFAULT_SAMPLE_INTERVAL_S }
fn default_upload_interval_s() -> u32 { crate::settings::DEFAULT_UPLOAD_INTERVAL_S }

fn default_record_capacity() -> usize { crate::telemetry::queue::DEFAULT_QUEUE_CAPACITY }
fn default_raw_line_capacity() -> usize { crate::serial::framer::DEFAULT_RAW_LINE_QUEUE }
fn default_push_timeout_ms() -> u64 { 1 }
fn default_cache_timeout_ms() -> u64 { 50 }

fn default_endpoint() -> String { crate::telemetry::batch::DEFAULT_ENDPOINT.to_string() }
fn default_buffer_capacity() -> usize { crate::telemetry::batch::DEFAULT_BUFFER_CAPACITY }
fn default_record_max_len() -> usize { crate::telemetry::record::RECORD_MAX_LEN }
fn default_dequeue_timeout_ms() -> u64 { 10 }
fn default_submit_timeout_s() -> u64 { 2 }

fn default_mqtt_host() -> String { "localhost".to_string() }
fn default_mqtt_port() -> u16 { 1883 }
fn default_client_id() -> String { "coldchain-tracker".to_string() }
fn default_topic_prefix() -> String { "coldchain".to_string() }
fn default_keep_alive_s() -> u64 { 30 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            enabled: default_sensor_enabled(),
            iio_device: default_iio_device(),
        }
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            sample_interval_s: default_sample_interval_s(),
            upload_interval_s: default_upload_interval_s(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_record_capacity(),
            raw_line_capacity: default_raw_line_capacity(),
            push_timeout_ms: default_push_timeout_ms(),
            cache_timeout_ms: default_cache_timeout_ms(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            buffer_capacity: default_buffer_capacity(),
            record_max_len: default_record_max_len(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            submit_timeout_s: default_submit_timeout_s(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            topic_prefix: default_topic_prefix(),
            keep_alive_s: default_keep_alive_s(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> TrackerError {
    TrackerError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use coldchain_tracker::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if self.serial.baud_rate == 0 {
            return Err(invalid("baud_rate must be greater than 0"));
        }

        if self.serial.reconnect_interval_ms == 0 || self.serial.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.sensor.enabled && self.sensor.iio_device.as_os_str().is_empty() {
            return Err(invalid("sensor iio_device cannot be empty when enabled"));
        }

        // Cadence ranges match the ones enforced on remote updates
        for (setting, value) in [
            (Setting::SampleInterval, self.cadence.sample_interval_s),
            (Setting::UploadInterval, self.cadence.upload_interval_s),
        ] {
            let (min, max) = setting.range();
            if value < min || value > max {
                return Err(invalid(format!(
                    "{} must be between {} and {}",
                    setting, min, max
                )));
            }
        }

        if self.queue.capacity == 0 {
            return Err(invalid("queue capacity must be greater than 0"));
        }

        if self.queue.raw_line_capacity == 0 {
            return Err(invalid("raw_line_capacity must be greater than 0"));
        }

        if self.queue.push_timeout_ms > 1000 {
            return Err(invalid("push_timeout_ms must be at most 1000"));
        }

        if self.queue.cache_timeout_ms == 0 || self.queue.cache_timeout_ms > 1000 {
            return Err(invalid("cache_timeout_ms must be between 1 and 1000"));
        }

        if self.upload.endpoint.is_empty() {
            return Err(invalid("upload endpoint cannot be empty"));
        }

        if self.upload.record_max_len == 0 {
            return Err(invalid("record_max_len must be greater than 0"));
        }

        // '[' + one record + ']'
        if self.upload.buffer_capacity < self.upload.record_max_len + 2 {
            return Err(invalid(format!(
                "buffer_capacity must be at least record_max_len + 2 ({})",
                self.upload.record_max_len + 2
            )));
        }

        if self.upload.dequeue_timeout_ms == 0 || self.upload.dequeue_timeout_ms > 1000 {
            return Err(invalid("dequeue_timeout_ms must be between 1 and 1000"));
        }

        if self.upload.submit_timeout_s == 0 || self.upload.submit_timeout_s > 60 {
            return Err(invalid("submit_timeout_s must be between 1 and 60"));
        }

        if self.mqtt.host.is_empty() {
            return Err(invalid("mqtt host cannot be empty"));
        }

        if self.mqtt.client_id.is_empty() {
            return Err(invalid("mqtt client_id cannot be empty"));
        }

        if self.mqtt.keep_alive_s < 5 || self.mqtt.keep_alive_s > 3600 {
            return Err(invalid("keep_alive_s must be between 5 and 3600"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid(format!(
                "logging level must be one of trace, debug, info, warn, error; got {:?}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Cadence settings initialised from `[cadence]`
    pub fn cadence_settings(&self) -> Result<CadenceSettings> {
        CadenceSettings::new(self.cadence.sample_interval_s, self.cadence.upload_interval_s)
    }

    /// Bounded waits for the fix pipeline
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            cache_timeout: Duration::from_millis(self.queue.cache_timeout_ms),
            push_timeout: Duration::from_millis(self.queue.push_timeout_ms),
        }
    }

    /// Batch uploader tuning
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            endpoint: self.upload.endpoint.clone(),
            buffer_capacity: self.upload.buffer_capacity,
            record_max_len: self.upload.record_max_len,
            dequeue_timeout: Duration::from_millis(self.upload.dequeue_timeout_ms),
            submit_timeout: Duration::from_secs(self.upload.submit_timeout_s),
        }
    }

    /// Broker connection settings
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            topic_prefix: self.mqtt.topic_prefix.clone(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_s),
        }
    }
}
