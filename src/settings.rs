//! # Cadence Settings
//!
//! Process-wide tunables for how often fixes are accepted and how often the
//! record queue is uploaded.
//!
//! This module handles:
//! - Range-validated setters for both intervals
//! - Remote updates keyed by setting name (`LOOP_DELAY_S`, `GPS_DELAY_S`)
//! - Waking the upload loop when a value actually changes

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::{Result, TrackerError};

/// Default spacing between accepted GPS fixes, seconds
pub const DEFAULT_SAMPLE_INTERVAL_S: u32 = 3;

/// Default spacing between uploads, seconds
pub const DEFAULT_UPLOAD_INTERVAL_S: u32 = 5;

/// Upper bound shared by both intervals (12 hours)
pub const MAX_INTERVAL_S: u32 = 43_200;

/// A tunable cadence parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    /// Seconds between upload passes (`LOOP_DELAY_S`)
    UploadInterval,
    /// Seconds between accepted GPS fixes (`GPS_DELAY_S`)
    SampleInterval,
}

impl Setting {
    /// Remote name of the setting
    pub fn name(self) -> &'static str {
        match self {
            Setting::UploadInterval => "LOOP_DELAY_S",
            Setting::SampleInterval => "GPS_DELAY_S",
        }
    }

    /// Inclusive `(min, max)` range in seconds
    pub fn range(self) -> (u32, u32) {
        match self {
            Setting::UploadInterval => (1, MAX_INTERVAL_S),
            Setting::SampleInterval => (0, MAX_INTERVAL_S),
        }
    }

    fn validate(self, value: i64) -> Result<u32> {
        let (min, max) = self.range();
        if value < min as i64 || value > max as i64 {
            return Err(TrackerError::SettingOutOfRange {
                name: self.name(),
                value,
                min,
                max,
            });
        }
        Ok(value as u32)
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Setting {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LOOP_DELAY_S" => Ok(Setting::UploadInterval),
            "GPS_DELAY_S" => Ok(Setting::SampleInterval),
            other => Err(TrackerError::UnknownSetting(other.to_string())),
        }
    }
}

/// Result of applying a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingUpdate {
    /// Value changed and the upload loop was woken
    Updated,
    /// Value already matched; nothing happened
    Unchanged,
}

/// Shared cadence settings
///
/// Reads are lock-free. Wrap in an `Arc` to share between the fix pipeline,
/// the upload loop and whatever delivers remote updates.
#[derive(Debug)]
pub struct CadenceSettings {
    sample_interval_s: AtomicU32,
    upload_interval_s: AtomicU32,
    wake: Notify,
}

impl CadenceSettings {
    /// Create settings with explicit initial values
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::SettingOutOfRange`] if either value is outside its range
    pub fn new(sample_interval_s: u32, upload_interval_s: u32) -> Result<Self> {
        let sample = Setting::SampleInterval.validate(sample_interval_s as i64)?;
        let upload = Setting::UploadInterval.validate(upload_interval_s as i64)?;

        Ok(Self {
            sample_interval_s: AtomicU32::new(sample),
            upload_interval_s: AtomicU32::new(upload),
            wake: Notify::new(),
        })
    }

    pub fn sample_interval_s(&self) -> u32 {
        self.sample_interval_s.load(Ordering::Relaxed)
    }

    pub fn upload_interval_s(&self) -> u32 {
        self.upload_interval_s.load(Ordering::Relaxed)
    }

    /// Minimum spacing between accepted GPS fixes
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_s() as u64)
    }

    /// Spacing between upload passes
    pub fn upload_interval(&self) -> Duration {
        Duration::from_secs(self.upload_interval_s() as u64)
    }

    pub fn set_sample_interval(&self, seconds: i64) -> Result<SettingUpdate> {
        self.set(Setting::SampleInterval, seconds)
    }

    pub fn set_upload_interval(&self, seconds: i64) -> Result<SettingUpdate> {
        self.set(Setting::UploadInterval, seconds)
    }

    /// Apply a remote update by name
    ///
    /// # Arguments
    ///
    /// * `name` - `LOOP_DELAY_S` or `GPS_DELAY_S`
    /// * `value` - New value in seconds
    ///
    /// # Errors
    ///
    /// Returns error if the name is unknown or the value is out of range
    ///
    /// # Examples
    ///
    /// ```
    /// use coldchain_tracker::settings::{CadenceSettings, SettingUpdate};
    ///
    /// let settings = CadenceSettings::default();
    /// assert_eq!(settings.apply("GPS_DELAY_S", 10)?, SettingUpdate::Updated);
    /// assert_eq!(settings.sample_interval_s(), 10);
    /// assert!(settings.apply("LOOP_DELAY_S", 0).is_err());
    /// # Ok::<(), coldchain_tracker::error::TrackerError>(())
    /// ```
    pub fn apply(&self, name: &str, value: i64) -> Result<SettingUpdate> {
        self.set(name.parse()?, value)
    }

    /// Validate and store one setting, waking the upload loop on change
    pub fn set(&self, setting: Setting, value: i64) -> Result<SettingUpdate> {
        let value = setting.validate(value)?;
        let slot = match setting {
            Setting::UploadInterval => &self.upload_interval_s,
            Setting::SampleInterval => &self.sample_interval_s,
        };

        if slot.swap(value, Ordering::Relaxed) == value {
            debug!("Received {} already matches local value", setting);
            return Ok(SettingUpdate::Unchanged);
        }

        info!("Set {} to {} seconds", setting, value);
        self.wake.notify_one();
        Ok(SettingUpdate::Updated)
    }

    /// Wait until a setting changes
    ///
    /// A change made while nobody is waiting is remembered, so the next call
    /// returns immediately.
    pub async fn wait_for_change(&self) {
        self.wake.notified().await;
    }
}

impl Default for CadenceSettings {
    fn default() -> Self {
        Self {
            sample_interval_s: AtomicU32::new(DEFAULT_SAMPLE_INTERVAL_S),
            upload_interval_s: AtomicU32::new(DEFAULT_UPLOAD_INTERVAL_S),
            wake: Notify::new(),
        }
    }
}
