//! # Environmental Sensor Module
//!
//! Temperature, pressure and humidity acquisition.
//!
//! This module handles:
//! - Fixed-point sensor values with a reserved "error" sentinel
//! - The sensor driver abstraction ([`EnvironmentalSensor`])
//! - The mutex-guarded latest-sample cache shared with the fix pipeline
//! - The 1 Hz background sampler
//! - A Linux IIO (sysfs) driver for BME280-class sensors

pub mod cache;
pub mod iio;
pub mod sampler;

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TrackerError};

const MICROS_PER_UNIT: i64 = 1_000_000;

/// Sensor reading as integer and millionths parts
///
/// Both parts carry the sign of the value, e.g. -0.5 is `{ val1: 0, val2: -500000 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorValue {
    pub val1: i32,
    pub val2: i32,
}

/// Reserved value meaning "no valid reading"
pub const SENSOR_ERROR: SensorValue = SensorValue {
    val1: 999,
    val2: 999_999,
};

impl SensorValue {
    pub const fn new(val1: i32, val2: i32) -> Self {
        Self { val1, val2 }
    }

    /// Build from a value in millionths, saturating at the `i32` range of the integer part
    pub fn from_micros(micros: i64) -> Self {
        let val1 = (micros / MICROS_PER_UNIT).clamp(i32::MIN as i64, i32::MAX as i64);
        Self {
            val1: val1 as i32,
            val2: (micros % MICROS_PER_UNIT) as i32,
        }
    }

    /// Build from a value in thousandths
    pub fn from_milli(milli: i64) -> Self {
        Self::from_micros(milli.saturating_mul(1000))
    }

    /// Value in millionths
    pub fn micros(&self) -> i64 {
        self.val1 as i64 * MICROS_PER_UNIT + self.val2 as i64
    }

    /// Whether this is the [`SENSOR_ERROR`] sentinel
    pub fn is_error(&self) -> bool {
        *self == SENSOR_ERROR
    }
}

impl fmt::Display for SensorValue {
    /// Six decimal places, sign preserved for values between -1 and 0
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let micros = self.micros();
        let sign = if micros < 0 { "-" } else { "" };
        let abs = micros.unsigned_abs();
        write!(
            f,
            "{}{}.{:06}",
            sign,
            abs / MICROS_PER_UNIT as u64,
            abs % MICROS_PER_UNIT as u64
        )
    }
}

impl FromStr for SensorValue {
    type Err = TrackerError;

    /// Parse a decimal string, truncating beyond six fractional digits
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || TrackerError::Sensor(format!("Invalid sensor value: {:?}", s));

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };

        let mut fraction: i64 = 0;
        let mut place = MICROS_PER_UNIT / 10;
        for byte in frac_part.bytes().take(6) {
            fraction += (byte - b'0') as i64 * place;
            place /= 10;
        }

        let micros = whole
            .checked_mul(MICROS_PER_UNIT)
            .and_then(|w| w.checked_add(fraction))
            .ok_or_else(invalid)?;

        Ok(Self::from_micros(if negative { -micros } else { micros }))
    }
}

/// Sensor channels read each sampling tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorChannel {
    /// Ambient temperature, °C
    Temperature,
    /// Barometric pressure, kPa
    Pressure,
    /// Relative humidity, %
    Humidity,
}

/// One complete temperature/pressure/humidity snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentalSample {
    pub temperature: SensorValue,
    pub pressure: SensorValue,
    pub humidity: SensorValue,
}

impl EnvironmentalSample {
    /// Snapshot with every channel set to [`SENSOR_ERROR`]
    pub const fn unavailable() -> Self {
        Self {
            temperature: SENSOR_ERROR,
            pressure: SENSOR_ERROR,
            humidity: SENSOR_ERROR,
        }
    }

    /// Whether every channel holds a real reading
    pub fn is_complete(&self) -> bool {
        !(self.temperature.is_error() || self.pressure.is_error() || self.humidity.is_error())
    }
}

impl Default for EnvironmentalSample {
    fn default() -> Self {
        Self::unavailable()
    }
}

/// Driver interface for an environmental sensor
#[cfg_attr(test, mockall::automock)]
pub trait EnvironmentalSensor: Send {
    /// Trigger a measurement of all channels
    fn fetch(&mut self) -> Result<()>;

    /// Value of one channel from the last successful fetch
    fn read_channel(&self, channel: SensorChannel) -> Result<SensorValue>;
}
