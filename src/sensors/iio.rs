//! # Linux IIO Environmental Sensor
//!
//! Reads a BME280-class sensor exposed by the kernel's Industrial I/O subsystem
//! under `/sys/bus/iio/devices/iio:deviceN`.
//!
//! | File | Unit |
//! |------|------|
//! | `in_temp_input` | milli-degrees Celsius |
//! | `in_pressure_input` | kilopascal (decimal) |
//! | `in_humidityrelative_input` | milli-percent |

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{EnvironmentalSensor, SensorChannel, SensorValue};
use crate::error::{Result, TrackerError};

const NAME_FILE: &str = "name";
const TEMPERATURE_FILE: &str = "in_temp_input";
const PRESSURE_FILE: &str = "in_pressure_input";
const HUMIDITY_FILE: &str = "in_humidityrelative_input";

/// Environmental sensor backed by an IIO sysfs directory
#[derive(Debug)]
pub struct IioSensor {
    dir: PathBuf,
    name: String,
    latest: Option<[SensorValue; 3]>,
}

impl IioSensor {
    /// Bind to an IIO device directory
    ///
    /// # Errors
    ///
    /// Returns error if the directory has no `name` file or lacks one of the
    /// temperature, pressure and humidity channels.
    pub fn probe<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        let name = fs::read_to_string(dir.join(NAME_FILE))
            .map_err(|e| {
                TrackerError::Sensor(format!("No IIO device at {}: {}", dir.display(), e))
            })?
            .trim()
            .to_string();

        for file in [TEMPERATURE_FILE, PRESSURE_FILE, HUMIDITY_FILE] {
            if !dir.join(file).exists() {
                return Err(TrackerError::Sensor(format!(
                    "Device \"{}\" at {} has no {} channel",
                    name,
                    dir.display(),
                    file
                )));
            }
        }

        info!("Found environmental sensor \"{}\" at {}", name, dir.display());
        Ok(Self {
            dir,
            name,
            latest: None,
        })
    }

    /// Device name reported by the driver (e.g. `bme280`)
    pub fn name(&self) -> &str {
        &self.name
    }

    fn read_file(&self, file: &str) -> Result<String> {
        let path = self.dir.join(file);
        fs::read_to_string(&path)
            .map_err(|e| TrackerError::Sensor(format!("Failed to read {}: {}", path.display(), e)))
    }

    fn read_milli(&self, file: &str) -> Result<SensorValue> {
        let raw = self.read_file(file)?;
        let milli: i64 = raw
            .trim()
            .parse()
            .map_err(|e| TrackerError::Sensor(format!("Invalid {} value {:?}: {}", file, raw.trim(), e)))?;
        Ok(SensorValue::from_milli(milli))
    }
}

impl EnvironmentalSensor for IioSensor {
    fn fetch(&mut self) -> Result<()> {
        let temperature = self.read_milli(TEMPERATURE_FILE)?;
        let pressure: SensorValue = self.read_file(PRESSURE_FILE)?.parse()?;
        let humidity = self.read_milli(HUMIDITY_FILE)?;

        debug!("{}: t={} p={} h={}", self.name, temperature, pressure, humidity);
        self.latest = Some([temperature, pressure, humidity]);
        Ok(())
    }

    fn read_channel(&self, channel: SensorChannel) -> Result<SensorValue> {
        let latest = self
            .latest
            .ok_or_else(|| TrackerError::Sensor("No sample fetched yet".to_string()))?;

        Ok(match channel {
            SensorChannel::Temperature => latest[0],
            SensorChannel::Pressure => latest[1],
            SensorChannel::Humidity => latest[2],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_device(temp: &str, press: &str, hum: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(NAME_FILE), "bme280\n").unwrap();
        fs::write(dir.path().join(TEMPERATURE_FILE), temp).unwrap();
        fs::write(dir.path().join(PRESSURE_FILE), press).unwrap();
        fs::write(dir.path().join(HUMIDITY_FILE), hum).unwrap();
        dir
    }

    #[test]
    fn test_probe_and_fetch() {
        let dir = fake_device("23450\n", "101.325000000\n", "48123\n");
        let mut sensor = IioSensor::probe(dir.path()).unwrap();
        assert_eq!(sensor.name(), "bme280");

        sensor.fetch().unwrap();
        assert_eq!(sensor.read_channel(SensorChannel::Temperature).unwrap(), SensorValue::new(23, 450_000));
        assert_eq!(sensor.read_channel(SensorChannel::Pressure).unwrap(), SensorValue::new(101, 325_000));
        assert_eq!(sensor.read_channel(SensorChannel::Humidity).unwrap(), SensorValue::new(48, 123_000));
    }

    #[test]
    fn test_negative_temperature() {
        let dir = fake_device("-18250", "99.8", "30000");
        let mut sensor = IioSensor::probe(dir.path()).unwrap();

        sensor.fetch().unwrap();
        assert_eq!(
            sensor.read_channel(SensorChannel::Temperature).unwrap().to_string(),
            "-18.250000"
        );
    }

    #[test]
    fn test_read_before_fetch_fails() {
        let dir = fake_device("1", "1", "1");
        let sensor = IioSensor::probe(dir.path()).unwrap();
        assert!(sensor.read_channel(SensorChannel::Temperature).is_err());
    }

    #[test]
    fn test_probe_missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let err = IioSensor::probe(dir.path().join("iio:device7")).unwrap_err();
        assert!(matches!(err, TrackerError::Sensor(_)));
    }

    #[test]
    fn test_probe_missing_channel() {
        let dir = fake_device("1", "1", "1");
        fs::remove_file(dir.path().join(HUMIDITY_FILE)).unwrap();

        let err = IioSensor::probe(dir.path()).unwrap_err();
        assert!(err.to_string().contains(HUMIDITY_FILE));
    }

    #[test]
    fn test_fetch_garbage_fails() {
        let dir = fake_device("hot", "1", "1");
        let mut sensor = IioSensor::probe(dir.path()).unwrap();
        assert!(sensor.fetch().is_err());
    }
}
