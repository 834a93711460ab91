//! Cold-chain record: one accepted GPS fix paired with the environmental
//! snapshot taken when it was accepted, and its JSON wire form.
//!
//! ```text
//! {"lat":-90.123456,"lon":-180.123456,"time":"2023-09-18T22:52:42.000Z","tem":-100.123456,"pre":-100.123456,"hum":-100.123456}
//! ```
//!
//! Sensor fields holding the error sentinel are left out of the object.

use std::fmt::{self, Write};

use crate::nmea::protocol::ParsedFix;
use crate::sensors::{EnvironmentalSample, SensorValue};

/// Worst-case length of one formatted record
pub const RECORD_MAX_LEN: usize = 128;

/// Merged fix and environmental sample awaiting upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColdChainRecord {
    pub fix: ParsedFix,
    pub environment: EnvironmentalSample,
}

impl ColdChainRecord {
    pub fn new(fix: ParsedFix, environment: EnvironmentalSample) -> Self {
        Self { fix, environment }
    }

    /// Write the record as a single JSON object
    ///
    /// # Errors
    ///
    /// Returns `fmt::Error` if the fix has no usable position or timestamp, or
    /// if the writer fails.
    pub fn write_json<W: Write>(&self, out: &mut W) -> fmt::Result {
        let lat = self.fix.latitude_degrees();
        let lon = self.fix.longitude_degrees();
        if !lat.is_finite() || !lon.is_finite() {
            return Err(fmt::Error);
        }
        let time = self.fix.timestamp().ok_or(fmt::Error)?;

        write!(
            out,
            "{{\"lat\":{:.6},\"lon\":{:.6},\"time\":\"{}\"",
            lat,
            lon,
            time.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        )?;
        write_sensor_field(out, "tem", self.environment.temperature)?;
        write_sensor_field(out, "pre", self.environment.pressure)?;
        write_sensor_field(out, "hum", self.environment.humidity)?;
        out.write_char('}')
    }

    /// The record as a JSON object string
    pub fn to_json(&self) -> Result<String, fmt::Error> {
        let mut text = String::with_capacity(RECORD_MAX_LEN);
        self.write_json(&mut text)?;
        Ok(text)
    }
}

fn write_sensor_field<W: Write>(out: &mut W, key: &str, value: SensorValue) -> fmt::Result {
    if value.is_error() {
        return Ok(());
    }
    write!(out, ",\"{}\":{}", key, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea::parser::parse_rmc;
    use crate::sensors::SENSOR_ERROR;

    const RMC: &[u8] = b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

    fn fix() -> ParsedFix {
        parse_rmc(RMC).unwrap()
    }

    fn environment() -> EnvironmentalSample {
        EnvironmentalSample {
            temperature: SensorValue::new(-18, -250_000),
            pressure: SensorValue::new(101, 325_000),
            humidity: SensorValue::new(0, -500_000),
        }
    }

    #[test]
    fn test_full_record() {
        let json = ColdChainRecord::new(fix(), environment()).to_json().unwrap();
        assert_eq!(
            json,
            "{\"lat\":48.117300,\"lon\":11.516667,\"time\":\"2094-03-23T12:35:19.000Z\",\
             \"tem\":-18.250000,\"pre\":101.325000,\"hum\":-0.500000}"
        );

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["tem"].as_f64().unwrap(), -18.25);
        assert_eq!(parsed["hum"].as_f64().unwrap(), -0.5);
    }

    #[test]
    fn test_sentinel_fields_omitted() {
        let json = ColdChainRecord::new(fix(), EnvironmentalSample::unavailable())
            .to_json()
            .unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let object = parsed.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert!(object.contains_key("lat"));
        assert!(object.contains_key("lon"));
        assert!(object.contains_key("time"));
    }

    #[test]
    fn test_single_sentinel_field_omitted() {
        let mut env = environment();
        env.pressure = SENSOR_ERROR;
        let json = ColdChainRecord::new(fix(), env).to_json().unwrap();
        assert!(json.contains("\"tem\""));
        assert!(!json.contains("\"pre\""));
        assert!(json.contains("\"hum\""));
    }

    #[test]
    fn test_worst_case_fits() {
        let mut worst = fix();
        worst.latitude = crate::nmea::protocol::FixedPoint::new(-8959999, 1000);
        worst.longitude = crate::nmea::protocol::FixedPoint::new(-17959999, 1000);
        let env = EnvironmentalSample {
            temperature: SensorValue::new(-100, -123_456),
            pressure: SensorValue::new(-100, -123_456),
            humidity: SensorValue::new(-100, -123_456),
        };

        let json = ColdChainRecord::new(worst, env).to_json().unwrap();
        assert!(json.len() <= RECORD_MAX_LEN, "{} bytes: {}", json.len(), json);
    }

    #[test]
    fn test_no_timestamp_is_error() {
        let mut broken = fix();
        broken.date = Default::default();
        assert!(ColdChainRecord::new(broken, environment()).to_json().is_err());
    }

    #[test]
    fn test_no_position_is_error() {
        let mut broken = fix();
        broken.latitude = Default::default();
        assert!(ColdChainRecord::new(broken, environment()).to_json().is_err());
    }

    #[test]
    fn test_milliseconds() {
        let mut f = fix();
        f.time.microseconds = 26_000;
        let json = ColdChainRecord::new(f, environment()).to_json().unwrap();
        assert!(json.contains("\"time\":\"2094-03-23T12:35:19.026Z\""));
    }
}
