//! # NMEA Protocol Constants and Types
//!
//! Core definitions for the NMEA 0183 sentences emitted by the GNSS receiver.

use chrono::{NaiveDate, NaiveDateTime};

/// Every sentence starts with this byte
pub const NMEA_START_BYTE: u8 = b'$';

/// Separator between the sentence body and its checksum
pub const NMEA_CHECKSUM_DELIMITER: u8 = b'*';

/// Maximum sentence length handled by the tracker (framer line capacity)
pub const NMEA_MAX_LENGTH: usize = 128;

/// Length of the address field (talker id + sentence id), e.g. `GPRMC`
pub const NMEA_ADDRESS_LENGTH: usize = 5;

/// Recommended minimum navigation data
pub const SENTENCE_ID_RMC: &str = "RMC";

/// Satellites in view
pub const SENTENCE_ID_GSV: &str = "GSV";

/// RMC status flag reported while the receiver has a position fix
pub const RMC_STATUS_VALID: &str = "A";

/// RMC status flag reported while the receiver is still acquiring
pub const RMC_STATUS_INVALID: &str = "V";

/// Sentence kinds the tracker distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceKind {
    /// `xxRMC`: position, time and validity
    Rmc,
    /// `xxGSV`: satellite visibility report
    Gsv,
    /// Well-formed sentence of a kind the tracker does not use
    Other,
    /// Malformed line or checksum mismatch
    Invalid,
}

/// Signed fixed-point decimal as sent on the wire: `value / scale`
///
/// A `scale` of 0 marks an empty field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedPoint {
    pub value: i32,
    pub scale: i32,
}

impl FixedPoint {
    /// Create a fixed-point value
    pub const fn new(value: i32, scale: i32) -> Self {
        Self { value, scale }
    }

    /// Whether the originating field was empty
    pub fn is_empty(&self) -> bool {
        self.scale == 0
    }

    /// Convert an NMEA `[d]ddmm.mmmm` coordinate to signed decimal degrees
    ///
    /// Returns NaN for an empty field.
    ///
    /// # Examples
    ///
    /// ```
    /// use coldchain_tracker::nmea::protocol::FixedPoint;
    ///
    /// // 49°16.45' N
    /// let lat = FixedPoint::new(491645, 100);
    /// assert!((lat.to_coord() - 49.274166).abs() < 0.000001);
    /// ```
    pub fn to_coord(&self) -> f64 {
        if self.scale == 0 {
            return f64::NAN;
        }
        let per_degree = self.scale as i64 * 100;
        let value = self.value as i64;
        let degrees = value / per_degree;
        let minutes = value % per_degree;
        degrees as f64 + minutes as f64 / self.scale as f64 / 60.0
    }
}

/// UTC date from an RMC sentence (two-digit year)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixDate {
    pub day: u8,
    pub month: u8,
    pub year: u8,
}

/// UTC time of day from an RMC sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixTime {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub microseconds: u32,
}

/// Result of parsing one RMC sentence
///
/// Fields are zeroed (and coordinates empty) when the receiver leaves them
/// blank, which only happens while `valid` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParsedFix {
    /// Latitude, `ddmm.mmmm`, negative for south
    pub latitude: FixedPoint,
    /// Longitude, `dddmm.mmmm`, negative for west
    pub longitude: FixedPoint,
    pub date: FixDate,
    pub time: FixTime,
    /// Receiver reports a satellite lock (`A` status)
    pub valid: bool,
}

impl ParsedFix {
    /// Latitude in decimal degrees
    pub fn latitude_degrees(&self) -> f64 {
        self.latitude.to_coord()
    }

    /// Longitude in decimal degrees
    pub fn longitude_degrees(&self) -> f64 {
        self.longitude.to_coord()
    }

    /// Combined UTC timestamp, `None` if the date/time fields do not form a real instant
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        let date = NaiveDate::from_ymd_opt(
            2000 + self.date.year as i32,
            self.date.month as u32,
            self.date.day as u32,
        )?;
        date.and_hms_micro_opt(
            self.time.hours as u32,
            self.time.minutes as u32,
            self.time.seconds as u32,
            self.time.microseconds,
        )
    }
}

/// Header of a GSV (satellites in view) sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SatelliteReport {
    /// Number of GSV sentences in this cycle
    pub total_msgs: u8,
    /// Index of this sentence within the cycle (1-based)
    pub msg_nr: u8,
    /// Satellites in view
    pub total_sats: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coord_conversion_north_east() {
        // 4807.038 -> 48°07.038'
        let lat = FixedPoint::new(4807038, 1000);
        assert!((lat.to_coord() - 48.1173).abs() < 0.0001);

        let lon = FixedPoint::new(1131000, 1000);
        assert!((lon.to_coord() - 11.516666).abs() < 0.0001);
    }

    #[test]
    fn test_coord_conversion_negative() {
        let lat = FixedPoint::new(-4807038, 1000);
        assert!((lat.to_coord() + 48.1173).abs() < 0.0001);
    }

    #[test]
    fn test_empty_fixed_point_is_nan() {
        let empty = FixedPoint::default();
        assert!(empty.is_empty());
        assert!(empty.to_coord().is_nan());
    }

    #[test]
    fn test_timestamp_valid() {
        let fix = ParsedFix {
            date: FixDate { day: 18, month: 9, year: 23 },
            time: FixTime { hours: 22, minutes: 52, seconds: 42, microseconds: 250_000 },
            valid: true,
            ..Default::default()
        };

        let ts = fix.timestamp().unwrap();
        assert_eq!(
            ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            "2023-09-18T22:52:42.250Z"
        );
    }

    #[test]
    fn test_timestamp_impossible_date() {
        let fix = ParsedFix {
            date: FixDate { day: 30, month: 2, year: 24 },
            ..Default::default()
        };
        assert!(fix.timestamp().is_none());
    }

    #[test]
    fn test_timestamp_zeroed_fields() {
        // Blank date fields decode to day/month 0
        assert!(ParsedFix::default().timestamp().is_none());
    }
}
