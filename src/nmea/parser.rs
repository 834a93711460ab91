//! # NMEA Sentence Parser
//!
//! Classifies framed lines and decodes the RMC (fix) and GSV (satellites in view)
//! sentences the tracker needs.

use super::checksum::{check_sentence, trim_line_ending};
use super::protocol::*;
use crate::error::{Result, TrackerError};

/// Minimum number of comma-separated fields in an RMC sentence (address through date)
const RMC_MIN_FIELDS: usize = 10;

/// Minimum number of fields in a GSV sentence (address through satellites in view)
const GSV_MIN_FIELDS: usize = 4;

/// Identify the kind of a framed line
///
/// Lines failing framing or checksum validation are [`SentenceKind::Invalid`].
/// Sentences without a checksum are accepted.
///
/// # Examples
///
/// ```
/// use coldchain_tracker::nmea::parser::classify;
/// use coldchain_tracker::nmea::protocol::SentenceKind;
///
/// assert_eq!(classify(b"$GPGSV,1,1,00*79\r\n"), SentenceKind::Gsv);
/// assert_eq!(classify(b"garbage"), SentenceKind::Invalid);
/// ```
pub fn classify(line: &[u8]) -> SentenceKind {
    if !check_sentence(line, false) {
        return SentenceKind::Invalid;
    }

    let sentence = trim_line_ending(line);
    let address_end = 1 + NMEA_ADDRESS_LENGTH;

    if sentence.len() < address_end {
        return SentenceKind::Invalid;
    }

    let address = &sentence[1..address_end];
    if !address.iter().all(u8::is_ascii_alphanumeric) {
        return SentenceKind::Invalid;
    }

    // Address must be followed by a field separator, the checksum, or nothing
    match sentence.get(address_end) {
        None | Some(b',') | Some(b'*') => {}
        Some(_) => return SentenceKind::Invalid,
    }

    match &address[2..] {
        id if id == SENTENCE_ID_RMC.as_bytes() => SentenceKind::Rmc,
        id if id == SENTENCE_ID_GSV.as_bytes() => SentenceKind::Gsv,
        _ => SentenceKind::Other,
    }
}

/// Parse an RMC sentence into a [`ParsedFix`]
///
/// A fix with status `V` may leave position and time blank. A fix with status
/// `A` must carry a position and a real UTC date/time.
///
/// # Errors
///
/// Returns error if:
/// - The line is not a well-formed RMC sentence
/// - A numeric field is malformed
/// - A valid fix is missing position or date/time
///
/// # Examples
///
/// ```
/// use coldchain_tracker::nmea::parser::parse_rmc;
///
/// let fix = parse_rmc(b"$GPRMC,081836,A,3751.65,S,14507.36,E,000.0,360.0,130998,011.3,E*62").unwrap();
/// assert!(fix.valid);
/// assert!((fix.latitude_degrees() + 37.860833).abs() < 0.000001);
/// ```
pub fn parse_rmc(line: &[u8]) -> Result<ParsedFix> {
    let fields = sentence_fields(line, SENTENCE_ID_RMC)?;

    if fields.len() < RMC_MIN_FIELDS {
        return Err(TrackerError::Nmea(format!(
            "RMC has {} fields, expected at least {}",
            fields.len(),
            RMC_MIN_FIELDS
        )));
    }

    let valid = match fields[2] {
        RMC_STATUS_VALID => true,
        RMC_STATUS_INVALID | "" => false,
        other => {
            return Err(TrackerError::Nmea(format!("Invalid RMC status: {:?}", other)));
        }
    };

    let fix = ParsedFix {
        time: parse_time(fields[1])?,
        latitude: apply_hemisphere(parse_fixed(fields[3])?, fields[4], "N", "S")?,
        longitude: apply_hemisphere(parse_fixed(fields[5])?, fields[6], "E", "W")?,
        date: parse_date(fields[9])?,
        valid,
    };

    if fix.valid {
        if fix.latitude.is_empty() || fix.longitude.is_empty() {
            return Err(TrackerError::Nmea("Valid RMC without position".to_string()));
        }
        if fields[1].is_empty() || fields[9].is_empty() || fix.timestamp().is_none() {
            return Err(TrackerError::Nmea(format!(
                "Valid RMC without usable date/time: {} {}",
                fields[9], fields[1]
            )));
        }
    }

    Ok(fix)
}

/// Parse the header of a GSV sentence
///
/// # Errors
///
/// Returns error if the line is not a GSV sentence or its counters are malformed
pub fn parse_gsv(line: &[u8]) -> Result<SatelliteReport> {
    let fields = sentence_fields(line, SENTENCE_ID_GSV)?;

    if fields.len() < GSV_MIN_FIELDS {
        return Err(TrackerError::Nmea(format!(
            "GSV has {} fields, expected at least {}",
            fields.len(),
            GSV_MIN_FIELDS
        )));
    }

    let total_msgs = parse_int(fields[1])?
        .ok_or_else(|| TrackerError::Nmea("GSV missing message count".to_string()))?;
    let msg_nr = parse_int(fields[2])?
        .ok_or_else(|| TrackerError::Nmea("GSV missing message number".to_string()))?;
    let total_sats = parse_int(fields[3])?.unwrap_or(0);

    Ok(SatelliteReport {
        total_msgs: narrow(total_msgs, "GSV message count")?,
        msg_nr: narrow(msg_nr, "GSV message number")?,
        total_sats: narrow(total_sats, "GSV satellite count")?,
    })
}

/// Validate a line and split its body into fields
///
/// The first field is the address (e.g. `GPRMC`). The checksum and line ending are removed.
fn sentence_fields<'a>(line: &'a [u8], sentence_id: &str) -> Result<Vec<&'a str>> {
    if !check_sentence(line, false) {
        return Err(TrackerError::Nmea("Framing or checksum check failed".to_string()));
    }

    let sentence = std::str::from_utf8(trim_line_ending(line))
        .map_err(|e| TrackerError::Nmea(format!("Sentence is not ASCII: {}", e)))?;

    // check_sentence guarantees the leading '$'
    let body = &sentence[1..];
    let body = match body.find('*') {
        Some(idx) => &body[..idx],
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let address = fields[0];

    if address.len() != NMEA_ADDRESS_LENGTH || &address[2..] != sentence_id {
        return Err(TrackerError::Nmea(format!(
            "Expected {} sentence, got {:?}",
            sentence_id, address
        )));
    }

    Ok(fields)
}

/// Parse a signed decimal field into a [`FixedPoint`]
///
/// Empty fields yield an empty value (scale 0). Fractional digits that would
/// overflow the 32-bit representation are truncated.
fn parse_fixed(field: &str) -> Result<FixedPoint> {
    if field.is_empty() {
        return Ok(FixedPoint::default());
    }

    let (negative, digits) = match field.as_bytes()[0] {
        b'-' => (true, &field[1..]),
        b'+' => (false, &field[1..]),
        _ => (false, field),
    };

    let (int_part, frac_part) = match digits.find('.') {
        Some(idx) => (&digits[..idx], &digits[idx + 1..]),
        None => (digits, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(TrackerError::Nmea(format!("Empty number: {:?}", field)));
    }

    let malformed = || TrackerError::Nmea(format!("Malformed number: {:?}", field));

    let mut value: i32 = 0;
    for byte in int_part.bytes() {
        let digit = decimal_digit(byte).ok_or_else(malformed)?;
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| TrackerError::Nmea(format!("Number overflow: {:?}", field)))?;
    }

    let mut scale: i32 = 1;
    let mut truncated = false;
    for byte in frac_part.bytes() {
        let digit = decimal_digit(byte).ok_or_else(malformed)?;
        if truncated {
            continue;
        }
        match (value.checked_mul(10).and_then(|v| v.checked_add(digit)), scale.checked_mul(10)) {
            (Some(v), Some(s)) => {
                value = v;
                scale = s;
            }
            _ => truncated = true,
        }
    }

    Ok(FixedPoint::new(if negative { -value } else { value }, scale))
}

/// Negate a coordinate for the southern/western hemisphere
fn apply_hemisphere(coord: FixedPoint, field: &str, positive: &str, negative: &str) -> Result<FixedPoint> {
    match field {
        "" => Ok(coord),
        f if f == positive => Ok(coord),
        f if f == negative => Ok(FixedPoint::new(-coord.value, coord.scale)),
        other => Err(TrackerError::Nmea(format!("Invalid hemisphere: {:?}", other))),
    }
}

/// Parse `hhmmss[.s+]`
fn parse_time(field: &str) -> Result<FixTime> {
    if field.is_empty() {
        return Ok(FixTime::default());
    }

    let bytes = field.as_bytes();
    if bytes.len() < 6 {
        return Err(TrackerError::Nmea(format!("Time too short: {:?}", field)));
    }

    let hours = two_digits(&bytes[0..2], field)?;
    let minutes = two_digits(&bytes[2..4], field)?;
    let seconds = two_digits(&bytes[4..6], field)?;

    if hours > 23 || minutes > 59 || seconds > 59 {
        return Err(TrackerError::Nmea(format!("Time out of range: {:?}", field)));
    }

    let microseconds = match &bytes[6..] {
        [] => 0,
        [b'.', frac @ ..] => {
            let mut micros: u32 = 0;
            let mut place: u32 = 100_000;
            for &byte in frac {
                let digit = decimal_digit(byte)
                    .ok_or_else(|| TrackerError::Nmea(format!("Malformed time: {:?}", field)))?;
                micros += digit as u32 * place;
                place /= 10;
            }
            micros
        }
        _ => return Err(TrackerError::Nmea(format!("Malformed time: {:?}", field))),
    };

    Ok(FixTime { hours, minutes, seconds, microseconds })
}

/// Parse `ddmmyy`
fn parse_date(field: &str) -> Result<FixDate> {
    if field.is_empty() {
        return Ok(FixDate::default());
    }

    let bytes = field.as_bytes();
    if bytes.len() != 6 {
        return Err(TrackerError::Nmea(format!("Malformed date: {:?}", field)));
    }

    Ok(FixDate {
        day: two_digits(&bytes[0..2], field)?,
        month: two_digits(&bytes[2..4], field)?,
        year: two_digits(&bytes[4..6], field)?,
    })
}

/// Parse an unsigned integer field, `None` when empty
fn parse_int(field: &str) -> Result<Option<u32>> {
    if field.is_empty() {
        return Ok(None);
    }
    field
        .parse::<u32>()
        .map(Some)
        .map_err(|e| TrackerError::Nmea(format!("Malformed integer {:?}: {}", field, e)))
}

fn narrow<T: TryFrom<u32>>(value: u32, what: &str) -> Result<T> {
    T::try_from(value).map_err(|_| TrackerError::Nmea(format!("{} out of range: {}", what, value)))
}

fn two_digits(pair: &[u8], field: &str) -> Result<u8> {
    match (decimal_digit(pair[0]), decimal_digit(pair[1])) {
        (Some(tens), Some(ones)) => Ok((tens * 10 + ones) as u8),
        _ => Err(TrackerError::Nmea(format!("Expected digits in {:?}", field))),
    }
}

#[inline]
fn decimal_digit(byte: u8) -> Option<i32> {
    byte.is_ascii_digit().then(|| (byte - b'0') as i32)
}
