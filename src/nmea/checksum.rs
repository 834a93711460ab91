//! # NMEA Checksum
//!
//! XOR checksum over every byte between `$` and `*`, transmitted as two hex digits.

use super::protocol::{NMEA_CHECKSUM_DELIMITER, NMEA_START_BYTE};

/// Calculate the XOR checksum of a sentence body (without `$` and `*hh`)
///
/// # Examples
///
/// ```
/// use coldchain_tracker::nmea::checksum::nmea_checksum;
///
/// assert_eq!(nmea_checksum(b"GPGSV,1,1,00"), 0x79);
/// ```
pub fn nmea_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

/// Check sentence framing and checksum
///
/// Accepts an optional trailing `\r\n`. Sentences without a checksum are
/// accepted unless `strict` is set. Only printable ASCII is allowed.
pub fn check_sentence(sentence: &[u8], strict: bool) -> bool {
    let sentence = trim_line_ending(sentence);

    if sentence.first() != Some(&NMEA_START_BYTE) {
        return false;
    }

    let after_start = &sentence[1..];
    let (body, checksum) = match after_start.iter().position(|&b| b == NMEA_CHECKSUM_DELIMITER) {
        Some(idx) => (&after_start[..idx], Some(&after_start[idx + 1..])),
        None => (after_start, None),
    };

    if !body.iter().all(|&b| (0x20..=0x7E).contains(&b)) {
        return false;
    }

    match checksum {
        Some(hex) => match parse_hex_byte(hex) {
            Some(expected) => expected == nmea_checksum(body),
            None => false,
        },
        None => !strict,
    }
}

/// Strip a trailing `\n`, `\r\n` or `\r`
pub fn trim_line_ending(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

/// Parse exactly two hex digits
fn parse_hex_byte(hex: &[u8]) -> Option<u8> {
    if hex.len() != 2 {
        return None;
    }
    let hi = (hex[0] as char).to_digit(16)?;
    let lo = (hex[1] as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RMC: &[u8] =
        b"$GPRMC,081836,A,3751.65,S,14507.36,E,000.0,360.0,130998,011.3,E*62";

    #[test]
    fn test_checksum_known_sentence() {
        assert_eq!(
            nmea_checksum(b"GPRMC,081836,A,3751.65,S,14507.36,E,000.0,360.0,130998,011.3,E"),
            0x62
        );
    }

    #[test]
    fn test_checksum_empty() {
        assert_eq!(nmea_checksum(b""), 0x00);
    }

    #[test]
    fn test_check_valid_sentence() {
        assert!(check_sentence(RMC, false));
        assert!(check_sentence(RMC, true));
    }

    #[test]
    fn test_check_with_line_ending() {
        let mut line = RMC.to_vec();
        line.extend_from_slice(b"\r\n");
        assert!(check_sentence(&line, true));
    }

    #[test]
    fn test_check_lowercase_hex() {
        assert!(check_sentence(b"$GPGSV,1,1,00*79", true));
        assert!(check_sentence(b"$GPTXT,01,01,02,ANTSTATUS=OK*3b", true));
    }

    #[test]
    fn test_check_mismatch() {
        let corrupted =
            b"$GPRMC,081836,A,3751.65,S,14507.36,E,000.0,360.0,130998,011.3,E*63";
        assert!(!check_sentence(corrupted, false));
    }

    #[test]
    fn test_check_missing_checksum() {
        let bare = b"$GPRMC,081836,A,3751.65,S,14507.36,E,000.0,360.0,130998,011.3,E";
        assert!(check_sentence(bare, false));
        assert!(!check_sentence(bare, true));
    }

    #[test]
    fn test_check_requires_start_byte() {
        assert!(!check_sentence(b"GPGSV,1,1,00*79", false));
        assert!(!check_sentence(b"", false));
    }

    #[test]
    fn test_check_rejects_non_printable() {
        assert!(!check_sentence(b"$GPGSV,1,\x01,00", false));
    }

    #[test]
    fn test_check_malformed_checksum_field() {
        assert!(!check_sentence(b"$GPGSV,1,1,00*7", false));
        assert!(!check_sentence(b"$GPGSV,1,1,00*7G", false));
        assert!(!check_sentence(b"$GPGSV,1,1,00*790", false));
    }

    #[test]
    fn test_trim_line_ending() {
        assert_eq!(trim_line_ending(b"$A\r\n"), b"$A");
        assert_eq!(trim_line_ending(b"$A\n"), b"$A");
        assert_eq!(trim_line_ending(b"$A"), b"$A");
        assert_eq!(trim_line_ending(b"\n"), b"");
    }
}
