//! # NMEA Protocol Module
//!
//! Implementation of the NMEA 0183 subset spoken by the GNSS receiver.
//!
//! This module handles:
//! - Sentence classification (RMC, GSV, other, invalid)
//! - RMC fix decoding (position, UTC date/time, lock status)
//! - GSV decoding for lock-progress reporting
//! - XOR checksum validation

pub mod protocol;
pub mod parser;
pub mod checksum;
