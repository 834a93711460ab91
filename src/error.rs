//! # Error Types
//!
//! Custom error types for the cold-chain tracker using `thiserror`.

use thiserror::Error;

/// Main error type for the cold-chain tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    /// NMEA sentence could not be parsed
    #[error("NMEA parse error: {0}")]
    Nmea(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Environmental sensor errors
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// A cadence setting was outside its permitted range
    #[error("{name} must be between {min} and {max}, got {value}")]
    SettingOutOfRange {
        name: &'static str,
        value: i64,
        min: u32,
        max: u32,
    },

    /// A setting name that the tracker does not know
    #[error("Unknown setting: {0}")]
    UnknownSetting(String),
}

/// Result type alias for the cold-chain tracker
pub type Result<T> = std::result::Result<T, TrackerError>;
