//! # Serial Communication Module
//!
//! Handles the serial link to the GNSS receiver.
//!
//! This module handles:
//! - Opening the receiver's UART (default 9600 baud, 8N1)
//! - Reading the byte stream
//! - Feeding every byte to the [`framer::LineFramer`]
//! - Retrying after read errors

pub mod framer;
pub mod port_trait;

use std::time::Duration;

use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use framer::LineFramer;
use port_trait::{SerialSource, TokioSerialPort};

/// Default GNSS receiver baud rate
pub const GNSS_BAUD_RATE: u32 = 9600;

/// Bytes requested from the port per read
const READ_CHUNK_SIZE: usize = 64;

/// Open the GNSS receiver's serial port
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyS0")
/// * `baud_rate` - Line speed
///
/// # Errors
///
/// Returns error if the port cannot be opened
///
/// # Examples
///
/// ```no_run
/// use coldchain_tracker::serial::{open_gnss_port, GNSS_BAUD_RATE};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let port = open_gnss_port("/dev/ttyS0", GNSS_BAUD_RATE)?;
/// # Ok(())
/// # }
/// ```
pub fn open_gnss_port(path: &str, baud_rate: u32) -> Result<TokioSerialPort> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| TrackerError::Serial(format!("Failed to open {}: {}", path, e)))?;

    info!("Opened GNSS receiver at {} ({} baud)", path, baud_rate);
    Ok(TokioSerialPort::new(port))
}

/// Pumps bytes from a [`SerialSource`] into a [`LineFramer`]
pub struct SerialReader {
    source: Box<dyn SerialSource>,
    framer: LineFramer,
    retry_delay: Duration,
}

impl SerialReader {
    pub fn new(source: Box<dyn SerialSource>, framer: LineFramer, retry_delay: Duration) -> Self {
        Self {
            source,
            framer,
            retry_delay,
        }
    }

    /// Read until the stream ends
    ///
    /// Read errors are logged and retried after `retry_delay`.
    pub async fn run(mut self) {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            match self.source.read(&mut chunk).await {
                Ok(0) => {
                    info!(
                        "GNSS serial stream ended ({} lines dropped, {} truncated)",
                        self.framer.lines_dropped(),
                        self.framer.lines_truncated()
                    );
                    return;
                }
                Ok(n) => {
                    let queued = self.framer.push_bytes(&chunk[..n]);
                    if queued > 0 {
                        debug!("Framed {} line(s) from {} bytes", queued, n);
                    }
                }
                Err(e) => {
                    warn!("GNSS serial read failed: {}", e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::port_trait::mocks::MockSerialSource;
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_reader_frames_chunked_input() {
        let source = MockSerialSource::new();
        source.push_chunk(b"$GPGSV,1,1,");
        source.push_chunk(b"00*79\r\n$GPTXT,01,01,02,ANTSTATUS=OK*3B\r\n");

        let (tx, mut rx) = mpsc::channel(4);
        let reader = SerialReader::new(
            Box::new(source.clone()),
            LineFramer::new(tx),
            Duration::from_millis(1),
        );
        reader.run().await;

        assert_eq!(rx.recv().await.unwrap().to_string(), "$GPGSV,1,1,00*79");
        assert_eq!(rx.recv().await.unwrap().to_string(), "$GPTXT,01,01,02,ANTSTATUS=OK*3B");
        // Framer (and its sender) dropped with the reader
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reader_keeps_lines_longer_than_read_chunk() {
        const RMC: &str = "$GPRMC,081836,A,3751.65,S,14507.36,E,000.0,360.0,130998,011.3,E*62";
        let source = MockSerialSource::new();
        source.push_chunk(format!("{RMC}\r\n{RMC}\r\n").as_bytes());

        let (tx, mut rx) = mpsc::channel(4);
        SerialReader::new(Box::new(source), LineFramer::new(tx), Duration::from_millis(1))
            .run()
            .await;

        assert_eq!(rx.recv().await.unwrap().to_string(), RMC);
        assert_eq!(rx.recv().await.unwrap().to_string(), RMC);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_retries_after_error() {
        let source = MockSerialSource::new();
        source.push_error(std::io::ErrorKind::Other);
        source.push_chunk(b"$A\n");

        let (tx, mut rx) = mpsc::channel(4);
        SerialReader::new(Box::new(source.clone()), LineFramer::new(tx), Duration::from_secs(1))
            .run()
            .await;

        assert_eq!(rx.recv().await.unwrap().to_string(), "$A");
        // error, data, end-of-stream
        assert_eq!(source.read_count(), 3);
    }

    #[test]
    fn test_open_invalid_port_returns_error() {
        let result = open_gnss_port("/dev/nonexistent_gnss_device_12345", GNSS_BAUD_RATE);

        match result {
            Err(TrackerError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_gnss_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            Err(other) => panic!("Expected Serial error, got: {:?}", other),
            Ok(_) => panic!("Expected error for missing device"),
        }
    }

    #[test]
    fn test_baud_rate_constant() {
        assert_eq!(GNSS_BAUD_RATE, 9600);
    }
}
