//! # Line Framer
//!
//! Assembles the receiver's byte stream into newline-terminated sentences.
//!
//! The framer sits on the byte-delivery path: it never blocks, never allocates,
//! and writes into a fixed [`LINE_CAPACITY`] buffer. Completed lines are copied
//! into a [`RawLine`] and offered to the raw-line queue with `try_send`; when the
//! queue is full the line is dropped.

use std::fmt;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error};

use crate::nmea::checksum::trim_line_ending;
use crate::nmea::protocol::NMEA_MAX_LENGTH;

/// Capacity of one framed line, including the terminating newline
pub const LINE_CAPACITY: usize = NMEA_MAX_LENGTH;

/// Default depth of the raw-line queue between framer and parser
pub const DEFAULT_RAW_LINE_QUEUE: usize = 16;

/// One framed sentence, passed by value
#[derive(Clone, Copy)]
pub struct RawLine {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
}

impl RawLine {
    /// Copy a slice into a line, truncating at [`LINE_CAPACITY`]
    pub fn from_slice(data: &[u8]) -> Self {
        let len = data.len().min(LINE_CAPACITY);
        let mut bytes = [0u8; LINE_CAPACITY];
        bytes[..len].copy_from_slice(&data[..len]);
        Self { bytes, len }
    }

    /// Line contents (including the newline when it fit)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for RawLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(trim_line_ending(self.as_bytes())))
    }
}

impl fmt::Debug for RawLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawLine")
            .field("len", &self.len)
            .field("text", &self.to_string())
            .finish()
    }
}

/// What happened to a byte fed into the framer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Byte buffered (or discarded on overflow); no line completed
    Pending,
    /// A line was completed and queued
    Queued,
    /// A line was completed but the raw-line queue was full or closed
    Dropped,
}

/// Byte-to-line assembler feeding the raw-line queue
pub struct LineFramer {
    buf: [u8; LINE_CAPACITY],
    pos: usize,
    overflowing: bool,
    tx: mpsc::Sender<RawLine>,
    lines_dropped: u64,
    lines_truncated: u64,
}

impl LineFramer {
    /// Create a framer feeding `tx`
    pub fn new(tx: mpsc::Sender<RawLine>) -> Self {
        Self {
            buf: [0u8; LINE_CAPACITY],
            pos: 0,
            overflowing: false,
            tx,
            lines_dropped: 0,
            lines_truncated: 0,
        }
    }

    /// Feed one byte from the serial source
    ///
    /// A newline completes the current line; a newline on an empty buffer is
    /// ignored. Bytes beyond [`LINE_CAPACITY`] are discarded until the next newline.
    pub fn push_byte(&mut self, byte: u8) -> FrameOutcome {
        if byte != b'\n' {
            if self.pos < LINE_CAPACITY {
                self.buf[self.pos] = byte;
                self.pos += 1;
            } else {
                self.overflowing = true;
            }
            return FrameOutcome::Pending;
        }

        if self.pos == 0 {
            return FrameOutcome::Pending;
        }

        // Terminate the line, truncating when the newline does not fit
        let len = if self.pos < LINE_CAPACITY {
            self.buf[self.pos] = b'\n';
            self.pos + 1
        } else {
            self.pos
        };

        if self.overflowing {
            self.lines_truncated += 1;
        }

        let line = RawLine { bytes: self.buf, len };
        self.pos = 0;
        self.overflowing = false;

        match self.tx.try_send(line) {
            Ok(()) => FrameOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.lines_dropped += 1;
                error!("Raw line queue full, dropping reading");
                FrameOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                self.lines_dropped += 1;
                debug!("Raw line queue closed, dropping reading");
                FrameOutcome::Dropped
            }
        }
    }

    /// Feed a run of bytes, returning how many lines were queued
    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        bytes
            .iter()
            .filter(|&&b| self.push_byte(b) == FrameOutcome::Queued)
            .count()
    }

    /// Bytes currently held for the in-progress line
    pub fn pending_len(&self) -> usize {
        self.pos
    }

    /// Lines lost because the raw-line queue was full
    pub fn lines_dropped(&self) -> u64 {
        self.lines_dropped
    }

    /// Lines that lost bytes to buffer overflow
    pub fn lines_truncated(&self) -> u64 {
        self.lines_truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer(depth: usize) -> (LineFramer, mpsc::Receiver<RawLine>) {
        let (tx, rx) = mpsc::channel(depth);
        (LineFramer::new(tx), rx)
    }

    #[test]
    fn test_single_line() {
        let (mut framer, mut rx) = framer(4);

        assert_eq!(framer.push_bytes(b"$GPGSV,1,1,00*79\r\n"), 1);

        let line = rx.try_recv().unwrap();
        assert_eq!(line.as_bytes(), b"$GPGSV,1,1,00*79\r\n");
        assert_eq!(line.to_string(), "$GPGSV,1,1,00*79");
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_partial_line_stays_pending() {
        let (mut framer, mut rx) = framer(4);

        assert_eq!(framer.push_bytes(b"$GPRMC,08"), 0);
        assert_eq!(framer.pending_len(), 9);
        assert!(rx.try_recv().is_err());

        assert_eq!(framer.push_bytes(b"1836\n"), 1);
        assert_eq!(rx.try_recv().unwrap().as_bytes(), b"$GPRMC,081836\n");
    }

    #[test]
    fn test_lines_arrive_in_order() {
        let (mut framer, mut rx) = framer(4);

        framer.push_bytes(b"$A\n$B\n$C\n");

        assert_eq!(rx.try_recv().unwrap().to_string(), "$A");
        assert_eq!(rx.try_recv().unwrap().to_string(), "$B");
        assert_eq!(rx.try_recv().unwrap().to_string(), "$C");
    }

    #[test]
    fn test_empty_line_ignored() {
        let (mut framer, mut rx) = framer(4);

        assert_eq!(framer.push_byte(b'\n'), FrameOutcome::Pending);
        assert_eq!(framer.push_byte(b'\n'), FrameOutcome::Pending);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_overflow_never_exceeds_capacity() {
        let (mut framer, mut rx) = framer(4);

        for _ in 0..10 * LINE_CAPACITY {
            framer.push_byte(b'x');
            assert!(framer.pending_len() <= LINE_CAPACITY);
        }
        assert_eq!(framer.push_byte(b'\n'), FrameOutcome::Queued);

        // Full buffer: newline does not fit, line is truncated
        let line = rx.try_recv().unwrap();
        assert_eq!(line.len(), LINE_CAPACITY);
        assert!(line.as_bytes().iter().all(|&b| b == b'x'));
        assert_eq!(framer.lines_truncated(), 1);
    }

    #[test]
    fn test_newline_appended_when_room_remains() {
        let (mut framer, mut rx) = framer(4);

        let content = vec![b'y'; LINE_CAPACITY - 1];
        framer.push_bytes(&content);
        framer.push_byte(b'\n');

        let line = rx.try_recv().unwrap();
        assert_eq!(line.len(), LINE_CAPACITY);
        assert_eq!(line.as_bytes()[LINE_CAPACITY - 1], b'\n');
        assert_eq!(framer.lines_truncated(), 0);
    }

    #[test]
    fn test_overflow_resets_after_newline() {
        let (mut framer, mut rx) = framer(4);

        framer.push_bytes(&vec![b'x'; LINE_CAPACITY + 20]);
        framer.push_bytes(b"\n$GPGSV,1,1,00*79\n");

        let _truncated = rx.try_recv().unwrap();
        assert_eq!(rx.try_recv().unwrap().to_string(), "$GPGSV,1,1,00*79");
    }

    #[test]
    fn test_full_queue_drops_line() {
        let (mut framer, mut rx) = framer(1);

        assert_eq!(framer.push_bytes(b"$A\n"), 1);
        framer.push_bytes(b"$B");
        assert_eq!(framer.push_byte(b'\n'), FrameOutcome::Dropped);
        assert_eq!(framer.lines_dropped(), 1);

        // The queued line is untouched and the buffer is reset
        assert_eq!(rx.try_recv().unwrap().to_string(), "$A");
        assert_eq!(framer.pending_len(), 0);
        assert_eq!(framer.push_bytes(b"$C\n"), 1);
        assert_eq!(rx.try_recv().unwrap().to_string(), "$C");
    }

    #[test]
    fn test_closed_queue_drops_line() {
        let (mut framer, rx) = framer(1);
        drop(rx);

        framer.push_bytes(b"$A");
        assert_eq!(framer.push_byte(b'\n'), FrameOutcome::Dropped);
    }

    #[test]
    fn test_raw_line_from_slice_truncates() {
        let line = RawLine::from_slice(&vec![b'z'; LINE_CAPACITY * 2]);
        assert_eq!(line.len(), LINE_CAPACITY);
        assert!(!line.is_empty());
    }
}
