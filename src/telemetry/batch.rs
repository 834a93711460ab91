//! # Batch Uploader
//!
//! Drains the record queue into JSON-array payloads no larger than the
//! configured buffer and hands each to the [`Transport`].
//!
//! This module handles:
//! - Packing records into a fixed-capacity payload buffer
//! - Closing a payload when the queue empties or headroom for one more
//!   worst-case record runs out
//! - Aborting the pass on the first failed submit
//!
//! Delivery is at-most-once. Records of a payload whose submit failed are gone;
//! payloads submitted earlier in the pass stay delivered and records not yet
//! dequeued stay queued for the next pass.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::queue::RecordConsumer;
use super::record::RECORD_MAX_LEN;
use super::transport::{Transport, TransportError, CONTENT_TYPE_JSON};

/// Default payload buffer size
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Default stream endpoint
pub const DEFAULT_ENDPOINT: &str = "gps";

/// Uploader tuning
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Stream endpoint payloads are submitted to
    pub endpoint: String,
    /// Maximum payload size in bytes
    pub buffer_capacity: usize,
    /// Worst-case size of one formatted record
    pub record_max_len: usize,
    /// Wait per dequeued record
    pub dequeue_timeout: Duration,
    /// Bound on one submit call
    pub submit_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            record_max_len: RECORD_MAX_LEN,
            dequeue_timeout: Duration::from_millis(10),
            submit_timeout: Duration::from_secs(2),
        }
    }
}

/// Outcome of a completed upload pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadSummary {
    /// Records in successfully submitted payloads
    pub delivered: usize,
    /// Payloads successfully submitted
    pub payloads: usize,
    /// Records dropped because they could not be formatted
    pub discarded: usize,
}

/// An upload pass aborted by a failed submit
#[derive(Debug, Error)]
#[error("payload {payload} failed ({lost} records lost, {delivered} delivered): {source}")]
pub struct UploadError {
    /// Records delivered earlier in the pass
    pub delivered: usize,
    /// Records in the failed payload
    pub lost: usize,
    /// 1-based index of the failed payload within the pass
    pub payload: usize,
    #[source]
    pub source: TransportError,
}

/// Payload under construction: `[` + records joined by `,` + `]`
///
/// Writes that would exceed the capacity are refused.
#[derive(Debug)]
pub struct PayloadBuffer {
    buf: BytesMut,
    capacity: usize,
    records: usize,
}

impl PayloadBuffer {
    pub fn new(capacity: usize) -> Self {
        let mut payload = Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            records: 0,
        };
        payload.open();
        payload
    }

    /// Reset to an empty array opening
    fn open(&mut self) {
        self.buf.clear();
        self.buf.reserve(self.capacity);
        self.buf.put_u8(b'[');
        self.records = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Whether one more record of up to `record_len` bytes fits, with its
    /// separator and the closing bracket
    pub fn has_room_for(&self, record_len: usize) -> bool {
        let separator = usize::from(self.records > 0);
        self.remaining() >= separator + record_len + 1
    }

    /// Append one JSON object
    ///
    /// Returns `false` (leaving the buffer untouched) if it does not fit.
    pub fn push_record(&mut self, json: &str) -> bool {
        if !self.has_room_for(json.len()) {
            return false;
        }
        if self.records > 0 {
            self.buf.put_u8(b',');
        }
        self.buf.put_slice(json.as_bytes());
        self.records += 1;
        true
    }

    /// Close the array, take the payload and start a new one
    pub fn finish(&mut self) -> Bytes {
        self.buf.put_u8(b']');
        let payload = self.buf.split().freeze();
        self.open();
        payload
    }
}

/// Drains a [`RecordConsumer`] through a [`Transport`]
pub struct BatchUploader {
    consumer: RecordConsumer,
    config: BatchConfig,
}

impl BatchUploader {
    pub fn new(consumer: RecordConsumer, config: BatchConfig) -> Self {
        Self { consumer, config }
    }

    /// Records waiting for upload
    pub fn pending(&self) -> usize {
        self.consumer.depth()
    }

    /// Upload everything currently queued
    ///
    /// An empty queue is a no-op. Otherwise records are dequeued into a payload
    /// which is submitted when the queue runs dry or the payload lacks room
    /// for another worst-case record, then packing continues in a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError`] on the first failed submit. The pass stops there.
    pub async fn upload(&mut self, transport: &dyn Transport) -> Result<UploadSummary, UploadError> {
        let mut summary = UploadSummary::default();

        if self.consumer.is_empty() {
            return Ok(summary);
        }

        info!("Uploading {} cached records", self.consumer.depth());
        let mut payload = PayloadBuffer::new(self.config.buffer_capacity);

        loop {
            let Some(record) = self.consumer.pop(self.config.dequeue_timeout).await else {
                warn!("Record queue drained unexpectedly during upload");
                break;
            };

            match record.to_json() {
                Ok(json) if json.len() <= self.config.record_max_len => {
                    if !payload.push_record(&json) {
                        // Headroom is checked after every append, so only a
                        // misconfigured buffer can get here
                        error!("Record does not fit an empty payload, discarding");
                        summary.discarded += 1;
                    }
                }
                Ok(json) => {
                    warn!("Discarding {}-byte record: {}", json.len(), json);
                    summary.discarded += 1;
                }
                Err(_) => {
                    warn!("Discarding record without position or timestamp: {:?}", record.fix);
                    summary.discarded += 1;
                }
            }

            let drained = self.consumer.is_empty();
            if drained || !payload.has_room_for(self.config.record_max_len) {
                self.submit(&mut payload, transport, &mut summary).await?;
                if drained {
                    break;
                }
            }
        }

        if !payload.is_empty() {
            self.submit(&mut payload, transport, &mut summary).await?;
        }

        info!(
            "Pushed {} cached readings in {} payload(s)",
            summary.delivered, summary.payloads
        );
        Ok(summary)
    }

    async fn submit(
        &self,
        payload: &mut PayloadBuffer,
        transport: &dyn Transport,
        summary: &mut UploadSummary,
    ) -> Result<(), UploadError> {
        let records = payload.record_count();
        if records == 0 {
            return Ok(());
        }

        let bytes = payload.finish();
        debug!("Submitting payload of {} records, {} bytes", records, bytes.len());

        match transport
            .submit(&self.config.endpoint, CONTENT_TYPE_JSON, bytes, self.config.submit_timeout)
            .await
        {
            Ok(()) => {
                summary.delivered += records;
                summary.payloads += 1;
                Ok(())
            }
            Err(source) => {
                error!("Failed to send sensor data: {}", source);
                Err(UploadError {
                    delivered: summary.delivered,
                    lost: records,
                    payload: summary.payloads + 1,
                    source,
                })
            }
        }
    }
}
