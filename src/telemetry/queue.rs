//! # Record Queue
//!
//! Bounded FIFO between the fix pipeline (producer) and the batch uploader
//! (consumer). A push into a full queue waits at most the given timeout and is
//! then rejected; queued records are never overwritten.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use super::record::ColdChainRecord;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// A record that could not be queued
#[derive(Debug, Error)]
pub enum PushError {
    /// Queue stayed full for the whole timeout
    #[error("record queue full")]
    Full(ColdChainRecord),

    /// Consumer side was dropped
    #[error("record queue closed")]
    Closed(ColdChainRecord),
}

impl PushError {
    /// Recover the rejected record
    pub fn into_record(self) -> ColdChainRecord {
        match self {
            PushError::Full(record) | PushError::Closed(record) => record,
        }
    }
}

/// Create a queue holding at most `capacity` records
///
/// # Panics
///
/// Panics if `capacity` is zero
pub fn record_queue(capacity: usize) -> (RecordProducer, RecordConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (RecordProducer { tx }, RecordConsumer { rx, capacity })
}

/// Sending half, held by the fix pipeline
#[derive(Debug, Clone)]
pub struct RecordProducer {
    tx: mpsc::Sender<ColdChainRecord>,
}

impl RecordProducer {
    /// Queue a record, waiting up to `timeout` for a free slot
    ///
    /// # Returns
    ///
    /// Queue depth after the push
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Full`] if no slot freed up in time
    pub async fn push(&self, record: ColdChainRecord, timeout: Duration) -> Result<usize, PushError> {
        match self.tx.send_timeout(record, timeout).await {
            Ok(()) => Ok(self.depth()),
            Err(SendTimeoutError::Timeout(record)) => Err(PushError::Full(record)),
            Err(SendTimeoutError::Closed(record)) => Err(PushError::Closed(record)),
        }
    }

    /// Records currently queued
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Free slots
    pub fn remaining(&self) -> usize {
        self.tx.capacity()
    }
}

/// Receiving half, held by the batch uploader
#[derive(Debug)]
pub struct RecordConsumer {
    rx: mpsc::Receiver<ColdChainRecord>,
    capacity: usize,
}

impl RecordConsumer {
    /// Take the oldest record, waiting up to `timeout`
    ///
    /// Returns `None` if nothing arrived in time.
    pub async fn pop(&mut self, timeout: Duration) -> Option<ColdChainRecord> {
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }

    /// Records currently queued
    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
