//! # Telemetry Module
//!
//! Everything between an accepted fix and the cloud.
//!
//! This module handles:
//! - The cold-chain record and its JSON form
//! - The bounded record queue
//! - Packing queued records into size-capped batch payloads
//! - Delivering payloads over MQTT

pub mod batch;
pub mod queue;
pub mod record;
pub mod transport;

pub use batch::{BatchConfig, BatchUploader, UploadError, UploadSummary};
pub use queue::{record_queue, RecordConsumer, RecordProducer};
pub use record::ColdChainRecord;
pub use transport::{Transport, TransportError};
