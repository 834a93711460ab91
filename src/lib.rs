//! # Cold-Chain Tracker Library
//!
//! Sensor acquisition and telemetry batching for a cold-chain tracker.
//!
//! GPS fixes arriving as NMEA sentences on a serial port are paired with the
//! latest temperature/pressure/humidity reading and queued as cold-chain
//! records, which are uploaded in size-bounded JSON batches whenever the
//! cloud link is up.

pub mod app;
pub mod config;
pub mod error;
pub mod gate;
pub mod nmea;
pub mod pipeline;
pub mod sensors;
pub mod serial;
pub mod settings;
pub mod telemetry;
