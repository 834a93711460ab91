//! # Fix Pipeline
//!
//! Consumes framed lines, tracks satellite lock and turns due fixes into
//! queued cold-chain records.
//!
//! For every line:
//! 1. Classify it. While there is no lock, a GSV sentence is parsed at most
//!    once per [`PROGRESS_INTERVAL`] to report how many satellites are in view.
//! 2. Anything other than RMC is discarded.
//! 3. Parse the RMC fix and update the lock state. No lock, no record.
//! 4. Ask the fix gate whether the sample interval has elapsed.
//! 5. Pair the fix with the latest environmental sample (bounded wait, sentinel
//!    values on timeout) and push it onto the record queue (bounded wait, drop
//!    when full).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::gate::TimeGate;
use crate::nmea::parser::{classify, parse_gsv, parse_rmc};
use crate::nmea::protocol::SentenceKind;
use crate::sensors::cache::EnvironmentalCache;
use crate::sensors::EnvironmentalSample;
use crate::serial::framer::RawLine;
use crate::settings::CadenceSettings;
use crate::telemetry::queue::RecordProducer;
use crate::telemetry::record::ColdChainRecord;

/// Minimum spacing of "awaiting lock" progress reports
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(3);

/// Queue depth is reported whenever it reaches a multiple of this
const DEPTH_REPORT_STEP: usize = 5;

/// Bounded waits used by the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Wait for the environmental cache lock
    pub cache_timeout: Duration,
    /// Wait for a free record queue slot
    pub push_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_timeout: Duration::from_millis(50),
            push_timeout: Duration::from_millis(1),
        }
    }
}

/// What the pipeline did with one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Valid sentence of a kind that does not produce records
    Ignored,
    /// Malformed line or RMC parse failure
    ParseFailed,
    /// RMC without satellite lock
    NoLock,
    /// Sample interval has not elapsed since the last accepted fix
    NotDue,
    /// Record queued; queue depth afterwards
    Queued { depth: usize },
    /// Record queue full
    Dropped,
}

/// Running counters, readable from other tasks
#[derive(Debug, Default)]
pub struct PipelineStats {
    queued: AtomicU64,
    dropped: AtomicU64,
    parse_failed: AtomicU64,
    progress_reports: AtomicU64,
}

impl PipelineStats {
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn parse_failed(&self) -> u64 {
        self.parse_failed.load(Ordering::Relaxed)
    }

    /// "Awaiting lock" reports emitted
    pub fn progress_reports(&self) -> u64 {
        self.progress_reports.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Parser task state
pub struct FixPipeline {
    settings: Arc<CadenceSettings>,
    cache: EnvironmentalCache,
    producer: RecordProducer,
    config: PipelineConfig,
    has_lock: bool,
    fix_gate: TimeGate,
    progress_gate: TimeGate,
    stats: Arc<PipelineStats>,
}

impl FixPipeline {
    pub fn new(
        settings: Arc<CadenceSettings>,
        cache: EnvironmentalCache,
        producer: RecordProducer,
        config: PipelineConfig,
    ) -> Self {
        Self {
            settings,
            cache,
            producer,
            config,
            has_lock: false,
            fix_gate: TimeGate::new(),
            progress_gate: TimeGate::new(),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Whether the last RMC sentence reported a lock
    pub fn has_lock(&self) -> bool {
        self.has_lock
    }

    /// Shared handle to the counters
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Consume lines until every sender is gone
    pub async fn run(mut self, mut lines: mpsc::Receiver<RawLine>) {
        info!("Fix pipeline running");
        while let Some(line) = lines.recv().await {
            self.process_line(&line).await;
        }
        info!(
            "Raw line queue closed; {} records queued, {} dropped, {} unparsable lines",
            self.stats.queued(),
            self.stats.dropped(),
            self.stats.parse_failed()
        );
    }

    /// Handle one framed line
    pub async fn process_line(&mut self, line: &RawLine) -> LineOutcome {
        let bytes = line.as_bytes();

        let kind = classify(bytes);
        match kind {
            SentenceKind::Rmc => {}
            SentenceKind::Gsv => {
                self.report_progress(line);
                return LineOutcome::Ignored;
            }
            SentenceKind::Other => return LineOutcome::Ignored,
            SentenceKind::Invalid => {
                debug!("Discarding malformed line: {}", line);
                PipelineStats::bump(&self.stats.parse_failed);
                return LineOutcome::ParseFailed;
            }
        }

        let fix = match parse_rmc(bytes) {
            Ok(fix) => fix,
            Err(e) => {
                debug!("Discarding {}: {}", line, e);
                PipelineStats::bump(&self.stats.parse_failed);
                return LineOutcome::ParseFailed;
            }
        };

        self.update_lock(fix.valid);
        if !fix.valid {
            return LineOutcome::NoLock;
        }

        if !self.fix_gate.is_due(self.settings.sample_interval(), true) {
            return LineOutcome::NotDue;
        }

        let environment = match self.cache.snapshot_within(self.config.cache_timeout).await {
            Some(sample) => sample,
            None => {
                error!(
                    "Cannot access environmental data within {:?}",
                    self.config.cache_timeout
                );
                EnvironmentalSample::unavailable()
            }
        };

        let record = ColdChainRecord::new(fix, environment);
        match self.producer.push(record, self.config.push_timeout).await {
            Ok(depth) => {
                PipelineStats::bump(&self.stats.queued);
                debug!("nmea: {} t: {}", line, environment.temperature);

                if depth > 0 && depth % DEPTH_REPORT_STEP == 0 {
                    info!(
                        "{} readings queued; {} slots remain",
                        depth,
                        self.producer.capacity().saturating_sub(depth)
                    );
                }
                LineOutcome::Queued { depth }
            }
            Err(e) => {
                error!("Unable to queue parsed cold-chain record: {}", e);
                PipelineStats::bump(&self.stats.dropped);
                LineOutcome::Dropped
            }
        }
    }

    fn report_progress(&mut self, line: &RawLine) {
        if self.has_lock || !self.progress_gate.is_due(PROGRESS_INTERVAL, true) {
            return;
        }

        match parse_gsv(line.as_bytes()) {
            Ok(report) => {
                PipelineStats::bump(&self.stats.progress_reports);
                info!("Awaiting GPS lock. Satellite count: {}", report.total_sats);
            }
            Err(e) => debug!("Unreadable GSV sentence {}: {}", line, e),
        }
    }

    fn update_lock(&mut self, valid: bool) {
        if valid == self.has_lock {
            return;
        }
        if valid {
            info!("GPS lock acquired");
        } else {
            warn!("GPS lock lost");
        }
        self.has_lock = valid;
    }
}
