//! # Environmental Sampler
//!
//! Background task refreshing the [`EnvironmentalCache`] once per second.
//!
//! The task idles until the sensor reports ready. A missing sensor or a failed
//! fetch stores the sentinel sample rather than stopping acquisition. Driver
//! calls block, so each sample is read on Tokio's blocking pool.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::cache::EnvironmentalCache;
use super::{EnvironmentalSample, EnvironmentalSensor, SensorChannel, SENSOR_ERROR};

/// Default sampling period (1 Hz)
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Periodic writer of the latest environmental sample
pub struct EnvironmentalSampler {
    sensor: Option<Box<dyn EnvironmentalSensor>>,
    cache: EnvironmentalCache,
    period: Duration,
}

impl EnvironmentalSampler {
    /// Create a sampler; `sensor` is `None` when no device is bound
    pub fn new(sensor: Option<Box<dyn EnvironmentalSensor>>, cache: EnvironmentalCache) -> Self {
        Self {
            sensor,
            cache,
            period: SAMPLE_PERIOD,
        }
    }

    /// Override the sampling period
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn has_sensor(&self) -> bool {
        self.sensor.is_some()
    }

    /// Take one sample and publish it to the cache
    ///
    /// The driver does blocking sysfs reads, so they run on the blocking pool.
    /// Channels are read before the lock is taken; the lock is held only to
    /// swap in the complete sample.
    pub async fn sample_once(&mut self) -> EnvironmentalSample {
        let sample = match self.sensor.take() {
            Some(mut sensor) => {
                let read = tokio::task::spawn_blocking(move || {
                    let sample = read_sensor(sensor.as_mut());
                    (sensor, sample)
                })
                .await;

                match read {
                    Ok((sensor, sample)) => {
                        self.sensor = Some(sensor);
                        sample
                    }
                    Err(e) => {
                        error!("Environmental sensor driver crashed, unbinding it: {}", e);
                        EnvironmentalSample::unavailable()
                    }
                }
            }
            None => EnvironmentalSample::unavailable(),
        };

        self.cache.store(sample).await;
        sample
    }

    /// Run until the runtime shuts down
    ///
    /// Waits for `ready` before the first sample. If the sender is dropped
    /// without signalling, the sensor never came up and the task exits.
    pub async fn run(mut self, ready: oneshot::Receiver<()>) {
        if ready.await.is_err() {
            info!("Environmental sensor not ready; sampler idle");
            return;
        }

        info!("Environmental sampler running every {:?}", self.period);
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let sample = self.sample_once().await;
            debug!(
                "Sampled t={} p={} h={}",
                sample.temperature, sample.pressure, sample.humidity
            );
        }
    }
}

/// Fetch and read all channels, substituting the sentinel on failure
fn read_sensor(sensor: &mut dyn EnvironmentalSensor) -> EnvironmentalSample {
    if let Err(e) = sensor.fetch() {
        warn!("Environmental sensor fetch failed: {}", e);
        return EnvironmentalSample::unavailable();
    }

    let read = |channel: SensorChannel| {
        sensor.read_channel(channel).unwrap_or_else(|e| {
            warn!("Cannot read {:?}: {}", channel, e);
            SENSOR_ERROR
        })
    };

    EnvironmentalSample {
        temperature: read(SensorChannel::Temperature),
        pressure: read(SensorChannel::Pressure),
        humidity: read(SensorChannel::Humidity),
    }
}
