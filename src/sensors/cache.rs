//! Latest environmental sample shared between the sampler and the fix pipeline.
//!
//! The sampler is the single writer and waits for the lock without bound. The
//! fix pipeline reads with a bounded wait so a stuck writer cannot stall
//! ingestion. Whole samples are swapped under the lock, so readers never see a
//! mix of two ticks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use super::EnvironmentalSample;

/// Shared handle to the latest environmental sample
#[derive(Debug, Clone)]
pub struct EnvironmentalCache {
    inner: Arc<Mutex<EnvironmentalSample>>,
}

impl EnvironmentalCache {
    /// New cache holding the sentinel sample
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EnvironmentalSample::unavailable())),
        }
    }

    /// Acquire the sample, waiting as long as it takes
    pub async fn acquire(&self) -> MutexGuard<'_, EnvironmentalSample> {
        self.inner.lock().await
    }

    /// Acquire the sample, giving up after `wait`
    pub async fn acquire_within(&self, wait: Duration) -> Option<MutexGuard<'_, EnvironmentalSample>> {
        tokio::time::timeout(wait, self.inner.lock()).await.ok()
    }

    /// Overwrite the whole sample
    pub async fn store(&self, sample: EnvironmentalSample) {
        *self.acquire().await = sample;
    }

    /// Copy of the current sample, `None` if the lock was not obtained within `wait`
    pub async fn snapshot_within(&self, wait: Duration) -> Option<EnvironmentalSample> {
        self.acquire_within(wait).await.map(|guard| *guard)
    }
}

impl Default for EnvironmentalCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorValue;

    fn sample(t: i32) -> EnvironmentalSample {
        EnvironmentalSample {
            temperature: SensorValue::new(t, 0),
            pressure: SensorValue::new(101, 325_000),
            humidity: SensorValue::new(40, 0),
        }
    }

    #[tokio::test]
    async fn test_starts_unavailable() {
        let cache = EnvironmentalCache::new();
        let snap = cache.snapshot_within(Duration::from_millis(50)).await.unwrap();
        assert_eq!(snap, EnvironmentalSample::unavailable());
    }

    #[tokio::test]
    async fn test_store_and_snapshot() {
        let cache = EnvironmentalCache::new();
        cache.store(sample(5)).await;

        let reader = cache.clone();
        let snap = reader.snapshot_within(Duration::from_millis(50)).await.unwrap();
        assert_eq!(snap, sample(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_read_times_out_while_held() {
        let cache = EnvironmentalCache::new();
        let _writer = cache.acquire().await;

        let snap = cache.snapshot_within(Duration::from_millis(50)).await;
        assert!(snap.is_none());
    }

    #[tokio::test]
    async fn test_read_after_release() {
        let cache = EnvironmentalCache::new();
        {
            let mut guard = cache.acquire().await;
            *guard = sample(7);
        }
        assert_eq!(cache.snapshot_within(Duration::from_millis(50)).await, Some(sample(7)));
    }
}
