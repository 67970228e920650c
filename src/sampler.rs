//! Periodic sampling task.
//!
//! Once per tick the sampler pulls the current cell readings from the
//! [`SampleSource`], pairs each with the latest position fix, and pushes the
//! valid results into the buffer. It never touches the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::assembler::{PositionTracker, SampleAssembler};
use crate::buffer::{BufferError, SampleBuffer};
use crate::sample::CellReading;

/// Pull-style source of raw radio-cell readings.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Readings for every currently visible cell. May be empty.
    async fn current_cells(&self) -> Vec<CellReading>;
}

/// Counters reported when the sampler stops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplerStats {
    pub ticks: u64,
    /// Ticks skipped because no position fix had arrived yet
    pub ticks_without_fix: u64,
    pub readings_seen: u64,
    pub samples_buffered: u64,
    pub readings_rejected: u64,
}

/// Periodic producer feeding the buffer.
pub struct Sampler {
    source: Arc<dyn SampleSource>,
    positions: PositionTracker,
    assembler: SampleAssembler,
    buffer: SampleBuffer,
    interval: Duration,
}

impl Sampler {
    pub fn new(
        source: Arc<dyn SampleSource>,
        positions: PositionTracker,
        buffer: SampleBuffer,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            positions,
            assembler: SampleAssembler::new(),
            buffer,
            interval,
        }
    }

    /// Run one sampling pass.
    pub async fn tick(&self, stats: &mut SamplerStats) {
        stats.ticks += 1;

        let Some(position) = self.positions.latest() else {
            stats.ticks_without_fix += 1;
            trace!("No position fix yet, skipping tick");
            return;
        };

        for reading in self.source.current_cells().await {
            stats.readings_seen += 1;
            match self.assembler.assemble(position, reading) {
                Some(sample) => match self.buffer.push(sample) {
                    Ok(()) => stats.samples_buffered += 1,
                    Err(BufferError::Closed) => {
                        stats.samples_buffered += 1;
                        warn!("Sample buffered but engine is not listening");
                    }
                    Err(e) => {
                        stats.readings_rejected += 1;
                        warn!(error = %e, "Buffer refused sample");
                    }
                },
                None => stats.readings_rejected += 1,
            }
        }
    }

    /// Sample every `interval` until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> SamplerStats {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = SamplerStats::default();

        info!(interval_ms = self.interval.as_millis() as u64, "Sampler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick(&mut stats).await,
            }
        }

        debug!(
            ticks = stats.ticks,
            buffered = stats.samples_buffered,
            rejected = stats.readings_rejected,
            "Sampler stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FlushSignal;
    use crate::sample::{RadioKind, INVALID_CELL_ID};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Emits one valid and one sentinel reading per call, with rising ids.
    #[derive(Default)]
    struct CountingSource {
        next: AtomicI64,
    }

    #[async_trait]
    impl SampleSource for CountingSource {
        async fn current_cells(&self) -> Vec<CellReading> {
            let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            vec![
                CellReading::new(RadioKind::Lte, id, Some(-90), 1, "Tele2"),
                CellReading::new(RadioKind::Gsm, INVALID_CELL_ID, None, 1, "Tele2"),
            ]
        }
    }

    fn sampler(capacity: usize) -> (Sampler, PositionTracker, SampleBuffer, FlushSignal) {
        let (buffer, signal) = SampleBuffer::new(capacity);
        let positions = PositionTracker::new();
        let sampler = Sampler::new(
            Arc::new(CountingSource::default()),
            positions.clone(),
            buffer.clone(),
            Duration::from_millis(250),
        );
        (sampler, positions, buffer, signal)
    }

    #[tokio::test]
    async fn test_tick_without_fix_buffers_nothing() {
        let (sampler, _positions, buffer, _signal) = sampler(10);
        let mut stats = SamplerStats::default();

        sampler.tick(&mut stats).await;

        assert!(buffer.is_empty());
        assert_eq!(stats.ticks_without_fix, 1);
        assert_eq!(stats.readings_seen, 0);
    }

    #[tokio::test]
    async fn test_tick_filters_invalid_readings() {
        let (sampler, positions, buffer, _signal) = sampler(10);
        positions.update(48.85, 2.35);
        let mut stats = SamplerStats::default();

        sampler.tick(&mut stats).await;

        assert_eq!(stats.readings_seen, 2);
        assert_eq!(stats.samples_buffered, 1);
        assert_eq!(stats.readings_rejected, 1);

        let samples = buffer.drain_all();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].cell_id(), 1);
        assert_eq!(samples[0].position().latitude, 48.85);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_cancelled() {
        let (sampler, positions, buffer, _signal) = sampler(100);
        positions.update(1.0, 2.0);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sampler.run(cancel.clone()));

        // Ticks at 0, 250, 500, 750 and 1000ms.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        cancel.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.ticks, 5);
        let ids: Vec<i64> = buffer.drain_all().iter().map(|s| s.cell_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }
}
