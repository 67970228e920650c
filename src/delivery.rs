//! Delivery engine: drains the buffer into batches and posts them to the
//! collector with health-gated retry.
//!
//! A single worker owns the engine and reacts to flush signals from the
//! buffer, so at most one batch is ever in flight. Each batch goes through
//! the states below and always ends back in `Idle`:
//!
//! ```text
//! Idle --threshold--> Sending --200--> Idle
//!                        |
//!                   all attempts failed
//!                        v
//!                  HealthChecking --health ok + re-post 200--> Idle
//!                        |
//!                   rounds exhausted
//!                        v
//!                    Exhausted --discard + notify--> Idle
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{FlushSignal, SampleBuffer};
use crate::client::{ClientError, Collector};
use crate::notify::{NotificationSink, COLLECTOR_UNAVAILABLE_MESSAGE, NO_INTERNET_MESSAGE};
use crate::prober::Prober;
use crate::sample::Batch;

/// Pipeline state of the delivery engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting for the buffer to reach its flush threshold
    Idle,

    /// Posting a batch on the primary path
    Sending,

    /// Primary attempts failed; polling connectivity and collector health
    HealthChecking,

    /// Every attempt failed; the batch is being discarded
    Exhausted,
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryState::Idle => write!(f, "idle"),
            DeliveryState::Sending => write!(f, "sending"),
            DeliveryState::HealthChecking => write!(f, "health-checking"),
            DeliveryState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Retry budgets and endpoints used by the engine.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Maximum samples per batch
    pub batch_size: usize,

    /// Primary POST attempts before health checking
    pub send_attempts: u32,

    /// Fixed delay between primary attempts
    pub send_retry_delay: Duration,

    /// Health-check rounds before the batch is discarded
    pub health_check_attempts: u32,

    /// Fixed delay between health-check rounds
    pub health_check_interval: Duration,

    /// `host:port` of the external reachability probe
    pub probe_host: String,

    /// Collector health endpoint
    pub health_url: String,
}

impl DeliveryPolicy {
    /// Total time a batch spends sleeping between attempts before it is
    /// discarded, excluding the per-request timeouts.
    pub fn retry_budget(&self) -> Duration {
        let send_pauses = self.send_attempts.saturating_sub(1);
        // Every health round, including the first, is preceded by a pause.
        self.send_retry_delay * send_pauses + self.health_check_interval * self.health_check_attempts
    }
}

/// Statistics about delivery operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryStats {
    /// Batches acknowledged with HTTP 200
    pub batches_delivered: u64,

    /// Samples acknowledged with HTTP 200
    pub samples_delivered: u64,

    /// Batches dropped after exhausting every attempt
    pub batches_discarded: u64,

    /// Samples dropped after exhausting every attempt
    pub samples_discarded: u64,

    /// Failed POSTs, primary and post-health-check combined
    pub send_failures: u64,

    /// Primary attempts beyond the first
    pub send_retries: u64,

    /// Health-check rounds entered
    pub health_checks: u64,

    /// Rounds in which the external probe failed
    pub connectivity_failures: u64,
}

/// How a single batch left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Discarded,
    /// Cancellation arrived mid-flight; the batch went back to the buffer.
    Cancelled,
}

/// Class of the most recent failure, used to pick the terminal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    NoInternet,
    CollectorDown,
}

/// Await `fut` unless `cancel` fires first.
async fn or_cancel<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Single-flight batch delivery engine.
pub struct DeliveryEngine {
    buffer: SampleBuffer,
    collector: Arc<dyn Collector>,
    prober: Arc<dyn Prober>,
    sink: Arc<dyn NotificationSink>,
    policy: DeliveryPolicy,
    state_tx: watch::Sender<DeliveryState>,
    stats_tx: watch::Sender<DeliveryStats>,
    stats: DeliveryStats,
}

impl DeliveryEngine {
    pub fn new(
        buffer: SampleBuffer,
        collector: Arc<dyn Collector>,
        prober: Arc<dyn Prober>,
        sink: Arc<dyn NotificationSink>,
        policy: DeliveryPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(DeliveryState::Idle);
        let (stats_tx, _) = watch::channel(DeliveryStats::default());
        Self {
            buffer,
            collector,
            prober,
            sink,
            policy,
            state_tx,
            stats_tx,
            stats: DeliveryStats::default(),
        }
    }

    /// Current pipeline state.
    pub fn state(&self) -> DeliveryState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions from outside the worker.
    pub fn subscribe(&self) -> watch::Receiver<DeliveryState> {
        self.state_tx.subscribe()
    }

    /// Get current delivery statistics.
    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    /// Observe statistics while the engine is owned by its worker.
    ///
    /// Updated on every state transition and after every failed post.
    pub fn subscribe_stats(&self) -> watch::Receiver<DeliveryStats> {
        self.stats_tx.subscribe()
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(self.stats.clone());
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    fn transition(&self, next: DeliveryState) {
        self.publish_stats();
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Delivery state transition");
        }
    }

    /// Worker loop. Runs until `cancel` fires, then hands the engine back
    /// for a final flush.
    pub async fn run(mut self, mut signal: FlushSignal, cancel: CancellationToken) -> Self {
        info!(
            batch_size = self.policy.batch_size,
            send_attempts = self.policy.send_attempts,
            health_check_attempts = self.policy.health_check_attempts,
            retry_budget_secs = self.policy.retry_budget().as_secs(),
            "Delivery engine started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Delivery engine cancelled");
                    break;
                }
                received = signal.recv() => {
                    if received.is_none() {
                        debug!("Flush signal closed");
                        break;
                    }
                    self.process_backlog(&cancel).await;
                }
            }
        }

        info!(
            batches_delivered = self.stats.batches_delivered,
            batches_discarded = self.stats.batches_discarded,
            buffered = self.buffer.len(),
            "Delivery engine stopped"
        );
        self
    }

    /// Deliver batches for as long as the backlog is at or above threshold.
    pub async fn process_backlog(&mut self, cancel: &CancellationToken) {
        while self.buffer.at_threshold() && !cancel.is_cancelled() {
            let batch = Batch::new(self.buffer.drain(self.policy.batch_size));
            if self.deliver(batch, cancel).await == DeliveryOutcome::Cancelled {
                break;
            }
        }
    }

    /// Take one batch through Sending, HealthChecking and Exhausted.
    pub async fn deliver(&mut self, batch: Batch, cancel: &CancellationToken) -> DeliveryOutcome {
        let outcome = match self.send_phase(&batch, cancel).await {
            Some(Ok(())) => DeliveryOutcome::Delivered,
            Some(Err(failure)) => match self.health_phase(&batch, failure, cancel).await {
                Some(Ok(())) => DeliveryOutcome::Delivered,
                Some(Err(failure)) => {
                    self.exhaust(&batch, failure);
                    DeliveryOutcome::Discarded
                }
                None => DeliveryOutcome::Cancelled,
            },
            None => DeliveryOutcome::Cancelled,
        };

        match outcome {
            DeliveryOutcome::Delivered => {
                self.stats.batches_delivered += 1;
                self.stats.samples_delivered += batch.len() as u64;
                info!(
                    batch_id = %batch.batch_id,
                    batch_size = batch.len(),
                    "Delivered sample batch"
                );
            }
            DeliveryOutcome::Cancelled => {
                debug!(batch_id = %batch.batch_id, "Delivery interrupted, restoring batch");
                self.buffer.restore(batch.samples);
            }
            DeliveryOutcome::Discarded => {}
        }

        self.transition(DeliveryState::Idle);
        outcome
    }

    /// Primary path. `None` means cancelled.
    async fn send_phase(
        &mut self,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> Option<Result<(), FailureClass>> {
        self.transition(DeliveryState::Sending);
        let mut failure = FailureClass::CollectorDown;

        for attempt in 1..=self.policy.send_attempts {
            if attempt > 1 {
                self.stats.send_retries += 1;
                or_cancel(cancel, sleep(self.policy.send_retry_delay)).await?;
            }

            match or_cancel(cancel, self.collector.post_batch(batch)).await? {
                Ok(()) => return Some(Ok(())),
                Err(e) => {
                    failure = self.record_send_failure(batch, &e, attempt);
                }
            }
        }

        Some(Err(failure))
    }

    /// Health-gated retry. `None` means cancelled.
    async fn health_phase(
        &mut self,
        batch: &Batch,
        mut failure: FailureClass,
        cancel: &CancellationToken,
    ) -> Option<Result<(), FailureClass>> {
        self.transition(DeliveryState::HealthChecking);
        let mut advised = false;

        for round in 1..=self.policy.health_check_attempts {
            or_cancel(cancel, sleep(self.policy.health_check_interval)).await?;
            self.stats.health_checks += 1;

            let online = or_cancel(cancel, self.prober.probe_external(&self.policy.probe_host)).await?;
            if !online {
                self.stats.connectivity_failures += 1;
                failure = FailureClass::NoInternet;
                warn!(
                    batch_id = %batch.batch_id,
                    round = round,
                    probe_host = %self.policy.probe_host,
                    "No internet connectivity"
                );
                if !advised {
                    self.sink.notify_no_internet(NO_INTERNET_MESSAGE);
                    advised = true;
                }
                continue;
            }

            let healthy =
                or_cancel(cancel, self.prober.probe_collector_health(&self.policy.health_url))
                    .await?;
            if !healthy {
                failure = FailureClass::CollectorDown;
                warn!(
                    batch_id = %batch.batch_id,
                    round = round,
                    max_rounds = self.policy.health_check_attempts,
                    "Collector health check failed"
                );
                continue;
            }

            debug!(batch_id = %batch.batch_id, round = round, "Collector healthy, re-posting batch");
            match or_cancel(cancel, self.collector.post_batch(batch)).await? {
                Ok(()) => return Some(Ok(())),
                Err(e) => {
                    failure = self.record_send_failure(batch, &e, self.policy.send_attempts + round);
                }
            }
        }

        Some(Err(failure))
    }

    fn record_send_failure(&mut self, batch: &Batch, error: &ClientError, attempt: u32) -> FailureClass {
        self.stats.send_failures += 1;
        self.publish_stats();
        warn!(
            batch_id = %batch.batch_id,
            error = %error,
            attempt = attempt,
            "Batch post failed"
        );
        if error.is_connectivity() {
            FailureClass::NoInternet
        } else {
            FailureClass::CollectorDown
        }
    }

    fn exhaust(&mut self, batch: &Batch, failure: FailureClass) {
        self.transition(DeliveryState::Exhausted);
        self.stats.batches_discarded += 1;
        self.stats.samples_discarded += batch.len() as u64;

        let message = match failure {
            FailureClass::NoInternet => NO_INTERNET_MESSAGE,
            FailureClass::CollectorDown => COLLECTOR_UNAVAILABLE_MESSAGE,
        };
        error!(
            batch_id = %batch.batch_id,
            discarded = batch.len(),
            "Delivery attempts exhausted, discarding batch"
        );
        self.sink.notify_terminal_failure(message);
    }

    /// Best-effort shutdown flush: one attempt per batch, no retries.
    ///
    /// Stops at the first failure and discards whatever is left. Returns
    /// the number of samples delivered.
    pub async fn flush_remaining(&mut self) -> usize {
        let mut delivered = 0;

        while !self.buffer.is_empty() {
            let batch = Batch::new(self.buffer.drain(self.policy.batch_size));
            self.transition(DeliveryState::Sending);
            let result = self.collector.post_batch(&batch).await;
            self.transition(DeliveryState::Idle);

            match result {
                Ok(()) => {
                    delivered += batch.len();
                    self.stats.batches_delivered += 1;
                    self.stats.samples_delivered += batch.len() as u64;
                }
                Err(e) => {
                    let lost = batch.len() + self.buffer.drain_all().len();
                    self.stats.send_failures += 1;
                    self.stats.samples_discarded += lost as u64;
                    warn!(error = %e, lost = lost, "Shutdown flush failed, dropping remaining samples");
                    break;
                }
            }
        }

        self.publish_stats();
        delivered
    }
}
