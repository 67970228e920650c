//! Cell Uplink - radio-cell telemetry service
//!
//! This service samples the visible radio cells together with the current
//! position, buffers valid samples and delivers them to the collector in
//! batches, one request at a time.
//!
//! ## Features
//!
//! - Periodic sampling with validity filtering
//! - Threshold-triggered, single-flight batch delivery
//! - Bounded retries followed by health-gated recovery
//! - Graceful shutdown on Ctrl+C with a best-effort final flush
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `CELL_UPLINK_COLLECTOR_URL`: Collector base URL (default: http://localhost:8080)
//! - `CELL_UPLINK_SAMPLE_INTERVAL_MS`: Sampling period (default: 1000)
//! - `CELL_UPLINK_BUFFER_CAPACITY`: Samples per batch (default: 10)
//! - `CELL_UPLINK_SEND_ATTEMPTS`: Primary send attempts (default: 5)
//! - `CELL_UPLINK_HEALTH_CHECK_ATTEMPTS`: Health-check rounds (default: 12)
//! - `RUST_LOG`: Logging level filter (default: info)
//!
//! The remaining knobs are listed on [`cell_uplink::Config::from_env`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cell_uplink::client::HttpCollector;
use cell_uplink::config::Config;
use cell_uplink::delivery::DeliveryEngine;
use cell_uplink::notify::LogNotifier;
use cell_uplink::prober::NetworkProber;
use cell_uplink::simulator::SimulatedDevice;
use cell_uplink::{PositionTracker, SampleBuffer, Sampler};

/// Upper bound on the final flush after the shutdown signal
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting Cell Uplink service...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                collector_url = %config.collector_url,
                buffer_capacity = config.buffer_capacity,
                sample_interval_ms = config.sample_interval.as_millis() as u64,
                send_attempts = config.send_attempts,
                health_check_attempts = config.health_check_attempts,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let collector = match HttpCollector::new(&config) {
        Ok(collector) => {
            info!(ingest_url = %collector.ingest_url(), "HTTP client initialized");
            Arc::new(collector)
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let prober = match NetworkProber::new(&config) {
        Ok(prober) => Arc::new(prober),
        Err(e) => {
            error!(error = %e, "Failed to create connectivity prober");
            std::process::exit(1);
        }
    };

    let (buffer, signal) = SampleBuffer::new(config.buffer_capacity);
    let engine = DeliveryEngine::new(
        buffer.clone(),
        collector,
        prober,
        Arc::new(LogNotifier),
        config.delivery_policy(),
    );

    let device = Arc::new(SimulatedDevice::with_defaults());
    let positions = PositionTracker::new();
    let sampler = Sampler::new(
        device.clone(),
        positions.clone(),
        buffer.clone(),
        config.sample_interval,
    );
    info!("Simulated device initialized");

    let cancel = CancellationToken::new();

    let feed_cancel = cancel.clone();
    let feed_handle = tokio::spawn(async move {
        device.feed_positions(positions, feed_cancel).await;
    });
    let sampler_handle = tokio::spawn(sampler.run(cancel.clone()));
    let engine_handle = tokio::spawn(engine.run(signal, cancel.clone()));

    info!("Cell Uplink running. Press Ctrl+C to stop.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping..."),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    info!("Initiating graceful shutdown...");
    cancel.cancel();

    if let Err(e) = feed_handle.await {
        warn!(error = %e, "Position feed panicked during shutdown");
    }
    match sampler_handle.await {
        Ok(stats) => info!(
            ticks = stats.ticks,
            buffered = stats.samples_buffered,
            rejected = stats.readings_rejected,
            "Sampler shut down"
        ),
        Err(e) => warn!(error = %e, "Sampler panicked during shutdown"),
    }

    let mut engine = match engine_handle.await {
        Ok(engine) => engine,
        Err(e) => {
            warn!(error = %e, lost = buffer.len(), "Delivery engine panicked, buffered samples lost");
            return;
        }
    };

    match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, engine.flush_remaining()).await {
        Ok(delivered) => info!(delivered = delivered, "Final flush complete"),
        Err(_) => warn!("Final flush timed out after {:?}", SHUTDOWN_FLUSH_TIMEOUT),
    }

    let stats = engine.stats();
    info!(
        batches_delivered = stats.batches_delivered,
        samples_delivered = stats.samples_delivered,
        batches_discarded = stats.batches_discarded,
        "Cell Uplink stopped"
    );
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
