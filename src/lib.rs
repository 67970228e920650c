//! Cell Uplink Library
//!
//! This library provides the components of a device-side telemetry pipeline
//! that samples radio-cell observations, buffers them and ships them to a
//! collector service in batches:
//!
//! - **sample**: Cell readings, validity rules and the collector wire format
//! - **assembler**: Pairs raw readings with the latest position fix
//! - **sampler**: Periodic sampling task feeding the buffer
//! - **buffer**: Bounded FIFO with a coalescing flush signal
//! - **client**: HTTP collector client
//! - **prober**: Internet and collector reachability probes
//! - **delivery**: Single-flight delivery engine with health-gated retry
//! - **notify**: Terminal failure notifications
//! - **config**: Environment-based configuration
//! - **simulator**: Simulated modem and location feed
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cell_uplink::{
//!     Config, DeliveryEngine, HttpCollector, LogNotifier, NetworkProber, PositionTracker,
//!     SampleBuffer, SimulatedDevice, Sampler,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     let (buffer, signal) = SampleBuffer::new(config.buffer_capacity);
//!     let engine = DeliveryEngine::new(
//!         buffer.clone(),
//!         Arc::new(HttpCollector::new(&config).expect("Failed to create client")),
//!         Arc::new(NetworkProber::new(&config).expect("Failed to create prober")),
//!         Arc::new(LogNotifier),
//!         config.delivery_policy(),
//!     );
//!
//!     let positions = PositionTracker::new();
//!     positions.update(55.75, 37.61);
//!     let sampler = Sampler::new(
//!         Arc::new(SimulatedDevice::with_defaults()),
//!         positions,
//!         buffer,
//!         config.sample_interval,
//!     );
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(sampler.run(cancel.clone()));
//!     engine.run(signal, cancel).await;
//! }
//! ```

pub mod assembler;
pub mod buffer;
pub mod client;
pub mod config;
pub mod delivery;
pub mod notify;
pub mod prober;
pub mod sample;
pub mod sampler;
pub mod simulator;

pub use assembler::{MonotonicClock, PositionTracker, SampleAssembler};
pub use buffer::{BufferError, BufferStats, FlushSignal, SampleBuffer};
pub use client::{ClientError, Collector, HttpCollector};
pub use config::{Config, ConfigError};
pub use delivery::{DeliveryEngine, DeliveryOutcome, DeliveryPolicy, DeliveryState, DeliveryStats};
pub use notify::{LogNotifier, NotificationSink};
pub use prober::{NetworkProber, Prober};
pub use sample::{Batch, CellReading, Position, RadioKind, Sample};
pub use sampler::{SampleSource, Sampler, SamplerStats};
pub use simulator::{SimulatedDevice, SimulatorConfig};
