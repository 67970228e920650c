//! Simulated device for running the service without radio hardware.
//!
//! Produces a random-walk position feed and a fresh set of random nearby
//! cells on every query. A small share of readings carry the invalid-cell
//! sentinel or an unknown operator, as real modems do.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::assembler::PositionTracker;
use crate::sample::{CellReading, Position, RadioKind, INVALID_CELL_ID, UNKNOWN_OPERATOR};
use crate::sampler::SampleSource;

/// Operators the simulator picks from.
const OPERATORS: &[&str] = &["MegaFon", "MTS", "Beeline", "Tele2"];

/// Roughly 11 m of latitude.
const WALK_STEP_DEGREES: f64 = 0.0001;

/// Configuration for the simulated device.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Starting position of the random walk
    pub origin: Position,

    /// Number of cells reported per query
    pub visible_cells: usize,

    /// Probability (0.0 - 1.0) that a reading is invalid
    pub invalid_rate: f64,

    /// Period of the simulated location callback
    pub position_interval: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            origin: Position::new(55.7558, 37.6173),
            visible_cells: 3,
            invalid_rate: 0.05,
            position_interval: Duration::from_millis(250),
        }
    }
}

/// Simulated modem plus location provider.
pub struct SimulatedDevice {
    config: SimulatorConfig,
    kind_weights: WeightedIndex<u32>,
    position: Mutex<Position>,
}

impl SimulatedDevice {
    /// Create a device. `invalid_rate` is clamped to `0.0..=1.0`; NaN
    /// counts as zero.
    pub fn new(mut config: SimulatorConfig) -> Self {
        config.invalid_rate = if config.invalid_rate.is_nan() {
            0.0
        } else {
            config.invalid_rate.clamp(0.0, 1.0)
        };

        // Weighted by kind order in RadioKind::all(): GSM, CDMA, WCDMA, LTE, NR.
        let weights = [20u32, 2, 18, 50, 10];
        let kind_weights = WeightedIndex::new(weights).expect("Invalid weights");
        let position = Mutex::new(config.origin);

        Self {
            config,
            kind_weights,
            position,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SimulatorConfig::default())
    }

    /// Advance the random walk and return the new fix.
    pub fn next_position(&self) -> Position {
        let mut rng = rand::thread_rng();
        let mut position = self.position.lock().unwrap_or_else(|e| e.into_inner());
        position.latitude += rng.gen_range(-WALK_STEP_DEGREES..=WALK_STEP_DEGREES);
        position.longitude += rng.gen_range(-WALK_STEP_DEGREES..=WALK_STEP_DEGREES);
        *position
    }

    /// Generate one cell reading.
    pub fn generate_reading(&self, rng: &mut impl Rng) -> CellReading {
        let kind = RadioKind::all()[self.kind_weights.sample(rng)];
        let operator = OPERATORS[rng.gen_range(0..OPERATORS.len())];

        let mut reading = CellReading::new(
            kind,
            rng.gen_range(1..=INVALID_CELL_ID - 1),
            Some(rng.gen_range(-120..=-60)),
            rng.gen_range(1..=65_535),
            operator,
        );

        match kind {
            RadioKind::Lte => {
                reading = reading.with_quality(rng.gen_range(-140..=-44), rng.gen_range(-20..=-3));
            }
            RadioKind::Cdma => reading.signal_strength_dbm = None,
            _ => {}
        }

        if rng.gen_bool(self.config.invalid_rate) {
            if rng.gen_bool(0.5) {
                reading.cell_id = INVALID_CELL_ID;
            } else {
                reading.operator = Some(UNKNOWN_OPERATOR.to_string());
            }
        }

        reading
    }

    /// Push position fixes into `tracker` until cancelled, standing in for
    /// the platform location callback.
    pub async fn feed_positions(&self, tracker: PositionTracker, cancel: CancellationToken) {
        let mut ticker = interval(self.config.position_interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let fix = self.next_position();
                    tracker.update(fix.latitude, fix.longitude);
                }
            }
        }
        debug!("Simulated position feed stopped");
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl SampleSource for SimulatedDevice {
    async fn current_cells(&self) -> Vec<CellReading> {
        let mut rng = rand::thread_rng();
        (0..self.config.visible_cells)
            .map(|_| self.generate_reading(&mut rng))
            .collect()
    }
}
