//! Sample assembly: joins the latest position fix with a cell reading.
//!
//! The position arrives push-style from the location provider through a
//! [`PositionTracker`]; cell readings are pulled once per sampling tick.
//! Readings that fail the validity predicate are dropped silently.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::trace;

use crate::sample::{is_admissible, CellReading, Position, Sample, UNKNOWN_OPERATOR};

/// Shared handle holding the most recent position fix.
///
/// Cloned into the location callback; the sampler reads the latest value.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    latest: Arc<Mutex<Option<Position>>>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new fix. Called from the location provider callback.
    pub fn update(&self, latitude: f64, longitude: f64) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *latest = Some(Position::new(latitude, longitude));
    }

    /// The most recent fix, if any has arrived yet.
    pub fn latest(&self) -> Option<Position> {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Millisecond clock that never runs backwards within the process.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current wall-clock millis, clamped to be >= every earlier reading.
    pub fn now_millis(&self) -> i64 {
        self.stamp(Utc::now().timestamp_millis())
    }

    fn stamp(&self, wall_millis: i64) -> i64 {
        let previous = self.last.fetch_max(wall_millis, Ordering::AcqRel);
        previous.max(wall_millis)
    }
}

/// Builds validated [`Sample`]s from raw readings.
#[derive(Debug, Default)]
pub struct SampleAssembler {
    clock: MonotonicClock,
}

impl SampleAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine a position fix with a cell reading, stamping the current time.
    ///
    /// Returns `None` for readings with the invalid-cell sentinel or an
    /// unknown operator.
    pub fn assemble(&self, position: Position, reading: CellReading) -> Option<Sample> {
        let operator = reading
            .operator
            .clone()
            .unwrap_or_else(|| UNKNOWN_OPERATOR.to_string());

        if !is_admissible(reading.cell_id, &operator) {
            trace!(
                kind = %reading.kind,
                cell_id = reading.cell_id,
                operator = %operator,
                "Dropping invalid cell reading"
            );
            return None;
        }

        let timestamp = self.clock.now_millis();
        Some(Sample::from_parts(reading, operator, position, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{RadioKind, INVALID_CELL_ID};

    fn reading(cell_id: i64, operator: &str) -> CellReading {
        CellReading::new(RadioKind::Lte, cell_id, Some(-97), 12, operator)
    }

    #[test]
    fn test_assemble_valid_reading() {
        let assembler = SampleAssembler::new();
        let position = Position::new(59.93, 30.33);

        let sample = assembler
            .assemble(position, reading(1234, "Tele2").with_quality(-100, -9))
            .expect("valid reading should assemble");

        assert_eq!(sample.cell_id(), 1234);
        assert_eq!(sample.operator(), "Tele2");
        assert_eq!(sample.position(), position);
        assert_eq!(sample.rsrp(), Some(-100));
        assert!(sample.timestamp_millis() > 0);
    }

    #[test]
    fn test_invalid_cell_id_is_filtered() {
        let assembler = SampleAssembler::new();
        let result = assembler.assemble(Position::new(0.0, 0.0), reading(INVALID_CELL_ID, "Tele2"));
        assert!(result.is_none());
        assert_eq!(INVALID_CELL_ID, 268_435_455);
    }

    #[test]
    fn test_unknown_operator_is_filtered() {
        let assembler = SampleAssembler::new();
        let result = assembler.assemble(Position::new(0.0, 0.0), reading(77, "Unknown"));
        assert!(result.is_none());
    }

    #[test]
    fn test_missing_operator_is_filtered() {
        let assembler = SampleAssembler::new();
        let mut raw = reading(77, "Tele2");
        raw.operator = None;
        assert!(assembler.assemble(Position::new(0.0, 0.0), raw).is_none());
    }

    #[test]
    fn test_filter_holds_for_every_radio_kind() {
        let assembler = SampleAssembler::new();
        for kind in RadioKind::all() {
            let sentinel = CellReading::new(*kind, INVALID_CELL_ID, None, 1, "Op");
            let unknown = CellReading::new(*kind, 10, None, 1, UNKNOWN_OPERATOR);
            assert!(assembler.assemble(Position::new(1.0, 1.0), sentinel).is_none());
            assert!(assembler.assemble(Position::new(1.0, 1.0), unknown).is_none());
        }
    }

    #[test]
    fn test_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.stamp(1_000), 1_000);
        assert_eq!(clock.stamp(900), 1_000);
        assert_eq!(clock.stamp(1_500), 1_500);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let assembler = SampleAssembler::new();
        let mut last = 0;
        for i in 0..100 {
            let sample = assembler
                .assemble(Position::new(0.0, 0.0), reading(i, "Tele2"))
                .unwrap();
            assert!(sample.timestamp_millis() >= last);
            last = sample.timestamp_millis();
        }
    }

    #[test]
    fn test_position_tracker_keeps_latest() {
        let tracker = PositionTracker::new();
        assert!(tracker.latest().is_none());

        let handle = tracker.clone();
        handle.update(10.0, 20.0);
        handle.update(11.0, 21.0);

        assert_eq!(tracker.latest(), Some(Position::new(11.0, 21.0)));
    }
}
