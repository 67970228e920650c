//! Sample data model and the collector wire format.
//!
//! A [`Sample`] is one radio-cell reading stamped with the device position at
//! acquisition time. Samples travel to the collector as a bare JSON array;
//! field names follow the collector's ingest schema (`type`, `cellId`,
//! `signalStrength`, `locationAreaCode` / `trackingAreaCode`, `operator`,
//! `RSRP`, `RSRQ`, `coordinates`, `timestamp`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cell id reported by the modem when the serving cell is unknown.
pub const INVALID_CELL_ID: i64 = 0x0FFF_FFFF;

/// Operator name reported when the network operator cannot be resolved.
pub const UNKNOWN_OPERATOR: &str = "Unknown";

/// Radio access technology of a cell reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioKind {
    #[serde(rename = "GSM")]
    Gsm,
    #[serde(rename = "CDMA")]
    Cdma,
    #[serde(rename = "WCDMA")]
    Wcdma,
    #[serde(rename = "LTE")]
    Lte,
    #[serde(rename = "NR")]
    Nr,
}

impl RadioKind {
    /// Get all radio kinds.
    pub fn all() -> &'static [RadioKind] {
        &[
            RadioKind::Gsm,
            RadioKind::Cdma,
            RadioKind::Wcdma,
            RadioKind::Lte,
            RadioKind::Nr,
        ]
    }

    /// Whether the area code of this technology is a tracking-area code
    /// rather than a location-area code.
    pub fn uses_tracking_area(&self) -> bool {
        matches!(self, RadioKind::Lte | RadioKind::Nr)
    }
}

impl std::fmt::Display for RadioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioKind::Gsm => write!(f, "GSM"),
            RadioKind::Cdma => write!(f, "CDMA"),
            RadioKind::Wcdma => write!(f, "WCDMA"),
            RadioKind::Lte => write!(f, "LTE"),
            RadioKind::Nr => write!(f, "NR"),
        }
    }
}

/// A position fix delivered by the location provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A raw radio-cell reading as returned by the sample source.
///
/// Nothing is validated here; the assembler decides whether a reading
/// becomes a [`Sample`].
#[derive(Debug, Clone, PartialEq)]
pub struct CellReading {
    pub kind: RadioKind,
    pub cell_id: i64,
    pub signal_strength_dbm: Option<i32>,
    pub area_code: i32,
    /// `None` when the platform could not resolve an operator.
    pub operator: Option<String>,
    pub rsrp: Option<i32>,
    pub rsrq: Option<i32>,
}

impl CellReading {
    /// Create a reading without LTE quality metrics.
    pub fn new(
        kind: RadioKind,
        cell_id: i64,
        signal_strength_dbm: Option<i32>,
        area_code: i32,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            cell_id,
            signal_strength_dbm,
            area_code,
            operator: Some(operator.into()),
            rsrp: None,
            rsrq: None,
        }
    }

    /// Attach LTE quality metrics. Ignored for non-LTE readings.
    pub fn with_quality(mut self, rsrp: i32, rsrq: i32) -> Self {
        if self.kind == RadioKind::Lte {
            self.rsrp = Some(rsrp);
            self.rsrq = Some(rsrq);
        }
        self
    }
}

/// One normalized radio-cell + position reading.
///
/// Immutable once constructed; fields are read through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireSample", try_from = "WireSample")]
pub struct Sample {
    kind: RadioKind,
    cell_id: i64,
    signal_strength_dbm: Option<i32>,
    area_code: i32,
    operator: String,
    rsrp: Option<i32>,
    rsrq: Option<i32>,
    position: Position,
    timestamp_millis: i64,
}

impl Sample {
    pub(crate) fn from_parts(
        reading: CellReading,
        operator: String,
        position: Position,
        timestamp_millis: i64,
    ) -> Self {
        let lte = reading.kind == RadioKind::Lte;
        Self {
            kind: reading.kind,
            cell_id: reading.cell_id,
            signal_strength_dbm: reading.signal_strength_dbm,
            area_code: reading.area_code,
            operator,
            rsrp: reading.rsrp.filter(|_| lte),
            rsrq: reading.rsrq.filter(|_| lte),
            position,
            timestamp_millis,
        }
    }

    pub fn kind(&self) -> RadioKind {
        self.kind
    }

    pub fn cell_id(&self) -> i64 {
        self.cell_id
    }

    pub fn signal_strength_dbm(&self) -> Option<i32> {
        self.signal_strength_dbm
    }

    pub fn area_code(&self) -> i32 {
        self.area_code
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn rsrp(&self) -> Option<i32> {
        self.rsrp
    }

    pub fn rsrq(&self) -> Option<i32> {
        self.rsrq
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    /// Whether this sample may be admitted to the buffer.
    pub fn is_valid(&self) -> bool {
        is_admissible(self.cell_id, &self.operator)
    }
}

/// Validity predicate shared by the assembler and [`Sample::is_valid`].
pub fn is_admissible(cell_id: i64, operator: &str) -> bool {
    cell_id != INVALID_CELL_ID && operator != UNKNOWN_OPERATOR
}

/// Error returned when a wire object cannot be decoded into a [`Sample`].
#[derive(Debug, Clone, PartialEq)]
pub enum SampleDecodeError {
    /// Neither `locationAreaCode` nor `trackingAreaCode` was present
    MissingAreaCode,

    /// `coordinates` was not of the form `"lat, lon"`
    BadCoordinates(String),

    /// Sentinel cell id or unknown operator
    Inadmissible { cell_id: i64, operator: String },
}

impl std::fmt::Display for SampleDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleDecodeError::MissingAreaCode => write!(f, "Sample has no area code"),
            SampleDecodeError::BadCoordinates(raw) => {
                write!(f, "Malformed coordinates: '{}'", raw)
            }
            SampleDecodeError::Inadmissible { cell_id, operator } => {
                write!(f, "Inadmissible sample (cell {}, operator '{}')", cell_id, operator)
            }
        }
    }
}

impl std::error::Error for SampleDecodeError {}

/// Wire representation of a [`Sample`] in the ingest JSON array.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireSample {
    #[serde(rename = "type")]
    kind: RadioKind,

    #[serde(rename = "cellId")]
    cell_id: i64,

    #[serde(rename = "signalStrength", skip_serializing_if = "Option::is_none", default)]
    signal_strength: Option<i32>,

    #[serde(rename = "locationAreaCode", skip_serializing_if = "Option::is_none", default)]
    location_area_code: Option<i32>,

    #[serde(rename = "trackingAreaCode", skip_serializing_if = "Option::is_none", default)]
    tracking_area_code: Option<i32>,

    operator: String,

    #[serde(rename = "RSRP", skip_serializing_if = "Option::is_none", default)]
    rsrp: Option<i32>,

    #[serde(rename = "RSRQ", skip_serializing_if = "Option::is_none", default)]
    rsrq: Option<i32>,

    coordinates: String,

    timestamp: i64,
}

impl From<Sample> for WireSample {
    fn from(sample: Sample) -> Self {
        let (location_area_code, tracking_area_code) = if sample.kind.uses_tracking_area() {
            (None, Some(sample.area_code))
        } else {
            (Some(sample.area_code), None)
        };

        Self {
            kind: sample.kind,
            cell_id: sample.cell_id,
            signal_strength: sample.signal_strength_dbm,
            location_area_code,
            tracking_area_code,
            operator: sample.operator,
            rsrp: sample.rsrp,
            rsrq: sample.rsrq,
            coordinates: format!(
                "{}, {}",
                sample.position.latitude, sample.position.longitude
            ),
            timestamp: sample.timestamp_millis,
        }
    }
}

impl TryFrom<WireSample> for Sample {
    type Error = SampleDecodeError;

    fn try_from(wire: WireSample) -> Result<Self, Self::Error> {
        if !is_admissible(wire.cell_id, &wire.operator) {
            return Err(SampleDecodeError::Inadmissible {
                cell_id: wire.cell_id,
                operator: wire.operator,
            });
        }

        let area_code = wire
            .tracking_area_code
            .or(wire.location_area_code)
            .ok_or(SampleDecodeError::MissingAreaCode)?;

        let position = parse_coordinates(&wire.coordinates)
            .ok_or_else(|| SampleDecodeError::BadCoordinates(wire.coordinates.clone()))?;

        Ok(Self {
            kind: wire.kind,
            cell_id: wire.cell_id,
            signal_strength_dbm: wire.signal_strength,
            area_code,
            operator: wire.operator,
            rsrp: wire.rsrp,
            rsrq: wire.rsrq,
            position,
            timestamp_millis: wire.timestamp,
        })
    }
}

fn parse_coordinates(raw: &str) -> Option<Position> {
    let (lat, lon) = raw.split_once(',')?;
    let latitude = lat.trim().parse().ok()?;
    let longitude = lon.trim().parse().ok()?;
    Some(Position::new(latitude, longitude))
}

/// An ordered group of samples drained together for one delivery.
///
/// Batches are never merged or split. The `batch_id` is for log
/// correlation only and is not sent to the collector.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: Uuid,
    pub samples: Vec<Sample>,
}

impl Batch {
    /// Create a new batch from drained samples.
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            samples,
        }
    }

    /// Get the number of samples in the batch.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encode the batch as the ingest request body.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.samples)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::lte_sample;
    use super::*;
    use serde_json::Value;

    fn gsm_sample() -> Sample {
        let reading = CellReading::new(RadioKind::Gsm, 31_554, None, 1_021, "Beeline");
        Sample::from_parts(
            reading,
            "Beeline".to_string(),
            Position::new(-33.868_82, 151.209_296),
            1_700_000_123_456,
        )
    }

    #[test]
    fn test_radio_kind_serialization() {
        assert_eq!(serde_json::to_string(&RadioKind::Lte).unwrap(), r#""LTE""#);
        assert_eq!(serde_json::to_string(&RadioKind::Wcdma).unwrap(), r#""WCDMA""#);
        let kind: RadioKind = serde_json::from_str(r#""CDMA""#).unwrap();
        assert_eq!(kind, RadioKind::Cdma);
    }

    #[test]
    fn test_radio_kind_display_matches_wire_name() {
        for kind in RadioKind::all() {
            let wire = serde_json::to_string(kind).unwrap();
            assert_eq!(wire, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_lte_wire_fields() {
        let value = serde_json::to_value(lte_sample(42)).unwrap();

        assert_eq!(value["type"], "LTE");
        assert_eq!(value["cellId"], 42);
        assert_eq!(value["signalStrength"], -95);
        assert_eq!(value["trackingAreaCode"], 7_401);
        assert!(value.get("locationAreaCode").is_none());
        assert_eq!(value["operator"], "MegaFon");
        assert_eq!(value["RSRP"], -104);
        assert_eq!(value["RSRQ"], -11);
        assert_eq!(value["coordinates"], "55.751244, 37.618423");
        assert_eq!(value["timestamp"], 1_700_000_000_042i64);
    }

    #[test]
    fn test_gsm_wire_omits_lte_fields() {
        let value = serde_json::to_value(gsm_sample()).unwrap();

        assert_eq!(value["type"], "GSM");
        assert_eq!(value["locationAreaCode"], 1_021);
        assert!(value.get("trackingAreaCode").is_none());
        assert!(value.get("signalStrength").is_none());
        assert!(value.get("RSRP").is_none());
        assert!(value.get("RSRQ").is_none());
    }

    #[test]
    fn test_quality_metrics_dropped_for_non_lte() {
        let reading = CellReading::new(RadioKind::Wcdma, 5, Some(-80), 3, "MTS").with_quality(-90, -7);
        assert!(reading.rsrp.is_none());

        let mut reading = CellReading::new(RadioKind::Gsm, 5, Some(-80), 3, "MTS");
        reading.rsrp = Some(-90);
        let sample = Sample::from_parts(reading, "MTS".into(), Position::new(0.0, 0.0), 0);
        assert!(sample.rsrp().is_none());
    }

    #[test]
    fn test_wire_round_trip_preserves_every_field() {
        for original in [lte_sample(268_435_454), gsm_sample()] {
            let json = serde_json::to_string(&original).unwrap();
            let decoded: Sample = serde_json::from_str(&json).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_decode_rejects_bad_coordinates() {
        let json = r#"{"type":"GSM","cellId":1,"locationAreaCode":2,"operator":"X","coordinates":"north","timestamp":0}"#;
        let err = serde_json::from_str::<Sample>(json).unwrap_err();
        assert!(err.to_string().contains("Malformed coordinates"));
    }

    #[test]
    fn test_decode_rejects_missing_area_code() {
        let json = r#"{"type":"GSM","cellId":1,"operator":"X","coordinates":"1, 2","timestamp":0}"#;
        let err = serde_json::from_str::<Sample>(json).unwrap_err();
        assert!(err.to_string().contains("no area code"));
    }

    #[test]
    fn test_decode_rejects_sentinel_cell_id() {
        let json = r#"{"type":"LTE","cellId":268435455,"trackingAreaCode":2,"operator":"MTS","coordinates":"1, 2","timestamp":0}"#;
        let err = serde_json::from_str::<Sample>(json).unwrap_err();
        assert!(err.to_string().contains("Inadmissible sample"));
    }

    #[test]
    fn test_decode_rejects_unknown_operator() {
        let json = r#"{"type":"GSM","cellId":7,"locationAreaCode":2,"operator":"Unknown","coordinates":"1, 2","timestamp":0}"#;
        let err = serde_json::from_str::<Sample>(json).unwrap_err();
        assert!(err.to_string().contains("Inadmissible sample"));
    }

    #[test]
    fn test_validity_predicate() {
        assert!(is_admissible(1, "MTS"));
        assert!(!is_admissible(INVALID_CELL_ID, "MTS"));
        assert!(!is_admissible(1, UNKNOWN_OPERATOR));
        assert!(lte_sample(1).is_valid());
    }

    #[test]
    fn test_batch_body_is_bare_array() {
        let batch = Batch::new(vec![lte_sample(1), gsm_sample()]);
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());

        let body: Value = serde_json::from_slice(&batch.to_json().unwrap()).unwrap();
        let items = body.as_array().expect("body should be a JSON array");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["cellId"], 1);
        assert_eq!(items[1]["type"], "GSM");
    }
}
