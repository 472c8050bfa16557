//! Occupancy telemetry.
//!
//! Sensors send loosely-typed JSON. Normalization never rejects a reading:
//! missing or mistyped fields fall back to defaults so every reading stays
//! loggable.

use std::fmt;

use chrono::{DateTime, Local, TimeZone};
use serde_json::{Map, Value};

use crate::constants::UNASSIGNED_PARKING_ID;

/// Identifier of the parking spot a sensor watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParkingId {
    Number(u64),
    Label(String),
    /// Absent, negative, fractional, or otherwise unusable.
    Unassigned,
}

impl ParkingId {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(n)) => n.as_u64().map_or(ParkingId::Unassigned, ParkingId::Number),
            Some(Value::String(s)) if !s.is_empty() => ParkingId::Label(s.clone()),
            _ => ParkingId::Unassigned,
        }
    }
}

impl fmt::Display for ParkingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParkingId::Number(n) => write!(f, "{n}"),
            ParkingId::Label(s) => f.write_str(s),
            ParkingId::Unassigned => f.write_str(UNASSIGNED_PARKING_ID),
        }
    }
}

/// A normalized occupancy reading.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub parking_id: ParkingId,
    pub occupied: bool,
    pub distance_cm: f64,
    /// Sensor clock in milliseconds since the epoch; `0` when not reported.
    pub timestamp_ms: u64,
}

impl TelemetryEvent {
    /// Normalizes a telemetry object.
    ///
    /// Field names follow the sensor firmware: `parkingId`, `occupied`,
    /// `distance` (centimetres) and `timestamp` (milliseconds).
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        Self {
            parking_id: ParkingId::from_value(fields.get("parkingId")),
            occupied: fields
                .get("occupied")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            distance_cm: fields
                .get("distance")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            timestamp_ms: fields.get("timestamp").map_or(0, timestamp_millis),
        }
    }

    /// Returns `true` if the sensor reported its own clock.
    pub fn has_sensor_time(&self) -> bool {
        self.timestamp_ms > 0
    }

    /// When the reading was taken: the sensor clock if reported, otherwise
    /// the server's receipt time.
    pub fn observed_at(&self, received_at: DateTime<Local>) -> DateTime<Local> {
        if !self.has_sensor_time() {
            return received_at;
        }
        i64::try_from(self.timestamp_ms)
            .ok()
            .and_then(|ms| Local.timestamp_millis_opt(ms).single())
            .unwrap_or(received_at)
    }

    /// Human-readable occupancy state.
    pub fn status_label(&self) -> &'static str {
        if self.occupied { "OCCUPIED" } else { "FREE" }
    }
}

fn timestamp_millis(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|ms| *ms > 0.0).map(|ms| ms as u64))
        .unwrap_or(0)
}
