//! Wire Record Types
//!
//! Payload shapes exchanged over the broker topics. These types are
//! codec-agnostic; the schema-governed ones are bound to a versioned
//! key/value schema pair through [`SchemaGoverned`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::lines::LineColor;

/// Identifier of a physical station.
pub type StationId = i64;

// =============================================================================
// Schema Binding
// =============================================================================

/// Logical record types with a registered schema pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Train arrival at a station.
    Arrival,
    /// Rider passing a turnstile.
    Turnstile,
    /// Weather reading.
    Weather,
}

impl RecordKind {
    /// All schema-governed record kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Arrival, Self::Turnstile, Self::Weather]
    }

    /// Schema subject prefix, `<subject>.key` / `<subject>.value`.
    #[must_use]
    pub const fn subject(self) -> &'static str {
        match self {
            Self::Arrival => "arrival",
            Self::Turnstile => "turnstile",
            Self::Weather => "weather",
        }
    }
}

/// Binds a logical record type to its key and value payloads.
pub trait SchemaGoverned: Send + Sync + 'static {
    /// Record key payload.
    type Key: Serialize + DeserializeOwned + Send + Sync;
    /// Record value payload.
    type Value: Serialize + DeserializeOwned + Send + Sync;
    /// Schema pair used for encoding.
    const KIND: RecordKind;
}

/// Arrival events keyed by event time.
#[derive(Debug, Clone, Copy)]
pub struct Arrivals;

impl SchemaGoverned for Arrivals {
    type Key = TimestampKey;
    type Value = ArrivalEvent;
    const KIND: RecordKind = RecordKind::Arrival;
}

/// Turnstile entries keyed by event time.
#[derive(Debug, Clone, Copy)]
pub struct Turnstiles;

impl SchemaGoverned for Turnstiles {
    type Key = TimestampKey;
    type Value = TurnstileEvent;
    const KIND: RecordKind = RecordKind::Turnstile;
}

/// Weather readings keyed by event time.
#[derive(Debug, Clone, Copy)]
pub struct WeatherReadings;

impl SchemaGoverned for WeatherReadings {
    type Key = TimestampKey;
    type Value = WeatherEvent;
    const KIND: RecordKind = RecordKind::Weather;
}

// =============================================================================
// Keys
// =============================================================================

/// Millisecond event-time key shared by the simulated event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampKey {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl TimestampKey {
    /// Key stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

// =============================================================================
// Station Topology
// =============================================================================

/// Raw station topology row, as loaded from the stations database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationRecord {
    /// Platform stop id.
    pub stop_id: i64,
    /// Direction of travel served by the platform.
    pub direction_id: String,
    /// Platform name.
    pub stop_name: String,
    /// Station name.
    pub station_name: String,
    /// Descriptive station name.
    pub station_descriptive_name: String,
    /// Station id.
    pub station_id: StationId,
    /// Position of the station along its line.
    pub order: i32,
    /// Served by the red line.
    pub red: bool,
    /// Served by the blue line.
    pub blue: bool,
    /// Served by the green line.
    pub green: bool,
}

impl StationRecord {
    /// Line this station belongs to. Red wins over blue over green.
    #[must_use]
    pub const fn line(&self) -> Option<LineColor> {
        if self.red {
            Some(LineColor::Red)
        } else if self.blue {
            Some(LineColor::Blue)
        } else if self.green {
            Some(LineColor::Green)
        } else {
            None
        }
    }

    /// Compact shape published by the stream transformer.
    #[must_use]
    pub fn reduce(&self) -> Option<ReducedStation> {
        self.line().map(|line| ReducedStation {
            station_id: self.station_id,
            station_name: self.station_name.clone(),
            order: self.order,
            line: line.as_str().to_string(),
        })
    }
}

/// Reduced station topology record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducedStation {
    /// Station id.
    pub station_id: StationId,
    /// Display name.
    pub station_name: String,
    /// Position along the line.
    pub order: i32,
    /// Line color as a string; may hold values outside [`LineColor`].
    pub line: String,
}

// =============================================================================
// Events
// =============================================================================

/// A train arriving at a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalEvent {
    /// Station the train arrived at.
    pub station_id: StationId,
    /// Train identifier.
    pub train_id: String,
    /// Direction of travel, `a` or `b`.
    pub direction: String,
    /// Line color as a string.
    pub line: String,
    /// Train status (e.g. `in_service`, `delayed`).
    pub train_status: String,
    /// Station the train departed from, if any.
    pub prev_station_id: Option<StationId>,
    /// Direction at the previous station, if any.
    pub prev_direction: Option<String>,
}

/// A rider entering through a turnstile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnstileEvent {
    /// Station id.
    pub station_id: StationId,
    /// Station name.
    pub station_name: String,
    /// Line color as a string.
    pub line: String,
}

/// Running turnstile total for one station.
///
/// Produced by the continuous-aggregation engine, which upper-cases column
/// names; both spellings are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnstileSummary {
    /// Station id.
    #[serde(alias = "STATION_ID")]
    pub station_id: StationId,
    /// Entries counted so far.
    #[serde(alias = "COUNT")]
    pub count: u64,
}

/// A weather reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherEvent {
    /// Temperature in degrees Fahrenheit.
    pub temperature: f64,
    /// Condition name, see [`crate::domain::weather::WeatherStatus`].
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(red: bool, blue: bool, green: bool) -> StationRecord {
        StationRecord {
            stop_id: 30001,
            direction_id: "E".to_string(),
            stop_name: "Austin (O'Hare-bound)".to_string(),
            station_name: "Austin".to_string(),
            station_descriptive_name: "Austin (Blue Line)".to_string(),
            station_id: 40010,
            order: 29,
            red,
            blue,
            green,
        }
    }

    #[test]
    fn station_line_prefers_red() {
        assert_eq!(station(true, true, false).line(), Some(LineColor::Red));
        assert_eq!(station(false, true, true).line(), Some(LineColor::Blue));
        assert_eq!(station(false, false, true).line(), Some(LineColor::Green));
        assert_eq!(station(false, false, false).line(), None);
    }

    #[test]
    fn station_reduces_to_compact_shape() {
        let reduced = station(false, true, false).reduce().unwrap();
        assert_eq!(reduced.station_id, 40010);
        assert_eq!(reduced.station_name, "Austin");
        assert_eq!(reduced.order, 29);
        assert_eq!(reduced.line, "blue");
    }

    #[test]
    fn station_without_line_is_not_reduced() {
        assert!(station(false, false, false).reduce().is_none());
    }

    #[test]
    fn summary_accepts_upper_case_columns() {
        let summary: TurnstileSummary =
            serde_json::from_str(r#"{"STATION_ID":40010,"COUNT":12}"#).unwrap();
        assert_eq!(summary.station_id, 40010);
        assert_eq!(summary.count, 12);

        let summary: TurnstileSummary =
            serde_json::from_str(r#"{"station_id":40010,"count":3}"#).unwrap();
        assert_eq!(summary.count, 3);
    }

    #[test]
    fn record_kind_subjects() {
        assert_eq!(RecordKind::Arrival.subject(), "arrival");
        assert_eq!(RecordKind::Turnstile.subject(), "turnstile");
        assert_eq!(RecordKind::Weather.subject(), "weather");
        assert_eq!(RecordKind::all().len(), 3);
    }
}
