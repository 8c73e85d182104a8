//! Aggregated Snapshot
//!
//! The mutable [`TransitState`] owned by the aggregation task, and the
//! owned, serializable [`AggregatedSnapshot`] handed to readers.

use serde::Serialize;

use crate::domain::lines::{LineAggregator, LineColor, LineState, StationEntry};
use crate::domain::weather::WeatherState;

/// Everything the aggregation task maintains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitState {
    /// Per-line station state.
    pub lines: LineAggregator,
    /// Latest weather reading.
    pub weather: WeatherState,
}

impl TransitState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current state into a read view.
    #[must_use]
    pub fn snapshot(&self) -> AggregatedSnapshot {
        AggregatedSnapshot {
            red: LineSnapshot::from(self.lines.line(LineColor::Red)),
            green: LineSnapshot::from(self.lines.line(LineColor::Green)),
            blue: LineSnapshot::from(self.lines.line(LineColor::Blue)),
            weather: self.weather,
        }
    }
}

/// Read view of one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineSnapshot {
    /// Line color.
    pub color: LineColor,
    /// Stations in line order.
    pub stations: Vec<StationEntry>,
}

impl LineSnapshot {
    /// Find a station by id.
    #[must_use]
    pub fn station(&self, station_id: i64) -> Option<&StationEntry> {
        self.stations.iter().find(|s| s.station_id == station_id)
    }
}

impl From<&LineState> for LineSnapshot {
    fn from(line: &LineState) -> Self {
        Self {
            color: line.color(),
            stations: line.stations().into_iter().cloned().collect(),
        }
    }
}

/// Read view of all lines plus the weather.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedSnapshot {
    /// Red line.
    pub red: LineSnapshot,
    /// Green line.
    pub green: LineSnapshot,
    /// Blue line.
    pub blue: LineSnapshot,
    /// Latest weather.
    pub weather: WeatherState,
}

impl AggregatedSnapshot {
    /// View of one line.
    #[must_use]
    pub const fn line(&self, color: LineColor) -> &LineSnapshot {
        match color {
            LineColor::Red => &self.red,
            LineColor::Green => &self.green,
            LineColor::Blue => &self.blue,
        }
    }

    /// Total number of stations across lines.
    #[must_use]
    pub fn station_count(&self) -> usize {
        self.red.stations.len() + self.green.stations.len() + self.blue.stations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::ReducedStation;

    #[test]
    fn snapshot_copies_every_line() {
        let mut state = TransitState::new();
        state
            .lines
            .apply_station(&ReducedStation {
                station_id: 40380,
                station_name: "Clark/Lake".to_string(),
                order: 12,
                line: "green".to_string(),
            })
            .unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.station_count(), 1);
        let station = snapshot.line(LineColor::Green).station(40380).unwrap();
        assert_eq!(station.name.as_deref(), Some("Clark/Lake"));
        assert!(snapshot.red.stations.is_empty());
    }

    #[test]
    fn snapshot_serializes_lower_case_colors() {
        let snapshot = TransitState::new().snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["red"]["color"], "red");
        assert!(json["weather"]["temperature"].is_null());
    }
}
