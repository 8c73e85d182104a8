//! Per-line station state.

use std::collections::BTreeMap;

use serde::Serialize;

use super::LineColor;
use crate::domain::records::{ArrivalEvent, ReducedStation, StationId, TurnstileSummary};

/// Direction of travel along a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Direction `a`.
    A,
    /// Direction `b`.
    B,
}

impl Direction {
    /// Parse the single-letter wire form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Some(Self::A),
            "b" => Some(Self::B),
            _ => None,
        }
    }
}

/// The most recent train seen at a station in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainArrival {
    /// Train identifier.
    pub train_id: String,
    /// Train status as reported.
    pub status: String,
}

/// One station on a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationEntry {
    /// Station id.
    pub station_id: StationId,
    /// Display name, once topology has been seen.
    pub name: Option<String>,
    /// Position along the line, once topology has been seen.
    pub order: Option<i32>,
    /// Last arrival in direction `a`.
    pub arrival_a: Option<TrainArrival>,
    /// Last arrival in direction `b`.
    pub arrival_b: Option<TrainArrival>,
    /// Running turnstile total.
    pub turnstile_entries: u64,
}

impl StationEntry {
    const fn new(station_id: StationId) -> Self {
        Self {
            station_id,
            name: None,
            order: None,
            arrival_a: None,
            arrival_b: None,
            turnstile_entries: 0,
        }
    }

    /// Last arrival in the given direction.
    #[must_use]
    pub const fn arrival(&self, direction: Direction) -> Option<&TrainArrival> {
        match direction {
            Direction::A => self.arrival_a.as_ref(),
            Direction::B => self.arrival_b.as_ref(),
        }
    }
}

/// Live view of one line.
///
/// Every field is last-write-wins per station, and turnstile totals are set
/// rather than incremented, so redelivered records leave the state unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineState {
    color: LineColor,
    stations: BTreeMap<StationId, StationEntry>,
}

impl LineState {
    /// Create an empty line.
    #[must_use]
    pub const fn new(color: LineColor) -> Self {
        Self {
            color,
            stations: BTreeMap::new(),
        }
    }

    /// Line color.
    #[must_use]
    pub const fn color(&self) -> LineColor {
        self.color
    }

    /// Whether the station belongs to this line.
    #[must_use]
    pub fn contains(&self, station_id: StationId) -> bool {
        self.stations.contains_key(&station_id)
    }

    /// Look up a station.
    #[must_use]
    pub fn station(&self, station_id: StationId) -> Option<&StationEntry> {
        self.stations.get(&station_id)
    }

    /// Number of known stations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    /// Whether no station is known yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Stations in line order. Stations without topology sort last.
    #[must_use]
    pub fn stations(&self) -> Vec<&StationEntry> {
        let mut stations: Vec<_> = self.stations.values().collect();
        stations.sort_by_key(|s| (s.order.unwrap_or(i32::MAX), s.station_id));
        stations
    }

    /// Apply a topology record, overwriting name and order.
    pub fn apply_station(&mut self, record: &ReducedStation) {
        let entry = self
            .stations
            .entry(record.station_id)
            .or_insert_with(|| StationEntry::new(record.station_id));
        entry.name = Some(record.station_name.clone());
        entry.order = Some(record.order);
    }

    /// Apply an arrival, overwriting the slot for its direction.
    ///
    /// Returns `false` when the direction is not recognized.
    pub fn apply_arrival(&mut self, event: &ArrivalEvent) -> bool {
        let Some(direction) = Direction::parse(&event.direction) else {
            tracing::warn!(
                line = self.color.as_str(),
                station_id = event.station_id,
                direction = %event.direction,
                "Dropping arrival with unknown direction"
            );
            return false;
        };

        let entry = self
            .stations
            .entry(event.station_id)
            .or_insert_with(|| StationEntry::new(event.station_id));
        let arrival = TrainArrival {
            train_id: event.train_id.clone(),
            status: event.train_status.clone(),
        };
        match direction {
            Direction::A => entry.arrival_a = Some(arrival),
            Direction::B => entry.arrival_b = Some(arrival),
        }
        true
    }

    /// Apply a running turnstile total if the station belongs to this line.
    ///
    /// Returns whether the update was accepted.
    pub fn apply_turnstile_summary(&mut self, summary: &TurnstileSummary) -> bool {
        match self.stations.get_mut(&summary.station_id) {
            Some(entry) => {
                entry.turnstile_entries = summary.count;
                true
            }
            None => false,
        }
    }
}
