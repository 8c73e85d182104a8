//! Transit Line Aggregation
//!
//! Fan-in state machine keyed by line color. Topology and arrival records
//! carry their line and are dispatched to exactly one [`LineState`];
//! turnstile summaries carry only a station id and are broadcast to every
//! line, where only the line owning the station accepts them.
//!
//! # Ordering
//!
//! Records reach the aggregator from independent consumers with no ordering
//! between them. All updates are last-write-wins per station field, and
//! turnstile totals are set rather than added, so the final state depends
//! only on the last record applied for each field.
//!
//! # Assumption
//!
//! Every station belongs to exactly one line for the process lifetime. If a
//! station were listed on two lines, a summary for it would update both.

mod state;

use std::fmt;

use serde::Serialize;

pub use state::{Direction, LineState, StationEntry, TrainArrival};

use crate::domain::records::{ArrivalEvent, ReducedStation, TurnstileSummary};

// =============================================================================
// Line Color
// =============================================================================

/// Closed set of transit lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineColor {
    /// Red line.
    Red,
    /// Green line.
    Green,
    /// Blue line.
    Blue,
}

impl LineColor {
    /// All lines in display order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Red, Self::Green, Self::Blue]
    }

    /// Parse a line name. Matching is exact: records carry lower-case
    /// names, and anything else is an unknown line.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "red" => Some(Self::Red),
            "green" => Some(Self::Green),
            "blue" => Some(Self::Blue),
            _ => None,
        }
    }

    /// Lower-case line name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Blue => "blue",
        }
    }
}

impl fmt::Display for LineColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Drop Reasons
// =============================================================================

/// Why a record did not change any line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The record named a line outside [`LineColor`].
    UnknownLine,
    /// The arrival named a direction other than `a` or `b`.
    UnknownDirection,
    /// No line knows the referenced station.
    UnknownStation,
}

impl DropReason {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownLine => "unknown_line",
            Self::UnknownDirection => "unknown_direction",
            Self::UnknownStation => "unknown_station",
        }
    }
}

// =============================================================================
// Line Aggregator
// =============================================================================

/// Owns the three line states and routes records to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineAggregator {
    red: LineState,
    green: LineState,
    blue: LineState,
}

impl Default for LineAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAggregator {
    /// Create an aggregator with three empty lines.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            red: LineState::new(LineColor::Red),
            green: LineState::new(LineColor::Green),
            blue: LineState::new(LineColor::Blue),
        }
    }

    /// State of one line.
    #[must_use]
    pub const fn line(&self, color: LineColor) -> &LineState {
        match color {
            LineColor::Red => &self.red,
            LineColor::Green => &self.green,
            LineColor::Blue => &self.blue,
        }
    }

    const fn line_mut(&mut self, color: LineColor) -> &mut LineState {
        match color {
            LineColor::Red => &mut self.red,
            LineColor::Green => &mut self.green,
            LineColor::Blue => &mut self.blue,
        }
    }

    /// Route a topology record to its line.
    ///
    /// # Errors
    ///
    /// Returns [`DropReason::UnknownLine`] if the line is not recognized.
    pub fn apply_station(&mut self, record: &ReducedStation) -> Result<LineColor, DropReason> {
        let color = Self::resolve_line(&record.line, record.station_id)?;
        self.line_mut(color).apply_station(record);
        Ok(color)
    }

    /// Route an arrival to its line.
    ///
    /// # Errors
    ///
    /// Returns a [`DropReason`] if the line or direction is not recognized.
    pub fn apply_arrival(&mut self, event: &ArrivalEvent) -> Result<LineColor, DropReason> {
        let color = Self::resolve_line(&event.line, event.station_id)?;
        if self.line_mut(color).apply_arrival(event) {
            Ok(color)
        } else {
            Err(DropReason::UnknownDirection)
        }
    }

    /// Broadcast a turnstile total to every line.
    ///
    /// Returns the line that owns the station.
    ///
    /// # Errors
    ///
    /// Returns [`DropReason::UnknownStation`] if no line knows the station.
    pub fn apply_turnstile_summary(
        &mut self,
        summary: &TurnstileSummary,
    ) -> Result<LineColor, DropReason> {
        let mut owner = None;
        for &color in LineColor::all() {
            if self.line_mut(color).apply_turnstile_summary(summary) {
                owner.get_or_insert(color);
            }
        }
        owner.ok_or(DropReason::UnknownStation)
    }

    fn resolve_line(line: &str, station_id: i64) -> Result<LineColor, DropReason> {
        LineColor::parse(line).ok_or_else(|| {
            tracing::warn!(line = %line, station_id, "Discarding record for unknown line");
            DropReason::UnknownLine
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn reduced(id: i64, name: &str, order: i32, line: &str) -> ReducedStation {
        ReducedStation {
            station_id: id,
            station_name: name.to_string(),
            order,
            line: line.to_string(),
        }
    }

    fn arrival(id: i64, train: &str, direction: &str, line: &str) -> ArrivalEvent {
        ArrivalEvent {
            station_id: id,
            train_id: train.to_string(),
            direction: direction.to_string(),
            line: line.to_string(),
            train_status: "in_service".to_string(),
            prev_station_id: None,
            prev_direction: None,
        }
    }

    #[test_case("red", Some(LineColor::Red) ; "red")]
    #[test_case("green", Some(LineColor::Green) ; "green")]
    #[test_case("blue", Some(LineColor::Blue) ; "blue")]
    #[test_case("GREEN", None ; "upper case is unknown")]
    #[test_case(" blue ", None ; "padding is unknown")]
    #[test_case("purple", None ; "unknown")]
    #[test_case("", None ; "empty")]
    fn line_color_parsing(input: &str, expected: Option<LineColor>) {
        assert_eq!(LineColor::parse(input), expected);
    }

    #[test]
    fn topology_routes_by_line() {
        let mut lines = LineAggregator::new();
        assert_eq!(
            lines.apply_station(&reduced(1, "Howard", 1, "red")),
            Ok(LineColor::Red)
        );
        assert!(lines.line(LineColor::Red).contains(1));
        assert!(!lines.line(LineColor::Blue).contains(1));
    }

    #[test]
    fn unknown_line_is_dropped() {
        let mut lines = LineAggregator::new();
        let before = lines.clone();
        assert_eq!(
            lines.apply_station(&reduced(1, "Howard", 1, "purple")),
            Err(DropReason::UnknownLine)
        );
        assert_eq!(
            lines.apply_arrival(&arrival(1, "X", "a", "purple")),
            Err(DropReason::UnknownLine)
        );
        assert_eq!(lines, before);
    }

    #[test]
    fn unknown_direction_is_reported() {
        let mut lines = LineAggregator::new();
        assert_eq!(
            lines.apply_arrival(&arrival(1, "X", "up", "red")),
            Err(DropReason::UnknownDirection)
        );
    }

    #[test]
    fn summary_only_mutates_owning_line() {
        let mut lines = LineAggregator::new();
        lines.apply_station(&reduced(1, "A", 1, "red")).unwrap();
        lines.apply_station(&reduced(2, "B", 2, "blue")).unwrap();
        lines.apply_arrival(&arrival(1, "RL1", "a", "red")).unwrap();

        let owner = lines.apply_turnstile_summary(&TurnstileSummary {
            station_id: 1,
            count: 5,
        });
        assert_eq!(owner, Ok(LineColor::Red));

        let red = lines.line(LineColor::Red).station(1).unwrap();
        assert_eq!(red.order, Some(1));
        assert_eq!(red.turnstile_entries, 5);

        let blue = lines.line(LineColor::Blue).station(2).unwrap();
        assert_eq!(blue.order, Some(2));
        assert_eq!(blue.turnstile_entries, 0);
    }

    #[test]
    fn summary_for_unknown_station_is_dropped() {
        let mut lines = LineAggregator::new();
        assert_eq!(
            lines.apply_turnstile_summary(&TurnstileSummary {
                station_id: 99,
                count: 1
            }),
            Err(DropReason::UnknownStation)
        );
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[derive(Debug, Clone)]
    enum Update {
        Station(ReducedStation),
        Arrival(ArrivalEvent),
    }

    fn line_name() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("red"), Just("green"), Just("blue")]
    }

    fn update() -> impl Strategy<Value = Update> {
        prop_oneof![
            (0..6_i64, "[a-z]{1,6}", 0..20_i32).prop_map(|(id, name, order)| {
                // Station ids are partitioned across lines.
                let line = LineColor::all()[(id % 3) as usize].as_str();
                Update::Station(reduced(id, &name, order, line))
            }),
            (0..6_i64, "[A-Z]{2}[0-9]{2}", prop_oneof![Just("a"), Just("b")]).prop_map(
                |(id, train, direction)| {
                    let line = LineColor::all()[(id % 3) as usize].as_str();
                    Update::Arrival(arrival(id, &train, direction, line))
                }
            ),
        ]
    }

    fn apply(lines: &mut LineAggregator, update: &Update) {
        match update {
            Update::Station(record) => {
                let _ = lines.apply_station(record);
            }
            Update::Arrival(event) => {
                let _ = lines.apply_arrival(event);
            }
        }
    }

    proptest! {
        #[test]
        fn summary_redelivery_is_idempotent(
            ids in proptest::collection::vec(0..6_i64, 1..6),
            line in line_name(),
            station in 0..6_i64,
            count in 0..10_000_u64,
        ) {
            let mut lines = LineAggregator::new();
            for id in ids {
                let _ = lines.apply_station(&reduced(id, "S", 1, line));
            }
            let summary = TurnstileSummary { station_id: station, count };

            let _ = lines.apply_turnstile_summary(&summary);
            let once = lines.clone();
            let _ = lines.apply_turnstile_summary(&summary);
            prop_assert_eq!(once, lines);
        }

        #[test]
        fn final_state_reflects_last_write_per_field(
            updates in proptest::collection::vec(update(), 1..40),
        ) {
            let mut lines = LineAggregator::new();
            for update in &updates {
                apply(&mut lines, update);
            }

            for id in 0..6_i64 {
                let color = LineColor::all()[(id % 3) as usize];
                let last_station = updates.iter().rev().find_map(|u| match u {
                    Update::Station(r) if r.station_id == id => Some(r),
                    _ => None,
                });
                let entry = lines.line(color).station(id);
                match last_station {
                    Some(record) => {
                        let entry = entry.unwrap();
                        prop_assert_eq!(entry.name.as_deref(), Some(record.station_name.as_str()));
                        prop_assert_eq!(entry.order, Some(record.order));
                    }
                    None => prop_assert!(entry.is_none_or(|e| e.name.is_none())),
                }

                for (direction, letter) in [(Direction::A, "a"), (Direction::B, "b")] {
                    let last_arrival = updates.iter().rev().find_map(|u| match u {
                        Update::Arrival(e) if e.station_id == id && e.direction == letter => Some(e),
                        _ => None,
                    });
                    let seen = entry.and_then(|e| e.arrival(direction)).map(|a| a.train_id.clone());
                    prop_assert_eq!(seen, last_arrival.map(|e| e.train_id.clone()));
                }
            }
        }

        #[test]
        fn broadcast_never_touches_foreign_lines(
            red_ids in proptest::collection::btree_set(0..50_i64, 0..5),
            station in 50..100_i64,
            count in 0..1_000_u64,
        ) {
            let mut lines = LineAggregator::new();
            for id in &red_ids {
                lines.apply_station(&reduced(*id, "R", 1, "red")).unwrap();
            }
            lines.apply_station(&reduced(station, "B", 1, "blue")).unwrap();
            let red_before = lines.line(LineColor::Red).clone();
            let green_before = lines.line(LineColor::Green).clone();

            let owner = lines.apply_turnstile_summary(&TurnstileSummary { station_id: station, count });

            prop_assert_eq!(owner, Ok(LineColor::Blue));
            prop_assert_eq!(lines.line(LineColor::Red), &red_before);
            prop_assert_eq!(lines.line(LineColor::Green), &green_before);
            prop_assert_eq!(lines.line(LineColor::Blue).station(station).unwrap().turnstile_entries, count);
        }
    }
}
