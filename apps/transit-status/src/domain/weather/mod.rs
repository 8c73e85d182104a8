//! Weather State
//!
//! Latest weather reading observed on the weather topic.

use serde::Serialize;

use crate::domain::records::WeatherEvent;

/// Reported weather condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherStatus {
    /// Clear sky.
    Sunny,
    /// Some cloud cover.
    PartlyCloudy,
    /// Overcast.
    Cloudy,
    /// Strong wind.
    Windy,
    /// Rain or snow.
    Precipitation,
}

impl WeatherStatus {
    /// Parse the wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sunny" => Some(Self::Sunny),
            "partly_cloudy" => Some(Self::PartlyCloudy),
            "cloudy" => Some(Self::Cloudy),
            "windy" => Some(Self::Windy),
            "precipitation" => Some(Self::Precipitation),
            _ => None,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sunny => "sunny",
            Self::PartlyCloudy => "partly_cloudy",
            Self::Cloudy => "cloudy",
            Self::Windy => "windy",
            Self::Precipitation => "precipitation",
        }
    }
}

/// Last weather reading, empty until the first one arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WeatherState {
    /// Temperature in degrees Fahrenheit.
    pub temperature: Option<f64>,
    /// Current condition.
    pub status: Option<WeatherStatus>,
}

impl WeatherState {
    /// Replace the reading. Readings with an unknown status are ignored.
    ///
    /// Returns whether the reading was applied.
    pub fn apply(&mut self, event: &WeatherEvent) -> bool {
        let Some(status) = WeatherStatus::parse(&event.status) else {
            tracing::warn!(status = %event.status, "Discarding weather with unknown status");
            return false;
        };
        self.temperature = Some(event.temperature);
        self.status = Some(status);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_names() {
        for status in [
            WeatherStatus::Sunny,
            WeatherStatus::PartlyCloudy,
            WeatherStatus::Cloudy,
            WeatherStatus::Windy,
            WeatherStatus::Precipitation,
        ] {
            assert_eq!(WeatherStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(WeatherStatus::parse("hail"), None);
    }

    #[test]
    fn latest_reading_wins() {
        let mut state = WeatherState::default();
        assert!(state.apply(&WeatherEvent {
            temperature: 40.0,
            status: "cloudy".to_string(),
        }));
        assert!(state.apply(&WeatherEvent {
            temperature: 42.5,
            status: "windy".to_string(),
        }));
        assert_eq!(state.temperature, Some(42.5));
        assert_eq!(state.status, Some(WeatherStatus::Windy));
    }

    #[test]
    fn unknown_status_keeps_previous_reading() {
        let mut state = WeatherState::default();
        state.apply(&WeatherEvent {
            temperature: 70.0,
            status: "sunny".to_string(),
        });
        assert!(!state.apply(&WeatherEvent {
            temperature: -5.0,
            status: "hail".to_string(),
        }));
        assert_eq!(state.temperature, Some(70.0));
    }
}
