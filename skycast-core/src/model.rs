use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Where to fetch the forecast for.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// Free-text place name, e.g. "London" or "Paris,FR".
    Place(String),
    /// Decimal degrees.
    Coordinates { lat: f64, lon: f64 },
}

impl FromStr for Location {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            bail!("Location must not be empty");
        }

        if let Some((lat, lon)) = trimmed.split_once(',') {
            if let (Ok(lat), Ok(lon)) = (lat.trim().parse::<f64>(), lon.trim().parse::<f64>()) {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                    return Err(anyhow!(
                        "Coordinates out of range: latitude must be -90..90 and longitude -180..180 (got {lat}, {lon})"
                    ));
                }
                return Ok(Location::Coordinates { lat, lon });
            }
        }

        Ok(Location::Place(trimmed.to_string()))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Place(name) => f.write_str(name),
            Location::Coordinates { lat, lon } => write!(f, "{lat},{lon}"),
        }
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One time-stamped forecast reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    pub humidity_pct: u8,
    pub condition: String,
}

impl Observation {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Resolved place name reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub country: Option<String>,
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.country {
            Some(country) => write!(f, "{}, {}", self.name, country),
            None => f.write_str(&self.name),
        }
    }
}

/// Observations in provider order (ascending timestamps, never re-sorted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub place: Option<Place>,
    pub observations: Vec<Observation>,
}

/// The part of a [`Forecast`] that falls inside the requested horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub place: Option<Place>,
    /// Inclusive upper bound the window was computed against.
    pub until: DateTime<Utc>,
    pub observations: Vec<Observation>,
}

impl Window {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }
}

/// What a recommendation was generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "date", rename_all = "snake_case")]
pub enum RecommendationScope {
    WholeWindow,
    Day(NaiveDate),
}

impl fmt::Display for RecommendationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendationScope::WholeWindow => f.write_str("forecast window"),
            RecommendationScope::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub scope: RecommendationScope,
    pub text: String,
}
