use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};

use crate::{Forecast, Window};

/// How far into the future forecast observations are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    Hours(u32),
    Days(u32),
}

impl Horizon {
    pub fn duration(self) -> Duration {
        match self {
            Horizon::Hours(h) => Duration::hours(i64::from(h)),
            Horizon::Days(d) => Duration::days(i64::from(d)),
        }
    }
}

impl Default for Horizon {
    fn default() -> Self {
        Horizon::Days(5)
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Horizon::Hours(h) => write!(f, "{h}h"),
            Horizon::Days(d) => write!(f, "{d}d"),
        }
    }
}

impl Serialize for Horizon {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepts `36h`, `5d`, or a bare number of days.
impl FromStr for Horizon {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let (digits, make): (&str, fn(u32) -> Horizon) = if let Some(h) = s.strip_suffix('h') {
            (h, Horizon::Hours)
        } else if let Some(d) = s.strip_suffix('d') {
            (d, Horizon::Days)
        } else {
            (s.as_str(), Horizon::Days)
        };

        let n: u32 = digits
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid horizon '{s}'. Use e.g. `36h`, `5d` or `3`."))?;
        if n == 0 {
            bail!("Horizon must be greater than zero");
        }

        Ok(make(n))
    }
}

/// Observations with `timestamp <= now + horizon`, in forecast order.
///
/// A bound past the representable range saturates to the latest `DateTime`.
pub fn filter_window(forecast: &Forecast, horizon: Horizon, now: DateTime<Utc>) -> Window {
    let until = now
        .checked_add_signed(horizon.duration())
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    Window {
        place: forecast.place.clone(),
        until,
        observations: forecast
            .observations
            .iter()
            .filter(|o| o.timestamp <= until)
            .cloned()
            .collect(),
    }
}
