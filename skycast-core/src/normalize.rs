//! Conversion of provider-native forecast payloads into [`Forecast`].
//!
//! The conversion is all-or-nothing: a single entry with a missing or
//! mistyped field fails the whole forecast.

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::{Forecast, Observation, PipelineError, Place, provider::RawForecast};

const DT_TXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn normalize(raw: &RawForecast) -> Result<Forecast, PipelineError> {
    let value = raw.as_json();

    let list = value
        .get("list")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::malformed("response has no `list` array"))?;

    let mut observations: Vec<Observation> = Vec::with_capacity(list.len());
    for (index, entry) in list.iter().enumerate() {
        let observation = observation(index, entry)?;
        if let Some(prev) = observations.last() {
            if observation.timestamp < prev.timestamp {
                return Err(PipelineError::malformed(format!(
                    "entry {index}: timestamp {} is earlier than the previous entry",
                    observation.timestamp
                )));
            }
        }
        observations.push(observation);
    }

    Ok(Forecast {
        place: value.get("city").and_then(place),
        observations,
    })
}

fn observation(index: usize, entry: &Value) -> Result<Observation, PipelineError> {
    let missing = |field: &str| {
        PipelineError::malformed(format!("entry {index}: missing or invalid `{field}`"))
    };

    let dt_txt = entry
        .get("dt_txt")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("dt_txt"))?;
    let timestamp = NaiveDateTime::parse_from_str(dt_txt, DT_TXT_FORMAT)
        .map_err(|e| {
            PipelineError::malformed(format!(
                "entry {index}: cannot parse `dt_txt` {dt_txt:?}: {e}"
            ))
        })?
        .and_utc();

    let main = entry.get("main").ok_or_else(|| missing("main"))?;
    let temperature_c = main
        .get("temp")
        .and_then(Value::as_f64)
        .ok_or_else(|| missing("main.temp"))?;
    let humidity = main
        .get("humidity")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing("main.humidity"))?;
    if humidity > 100 {
        return Err(PipelineError::malformed(format!(
            "entry {index}: humidity {humidity}% is outside 0..=100"
        )));
    }

    let condition = entry
        .get("weather")
        .and_then(Value::as_array)
        .and_then(|conditions| conditions.first())
        .and_then(|first| {
            first
                .get("description")
                .and_then(Value::as_str)
                .or_else(|| first.get("main").and_then(Value::as_str))
        })
        .ok_or_else(|| missing("weather[0].description"))?;

    Ok(Observation {
        timestamp,
        temperature_c,
        humidity_pct: humidity as u8,
        condition: condition.to_string(),
    })
}

fn place(city: &Value) -> Option<Place> {
    let name = city.get("name").and_then(Value::as_str)?.trim();
    if name.is_empty() {
        return None;
    }

    Some(Place {
        name: name.to_string(),
        country: city
            .get("country")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
    })
}
