use chrono::NaiveDate;
use serde::Serialize;

use crate::Observation;

/// Renders one line per observation, in input order.
///
/// The same text is shown to the user and embedded into recommendation
/// prompts, so the output must stay deterministic.
pub fn format_summary(observations: &[Observation]) -> String {
    observations
        .iter()
        .map(format_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_line(o: &Observation) -> String {
    format!(
        "- {} | {:.1}°C | {}% | {}",
        o.timestamp.format("%Y-%m-%d %H:%M"),
        o.temperature_c,
        o.humidity_pct,
        o.condition
    )
}

/// Observations of a single UTC calendar day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DaySlice<'a> {
    pub date: NaiveDate,
    pub observations: &'a [Observation],
}

/// Splits ordered observations into per-day runs, in day order.
pub fn group_by_day(observations: &[Observation]) -> Vec<DaySlice<'_>> {
    observations
        .chunk_by(|a, b| a.date() == b.date())
        .map(|chunk| DaySlice {
            date: chunk[0].date(),
            observations: chunk,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyOverview {
    pub date: NaiveDate,
    pub min_temp_c: f64,
    pub max_temp_c: f64,
    pub mean_humidity_pct: u8,
    /// Most frequent condition; ties go to the one seen first.
    pub condition: String,
}

pub fn daily_overview(observations: &[Observation]) -> Vec<DailyOverview> {
    group_by_day(observations)
        .into_iter()
        .map(|day| overview(day.date, day.observations))
        .collect()
}

fn overview(date: NaiveDate, observations: &[Observation]) -> DailyOverview {
    let min_temp_c = observations
        .iter()
        .map(|o| o.temperature_c)
        .fold(f64::INFINITY, f64::min);
    let max_temp_c = observations
        .iter()
        .map(|o| o.temperature_c)
        .fold(f64::NEG_INFINITY, f64::max);

    let humidity_sum: u32 = observations.iter().map(|o| u32::from(o.humidity_pct)).sum();
    let mean_humidity_pct = (f64::from(humidity_sum) / observations.len() as f64).round() as u8;

    let mut counts: Vec<(&str, usize)> = Vec::new();
    for o in observations {
        match counts.iter_mut().find(|(c, _)| *c == o.condition) {
            Some((_, n)) => *n += 1,
            None => counts.push((o.condition.as_str(), 1)),
        }
    }
    let mut condition = "";
    let mut best = 0;
    for (c, n) in counts {
        if n > best {
            condition = c;
            best = n;
        }
    }

    DailyOverview {
        date,
        min_temp_c,
        max_temp_c,
        mean_humidity_pct,
        condition: condition.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn obs(day: u32, hour: u32, temp: f64, humidity: u8, condition: &str) -> Observation {
        Observation {
            timestamp: Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap(),
            temperature_c: temp,
            humidity_pct: humidity,
            condition: condition.to_string(),
        }
    }

    #[test]
    fn formats_one_line_per_observation() {
        let text = format_summary(&[
            obs(18, 12, 14.2, 70, "broken clouds"),
            obs(18, 15, 9.0, 81, "light rain"),
        ]);

        assert_eq!(
            text,
            "- 2026-10-18 12:00 | 14.2°C | 70% | broken clouds\n\
             - 2026-10-18 15:00 | 9.0°C | 81% | light rain"
        );
    }

    #[test]
    fn formatting_is_idempotent() {
        let window = vec![obs(18, 12, 14.2, 70, "a"), obs(19, 0, 8.1, 90, "b")];
        assert_eq!(format_summary(&window), format_summary(&window));
    }

    #[test]
    fn empty_window_formats_to_empty_text() {
        assert_eq!(format_summary(&[]), "");
    }

    #[test]
    fn groups_by_calendar_day_in_order() {
        let window = vec![
            obs(18, 21, 10.0, 70, "a"),
            obs(19, 0, 9.0, 70, "a"),
            obs(19, 3, 8.0, 70, "a"),
            obs(20, 0, 7.0, 70, "a"),
        ];

        let days = group_by_day(&window);

        assert_eq!(days.len(), 3);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        assert_eq!(days[1].observations.len(), 2);
        assert_eq!(days[2].date, NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
    }

    #[test]
    fn overview_aggregates_each_day() {
        let window = vec![
            obs(18, 9, 10.0, 60, "clear sky"),
            obs(18, 12, 14.0, 70, "light rain"),
            obs(18, 15, 12.0, 81, "light rain"),
            obs(19, 0, 6.0, 90, "mist"),
        ];

        let days = daily_overview(&window);

        assert_eq!(days.len(), 2);
        assert_eq!(days[0].min_temp_c, 10.0);
        assert_eq!(days[0].max_temp_c, 14.0);
        assert_eq!(days[0].mean_humidity_pct, 70);
        assert_eq!(days[0].condition, "light rain");
        assert_eq!(days[1].condition, "mist");
    }

    #[test]
    fn overview_condition_tie_goes_to_first_seen() {
        let window = vec![obs(18, 9, 10.0, 60, "clouds"), obs(18, 12, 14.0, 70, "rain")];
        assert_eq!(daily_overview(&window)[0].condition, "clouds");
    }
}
