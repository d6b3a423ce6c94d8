use std::fmt::Write as _;

use skycast_core::{PipelineReport, RecommendationSet};

use crate::cli::OutputFormat;

pub fn print_report(report: &PipelineReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            print!("{}", render_text(report));
            if let Some(set) = &report.recommendations {
                for failure in &set.failures {
                    eprintln!("Recommendation for {} failed: {}", failure.scope, failure.error);
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

pub fn render_text(report: &PipelineReport) -> String {
    let mut out = String::new();
    let place = report
        .window
        .place
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| report.location.to_string());

    let _ = writeln!(
        out,
        "Forecast for {place} (next {}, until {} UTC)\n",
        report.horizon,
        report.window.until.format("%Y-%m-%d %H:%M")
    );

    if report.window.is_empty() {
        let _ = writeln!(out, "No forecast entries within the next {}.", report.horizon);
        return out;
    }

    let _ = writeln!(
        out,
        "{:<10}  {:<5}  {:>7}  {:>8}  Conditions",
        "Date", "Time", "Temp", "Humidity"
    );
    for o in &report.window.observations {
        let _ = writeln!(
            out,
            "{:<10}  {:<5}  {:>7}  {:>8}  {}",
            o.timestamp.format("%Y-%m-%d"),
            o.timestamp.format("%H:%M"),
            format!("{:.1}°C", o.temperature_c),
            format!("{}%", o.humidity_pct),
            o.condition
        );
    }

    let _ = writeln!(out, "\nDaily overview");
    for day in &report.days {
        let _ = writeln!(
            out,
            "{}  {:>6.1}°C .. {:>5.1}°C  {:>3}%  {}",
            day.date.format("%a %Y-%m-%d"),
            day.min_temp_c,
            day.max_temp_c,
            day.mean_humidity_pct,
            day.condition
        );
    }

    if !report.summary.is_empty() {
        let _ = writeln!(out, "\nSummary\n{}", report.summary);
    }

    if let Some(set) = &report.recommendations {
        render_recommendations(&mut out, set);
    }

    out
}

fn render_recommendations(out: &mut String, set: &RecommendationSet) {
    if set.recommendations.is_empty() {
        return;
    }

    let _ = writeln!(out, "\nRecommendations");
    for rec in &set.recommendations {
        let _ = writeln!(out, "\n[{}]\n{}", rec.scope, rec.text.trim());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use skycast_core::{
        Horizon, Location, Observation, Place, Recommendation, RecommendationScope, Window,
        recommend::RecommendationFailure,
        summary::{daily_overview, format_summary},
    };

    fn report(recommendations: Option<RecommendationSet>) -> PipelineReport {
        let observations = vec![Observation {
            timestamp: Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
            temperature_c: 12.5,
            humidity_pct: 80,
            condition: "light rain".into(),
        }];
        PipelineReport {
            location: Location::Place("London".into()),
            horizon: Horizon::Days(5),
            days: daily_overview(&observations),
            summary: format_summary(&observations),
            window: Window {
                place: Some(Place {
                    name: "London".into(),
                    country: Some("GB".into()),
                }),
                until: Utc.with_ymd_and_hms(2026, 10, 23, 9, 0, 0).unwrap(),
                observations,
            },
            recommendations,
        }
    }

    #[test]
    fn renders_table_rows() {
        let text = render_text(&report(None));

        assert!(text.starts_with("Forecast for London, GB (next 5d, until 2026-10-23 09:00 UTC)"));
        assert!(text.contains("2026-10-18  12:00   12.5°C       80%  light rain"));
        assert!(text.contains("Daily overview"));
        assert!(text.contains("\nSummary\n- 2026-10-18 12:00 | 12.5°C | 80% | light rain\n"));
        assert!(!text.contains("Recommendations"));
    }

    #[test]
    fn renders_recommendations_in_order() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let text = render_text(&report(Some(RecommendationSet {
            recommendations: vec![Recommendation {
                scope: RecommendationScope::Day(day),
                text: "Pack an umbrella.\n".into(),
            }],
            failures: vec![RecommendationFailure {
                scope: RecommendationScope::Day(day.succ_opt().unwrap()),
                error: "boom".into(),
            }],
        })));

        assert!(text.contains("Recommendations\n\n[2026-10-18]\nPack an umbrella.\n"));
    }

    #[test]
    fn empty_window_says_so() {
        let mut r = report(None);
        r.window.observations.clear();
        assert!(render_text(&r).contains("No forecast entries within the next 5d."));
    }

    #[test]
    fn json_output_serializes_report() {
        let value = serde_json::to_value(report(None)).unwrap();
        assert_eq!(value["location"], "London");
        assert_eq!(value["horizon"], "5d");
        assert_eq!(value["window"]["observations"][0]["humidity_pct"], 80);
    }
}
