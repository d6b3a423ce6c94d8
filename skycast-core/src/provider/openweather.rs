use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::{Location, PipelineError, error::truncate_body};

use super::{ForecastProvider, RawForecast};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// 5-day / 3-hour forecast endpoint of OpenWeather.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for OpenWeather")?;

        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn query(&self, location: &Location) -> Vec<(&'static str, String)> {
        let mut query = match location {
            Location::Place(name) => vec![("q", name.clone())],
            Location::Coordinates { lat, lon } => {
                vec![("lat", lat.to_string()), ("lon", lon.to_string())]
            }
        };
        query.push(("appid", self.api_key.clone()));
        query.push(("units", "metric".to_string()));
        query
    }
}

#[async_trait]
impl ForecastProvider for OpenWeatherProvider {
    async fn fetch(&self, location: &Location) -> Result<RawForecast, PipelineError> {
        let url = format!("{}/forecast", self.base_url.trim_end_matches('/'));
        debug!(%location, %url, "requesting OpenWeather forecast");

        let res = self
            .http
            .get(&url)
            .query(&self.query(location))
            .send()
            .await
            .map_err(|e| {
                PipelineError::fetch_failed(None, format!("could not reach OpenWeather: {e}"))
            })?;

        let status = res.status();
        let body = res.text().await.map_err(|e| {
            PipelineError::fetch_failed(
                Some(status.as_u16()),
                format!("failed to read OpenWeather response body: {e}"),
            )
        })?;

        if !status.is_success() {
            let message = provider_message(&body)
                .unwrap_or_else(|| fallback_message(&body, status.canonical_reason()));
            return Err(PipelineError::fetch_failed(Some(status.as_u16()), message));
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            PipelineError::malformed(format!("OpenWeather response is not valid JSON: {e}"))
        })?;

        check_success_marker(&value)?;
        debug!(status = status.as_u16(), "OpenWeather forecast received");

        Ok(RawForecast::new(value))
    }
}

/// OpenWeather may answer 200 with an error code embedded in `cod`.
fn check_success_marker(value: &Value) -> Result<(), PipelineError> {
    let code = match value.get("cod") {
        Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        _ => None,
    };

    if code == Some(200) {
        return Ok(());
    }

    let message = value
        .get("message")
        .and_then(message_text)
        .unwrap_or_else(|| "response did not report success".to_string());

    Err(PipelineError::fetch_failed(code, message))
}

fn provider_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("message").and_then(message_text)
}

fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn fallback_message(body: &str, reason: Option<&str>) -> String {
    if body.trim().is_empty() {
        reason.unwrap_or("no response body").to_string()
    } else {
        truncate_body(body)
    }
}
