use crate::{Config, Location, PipelineError, provider::openweather::OpenWeatherProvider};
use async_trait::async_trait;
use std::{fmt::Debug, time::Duration};

pub mod openweather;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Provider-native forecast payload, already checked for the success marker.
#[derive(Debug, Clone, PartialEq)]
pub struct RawForecast(serde_json::Value);

impl RawForecast {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

#[async_trait]
pub trait ForecastProvider: Send + Sync + Debug {
    async fn fetch(&self, location: &Location) -> Result<RawForecast, PipelineError>;
}

/// Construct the forecast provider from config.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Box<dyn ForecastProvider>> {
    let api_key = config.weather_api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No OpenWeather API key configured.\n\
                 Hint: run `skycast configure weather` or set OPENWEATHER_API_KEY."
        )
    })?;

    let timeout = Duration::from_secs(config.weather.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
    let mut provider = OpenWeatherProvider::new(api_key.to_owned(), timeout)?;
    if let Some(base_url) = config.weather.base_url.as_deref() {
        provider = provider.with_base_url(base_url);
    }

    Ok(Box::new(provider))
}
