//! One forecast request, end to end.
//!
//! Fetch and normalization failures abort the request. Recommendation
//! failures never do: they are collected next to the forecast window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    Config, Location, PipelineError, Window,
    generation::{BackendId, backend_from_config},
    normalize::normalize,
    provider::{ForecastProvider, provider_from_config},
    recommend::{RecommendationGenerator, RecommendationMode, RecommendationSet},
    summary::{DailyOverview, daily_overview, format_summary},
    window::{Horizon, filter_window},
};

#[derive(Debug)]
pub struct Pipeline {
    provider: Box<dyn ForecastProvider>,
    generator: Option<RecommendationGenerator>,
    /// Why recommendations were requested but no generator could be built.
    unavailable: Option<String>,
}

/// Everything produced by a successful run, ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub location: Location,
    pub horizon: Horizon,
    pub window: Window,
    pub summary: String,
    pub days: Vec<DailyOverview>,
    pub recommendations: Option<RecommendationSet>,
}

/// Per-run overrides of the configured recommendation settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendOptions {
    pub backend: Option<BackendId>,
    pub mode: Option<RecommendationMode>,
}

impl Pipeline {
    pub fn new(provider: Box<dyn ForecastProvider>) -> Self {
        Self {
            provider,
            generator: None,
            unavailable: None,
        }
    }

    pub fn with_generator(mut self, generator: RecommendationGenerator) -> Self {
        self.generator = Some(generator);
        self.unavailable = None;
        self
    }

    /// Runs forecast-only, reporting `reason` as the recommendation failure.
    pub fn with_unavailable_generator(mut self, reason: impl Into<String>) -> Self {
        self.generator = None;
        self.unavailable = Some(reason.into());
        self
    }

    /// Builds the provider and, when `recommend` is set, the generator.
    ///
    /// Only the weather provider is required. A backend that cannot be built
    /// leaves the pipeline forecast-only and is reported with each run.
    pub fn from_config(
        config: &Config,
        recommend: Option<RecommendOptions>,
    ) -> anyhow::Result<Self> {
        let pipeline = Self::new(provider_from_config(config)?);

        let Some(options) = recommend else {
            return Ok(pipeline);
        };

        match generator_from_config(config, options) {
            Ok(generator) => Ok(pipeline.with_generator(generator)),
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(error = %reason, "recommendation backend unavailable; forecast only");
                Ok(pipeline.with_unavailable_generator(reason))
            }
        }
    }

    pub fn generator(&self) -> Option<&RecommendationGenerator> {
        self.generator.as_ref()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable.as_deref()
    }

    pub async fn run(
        &self,
        location: &Location,
        horizon: Horizon,
        now: DateTime<Utc>,
    ) -> Result<PipelineReport, PipelineError> {
        let raw = self.provider.fetch(location).await?;
        let forecast = normalize(&raw)?;
        let window = filter_window(&forecast, horizon, now);
        info!(
            %location,
            %horizon,
            observations = forecast.observations.len(),
            in_window = window.len(),
            "forecast ready"
        );

        let summary = format_summary(&window.observations);
        let days = daily_overview(&window.observations);

        let recommendations = match (&self.generator, &self.unavailable) {
            (Some(generator), _) => {
                debug!(mode = %generator.mode(), "generating recommendations");
                Some(generator.generate(&window).await)
            }
            (None, Some(reason)) => Some(RecommendationSet::unavailable(reason.clone())),
            (None, None) => None,
        };

        Ok(PipelineReport {
            location: location.clone(),
            horizon,
            window,
            summary,
            days,
            recommendations,
        })
    }
}

fn generator_from_config(
    config: &Config,
    options: RecommendOptions,
) -> anyhow::Result<RecommendationGenerator> {
    let id = match options.backend {
        Some(id) => id,
        None => config.default_backend_id()?,
    };
    let mode = match options.mode {
        Some(mode) => mode,
        None => config.recommendation_mode(id)?,
    };

    let mut generator = RecommendationGenerator::new(backend_from_config(id, config)?, mode)
        .with_max_tokens(config.max_tokens());
    if let Some(instruction) = config.recommendation.instruction.as_deref() {
        generator = generator.with_instruction(instruction);
    }
    Ok(generator)
}
