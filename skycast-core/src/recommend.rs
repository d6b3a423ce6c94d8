use std::{fmt, str::FromStr};

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    PipelineError, Recommendation, RecommendationScope, Window,
    generation::{GenerationRequest, TextGenerationBackend, collect_output},
    summary::{format_summary, group_by_day},
};

pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_INSTRUCTION: &str =
    "Based on the following weather data, provide recommendations:";

/// Whether advice is generated once for the whole window or once per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationMode {
    WholeWindow,
    PerDay,
}

impl RecommendationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationMode::WholeWindow => "whole-window",
            RecommendationMode::PerDay => "per-day",
        }
    }
}

impl fmt::Display for RecommendationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "whole-window" | "whole_window" | "window" => Ok(RecommendationMode::WholeWindow),
            "per-day" | "per_day" | "daily" => Ok(RecommendationMode::PerDay),
            _ => Err(anyhow!(
                "Unknown recommendation mode '{s}'. Supported modes: whole-window, per-day."
            )),
        }
    }
}

/// A day (or the whole window) whose recommendation could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecommendationFailure {
    pub scope: RecommendationScope,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecommendationSet {
    pub recommendations: Vec<Recommendation>,
    pub failures: Vec<RecommendationFailure>,
}

impl RecommendationSet {
    /// A set with no recommendations and one window-wide failure.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            recommendations: Vec::new(),
            failures: vec![RecommendationFailure {
                scope: RecommendationScope::WholeWindow,
                error: reason.into(),
            }],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Turns a forecast window into one or more recommendations via a backend.
#[derive(Debug)]
pub struct RecommendationGenerator {
    backend: Box<dyn TextGenerationBackend>,
    mode: RecommendationMode,
    max_tokens: u32,
    instruction: Option<String>,
}

impl RecommendationGenerator {
    pub fn new(backend: Box<dyn TextGenerationBackend>, mode: RecommendationMode) -> Self {
        Self {
            backend,
            mode,
            max_tokens: DEFAULT_MAX_TOKENS,
            instruction: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Overrides the sentence placed in front of the forecast summary.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn mode(&self) -> RecommendationMode {
        self.mode
    }

    pub fn backend(&self) -> &dyn TextGenerationBackend {
        self.backend.as_ref()
    }

    pub async fn generate(&self, window: &Window) -> RecommendationSet {
        let mut set = RecommendationSet::default();
        if window.is_empty() {
            debug!("empty forecast window; skipping recommendation");
            return set;
        }

        match self.mode {
            RecommendationMode::WholeWindow => {
                let summary = format_summary(&window.observations);
                self.run(RecommendationScope::WholeWindow, &summary, &mut set)
                    .await;
            }
            RecommendationMode::PerDay => {
                for day in group_by_day(&window.observations) {
                    let summary = format_summary(day.observations);
                    self.run(RecommendationScope::Day(day.date), &summary, &mut set)
                        .await;
                }
            }
        }

        set
    }

    async fn run(&self, scope: RecommendationScope, summary: &str, set: &mut RecommendationSet) {
        let request = GenerationRequest {
            prompt: self.prompt(scope, summary),
            max_tokens: self.max_tokens,
        };

        debug!(backend = %self.backend.id(), %scope, "requesting recommendation");
        match self.complete(&request).await {
            Ok(text) => set.recommendations.push(Recommendation { scope, text }),
            Err(err) => {
                warn!(backend = %self.backend.id(), %scope, error = %err, "recommendation failed");
                set.failures.push(RecommendationFailure {
                    scope,
                    error: err.to_string(),
                });
            }
        }
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        let output = self.backend.generate(request).await?;
        collect_output(output).await
    }

    pub fn prompt(&self, scope: RecommendationScope, summary: &str) -> String {
        let instruction = match (&self.instruction, scope) {
            (Some(custom), RecommendationScope::WholeWindow) => custom.clone(),
            (Some(custom), RecommendationScope::Day(date)) => {
                format!("Forecast for {}.\n{custom}", date.format("%A %Y-%m-%d"))
            }
            (None, RecommendationScope::WholeWindow) => DEFAULT_INSTRUCTION.to_string(),
            (None, RecommendationScope::Day(date)) => day_instruction(date),
        };
        format!("{instruction}\n{summary}")
    }
}

fn day_instruction(date: NaiveDate) -> String {
    format!(
        "Based on the following weather forecast for {}, provide recommendations for that day:",
        date.format("%A %Y-%m-%d")
    )
}
