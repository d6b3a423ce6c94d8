//! Core library for the `skycast` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The forecast pipeline: fetch, normalize, window, summarize
//! - Text-generation backends that turn a forecast into recommendations
//!
//! It is used by `skycast-cli`, but can also be reused by other binaries or services.

pub mod config;
pub mod error;
pub mod generation;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod provider;
pub mod recommend;
pub mod summary;
pub mod window;

pub use config::Config;
pub use error::PipelineError;
pub use generation::{BackendId, TextGenerationBackend};
pub use model::{
    Forecast, Location, Observation, Place, Recommendation, RecommendationScope, Window,
};
pub use pipeline::{Pipeline, PipelineReport, RecommendOptions};
pub use provider::ForecastProvider;
pub use recommend::{RecommendationGenerator, RecommendationMode, RecommendationSet};
pub use window::Horizon;
