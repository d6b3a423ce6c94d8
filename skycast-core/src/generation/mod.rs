//! Text-generation backends used to turn a forecast summary into advice.
//!
//! Every backend answers a [`GenerationRequest`] with a [`TextOutput`]: either
//! the complete text, or an ordered stream of fragments that
//! [`collect_output`] concatenates.

use std::{convert::TryFrom, fmt, path::PathBuf, time::Duration};

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream::BoxStream};

use crate::{
    Config, PipelineError,
    generation::{anthropic::AnthropicBackend, local::LocalBackend, replicate::ReplicateBackend},
    recommend::RecommendationMode,
};

pub mod anthropic;
pub mod local;
pub mod replicate;
pub mod sse;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendId {
    Replicate,
    Local,
    Anthropic,
}

/// How a backend delivers its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendShape {
    Streaming,
    SingleShotLocal,
    SingleShotRemote,
}

impl BackendId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Replicate => "replicate",
            BackendId::Local => "local",
            BackendId::Anthropic => "anthropic",
        }
    }

    pub const fn all() -> &'static [BackendId] {
        &[BackendId::Replicate, BackendId::Local, BackendId::Anthropic]
    }

    pub fn shape(&self) -> BackendShape {
        match self {
            BackendId::Replicate => BackendShape::Streaming,
            BackendId::Local => BackendShape::SingleShotLocal,
            BackendId::Anthropic => BackendShape::SingleShotRemote,
        }
    }

    /// Remote single-shot backends are batched per day unless configured otherwise.
    pub fn default_mode(&self) -> RecommendationMode {
        match self.shape() {
            BackendShape::SingleShotRemote => RecommendationMode::PerDay,
            BackendShape::Streaming | BackendShape::SingleShotLocal => {
                RecommendationMode::WholeWindow
            }
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for BackendId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "replicate" => Ok(BackendId::Replicate),
            "local" => Ok(BackendId::Local),
            "anthropic" => Ok(BackendId::Anthropic),
            _ => Err(anyhow::anyhow!(
                "Unknown backend '{value}'. Supported backends: replicate, local, anthropic."
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
}

pub type FragmentStream = BoxStream<'static, Result<String, PipelineError>>;

pub enum TextOutput {
    Complete(String),
    Fragments(FragmentStream),
}

impl fmt::Debug for TextOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextOutput::Complete(text) => f.debug_tuple("Complete").field(text).finish(),
            TextOutput::Fragments(_) => f.write_str("Fragments(..)"),
        }
    }
}

#[async_trait]
pub trait TextGenerationBackend: Send + Sync + fmt::Debug {
    fn id(&self) -> BackendId;

    async fn generate(&self, request: &GenerationRequest) -> Result<TextOutput, PipelineError>;
}

/// Resolves a backend answer into its final text.
pub async fn collect_output(output: TextOutput) -> Result<String, PipelineError> {
    match output {
        TextOutput::Complete(text) => Ok(text),
        TextOutput::Fragments(fragments) => collect_fragments(fragments).await,
    }
}

/// Concatenates fragments in arrival order, stopping at the first error.
pub async fn collect_fragments<S>(mut fragments: S) -> Result<String, PipelineError>
where
    S: Stream<Item = Result<String, PipelineError>> + Unpin,
{
    let mut text = String::new();
    while let Some(fragment) = fragments.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

/// Construct a backend from config and explicit BackendId.
pub fn backend_from_config(
    id: BackendId,
    config: &Config,
) -> anyhow::Result<Box<dyn TextGenerationBackend>> {
    let timeout = Duration::from_secs(
        config.recommendation.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
    );
    let missing = || {
        anyhow::anyhow!(
            "No credentials configured for backend '{id}'.\n\
                 Hint: run `skycast configure {id}`."
        )
    };

    let boxed: Box<dyn TextGenerationBackend> = match id {
        BackendId::Replicate => {
            let cfg = config.backends.replicate.as_ref().ok_or_else(missing)?;
            let mut backend = ReplicateBackend::new(
                cfg.api_token.clone(),
                cfg.model.clone().unwrap_or_else(|| replicate::DEFAULT_MODEL.to_string()),
                timeout,
            )?;
            if let Some(base_url) = cfg.base_url.as_deref() {
                backend = backend.with_base_url(base_url);
            }
            Box::new(backend)
        }
        BackendId::Anthropic => {
            let cfg = config.backends.anthropic.as_ref().ok_or_else(missing)?;
            let mut backend = AnthropicBackend::new(
                cfg.api_key.clone(),
                cfg.model.clone().unwrap_or_else(|| anthropic::DEFAULT_MODEL.to_string()),
                timeout,
            )?;
            if let Some(base_url) = cfg.base_url.as_deref() {
                backend = backend.with_base_url(base_url);
            }
            Box::new(backend)
        }
        BackendId::Local => {
            let cfg = config.backends.local.clone().unwrap_or_default();
            let model_path: Option<PathBuf> = cfg.model_path;
            let args = cfg.args.unwrap_or_else(local::default_args);
            if model_path.is_none() && args.iter().any(|a| a.contains("{model}")) {
                return Err(anyhow::anyhow!(
                    "No model file configured for backend 'local'.\n\
                         Hint: run `skycast configure local` and enter the model path."
                ));
            }
            Box::new(LocalBackend::new(
                cfg.program.unwrap_or_else(|| local::DEFAULT_PROGRAM.to_string()),
                model_path,
                args,
            ))
        }
    };

    Ok(boxed)
}

/// Construct the default backend from config, using `recommendation.backend`.
pub fn default_backend_from_config(
    config: &Config,
) -> anyhow::Result<Box<dyn TextGenerationBackend>> {
    let id = config.default_backend_id()?;
    backend_from_config(id, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalConfig;
    use futures::stream;

    #[test]
    fn backend_id_as_str_roundtrip() {
        for id in BackendId::all() {
            let parsed = BackendId::try_from(id.as_str()).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn unknown_backend_error() {
        let err = BackendId::try_from("gpt-in-a-box").unwrap_err();
        assert!(err.to_string().contains("Unknown backend"));
    }

    #[test]
    fn remote_backend_defaults_to_per_day() {
        assert_eq!(BackendId::Anthropic.default_mode(), RecommendationMode::PerDay);
        assert_eq!(BackendId::Replicate.default_mode(), RecommendationMode::WholeWindow);
        assert_eq!(BackendId::Local.default_mode(), RecommendationMode::WholeWindow);
    }

    #[tokio::test]
    async fn concatenates_fragments_without_separators() {
        let fragments = stream::iter(vec![Ok("Wear ".to_string()), Ok("a coat.".to_string())]);
        let text = collect_fragments(fragments).await.unwrap();
        assert_eq!(text, "Wear a coat.");
    }

    #[tokio::test]
    async fn fragment_error_stops_collection() {
        let fragments = stream::iter(vec![
            Ok("Wear ".to_string()),
            Err(PipelineError::generation_failed("model crashed")),
            Ok("never seen".to_string()),
        ]);
        let err = collect_fragments(fragments).await.unwrap_err();
        assert_eq!(err, PipelineError::generation_failed("model crashed"));
    }

    #[tokio::test]
    async fn complete_output_is_returned_as_is() {
        let text = collect_output(TextOutput::Complete("Bring an umbrella.".into()))
            .await
            .unwrap();
        assert_eq!(text, "Bring an umbrella.");
    }

    #[test]
    fn backend_from_config_errors_when_missing_credentials() {
        let cfg = Config::default();
        let err = backend_from_config(BackendId::Replicate, &cfg).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("No credentials configured for backend 'replicate'"));
        assert!(msg.contains("Hint: run `skycast configure replicate`"));
    }

    #[test]
    fn local_backend_requires_model_path_for_default_args() {
        let cfg = Config::default();
        let err = backend_from_config(BackendId::Local, &cfg).unwrap_err();
        assert!(err.to_string().contains("No model file configured"));
    }

    #[test]
    fn local_backend_without_model_placeholder_needs_no_model() {
        let mut cfg = Config::default();
        cfg.backends.local = Some(LocalConfig {
            program: Some("echo".into()),
            model_path: None,
            args: Some(vec!["{prompt}".into()]),
        });

        let backend = backend_from_config(BackendId::Local, &cfg).unwrap();
        assert_eq!(backend.id(), BackendId::Local);
    }

    #[test]
    fn default_backend_from_config_errors_when_not_set() {
        let cfg = Config::default();
        let err = default_backend_from_config(&cfg).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("No recommendation backend configured"));
        assert!(msg.contains("Hint: run `skycast configure"));
    }

    #[test]
    fn default_backend_from_config_works_when_set_and_configured() {
        let mut cfg = Config::default();
        cfg.upsert_backend_credential(BackendId::Anthropic, "KEY".to_string())
            .unwrap();

        let backend = default_backend_from_config(&cfg).unwrap();
        assert_eq!(backend.id(), BackendId::Anthropic);
    }
}
