use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    generation::BackendId,
    recommend::{DEFAULT_MAX_TOKENS, RecommendationMode},
    window::Horizon,
};

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "SKYCAST_CONFIG";

/// Weather provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Default horizon, e.g. "5d" or "36h".
    pub horizon: Option<String>,
}

/// Recommendation settings shared by every backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Default backend id, e.g. "replicate", "local" or "anthropic".
    pub backend: Option<String>,
    /// "whole-window" or "per-day"; falls back to the backend's default.
    pub mode: Option<String>,
    pub max_tokens: Option<u32>,
    /// Sentence placed in front of the forecast summary.
    pub instruction: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicateConfig {
    pub api_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LocalConfig {
    /// Model runner executable; defaults to `llama-cli`.
    pub program: Option<String>,
    pub model_path: Option<PathBuf>,
    /// Argument template with `{model}`, `{max_tokens}` and `{prompt}` placeholders.
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BackendsConfig {
    pub replicate: Option<ReplicateConfig>,
    pub anthropic: Option<AnthropicConfig>,
    pub local: Option<LocalConfig>,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [weather]
/// api_key = "..."
///
/// [recommendation]
/// backend = "replicate"
///
/// [backends.replicate]
/// api_token = "..."
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub weather: WeatherConfig,
    pub recommendation: RecommendationConfig,
    pub backends: BackendsConfig,
}

impl Config {
    /// Return the default backend as a strongly-typed BackendId.
    pub fn default_backend_id(&self) -> Result<BackendId> {
        let s = self.recommendation.backend.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "No recommendation backend configured.\n\
                 Hint: run `skycast configure <backend>` (e.g. `skycast configure replicate`) first."
            )
        })?;

        BackendId::try_from(s.as_str())
    }

    /// Store default backend as string.
    pub fn set_default_backend(&mut self, id: BackendId) {
        self.recommendation.backend = Some(id.as_str().to_string());
    }

    /// Configured mode, or the backend's own default when none is set.
    pub fn recommendation_mode(&self, id: BackendId) -> Result<RecommendationMode> {
        match self.recommendation.mode.as_deref() {
            Some(mode) => mode
                .parse()
                .with_context(|| "Invalid `recommendation.mode` in config"),
            None => Ok(id.default_mode()),
        }
    }

    pub fn max_tokens(&self) -> u32 {
        self.recommendation.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn default_horizon(&self) -> Result<Horizon> {
        match self.weather.horizon.as_deref() {
            Some(h) => h.parse().with_context(|| "Invalid `weather.horizon` in config"),
            None => Ok(Horizon::default()),
        }
    }

    pub fn weather_api_key(&self) -> Option<&str> {
        self.weather.api_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn set_weather_api_key(&mut self, api_key: String) {
        self.weather.api_key = Some(api_key);
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Load config from disk and layer credentials from the environment on top.
    pub fn load_with_env() -> Result<Self> {
        let mut cfg = Self::load()?;
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file; `SKYCAST_CONFIG` wins over the platform default.
    pub fn config_file_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let dirs = ProjectDirs::from("dev", "skycast", "skycast")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overrides credentials with `OPENWEATHER_API_KEY`, `REPLICATE_API_TOKEN`
    /// and `ANTHROPIC_API_KEY` when they are set.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("OPENWEATHER_API_KEY") {
            self.weather.api_key = Some(key);
        }
        if let Some(token) = lookup("REPLICATE_API_TOKEN") {
            self.set_backend_secret(BackendId::Replicate, token);
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.set_backend_secret(BackendId::Anthropic, key);
        }
    }

    /// Convenience helper: set/replace a backend credential and set the default
    /// backend if none is chosen yet.
    pub fn upsert_backend_credential(&mut self, id: BackendId, secret: String) -> Result<()> {
        if id == BackendId::Local {
            return Err(anyhow!(
                "Backend 'local' takes no credential; configure its model path instead."
            ));
        }

        self.set_backend_secret(id, secret);
        if self.recommendation.backend.is_none() {
            self.set_default_backend(id);
        }
        Ok(())
    }

    /// Configure the local model runner; sets it as default if none is chosen yet.
    pub fn upsert_local_backend(&mut self, program: Option<String>, model_path: PathBuf) {
        let local = self.backends.local.get_or_insert_with(LocalConfig::default);
        local.model_path = Some(model_path);
        if program.is_some() {
            local.program = program;
        }

        if self.recommendation.backend.is_none() {
            self.set_default_backend(BackendId::Local);
        }
    }

    fn set_backend_secret(&mut self, id: BackendId, secret: String) {
        match id {
            BackendId::Replicate => match self.backends.replicate.as_mut() {
                Some(cfg) => cfg.api_token = secret,
                None => {
                    self.backends.replicate = Some(ReplicateConfig {
                        api_token: secret,
                        model: None,
                        base_url: None,
                    })
                }
            },
            BackendId::Anthropic => match self.backends.anthropic.as_mut() {
                Some(cfg) => cfg.api_key = secret,
                None => {
                    self.backends.anthropic = Some(AnthropicConfig {
                        api_key: secret,
                        model: None,
                        base_url: None,
                    })
                }
            },
            BackendId::Local => {}
        }
    }

    pub fn is_backend_configured(&self, id: BackendId) -> bool {
        match id {
            BackendId::Replicate => self.backends.replicate.is_some(),
            BackendId::Anthropic => self.backends.anthropic.is_some(),
            BackendId::Local => self
                .backends
                .local
                .as_ref()
                .is_some_and(|local| local.model_path.is_some() || local.args.is_some()),
        }
    }
}
