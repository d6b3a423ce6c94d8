use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use inquire::{Confirm, Password, Text};
use skycast_core::{
    BackendId, Config, Horizon, Location, Pipeline, RecommendOptions, RecommendationMode,
    generation::local,
};

use crate::render;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "skycast",
    version,
    about = "Weather forecast with AI recommendations"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure the weather provider or a recommendation backend.
    Configure {
        /// "weather", or a backend: "replicate", "local", "anthropic".
        target: String,
    },

    /// Show the forecast (and recommendations) for a location.
    Show {
        /// Place name ("London", "Paris,FR") or coordinates ("51.5,-0.12").
        #[arg(allow_hyphen_values = true)]
        location: String,

        /// How far ahead to look, e.g. "5d" or "36h".
        #[arg(long)]
        horizon: Option<String>,

        /// Only show the forecast.
        #[arg(long)]
        no_recommend: bool,

        /// Recommendation backend to use instead of the configured default.
        #[arg(long)]
        backend: Option<String>,

        /// "whole-window" or "per-day".
        #[arg(long)]
        mode: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Print where the configuration file lives.
    ConfigPath,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { target } => configure(&target),
            Command::Show {
                location,
                horizon,
                no_recommend,
                backend,
                mode,
                output,
            } => {
                show(ShowArgs {
                    location,
                    horizon,
                    no_recommend,
                    backend,
                    mode,
                    output,
                })
                .await
            }
            Command::ConfigPath => {
                println!("{}", Config::config_file_path()?.display());
                Ok(())
            }
        }
    }
}

struct ShowArgs {
    location: String,
    horizon: Option<String>,
    no_recommend: bool,
    backend: Option<String>,
    mode: Option<String>,
    output: OutputFormat,
}

async fn show(args: ShowArgs) -> anyhow::Result<()> {
    let cfg = Config::load_with_env()?;

    let location: Location = args.location.parse()?;
    let horizon: Horizon = match args.horizon.as_deref() {
        Some(h) => h.parse()?,
        None => cfg.default_horizon()?,
    };

    let recommend = recommend_options(&cfg, &args)?;
    let pipeline = Pipeline::from_config(&cfg, recommend)?;

    let report = pipeline.run(&location, horizon, Utc::now()).await?;

    render::print_report(&report, args.output)
}

fn recommend_options(cfg: &Config, args: &ShowArgs) -> anyhow::Result<Option<RecommendOptions>> {
    if args.no_recommend {
        return Ok(None);
    }

    let backend = args
        .backend
        .as_deref()
        .map(BackendId::try_from)
        .transpose()?;
    let mode = args
        .mode
        .as_deref()
        .map(str::parse::<RecommendationMode>)
        .transpose()?;

    if backend.is_none() && cfg.recommendation.backend.is_none() {
        eprintln!(
            "No recommendation backend configured; showing the forecast only.\n\
             Hint: run `skycast configure replicate` (or `local`, `anthropic`)."
        );
        return Ok(None);
    }

    Ok(Some(RecommendOptions { backend, mode }))
}

fn configure(target: &str) -> anyhow::Result<()> {
    let mut cfg = Config::load()?;

    if target.eq_ignore_ascii_case("weather") {
        let key = Password::new("OpenWeather API key:")
            .without_confirmation()
            .prompt()
            .context("Failed to read API key")?;
        cfg.set_weather_api_key(key.trim().to_string());
    } else {
        let id = BackendId::try_from(target)?;
        match id {
            BackendId::Local => {
                let model_path = Text::new("Path to the model file:")
                    .prompt()
                    .context("Failed to read model path")?;
                let program = Text::new("Model runner executable:")
                    .with_default(local::DEFAULT_PROGRAM)
                    .prompt()
                    .context("Failed to read program name")?;
                cfg.upsert_local_backend(Some(program), PathBuf::from(model_path.trim()));
            }
            BackendId::Replicate | BackendId::Anthropic => {
                let secret = Password::new(&format!("{id} API key:"))
                    .without_confirmation()
                    .prompt()
                    .context("Failed to read API key")?;
                cfg.upsert_backend_credential(id, secret.trim().to_string())?;
            }
        }

        if cfg.default_backend_id().ok() != Some(id) {
            let make_default = Confirm::new(&format!("Use {id} as the default backend?"))
                .with_default(true)
                .prompt()
                .context("Failed to read answer")?;
            if make_default {
                cfg.set_default_backend(id);
            }
        }
    }

    cfg.save()?;
    println!(
        "Saved configuration to {}",
        Config::config_file_path()?.display()
    );
    Ok(())
}
