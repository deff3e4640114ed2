use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode};
use tracing::info;
use weather_core::{Config, ProviderId, WeatherLookup, WeatherPayload, model::resolve_location};

use crate::server;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather lookup service with cache and provider failover")]
pub struct Cli {
    /// Path to the config file; defaults to the platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve `GET /v1/weather?city=<name>` over HTTP.
    Serve {
        /// Listen address; overrides the config file and PORT.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Look up the weather once and print the JSON payload.
    Show {
        /// Location name; defaults to Melbourne.
        city: Option<String>,
    },

    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "weatherstack" or "openweather".
        provider: String,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let path = match self.config {
            Some(path) => path,
            None => Config::config_file_path()?,
        };

        match self.command {
            Command::Serve { bind } => {
                let config = Config::load_from(&path)?;
                let bind = bind.unwrap_or_else(|| config.server.bind.clone());
                let lookup = Arc::new(WeatherLookup::from_config(&config)?);

                server::serve(&bind, lookup).await?;
            }
            Command::Show { city } => {
                let config = Config::load_from(&path)?;
                let lookup = WeatherLookup::from_config(&config)?;
                let location = resolve_location(city.as_deref());

                let payload = WeatherPayload::from(lookup.lookup(&location).await);
                println!("{}", serde_json::to_string_pretty(&payload)?);
            }
            Command::Configure { provider } => {
                let id = ProviderId::try_from(provider.as_str())?;
                let mut config = Config::read_file(&path)?;

                let api_key = Password::new(&format!("API key for {id}:"))
                    .with_display_mode(PasswordDisplayMode::Masked)
                    .without_confirmation()
                    .prompt()
                    .context("Failed to read API key")?;

                config.upsert_provider_api_key(id, api_key.trim().to_string());
                config.save(&path)?;

                info!(provider = %id, path = %path.display(), "saved provider credentials");
                println!("Saved API key for {id} to {}", path.display());
            }
        }

        Ok(())
    }
}
