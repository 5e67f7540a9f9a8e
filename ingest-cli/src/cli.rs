use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use inquire::{Confirm, Password, PasswordDisplayMode};
use tracing::{info, warn};
use weather_ingest_core::{
    Config, Ingestion, LocationQuery, ObservationStore, PgObservationWriter, ProviderId, Units,
    WeatherProvider,
    provider::{default_provider_from_config, provider_from_config},
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-ingest", version, about = "Fetch a weather observation and store it")]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Provider to use instead of the configured default.
    #[arg(long, global = true)]
    pub provider: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather13" or "weatherstack".
        provider: String,
    },

    /// Fetch one observation and print it as JSON without storing it.
    Fetch(LocationArgs),

    /// Create the target schema and table if they are missing.
    InitDb,

    /// Fetch one observation and append it to the observation table.
    Run(LocationArgs),
}

/// Where to fetch weather for. Without a city or coordinates the configured
/// default location is used.
#[derive(Debug, Args)]
pub struct LocationArgs {
    /// City name.
    #[arg(long)]
    pub city: Option<String>,

    /// Latitude in degrees; requires --lon.
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude in degrees; requires --lat.
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Unit system: metric or imperial.
    #[arg(long)]
    pub units: Option<String>,

    /// Language code passed to the provider.
    #[arg(long)]
    pub lang: Option<String>,
}

impl LocationArgs {
    fn to_query(&self, config: &Config) -> anyhow::Result<LocationQuery> {
        let coordinates = self.lat.zip(self.lon);
        let city = match (&self.city, coordinates) {
            (None, None) => config.default_location.clone(),
            (city, _) => city.clone(),
        };

        let mut query = LocationQuery::new(city, coordinates)?;
        if let Some(units) = &self.units {
            query = query.with_units(Units::try_from(units.as_str())?);
        }
        if let Some(lang) = &self.lang {
            query = query.with_lang(lang.as_str());
        }

        Ok(query)
    }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match &self.command {
            Command::Configure { provider } => self.configure(provider),
            Command::Fetch(location) => {
                let config = self.load_config()?;
                let query = location.to_query(&config)?;
                let provider = self.provider(&config)?;

                let observation = provider.fetch(&query).await?;
                println!("{}", serde_json::to_string_pretty(&observation)?);
                Ok(())
            }
            Command::InitDb => {
                let config = self.load_config()?;
                let mut writer = PgObservationWriter::connect(&config.database).await?;

                let outcome = writer.ensure_schema().await;
                close(writer).await;
                outcome?;

                info!(table = %config.database.qualified_table()?, "table is ready");
                Ok(())
            }
            Command::Run(location) => {
                let config = self.load_config()?;
                let query = location.to_query(&config)?;
                let provider = self.provider(&config)?;
                let mut writer = PgObservationWriter::connect(&config.database).await?;

                let mut ingestion = Ingestion::new();
                let outcome = ingestion.run(provider.as_ref(), &mut writer, &query).await;
                close(writer).await;

                let row = outcome.with_context(|| {
                    format!("ingestion via {} stopped at {:?}", provider.id(), ingestion.stage())
                })?;
                info!(id = row.id, city = %row.city, temperature = row.temperature, "ingestion complete");
                Ok(())
            }
        }
    }

    /// File config (explicit path or platform default) overlaid with the
    /// environment.
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        config.apply_env()?;
        Ok(config)
    }

    fn provider(&self, config: &Config) -> anyhow::Result<Box<dyn WeatherProvider>> {
        let provider = match &self.provider {
            Some(id) => provider_from_config(ProviderId::try_from(id.as_str())?, config)?,
            None => default_provider_from_config(config)?,
        };
        Ok(provider)
    }

    /// Prompts for an API key and saves it. Only the file config is touched,
    /// so keys taken from the environment are never written to disk.
    fn configure(&self, provider: &str) -> anyhow::Result<()> {
        let id = ProviderId::try_from(provider)?;
        let path = match &self.config {
            Some(path) => path.clone(),
            None => Config::config_file_path()?,
        };
        let mut config = Config::load_from(&path)?;

        let api_key = Password::new(&format!("API key for {id}:"))
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()
            .context("Failed to read API key")?;
        if api_key.trim().is_empty() {
            bail!("API key must not be empty");
        }
        config.upsert_provider_api_key(id, api_key.trim().to_string());

        let is_default = config.default_provider.as_deref() == Some(id.as_str());
        if !is_default
            && Confirm::new(&format!("Make {id} the default provider?"))
                .with_default(true)
                .prompt()
                .context("Failed to read answer")?
        {
            config.set_default_provider(id);
        }

        config.save_to(&path)?;
        info!(provider = %id, path = %path.display(), "configuration saved");
        Ok(())
    }
}

async fn close(writer: PgObservationWriter) {
    if let Err(e) = writer.close().await {
        warn!(error = %e, "failed to close the store connection cleanly");
    }
}
