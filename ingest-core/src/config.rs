use anyhow::{Context, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::{collections::HashMap, fs, path::Path, path::PathBuf, time::Duration};

use crate::{
    error::{Error, Result},
    provider::ProviderId,
};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub api_key: String,

    /// Overrides the provider's public endpoint, e.g. for a local stub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Where observations are written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub dbname: Option<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "dev".into()
}

fn default_table() -> String {
    "raw_weather_data".into()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            user: None,
            password: None,
            dbname: None,
            schema: default_schema(),
            table: default_table(),
        }
    }
}

impl DatabaseConfig {
    /// Connection options for the configured store.
    ///
    /// Host, user and database name are required; the password may be left
    /// out for trust or peer authentication.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let host = required(&self.host, "database.host", "DB_HOST")?;
        let user = required(&self.user, "database.user", "DB_USER")?;
        let dbname = required(&self.dbname, "database.dbname", "DB_NAME")?;

        let mut options =
            PgConnectOptions::new().host(host).port(self.port).username(user).database(dbname);
        if let Some(password) = self.password.as_deref() {
            options = options.password(password);
        }

        Ok(options)
    }

    /// `schema.table`, after checking both are plain identifiers.
    pub fn qualified_table(&self) -> Result<String> {
        validate_identifier(&self.schema, "database.schema")?;
        validate_identifier(&self.table, "database.table")?;
        Ok(format!("{}.{}", self.schema, self.table))
    }
}

fn required<'a>(value: &'a Option<String>, key: &str, env: &str) -> Result<&'a str> {
    value.as_deref().filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        Error::config(format!("Missing `{key}` (set it in the config file or via {env})"))
    })
}

/// Schema and table names end up in SQL text, so only `[A-Za-z_][A-Za-z0-9_]*`
/// is accepted.
fn validate_identifier(name: &str, key: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63;

    if valid {
        Ok(())
    } else {
        Err(Error::config(format!("`{key}` = '{name}' is not a valid SQL identifier")))
    }
}

/// Top-level configuration, stored on disk and overlaid with environment
/// variables once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Optional default provider id, e.g. "openweather13" or "weatherstack".
    pub default_provider: Option<String>,

    /// City used when a run is given no location.
    #[serde(default)]
    pub default_location: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Example TOML:
    /// [providers.openweather13]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_provider: None,
            default_location: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            providers: HashMap::new(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Environment variable carrying the API key for `id`.
pub fn api_key_env_var(id: ProviderId) -> &'static str {
    match id {
        ProviderId::OpenWeather13 => "RAPIDAPI_KEY",
        ProviderId::Weatherstack => "WEATHERSTACK_ACCESS_KEY",
    }
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        let s = self.default_provider.as_ref().ok_or_else(|| {
            Error::config(
                "No default provider configured.\n\
                 Hint: run `weather-ingest configure <provider>` (e.g. `weather-ingest configure openweather13`) first.",
            )
        })?;

        ProviderId::try_from(s.as_str())
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Load config from the platform config dir, or return an empty default
    /// if it doesn't exist yet.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Load config from `path`, or return an empty default if it doesn't exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
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

    /// Save config to the platform config dir.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Save config to `path`, creating parent directories as needed.
    ///
    /// The database password is never written back.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
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

    /// Path to the config file.
    pub fn config_file_path() -> anyhow::Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-ingest", "weather-ingest")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .and_modify(|cfg| cfg.api_key = api_key.clone())
            .or_insert_with(|| ProviderConfig { api_key, base_url: None });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers.get(provider_id.as_str()).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }

    /// Overlay settings from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay settings from `lookup`. Unset and empty variables are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        for id in ProviderId::all() {
            if let Some(key) = get(api_key_env_var(*id)) {
                self.upsert_provider_api_key(*id, key);
            }
        }
        if let Some(provider) = get("WEATHER_PROVIDER") {
            let id = ProviderId::try_from(provider.as_str())?;
            self.set_default_provider(id);
        }
        if let Some(city) = get("WEATHER_DEFAULT_CITY") {
            self.default_location = Some(city);
        }

        let db = &mut self.database;
        if let Some(host) = get("DB_HOST") {
            db.host = Some(host);
        }
        if let Some(port) = get("DB_PORT").or_else(|| get("PORT")) {
            db.port = port
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("DB_PORT '{port}' is not a valid port")))?;
        }
        if let Some(user) = get("DB_USER") {
            db.user = Some(user);
        }
        if let Some(password) = get("DB_PASSWORD") {
            db.password = Some(password);
        }
        if let Some(name) = get("DB_NAME") {
            db.dbname = Some(name);
        }
        if let Some(schema) = get("DB_SCHEMA") {
            db.schema = schema;
        }

        Ok(())
    }
}
