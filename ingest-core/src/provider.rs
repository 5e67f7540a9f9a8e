use crate::{
    Config, LocationQuery, WeatherObservation,
    error::{Error, Result},
    provider::{openweather13::OpenWeather13Provider, weatherstack::WeatherstackProvider},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt::Debug, time::Duration};
use tracing::debug;

pub mod openweather13;
pub mod weatherstack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenWeather13,
    Weatherstack,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather13 => "openweather13",
            ProviderId::Weatherstack => "weatherstack",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather13, ProviderId::Weatherstack]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather13" => Ok(ProviderId::OpenWeather13),
            "weatherstack" => Ok(ProviderId::Weatherstack),
            _ => Err(Error::config(format!(
                "Unknown provider '{value}'. Supported providers: openweather13, weatherstack."
            ))),
        }
    }
}

/// Fetches the current weather for a location and normalizes it.
///
/// One call issues exactly one request. Implementations never retry.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    async fn fetch(&self, query: &LocationQuery) -> Result<WeatherObservation>;
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(id: ProviderId, config: &Config) -> Result<Box<dyn WeatherProvider>> {
    let provider_config = config
        .provider_config(id)
        .filter(|cfg| !cfg.api_key.trim().is_empty())
        .ok_or_else(|| {
            Error::config(format!(
                "No API key configured for provider '{id}'.\n\
                 Hint: run `weather-ingest configure {id}` or set {} in the environment.",
                crate::config::api_key_env_var(id)
            ))
        })?;

    let http = http_client(config.request_timeout())?;
    let api_key = provider_config.api_key.clone();
    let base_url = provider_config.base_url.clone();

    let boxed: Box<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather13 => Box::new(OpenWeather13Provider::new(api_key, base_url, http)),
        ProviderId::Weatherstack => Box::new(WeatherstackProvider::new(api_key, base_url, http)),
    };

    Ok(boxed)
}

/// Construct the default provider from config, using `default_provider` field.
pub fn default_provider_from_config(config: &Config) -> Result<Box<dyn WeatherProvider>> {
    let id = config.default_provider_id()?;
    provider_from_config(id, config)
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))
}

/// A response that made it back with a success status and a non-empty body.
#[derive(Debug)]
pub(crate) struct ProviderReply {
    pub status: u16,
    pub body: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// Sends one request and sorts the outcome into transport failure, provider
/// failure, or a parsed JSON body ready for normalization.
pub(crate) async fn send(provider: ProviderId, request: RequestBuilder) -> Result<ProviderReply> {
    let res = request.send().await.map_err(|e| transport(provider, None, &e))?;

    let status = res.status();
    let body = res.text().await.map_err(|e| transport(provider, Some(status.as_u16()), &e))?;
    let received_at = Utc::now();

    debug!(%provider, status = status.as_u16(), bytes = body.len(), "provider responded");

    classify(provider, status.as_u16(), &body).map(|body| ProviderReply {
        status: status.as_u16(),
        body,
        received_at,
    })
}

/// Non-success status is a transport failure; an empty or non-JSON body
/// behind a success status is a provider failure.
pub(crate) fn classify(provider: ProviderId, status: u16, body: &str) -> Result<serde_json::Value> {
    if !(200..300).contains(&status) {
        return Err(Error::Transport {
            provider,
            status: Some(status),
            message: format!("request failed: {}", truncate_body(body)),
        });
    }

    if body.trim().is_empty() {
        return Err(Error::Provider { provider, status, message: "empty response body".into() });
    }

    serde_json::from_str(body).map_err(|e| Error::Provider {
        provider,
        status,
        message: format!("unparseable response body ({e}): {}", truncate_body(body)),
    })
}

/// Deserializes the typed payload out of an already classified reply.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    provider: ProviderId,
    reply: &ProviderReply,
) -> Result<T> {
    T::deserialize(&reply.body).map_err(|e| Error::Provider {
        provider,
        status: reply.status,
        message: format!("response is missing required fields: {e}"),
    })
}

pub(crate) fn unix_to_utc(provider: ProviderId, status: u16, ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).ok_or_else(|| Error::Provider {
        provider,
        status,
        message: format!("timestamp {ts} is out of range"),
    })
}

fn transport(provider: ProviderId, status: Option<u16>, err: &reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };

    Error::Transport { provider, status, message: format!("{kind}: {err}") }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed = ProviderId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn unknown_provider_error() {
        let err = ProviderId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(ProviderId::OpenWeather13, &cfg).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("No API key configured for provider"));
        assert!(err.to_string().contains("RAPIDAPI_KEY"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::Weatherstack, "  ".into());

        let err = provider_from_config(ProviderId::Weatherstack, &cfg).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn default_provider_from_config_errors_when_not_set() {
        let cfg = Config::default();
        let err = default_provider_from_config(&cfg).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("No default provider configured"));
        assert!(msg.contains("Hint: run `weather-ingest configure"));
    }

    #[test]
    fn default_provider_from_config_works_when_set_and_configured() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::OpenWeather13, "KEY".to_string());

        let provider = default_provider_from_config(&cfg).expect("provider");
        assert_eq!(provider.id(), ProviderId::OpenWeather13);
    }

    #[test]
    fn classify_sorts_status_and_body() {
        let err = classify(ProviderId::OpenWeather13, 503, "upstream down").unwrap_err();
        assert!(matches!(err, Error::Transport { status: Some(503), .. }));

        let err = classify(ProviderId::OpenWeather13, 200, "").unwrap_err();
        assert!(matches!(err, Error::Provider { status: 200, .. }));
        assert!(err.to_string().contains("empty response body"));

        let err = classify(ProviderId::OpenWeather13, 200, "<html>oops</html>").unwrap_err();
        assert!(err.to_string().contains("unparseable response body"));

        let ok = classify(ProviderId::OpenWeather13, 200, r#"{"name":"Oslo"}"#).unwrap();
        assert_eq!(ok["name"], "Oslo");
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let long = "é".repeat(150);
        let cut = truncate_body(&long);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 203);

        assert_eq!(truncate_body("short"), "short");
    }
}
