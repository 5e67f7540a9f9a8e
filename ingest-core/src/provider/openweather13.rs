//! OpenWeather data served through the `open-weather13` RapidAPI gateway.
//!
//! The gateway reports `main.temp` in Fahrenheit whatever `units` is sent, so
//! temperatures are always converted. Wind speed follows the requested units.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    error::{Error, Result},
    model::{
        Location, LocationQuery, ObservationParts, TemperatureUnit, Units, WeatherObservation,
        WindSpeedUnit,
    },
};

use super::{ProviderId, ProviderReply, WeatherProvider, decode, send, unix_to_utc};

pub const DEFAULT_BASE_URL: &str = "https://open-weather13.p.rapidapi.com";
const RAPIDAPI_HOST: &str = "open-weather13.p.rapidapi.com";

pub const TEMPERATURE_UNIT: TemperatureUnit = TemperatureUnit::Fahrenheit;
const DEFAULT_UNITS: Units = Units::Metric;
const DEFAULT_LANG: &str = "EN";

#[derive(Debug, Clone)]
pub struct OpenWeather13Provider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeather13Provider {
    pub fn new(api_key: String, base_url: Option<String>, http: Client) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Self { api_key, base_url, http }
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    dt: i64,
    timezone: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
}

#[async_trait]
impl WeatherProvider for OpenWeather13Provider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather13
    }

    async fn fetch(&self, query: &LocationQuery) -> Result<WeatherObservation> {
        let units = query.units().unwrap_or(DEFAULT_UNITS);
        let lang = query.lang().unwrap_or(DEFAULT_LANG);

        let request = match query.location() {
            Location::City(city) => {
                debug!(provider = "openweather13", %city, "requesting current weather");
                self.http
                    .get(format!("{}/city", self.base_url))
                    .query(&[("city", city.as_str()), ("lang", lang), ("units", units.as_str())])
            }
            Location::Coordinates { latitude, longitude } => {
                debug!(provider = "openweather13", latitude, longitude, "requesting current weather");
                self.http.get(format!("{}/latlon", self.base_url)).query(&[
                    ("latitude", latitude.to_string().as_str()),
                    ("longitude", longitude.to_string().as_str()),
                    ("lang", lang),
                    ("units", units.as_str()),
                ])
            }
        }
        .header("x-rapidapi-key", self.api_key.as_str())
        .header("x-rapidapi-host", RAPIDAPI_HOST);

        let reply = send(ProviderId::OpenWeather13, request).await?;
        normalize(&reply, units)
    }
}

/// Turns a classified reply into an observation.
fn normalize(reply: &ProviderReply, units: Units) -> Result<WeatherObservation> {
    let provider = ProviderId::OpenWeather13;
    reject_application_error(reply)?;

    let parsed: OwCurrentResponse = decode(provider, reply)?;

    let description = parsed
        .weather
        .into_iter()
        .next()
        .map(|w| w.description)
        .ok_or_else(|| Error::Provider {
            provider,
            status: reply.status,
            message: "response has no weather conditions".into(),
        })?;

    let wind_speed_unit = match units {
        Units::Metric => WindSpeedUnit::MetersPerSecond,
        Units::Imperial => WindSpeedUnit::MilesPerHour,
    };

    let parts = ObservationParts {
        location_name: parsed.name,
        temperature_celsius: TEMPERATURE_UNIT.to_celsius(parsed.main.temp),
        description,
        wind_speed: parsed.wind.speed,
        wind_speed_unit,
        observed_at: unix_to_utc(provider, reply.status, parsed.dt)?,
        utc_offset_hours: parsed.timezone as f64 / 3600.0,
    };

    WeatherObservation::new(provider, reply.status, parts, reply.received_at)
}

/// OpenWeather signals failures in-band with a non-200 `cod`, sent either as
/// a number or as a string.
fn reject_application_error(reply: &ProviderReply) -> Result<()> {
    let code = match reply.body.get("cod") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => return Ok(()),
    };

    if code == Some(200) {
        return Ok(());
    }

    let message = reply
        .body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    Err(Error::Provider {
        provider: ProviderId::OpenWeather13,
        status: reply.status,
        message: format!("cod {}: {message}", reply.body["cod"]),
    })
}
