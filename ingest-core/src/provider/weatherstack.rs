use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{Error, Result},
    model::{
        Location, LocationQuery, ObservationParts, TemperatureUnit, WeatherObservation,
        WindSpeedUnit,
    },
};

use super::{ProviderId, ProviderReply, WeatherProvider, decode, send, unix_to_utc};

pub const DEFAULT_BASE_URL: &str = "http://api.weatherstack.com";

/// Requests always pin `units=m`, which makes weatherstack answer in Celsius
/// and km/h.
pub const TEMPERATURE_UNIT: TemperatureUnit = TemperatureUnit::Celsius;
const PINNED_UNITS: &str = "m";

#[derive(Debug, Clone)]
pub struct WeatherstackProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherstackProvider {
    pub fn new(api_key: String, base_url: Option<String>, http: Client) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Self { api_key, base_url, http }
    }
}

#[derive(Debug, Deserialize)]
struct WsLocation {
    name: String,
    localtime_epoch: i64,
    utc_offset: String,
}

#[derive(Debug, Deserialize)]
struct WsCurrent {
    /// UTC time of day of the reading, e.g. "12:14 PM".
    observation_time: Option<String>,
    temperature: f64,
    weather_descriptions: Vec<String>,
    wind_speed: f64,
}

#[derive(Debug, Deserialize)]
struct WsResponse {
    location: WsLocation,
    current: WsCurrent,
}

#[derive(Debug, Deserialize)]
struct WsError {
    code: Option<i64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsErrorResponse {
    success: bool,
    error: Option<WsError>,
}

#[async_trait]
impl WeatherProvider for WeatherstackProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Weatherstack
    }

    async fn fetch(&self, query: &LocationQuery) -> Result<WeatherObservation> {
        let location = match query.location() {
            Location::City(city) => city.clone(),
            Location::Coordinates { latitude, longitude } => format!("{latitude},{longitude}"),
        };
        debug!(provider = "weatherstack", %location, "requesting current weather");

        let mut params = vec![
            ("access_key", self.api_key.as_str()),
            ("query", location.as_str()),
            ("units", PINNED_UNITS),
        ];
        if let Some(lang) = query.lang() {
            params.push(("language", lang));
        }

        let request = self.http.get(format!("{}/current", self.base_url)).query(&params);

        let reply = send(ProviderId::Weatherstack, request).await?;
        normalize(&reply)
    }
}

fn normalize(reply: &ProviderReply) -> Result<WeatherObservation> {
    let provider = ProviderId::Weatherstack;
    reject_application_error(reply)?;

    let parsed: WsResponse = decode(provider, reply)?;
    let reject = |message: String| Error::Provider { provider, status: reply.status, message };

    let description = parsed
        .current
        .weather_descriptions
        .into_iter()
        .next()
        .ok_or_else(|| reject("response has no weather descriptions".into()))?;

    let utc_offset_hours = parsed
        .location
        .utc_offset
        .trim()
        .parse::<f64>()
        .map_err(|e| reject(format!("bad utc_offset '{}': {e}", parsed.location.utc_offset)))?;

    let parts = ObservationParts {
        location_name: parsed.location.name,
        temperature_celsius: TEMPERATURE_UNIT.to_celsius(parsed.current.temperature),
        description,
        wind_speed: parsed.current.wind_speed,
        wind_speed_unit: WindSpeedUnit::KilometersPerHour,
        observed_at: observed_at(
            reply,
            parsed.location.localtime_epoch,
            utc_offset_hours,
            parsed.current.observation_time.as_deref(),
        )?,
        utc_offset_hours,
    };

    WeatherObservation::new(provider, reply.status, parts, reply.received_at)
}

/// Recovers the UTC instant of the reading.
///
/// `localtime_epoch` is the location's wall clock at request time written as if
/// it were UTC, so the offset has to come off first. `observation_time` carries
/// the UTC time of day of the reading and is placed on that corrected date,
/// stepping back a day when the reading precedes a UTC midnight the request
/// followed. Without it the corrected request instant is used.
fn observed_at(
    reply: &ProviderReply,
    localtime_epoch: i64,
    utc_offset_hours: f64,
    observation_time: Option<&str>,
) -> Result<DateTime<Utc>> {
    let provider = ProviderId::Weatherstack;
    let reject = |message: String| Error::Provider { provider, status: reply.status, message };

    let offset_secs = (utc_offset_hours * 3600.0).round() as i64;
    let epoch = localtime_epoch
        .checked_sub(offset_secs)
        .ok_or_else(|| reject(format!("localtime_epoch {localtime_epoch} is out of range")))?;
    let requested_at = unix_to_utc(provider, reply.status, epoch)?;

    let Some(text) = observation_time else {
        return Ok(requested_at);
    };
    let time = NaiveTime::parse_from_str(text.trim(), "%I:%M %p")
        .map_err(|e| reject(format!("bad observation_time '{text}': {e}")))?;

    let same_day = requested_at.date_naive().and_time(time).and_utc();
    if same_day > requested_at + Duration::hours(12) {
        Ok(same_day - Duration::days(1))
    } else {
        Ok(same_day)
    }
}

/// Weatherstack answers HTTP 200 with `"success": false` on failure.
fn reject_application_error(reply: &ProviderReply) -> Result<()> {
    let Ok(envelope) = WsErrorResponse::deserialize(&reply.body) else {
        return Ok(());
    };
    if envelope.success {
        return Ok(());
    }

    let message = match envelope.error {
        Some(WsError { code, kind, info }) => format!(
            "{} ({}): {}",
            kind.as_deref().unwrap_or("error"),
            code.map(|c| c.to_string()).unwrap_or_else(|| "?".into()),
            info.as_deref().unwrap_or("no details"),
        ),
        None => "request was not successful".into(),
    };

    Err(Error::Provider { provider: ProviderId::Weatherstack, status: reply.status, message })
}
