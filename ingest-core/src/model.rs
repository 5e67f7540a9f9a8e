use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    provider::ProviderId,
};

/// Readings outside this range are treated as provider garbage.
pub const TEMPERATURE_BOUNDS_C: (f64, f64) = (-90.0, 60.0);

/// How far past the fetch instant a provider timestamp may lie, in seconds.
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }
}

impl TryFrom<&str> for Units {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            _ => Err(Error::InvalidQuery(format!(
                "unknown unit system '{value}', expected metric or imperial"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    City(String),
    Coordinates { latitude: f64, longitude: f64 },
}

/// What to ask the provider for. Exactly one addressing mode is set.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationQuery {
    location: Location,
    units: Option<Units>,
    lang: Option<String>,
}

impl LocationQuery {
    /// Builds a query from optional parts, failing unless exactly one of
    /// `city` and `coordinates` is given.
    pub fn new(city: Option<String>, coordinates: Option<(f64, f64)>) -> Result<Self> {
        match (city, coordinates) {
            (Some(city), None) => Self::city(city),
            (None, Some((lat, lon))) => Self::coordinates(lat, lon),
            (Some(_), Some(_)) => Err(Error::InvalidQuery(
                "give either a city or coordinates, not both".into(),
            )),
            (None, None) => Err(Error::InvalidQuery(
                "no location given: need a city or coordinates".into(),
            )),
        }
    }

    pub fn city(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidQuery("city name is empty".into()));
        }

        Ok(Self::from_location(Location::City(trimmed.to_string())))
    }

    pub fn coordinates(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::InvalidQuery(format!("latitude {latitude} is outside [-90, 90]")));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidQuery(format!(
                "longitude {longitude} is outside [-180, 180]"
            )));
        }

        Ok(Self::from_location(Location::Coordinates { latitude, longitude }))
    }

    fn from_location(location: Location) -> Self {
        Self { location, units: None, lang: None }
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = Some(units);
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        let lang = lang.into();
        let lang = lang.trim();
        self.lang = (!lang.is_empty()).then(|| lang.to_string());
        self
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn units(&self) -> Option<Units> {
        self.units
    }

    pub fn lang(&self) -> Option<&str> {
        self.lang.as_deref()
    }
}

/// The unit a provider reports temperature in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn to_celsius(self, value: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => value,
            TemperatureUnit::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
        }
    }
}

/// The unit a wind speed was reported in. Values are stored as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindSpeedUnit {
    #[serde(rename = "m/s")]
    MetersPerSecond,
    #[serde(rename = "mph")]
    MilesPerHour,
    #[serde(rename = "km/h")]
    KilometersPerHour,
}

/// A normalized weather reading. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherObservation {
    provider: ProviderId,
    location_name: String,
    temperature_celsius: f64,
    description: String,
    wind_speed: f64,
    wind_speed_unit: WindSpeedUnit,
    observed_at: DateTime<Utc>,
    utc_offset_hours: f64,
}

/// Raw ingredients for a [`WeatherObservation`], filled in by a provider.
#[derive(Debug, Clone)]
pub struct ObservationParts {
    pub location_name: String,
    pub temperature_celsius: f64,
    pub description: String,
    pub wind_speed: f64,
    pub wind_speed_unit: WindSpeedUnit,
    pub observed_at: DateTime<Utc>,
    pub utc_offset_hours: f64,
}

impl WeatherObservation {
    /// Validates `parts` against the observation invariants.
    ///
    /// `fetched_at` is the instant the response arrived; the reading may not
    /// lie further in the future than [`CLOCK_SKEW_TOLERANCE_SECS`]. Violations are
    /// reported as provider errors with the given `status`.
    pub fn new(
        provider: ProviderId,
        status: u16,
        parts: ObservationParts,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self> {
        let reject = |message: String| Error::Provider { provider, status, message };

        let location_name = parts.location_name.trim().to_string();
        if location_name.is_empty() {
            return Err(reject("response has an empty location name".into()));
        }

        let (min, max) = TEMPERATURE_BOUNDS_C;
        let t = parts.temperature_celsius;
        if !t.is_finite() || t < min || t > max {
            return Err(reject(format!("implausible temperature {t:.2} °C")));
        }

        if !parts.wind_speed.is_finite() || parts.wind_speed < 0.0 {
            return Err(reject(format!("implausible wind speed {}", parts.wind_speed)));
        }

        if parts.observed_at > fetched_at + Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS) {
            return Err(reject(format!(
                "observation time {} is ahead of fetch time {}",
                parts.observed_at, fetched_at
            )));
        }

        if !parts.utc_offset_hours.is_finite() || parts.utc_offset_hours.abs() > 18.0 {
            return Err(reject(format!("implausible UTC offset {}h", parts.utc_offset_hours)));
        }

        Ok(Self {
            provider,
            location_name,
            temperature_celsius: t,
            description: parts.description,
            wind_speed: parts.wind_speed,
            wind_speed_unit: parts.wind_speed_unit,
            observed_at: parts.observed_at,
            utc_offset_hours: parts.utc_offset_hours,
        })
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn location_name(&self) -> &str {
        &self.location_name
    }

    pub fn temperature_celsius(&self) -> f64 {
        self.temperature_celsius
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn wind_speed(&self) -> f64 {
        self.wind_speed
    }

    pub fn wind_speed_unit(&self) -> WindSpeedUnit {
        self.wind_speed_unit
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn utc_offset_hours(&self) -> f64 {
        self.utc_offset_hours
    }
}

/// Column values for one insert into the observation table.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRow {
    pub city: String,
    pub temperature: f64,
    pub weather_description: String,
    pub wind_speed: String,
    pub time: DateTime<Utc>,
    pub utc_offset: String,
}

impl From<&WeatherObservation> for ObservationRow {
    fn from(obs: &WeatherObservation) -> Self {
        Self {
            city: obs.location_name.clone(),
            temperature: obs.temperature_celsius,
            weather_description: obs.description.clone(),
            wind_speed: decimal_text(obs.wind_speed),
            time: obs.observed_at,
            utc_offset: decimal_text(obs.utc_offset_hours),
        }
    }
}

impl ObservationRow {
    pub fn persisted(self, id: i32, time_inserted: DateTime<Utc>) -> PersistedRow {
        PersistedRow {
            id,
            city: self.city,
            temperature: self.temperature,
            weather_description: self.weather_description,
            wind_speed: self.wind_speed,
            time: self.time,
            time_inserted,
            utc_offset: self.utc_offset,
        }
    }
}

/// A row as it exists in the store after a committed insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRow {
    pub id: i32,
    pub city: String,
    pub temperature: f64,
    pub weather_description: String,
    pub wind_speed: String,
    pub time: DateTime<Utc>,
    pub time_inserted: DateTime<Utc>,
    pub utc_offset: String,
}

// Text columns always keep a decimal point: 2 -> "2.0", 3.1 -> "3.1".
fn decimal_text(value: f64) -> String {
    format!("{value:?}")
}
