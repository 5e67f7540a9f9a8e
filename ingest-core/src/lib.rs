//! Core library for the `weather-ingest` pipeline.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Weather providers that fetch and normalize one observation
//! - The Postgres writer that appends observations to a table
//! - The one-shot fetch → ensure schema → write pipeline
//!
//! It is used by the `weather-ingest` binary, but any caller that owns its own
//! connection lifecycle can drive the pieces directly.

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod store;

pub use config::{Config, DatabaseConfig, ProviderConfig};
pub use error::{Error, ErrorKind, Result};
pub use model::{LocationQuery, PersistedRow, Units, WeatherObservation};
pub use pipeline::{Ingestion, Stage};
pub use provider::{ProviderId, WeatherProvider};
pub use store::{ObservationStore, PgObservationWriter};
