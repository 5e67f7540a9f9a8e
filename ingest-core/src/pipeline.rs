use tracing::{info, warn};

use crate::{
    error::Result,
    model::{LocationQuery, PersistedRow},
    provider::WeatherProvider,
    store::ObservationStore,
};

/// Where a single ingestion stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    SchemaEnsured,
    Written,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Written | Stage::Failed)
    }
}

/// One fetch followed by one write.
///
/// Either every step succeeds and the persisted row comes back, or the first
/// error is returned and the ingestion ends in [`Stage::Failed`]. Nothing is
/// retried.
#[derive(Debug)]
pub struct Ingestion {
    stage: Stage,
}

impl Default for Ingestion {
    fn default() -> Self {
        Self::new()
    }
}

impl Ingestion {
    pub fn new() -> Self {
        Self { stage: Stage::Idle }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub async fn run<S>(
        &mut self,
        provider: &dyn WeatherProvider,
        store: &mut S,
        query: &LocationQuery,
    ) -> Result<PersistedRow>
    where
        S: ObservationStore + ?Sized,
    {
        self.stage = Stage::Idle;

        let outcome = self.advance(provider, store, query).await;
        if let Err(err) = &outcome {
            warn!(provider = %provider.id(), error = %err, from = ?self.stage, "ingestion failed");
            self.stage = Stage::Failed;
        }

        outcome
    }

    async fn advance<S>(
        &mut self,
        provider: &dyn WeatherProvider,
        store: &mut S,
        query: &LocationQuery,
    ) -> Result<PersistedRow>
    where
        S: ObservationStore + ?Sized,
    {
        let observation = provider.fetch(query).await?;
        info!(
            provider = %provider.id(),
            city = observation.location_name(),
            temperature_c = observation.temperature_celsius(),
            observed_at = %observation.observed_at(),
            "observation fetched"
        );

        store.ensure_schema().await?;
        self.stage = Stage::SchemaEnsured;

        let row = store.write(&observation).await?;
        self.stage = Stage::Written;

        Ok(row)
    }
}
