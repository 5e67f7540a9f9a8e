//! The observation writer: an append-only table in Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection, Row, postgres::PgDatabaseError};
use tracing::{debug, info};

use crate::{
    config::DatabaseConfig,
    error::{Error, Result},
    model::{ObservationRow, PersistedRow, WeatherObservation},
};

/// Durable sink for observations.
///
/// `ensure_schema` is idempotent and never alters existing structure. It is
/// safe to call from overlapping runs against the same store.
/// `write` appends exactly one row per call; it does not deduplicate.
#[async_trait]
pub trait ObservationStore: Send {
    async fn ensure_schema(&mut self) -> Result<()>;

    async fn write(&mut self, observation: &WeatherObservation) -> Result<PersistedRow>;
}

/// Writes to `<schema>.<table>` over one exclusively owned connection.
///
/// The connection is released by [`PgObservationWriter::close`], or when the
/// writer is dropped on an error path.
#[derive(Debug)]
pub struct PgObservationWriter {
    conn: PgConnection,
    schema: String,
    table: String,
}

impl PgObservationWriter {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let table = config.qualified_table()?;
        let options = config.connect_options()?;

        let conn = PgConnection::connect_with(&options).await.map_err(connect_error)?;
        debug!(host = ?config.host, port = config.port, %table, "connected to observation store");

        Ok(Self { conn, schema: config.schema.clone(), table })
    }

    /// Fully qualified table name, `schema.table`.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn count_rows(&mut self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let row = sqlx::query(&sql).fetch_one(&mut self.conn).await.map_err(statement_error)?;
        row.try_get::<i64, _>(0).map_err(statement_error)
    }

    /// Closes the connection, telling the server goodbye.
    pub async fn close(self) -> Result<()> {
        self.conn.close().await.map_err(Error::Connection)
    }

    async fn create_objects(&mut self) -> sqlx::Result<()> {
        let mut tx = self.conn.begin().await?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&mut *tx)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id SERIAL PRIMARY KEY,
                city TEXT,
                temperature DOUBLE PRECISION,
                weather_description TEXT,
                wind_speed TEXT,
                time TIMESTAMPTZ,
                time_inserted TIMESTAMPTZ DEFAULT NOW(),
                utc_offset TEXT
            )
            "#,
            self.table
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }
}

#[async_trait]
impl ObservationStore for PgObservationWriter {
    async fn ensure_schema(&mut self) -> Result<()> {
        // Two first runs can both pass the IF NOT EXISTS check; the loser gets a
        // unique violation on the catalog and finds the objects on its retry.
        match self.create_objects().await {
            Err(sqlx::Error::Database(db)) if is_creation_race(db.code().as_deref()) => {
                debug!(table = %self.table, "schema created concurrently, retrying");
                self.create_objects().await.map_err(statement_error)?;
            }
            outcome => outcome.map_err(statement_error)?,
        }

        info!(table = %self.table, "schema ensured");
        Ok(())
    }

    async fn write(&mut self, observation: &WeatherObservation) -> Result<PersistedRow> {
        let row = ObservationRow::from(observation);
        let sql = format!(
            "INSERT INTO {} (city, temperature, weather_description, wind_speed, time, time_inserted, utc_offset) \
             VALUES ($1, $2, $3, $4, $5, NOW(), $6) \
             RETURNING id, time_inserted",
            self.table
        );

        // Dropping an uncommitted transaction rolls it back.
        let mut tx = self.conn.begin().await.map_err(statement_error)?;

        let inserted = sqlx::query(&sql)
            .bind(&row.city)
            .bind(row.temperature)
            .bind(&row.weather_description)
            .bind(&row.wind_speed)
            .bind(row.time)
            .bind(&row.utc_offset)
            .fetch_one(&mut *tx)
            .await
            .map_err(statement_error)?;

        let id: i32 = inserted.try_get("id").map_err(statement_error)?;
        let time_inserted: DateTime<Utc> =
            inserted.try_get("time_inserted").map_err(statement_error)?;

        tx.commit().await.map_err(statement_error)?;
        info!(id, city = %row.city, table = %self.table, "observation written");

        Ok(row.persisted(id, time_inserted))
    }
}

/// While connecting, anything but bad settings or credentials means the store
/// is unreachable.
fn connect_error(err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::Configuration(e) => Error::config(format!("invalid database settings: {e}")),
        sqlx::Error::Database(db) if is_credentials_state(db.code().as_deref()) => {
            Error::config(format!("database refused the connection: {}", db.message()))
        }
        other => Error::Connection(other),
    }
}

/// Once connected, server-side rejections of a statement are constraint
/// errors; losing the connection is a connection error.
fn statement_error(err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::Configuration(e) => Error::config(e.to_string()),
        sqlx::Error::Database(db) if is_connection_state(db.code().as_deref()) => {
            Error::Connection(sqlx::Error::Database(db))
        }
        sqlx::Error::Database(db) => {
            let field = db
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(PgDatabaseError::column)
                .or_else(|| db.constraint())
                .map(str::to_string);
            Error::Constraint { field, message: db.message().to_string() }
        }
        sqlx::Error::ColumnDecode { index, source } => {
            Error::Constraint { field: Some(index), message: source.to_string() }
        }
        sqlx::Error::ColumnNotFound(column) => {
            Error::Constraint { field: Some(column), message: "column not found".into() }
        }
        sqlx::Error::TypeNotFound { type_name } => {
            Error::Constraint { field: None, message: format!("unknown type {type_name}") }
        }
        sqlx::Error::Decode(e) => Error::Constraint { field: None, message: e.to_string() },
        other => Error::Connection(other),
    }
}

// SQLSTATE class 08 (connection exception) and 57P (operator intervention).
fn is_connection_state(code: Option<&str>) -> bool {
    code.is_some_and(|c| c.starts_with("08") || c.starts_with("57P"))
}

// 23505 (unique violation) from the DDL means another session created the
// same schema or table between our existence check and insert into the catalog.
fn is_creation_race(code: Option<&str>) -> bool {
    code == Some("23505")
}

// SQLSTATE class 28 (invalid authorization) and 3D000 (unknown database).
fn is_credentials_state(code: Option<&str>) -> bool {
    code.is_some_and(|c| c.starts_with("28") || c == "3D000")
}
