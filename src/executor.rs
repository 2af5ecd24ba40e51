//! Statement execution
//!
//! The [`Executor`] trait is the seam between compiled SQL and a database.
//! It receives fully escaped SQL text and returns rows as JSON objects keyed
//! by column name. [`PgExecutor`] implements it over a sqlx PostgreSQL pool.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};

use crate::config::StoreConfig;
use crate::error::{DataAccessError, Result};

/// One result row keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Runs SQL statements
///
/// Implementations run one statement per call and never retry. Transactions
/// spanning several calls are the implementation's business.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>>;
}

/// Executor over a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized by `config.max_connections`
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.pg_connect_options()?)
            .await
            .map_err(|e| DataAccessError::Connection(format!("Database connection failed: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_json(row: &PgRow) -> Row {
        row.columns()
            .iter()
            .map(|column| {
                let value = Self::extract_column_value(row, column.ordinal(), column.type_info().name());
                (column.name().to_string(), value)
            })
            .collect()
    }

    fn extract_column_value(row: &PgRow, idx: usize, type_name: &str) -> serde_json::Value {
        use serde_json::Value as Json;

        let value = match type_name {
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(Json::String),
            "INT2" => row
                .try_get::<Option<i16>, _>(idx)
                .ok()
                .flatten()
                .map(Json::from),
            "INT4" => row
                .try_get::<Option<i32>, _>(idx)
                .ok()
                .flatten()
                .map(Json::from),
            "INT8" => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(Json::from),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(idx)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
                .map(Json::Number),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(Json::Number),
            "NUMERIC" => {
                use rust_decimal::prelude::ToPrimitive;
                row.try_get::<Option<rust_decimal::Decimal>, _>(idx)
                    .ok()
                    .flatten()
                    .and_then(|d| d.to_f64())
                    .and_then(serde_json::Number::from_f64)
                    .map(Json::Number)
            }
            "BOOL" => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(Json::Bool),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Json::String(v.to_rfc3339_opts(SecondsFormat::Millis, true))),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Json::String(v.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true))),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(idx)
                .ok()
                .flatten()
                .map(|v| {
                    Json::String(
                        v.and_time(chrono::NaiveTime::MIN)
                            .and_utc()
                            .to_rfc3339_opts(SecondsFormat::Millis, true),
                    )
                }),
            "JSON" | "JSONB" => row.try_get::<Option<Json>, _>(idx).ok().flatten(),
            _ => row.try_get::<Option<String>, _>(idx).ok().flatten().map(Json::String),
        };
        value.unwrap_or(Json::Null)
    }
}

#[async_trait]
impl Executor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| match e {
                e @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)) => {
                    DataAccessError::Connection(e.to_string())
                }
                other => DataAccessError::Sql(other),
            })?;
        Ok(rows.iter().map(Self::row_to_json).collect())
    }
}
