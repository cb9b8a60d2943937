//! Typed access to the shared PostgreSQL database.
//!
//! The store owns every DB connection in the process. Connections are
//! acquired from the pool per call; no transaction state crosses operation
//! boundaries (the single exception is `execute_scoped_migration`, which
//! wraps its statements in one transaction).

use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo};
use tracing::debug;

use crate::config::DbConfig;
use crate::Result;

pub mod guard;
pub mod search;

pub use guard::KNOWN_TABLES;

/// Shared handle to the PostgreSQL store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to the database described by `config`.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&config.connection_url())
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests and embedded use).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    /// Run a `SELECT` and return rows as JSON objects.
    ///
    /// Any other statement kind is a `Validation` error.
    pub async fn select_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>> {
        guard::check_select(sql)?;
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_json).collect()
    }

    /// Run an `UPDATE` / `INSERT` / `DELETE` and return the affected rowcount.
    pub async fn execute_write(&self, sql: &str, params: &[Value]) -> Result<u64> {
        guard::check_write(sql)?;
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Run an `INSERT ... RETURNING id` and return the new id.
    pub async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> Result<i64> {
        guard::check_write(sql)?;
        let row = bind_params(sqlx::query(sql), params)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    /// Table → column listing from `information_schema`, public schema only.
    pub async fn describe_schema(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT table_name, column_name, data_type
            FROM information_schema.columns
            WHERE table_schema = 'public'
            ORDER BY table_name, ordinal_position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut schema: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (table, column, data_type) in rows {
            schema
                .entry(table)
                .or_default()
                .push(format!("{} {}", column, data_type));
        }
        Ok(schema)
    }

    /// Validate and run a migration restricted to `allowed_tables`, inside a
    /// single transaction.
    pub async fn execute_scoped_migration(
        &self,
        name: &str,
        allowed_tables: &[String],
        sql: &str,
    ) -> Result<()> {
        guard::check_scoped_migration(allowed_tables, sql)?;

        let mut tx = self.pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        tx.commit().await?;

        debug!("scoped migration '{}' applied to {:?}", name, allowed_tables);
        Ok(())
    }
}

/// Bind heterogeneous JSON parameters onto a query.
///
/// Strings, integers, floats, booleans and null map to their SQL
/// counterparts; arrays and objects bind as JSONB.
fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
            Value::Number(n) => query.bind(n.as_f64()),
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.clone()),
        };
    }
    query
}

/// Decode one row into a JSON object keyed by column name.
fn row_to_json(row: &PgRow) -> Result<Value> {
    let mut object = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), decode_column(row, index)?);
    }
    Ok(Value::Object(object))
}

fn decode_column(row: &PgRow, index: usize) -> Result<Value> {
    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" | "CHAR" => row
            .try_get::<Option<String>, _>(index)?
            .map(Value::String)
            .unwrap_or(Value::Null),
        "INT2" => num(row.try_get::<Option<i16>, _>(index)?.map(i64::from)),
        "INT4" => num(row.try_get::<Option<i32>, _>(index)?.map(i64::from)),
        "INT8" => num(row.try_get::<Option<i64>, _>(index)?),
        "FLOAT4" => float(row.try_get::<Option<f32>, _>(index)?.map(f64::from)),
        "FLOAT8" => float(row.try_get::<Option<f64>, _>(index)?),
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)?
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" | "TIMESTAMP" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or(Value::Null),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)?
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(index)?
            .unwrap_or(Value::Null),
        "TEXT[]" | "VARCHAR[]" => row
            .try_get::<Option<Vec<String>>, _>(index)?
            .map(|items| Value::Array(items.into_iter().map(Value::String).collect()))
            .unwrap_or(Value::Null),
        // tsvector and friends: render as text or drop to null
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    };
    Ok(value)
}

fn num(value: Option<i64>) -> Value {
    value.map(|v| Value::Number(v.into())).unwrap_or(Value::Null)
}

fn float(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
