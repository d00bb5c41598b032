use async_trait::async_trait;
use common::{EndpointConfig, EngineError, Result};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row as SqlxRow, TypeInfo};
use std::time::Duration;
use tracing::debug;

use crate::session::{ConnectionFactory, DbSession};
use crate::value::{Row, Value};

/// Default `DbSession` implementation, backed by `sqlx`'s driver-agnostic
/// `AnyPool` configured for the MySQL wire protocol.
///
/// The engine's generated SQL (`ON DUPLICATE KEY UPDATE` upserts,
/// `JSON_ARRAY_APPEND`/`JSON_SEARCH`, `INFORMATION_SCHEMA` introspection,
/// default port 3306) targets MySQL specifically, so `AnyPool` here is used
/// purely for its row-decoding convenience rather than for true
/// cross-database portability.
pub struct SqlxAnySession {
    pool: AnyPool,
    db_name: String,
}

impl SqlxAnySession {
    pub async fn connect(endpoint: &EndpointConfig) -> Result<Self> {
        let url = format!(
            "mysql://{}:{}@{}:{}/{}",
            endpoint.user, endpoint.password, endpoint.host, endpoint.port, endpoint.db
        );

        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&url)
            .await
            .map_err(|e| {
                EngineError::Connect(format!(
                    "{}:{}/{}: {}",
                    endpoint.host, endpoint.port, endpoint.db, e
                ))
            })?;

        debug!(host = %endpoint.host, db = %endpoint.db, "connected");

        Ok(Self {
            pool,
            db_name: endpoint.db.clone(),
        })
    }

    fn bind_params<'q>(
        mut query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
        params: &'q [Value],
    ) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
        for param in params {
            query = match param {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Int(i) => query.bind(*i),
                Value::Float(f) => query.bind(*f),
                Value::Text(s) => query.bind(s.as_str()),
                Value::Json(j) => query.bind(j.to_string()),
            };
        }
        query
    }

    fn row_to_generic(row: &AnyRow) -> Row {
        let mut cells = Vec::with_capacity(row.columns().len());
        for col in row.columns() {
            let name = col.name().to_string();
            let value = decode_column(row, col.ordinal(), col.type_info().name());
            cells.push((name, value));
        }
        Row(cells)
    }
}

/// Best-effort decode of an `AnyRow` column into our generic `Value`.
/// MySQL frequently surfaces non-native columns (varchar, json, decimal) to
/// `AnyRow` as `BLOB`; fall back to a raw byte read and reinterpret as text.
fn decode_column(row: &AnyRow, idx: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "INT4" | "INT" | "INTEGER" | "MEDIUMINT" | "SMALLINT" | "TINYINT" => row
            .try_get::<Option<i32>, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),
        "FLOAT4" | "FLOAT" | "FLOAT8" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        "BLOB" => match row.try_get::<Option<Vec<u8>>, _>(idx) {
            Ok(Some(bytes)) => {
                let text = String::from_utf8(bytes).unwrap_or_default();
                match serde_json::from_str(&text) {
                    Ok(json) => Value::Json(json),
                    Err(_) => Value::Text(text),
                }
            }
            _ => Value::Null,
        },
        _ => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Text)
            .unwrap_or(Value::Null),
    }
}

#[async_trait]
impl DbSession for SqlxAnySession {
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let query = Self::bind_params(sqlx::query(sql), params);
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        Ok(rows.iter().map(Self::row_to_generic).collect())
    }

    async fn fetch_one_opt(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let query = Self::bind_params(sqlx::query(sql), params);
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        Ok(row.as_ref().map(Self::row_to_generic))
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let query = Self::bind_params(sqlx::query(sql), params);
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        Ok(result.rows_affected())
    }

    fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Default `ConnectionFactory`, handing out `SqlxAnySession`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxConnectionFactory;

#[async_trait]
impl ConnectionFactory for SqlxConnectionFactory {
    async fn connect(&self, endpoint: &EndpointConfig) -> Result<Box<dyn DbSession>> {
        let session = SqlxAnySession::connect(endpoint).await?;
        Ok(Box::new(session))
    }
}
