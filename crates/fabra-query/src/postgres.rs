//! Postgres source client.
//!
//! Connections are opened per operation with a single-connection pool and
//! dropped when the scan task exits. Scans stream through a channel so a
//! dropped iterator tears the connection down instead of buffering the
//! whole result.

use anyhow::{Context, Result};
use bigdecimal::ToPrimitive;
use fabra_data::{
    Field, FieldType, QueryResults, Row, RowIterator, Schema, Value, TIMESTAMP_NTZ_FORMAT,
    TIMESTAMP_TZ_FORMAT,
};
use futures_util::StreamExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column, Executor, Row as SqlxRow, TypeInfo};

use crate::{ChannelIterator, QueryClient, visible};

#[derive(Debug, Clone)]
pub struct PostgresApiClient {
    pub username: String,
    pub password: String,
    pub database_name: String,
    pub host: String,
}

impl PostgresApiClient {
    fn connect_options(&self) -> Result<PgConnectOptions> {
        let (host, port) = split_host_port(&self.host, 5432)?;
        Ok(PgConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database_name)
            .ssl_mode(PgSslMode::Require))
    }

    async fn open_pool(&self) -> Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(1)
            .connect_with(self.connect_options()?)
            .await
            .map_err(visible)
            .context("opening postgres connection")
    }
}

pub(crate) fn split_host_port(host: &str, default_port: u16) -> Result<(String, u16)> {
    match host.rsplit_once(':') {
        Some((h, p)) => {
            let port = p
                .parse::<u16>()
                .map_err(|_| fabra_data::customer_visible(format!("invalid port in host '{host}'")))?;
            Ok((h.to_string(), port))
        }
        None => Ok((host.to_string(), default_port)),
    }
}

#[async_trait::async_trait]
impl QueryClient for PostgresApiClient {
    async fn query_iterator(&self, query: &str) -> Result<Box<dyn RowIterator>> {
        let pool = self.open_pool().await?;
        Ok(stream_pg_query(pool, query.to_string(), postgres_field_type).await?)
    }

    async fn run_query(&self, query: &str) -> Result<QueryResults> {
        let pool = self.open_pool().await?;
        run_pg_query(&pool, query, postgres_field_type).await
    }

    async fn get_namespaces(&self) -> Result<Vec<String>> {
        let results = self
            .run_query(
                "SELECT nspname FROM pg_catalog.pg_namespace WHERE nspname NOT IN \
                 ('pg_toast', 'pg_internal', 'catalog_history', 'pg_automv', 'pg_temp_1', \
                  'pg_catalog', 'information_schema')",
            )
            .await?;
        Ok(first_column_strings(&results))
    }

    async fn get_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let results = self
            .run_query(&format!(
                "SELECT DISTINCT(table_name) FROM INFORMATION_SCHEMA.TABLES \
                 WHERE table_schema = '{namespace}'"
            ))
            .await?;
        Ok(first_column_strings(&results))
    }

    async fn get_schema(&self, namespace: &str, table_name: &str) -> Result<Schema> {
        let results = self
            .run_query(&format!(
                "SELECT column_name, data_type FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE table_schema = '{namespace}' AND table_name = '{table_name}'"
            ))
            .await?;

        Ok(results
            .data
            .iter()
            .map(|row| {
                Field::new(
                    row[0].to_string(),
                    postgres_field_type(&row[1].to_string()),
                )
            })
            .collect())
    }

    async fn get_field_values(
        &self,
        namespace: &str,
        table_name: &str,
        field_name: &str,
    ) -> Result<Vec<Value>> {
        let results = self
            .run_query(&format!(
                "SELECT DISTINCT {field_name} FROM {namespace}.{table_name} LIMIT 100"
            ))
            .await?;
        Ok(results
            .data
            .into_iter()
            .filter_map(|mut row| {
                let value = row.swap_remove(0);
                (!value.is_null()).then_some(value)
            })
            .collect())
    }
}

/// Describes the query for its schema, then forwards rows over a channel
/// from a task that owns the pool. Shared with the Redshift client, which
/// differs only in its type table.
pub(crate) async fn stream_pg_query(
    pool: PgPool,
    query: String,
    lookup: fn(&str) -> FieldType,
) -> Result<Box<dyn RowIterator>> {
    let describe = (&pool)
        .describe(&query)
        .await
        .map_err(visible)
        .context("describing query")?;

    let schema: Schema = describe
        .columns()
        .iter()
        .map(|col| Field::new(col.name(), lookup(col.type_info().name())))
        .collect();

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Row>>(64);
    tokio::spawn(async move {
        let mut stream = sqlx::query(&query).fetch(&pool);
        while let Some(fetched) = stream.next().await {
            let converted = fetched
                .map_err(visible)
                .and_then(|row| convert_pg_row(&row));
            let failed = converted.is_err();
            if tx.send(converted).await.is_err() || failed {
                break;
            }
        }
    });

    Ok(Box::new(ChannelIterator::new(schema, rx)))
}

pub(crate) async fn run_pg_query(
    pool: &PgPool,
    query: &str,
    lookup: fn(&str) -> FieldType,
) -> Result<QueryResults> {
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .await
        .map_err(visible)
        .context("running query")?;

    let schema: Schema = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|col| Field::new(col.name(), lookup(col.type_info().name())))
                .collect()
        })
        .unwrap_or_default();

    let data = rows
        .iter()
        .map(convert_pg_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(QueryResults { schema, data })
}

pub(crate) fn first_column_strings(results: &QueryResults) -> Vec<String> {
    results
        .data
        .iter()
        .filter(|row| !row[0].is_null())
        .map(|row| row[0].to_string())
        .collect()
}

/// Decodes one sqlx row into canonical values, switching on the native type
/// name so each column is read with its real wire type.
pub(crate) fn convert_pg_row(row: &PgRow) -> Result<Row> {
    let mut converted = Row::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        let native = column.type_info().name().to_uppercase();
        let value = match native.as_str() {
            "BOOL" => row.try_get::<Option<bool>, _>(i)?.map(Value::Boolean),
            "INT2" => row
                .try_get::<Option<i16>, _>(i)?
                .map(|v| Value::Integer(v as i64)),
            "INT4" => row
                .try_get::<Option<i32>, _>(i)?
                .map(|v| Value::Integer(v as i64)),
            "INT8" => row.try_get::<Option<i64>, _>(i)?.map(Value::Integer),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(i)?
                .map(|v| Value::Number(v as f64)),
            "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.map(Value::Number),
            "NUMERIC" => row
                .try_get::<Option<bigdecimal::BigDecimal>, _>(i)?
                .map(|v| Value::Number(v.to_f64().unwrap_or(f64::NAN))),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map(|v| Value::String(v.format(TIMESTAMP_TZ_FORMAT).to_string())),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)?
                .map(|v| Value::String(v.format(TIMESTAMP_NTZ_FORMAT).to_string())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)?
                .map(|v| Value::String(v.to_string())),
            "TIME" => row
                .try_get::<Option<chrono::NaiveTime>, _>(i)?
                .map(|v| Value::String(v.to_string())),
            "TIMETZ" => row
                .try_get::<Option<sqlx::postgres::types::PgTimeTz>, _>(i)?
                .map(|v| Value::String(format!("{}{}", v.time, v.offset))),
            "JSON" | "JSONB" => row
                .try_get::<Option<serde_json::Value>, _>(i)?
                .map(Value::Json),
            "UUID" => row
                .try_get::<Option<uuid::Uuid>, _>(i)?
                .map(|v| Value::String(v.to_string())),
            _ => row.try_get::<Option<String>, _>(i)?.map(Value::String),
        };

        converted.push(value.unwrap_or(Value::Null));
    }

    Ok(converted)
}

pub(crate) fn postgres_field_type(postgres_type: &str) -> FieldType {
    match postgres_type.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => FieldType::Boolean,
        "INT" | "INT2" | "INT4" | "INT8" | "BIGINT" | "SMALLINT" | "INTEGER" => FieldType::Integer,
        "FLOAT" | "FLOAT4" | "FLOAT8" | "NUMERIC" | "DOUBLE" | "DOUBLE PRECISION" | "REAL" => {
            FieldType::Number
        }
        "DATE" => FieldType::Date,
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => FieldType::DateTimeTz,
        "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => FieldType::DateTimeNtz,
        "TIME" | "TIME WITHOUT TIME ZONE" => FieldType::TimeNtz,
        "TIMETZ" | "TIME WITH TIME ZONE" => FieldType::TimeTz,
        "JSON" | "JSONB" => FieldType::Json,
        // objects from Postgres can come back with an empty type
        "" => FieldType::Json,
        _ => FieldType::String,
    }
}
