//! Redshift source client.
//!
//! Redshift speaks the Postgres wire protocol; the scan machinery is shared
//! with the Postgres client. Catalog queries and the type table are its
//! own (`pg_table_def`, `SUPER`).

use anyhow::Result;
use fabra_data::{Field, FieldType, QueryResults, RowIterator, Schema, Value};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

use crate::postgres::{first_column_strings, run_pg_query, split_host_port, stream_pg_query};
use crate::{visible, QueryClient};
use anyhow::Context;

#[derive(Debug, Clone)]
pub struct RedshiftApiClient {
    pub username: String,
    pub password: String,
    pub database_name: String,
    pub host: String,
}

impl RedshiftApiClient {
    async fn open_pool(&self) -> Result<PgPool> {
        let (host, port) = split_host_port(&self.host, 5439)?;
        let options = PgConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database_name)
            .ssl_mode(PgSslMode::Require);

        PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(visible)
            .context("opening redshift connection")
    }
}

#[async_trait::async_trait]
impl QueryClient for RedshiftApiClient {
    async fn query_iterator(&self, query: &str) -> Result<Box<dyn RowIterator>> {
        let pool = self.open_pool().await?;
        stream_pg_query(pool, query.to_string(), redshift_field_type).await
    }

    async fn run_query(&self, query: &str) -> Result<QueryResults> {
        let pool = self.open_pool().await?;
        run_pg_query(&pool, query, redshift_field_type).await
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
                "SELECT DISTINCT(tablename) FROM pg_table_def WHERE schemaname = '{namespace}'"
            ))
            .await?;
        Ok(first_column_strings(&results))
    }

    async fn get_schema(&self, namespace: &str, table_name: &str) -> Result<Schema> {
        let results = self
            .run_query(&format!(
                "SELECT pg_table_def.column, pg_table_def.type FROM pg_table_def \
                 WHERE schemaname = '{namespace}' AND tablename = '{table_name}'"
            ))
            .await?;

        Ok(results
            .data
            .iter()
            .map(|row| Field::new(row[0].to_string(), redshift_field_type(&row[1].to_string())))
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

fn redshift_field_type(redshift_type: &str) -> FieldType {
    match redshift_type.to_uppercase().as_str() {
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
        "SUPER" => FieldType::Json,
        "" => FieldType::Json,
        _ => FieldType::String,
    }
}
