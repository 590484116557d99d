//! MySQL source client.

use anyhow::{Context, Result};
use bigdecimal::ToPrimitive;
use fabra_data::{
    Field, FieldType, QueryResults, Row, RowIterator, Schema, Value, TIMESTAMP_NTZ_FORMAT,
    TIMESTAMP_TZ_FORMAT,
};
use futures_util::StreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Executor, Row as SqlxRow, TypeInfo};

use crate::postgres::split_host_port;
use crate::{visible, ChannelIterator, QueryClient};

#[derive(Debug, Clone)]
pub struct MySqlApiClient {
    pub username: String,
    pub password: String,
    pub database_name: String,
    pub host: String,
}

impl MySqlApiClient {
    async fn open_pool(&self) -> Result<MySqlPool> {
        let (host, port) = split_host_port(&self.host, 3306)?;
        let options = MySqlConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database_name)
            .ssl_mode(MySqlSslMode::Required);

        MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(visible)
            .context("opening mysql connection")
    }
}

#[async_trait::async_trait]
impl QueryClient for MySqlApiClient {
    async fn query_iterator(&self, query: &str) -> Result<Box<dyn RowIterator>> {
        let pool = self.open_pool().await?;

        let describe = (&pool)
            .describe(query)
            .await
            .map_err(visible)
            .context("describing query")?;

        let schema: Schema = describe
            .columns()
            .iter()
            .map(|col| Field::new(col.name(), mysql_field_type(col.type_info().name())))
            .collect();

        let sql = query.to_string();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Row>>(64);
        tokio::spawn(async move {
            let mut stream = sqlx::query(&sql).fetch(&pool);
            while let Some(fetched) = stream.next().await {
                let converted = fetched.map_err(visible).and_then(|row| convert_mysql_row(&row));
                let failed = converted.is_err();
                if tx.send(converted).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Box::new(ChannelIterator::new(schema, rx)))
    }

    async fn run_query(&self, query: &str) -> Result<QueryResults> {
        let pool = self.open_pool().await?;
        let rows = sqlx::query(query)
            .fetch_all(&pool)
            .await
            .map_err(visible)
            .context("running query")?;

        let schema: Schema = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|col| Field::new(col.name(), mysql_field_type(col.type_info().name())))
                    .collect()
            })
            .unwrap_or_default();

        let data = rows
            .iter()
            .map(convert_mysql_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryResults { schema, data })
    }

    async fn get_namespaces(&self) -> Result<Vec<String>> {
        let results = self
            .run_query(
                "SELECT schema_name FROM INFORMATION_SCHEMA.SCHEMATA WHERE schema_name NOT IN \
                 ('mysql', 'information_schema', 'performance_schema', 'sys')",
            )
            .await?;
        Ok(crate::postgres::first_column_strings(&results))
    }

    async fn get_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let results = self
            .run_query(&format!(
                "SELECT DISTINCT(table_name) FROM INFORMATION_SCHEMA.TABLES \
                 WHERE table_schema = '{namespace}'"
            ))
            .await?;
        Ok(crate::postgres::first_column_strings(&results))
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
            .map(|row| Field::new(row[0].to_string(), mysql_field_type(&row[1].to_string())))
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

fn convert_mysql_row(row: &MySqlRow) -> Result<Row> {
    let mut converted = Row::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        let native = column.type_info().name().to_uppercase();
        let value = match native.as_str() {
            "BOOLEAN" => row.try_get::<Option<bool>, _>(i)?.map(Value::Boolean),
            "TINYINT" => row
                .try_get::<Option<i8>, _>(i)?
                .map(|v| Value::Integer(v as i64)),
            "SMALLINT" => row
                .try_get::<Option<i16>, _>(i)?
                .map(|v| Value::Integer(v as i64)),
            "INT" | "MEDIUMINT" => row
                .try_get::<Option<i32>, _>(i)?
                .map(|v| Value::Integer(v as i64)),
            "BIGINT" => row.try_get::<Option<i64>, _>(i)?.map(Value::Integer),
            "FLOAT" => row
                .try_get::<Option<f32>, _>(i)?
                .map(|v| Value::Number(v as f64)),
            "DOUBLE" => row.try_get::<Option<f64>, _>(i)?.map(Value::Number),
            "DECIMAL" => row
                .try_get::<Option<bigdecimal::BigDecimal>, _>(i)?
                .map(|v| Value::Number(v.to_f64().unwrap_or(f64::NAN))),
            // MySQL TIMESTAMP columns are UTC on the wire
            "TIMESTAMP" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map(|v| Value::String(v.format(TIMESTAMP_TZ_FORMAT).to_string())),
            "DATETIME" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)?
                .map(|v| Value::String(v.format(TIMESTAMP_NTZ_FORMAT).to_string())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)?
                .map(|v| Value::String(v.to_string())),
            "TIME" => row
                .try_get::<Option<chrono::NaiveTime>, _>(i)?
                .map(|v| Value::String(v.to_string())),
            "JSON" => row
                .try_get::<Option<serde_json::Value>, _>(i)?
                .map(Value::Json),
            _ => row.try_get::<Option<String>, _>(i)?.map(Value::String),
        };

        converted.push(value.unwrap_or(Value::Null));
    }

    Ok(converted)
}

fn mysql_field_type(mysql_type: &str) -> FieldType {
    match mysql_type.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => FieldType::Boolean,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => {
            FieldType::Integer
        }
        "FLOAT" | "DOUBLE" | "DECIMAL" | "NUMERIC" => FieldType::Number,
        "DATE" => FieldType::Date,
        // TIMESTAMP carries an offset (stored UTC); DATETIME does not
        "TIMESTAMP" => FieldType::DateTimeTz,
        "DATETIME" => FieldType::DateTimeNtz,
        "TIME" => FieldType::TimeNtz,
        "JSON" => FieldType::Json,
        "" => FieldType::Json,
        _ => FieldType::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_table_matches_backend_names() {
        assert_eq!(mysql_field_type("TINYINT"), FieldType::Integer);
        assert_eq!(mysql_field_type("decimal"), FieldType::Number);
        assert_eq!(mysql_field_type("TIMESTAMP"), FieldType::DateTimeTz);
        assert_eq!(mysql_field_type("DATETIME"), FieldType::DateTimeNtz);
        assert_eq!(mysql_field_type("VARCHAR"), FieldType::String);
        assert_eq!(mysql_field_type("JSON"), FieldType::Json);
    }
}
