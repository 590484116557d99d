//! Synapse source client (SQL Server wire protocol).
//!
//! Read-only: Synapse is not a load destination.

use anyhow::{Context, Result};
use fabra_data::{
    Field, FieldType, QueryResults, Row, RowIterator, Schema, Value, TIMESTAMP_NTZ_FORMAT,
    TIMESTAMP_TZ_FORMAT,
};
use tiberius::{AuthMethod, Client, ColumnType, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::postgres::split_host_port;
use crate::{visible, BufferedIterator, QueryClient};

#[derive(Debug, Clone)]
pub struct SynapseApiClient {
    pub username: String,
    pub password: String,
    pub database_name: String,
    pub host: String,
}

impl SynapseApiClient {
    async fn open_connection(&self) -> Result<Client<Compat<TcpStream>>> {
        let (host, port) = split_host_port(&self.host, 1433)?;

        let mut config = Config::new();
        config.host(&host);
        config.port(port);
        config.database(&self.database_name);
        config.authentication(AuthMethod::sql_server(&self.username, &self.password));
        config.encryption(tiberius::EncryptionLevel::Required);
        config.trust_cert();

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(visible)
            .context("connecting to synapse")?;
        tcp.set_nodelay(true).context("configuring connection")?;

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(visible)
            .context("opening synapse connection")
    }

    async fn exec(&self, query: &str) -> Result<QueryResults> {
        let mut client = self.open_connection().await?;
        let stream = client
            .simple_query(query)
            .await
            .map_err(visible)
            .context("running query")?;

        let rows = stream
            .into_first_result()
            .await
            .map_err(visible)
            .context("reading query results")?;

        let schema: Schema = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|col| Field::new(col.name(), synapse_column_type(col.column_type())))
                    .collect()
            })
            .unwrap_or_default();

        let data = rows
            .iter()
            .map(convert_synapse_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryResults { schema, data })
    }
}

#[async_trait::async_trait]
impl QueryClient for SynapseApiClient {
    async fn query_iterator(&self, query: &str) -> Result<Box<dyn RowIterator>> {
        let results = self.exec(query).await?;
        Ok(Box::new(BufferedIterator::new(results.schema, results.data)))
    }

    async fn run_query(&self, query: &str) -> Result<QueryResults> {
        self.exec(query).await
    }

    async fn get_namespaces(&self) -> Result<Vec<String>> {
        let results = self
            .exec(
                "SELECT name FROM sys.schemas WHERE name NOT IN \
                 ('sys', 'guest', 'INFORMATION_SCHEMA')",
            )
            .await?;
        Ok(crate::postgres::first_column_strings(&results))
    }

    async fn get_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let results = self
            .exec(&format!(
                "SELECT DISTINCT(table_name) FROM INFORMATION_SCHEMA.TABLES \
                 WHERE table_schema = '{namespace}'"
            ))
            .await?;
        Ok(crate::postgres::first_column_strings(&results))
    }

    async fn get_schema(&self, namespace: &str, table_name: &str) -> Result<Schema> {
        let results = self
            .exec(&format!(
                "SELECT column_name, data_type FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE table_schema = '{namespace}' AND table_name = '{table_name}'"
            ))
            .await?;

        Ok(results
            .data
            .iter()
            .map(|row| Field::new(row[0].to_string(), synapse_field_type(&row[1].to_string())))
            .collect())
    }

    async fn get_field_values(
        &self,
        namespace: &str,
        table_name: &str,
        field_name: &str,
    ) -> Result<Vec<Value>> {
        let results = self
            .exec(&format!(
                "SELECT DISTINCT TOP 100 {field_name} FROM {namespace}.{table_name}"
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

fn convert_synapse_row(row: &tiberius::Row) -> Result<Row> {
    let mut converted = Row::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.column_type() {
            ColumnType::Bit | ColumnType::Bitn => {
                row.try_get::<bool, _>(i)?.map(Value::Boolean)
            }
            ColumnType::Int1 => row.try_get::<u8, _>(i)?.map(|v| Value::Integer(v as i64)),
            ColumnType::Int2 => row.try_get::<i16, _>(i)?.map(|v| Value::Integer(v as i64)),
            ColumnType::Int4 => row.try_get::<i32, _>(i)?.map(|v| Value::Integer(v as i64)),
            ColumnType::Int8 | ColumnType::Intn => {
                row.try_get::<i64, _>(i)?.map(Value::Integer)
            }
            ColumnType::Float4 => row.try_get::<f32, _>(i)?.map(|v| Value::Number(v as f64)),
            ColumnType::Float8 | ColumnType::Floatn => {
                row.try_get::<f64, _>(i)?.map(Value::Number)
            }
            ColumnType::Decimaln | ColumnType::Numericn => row
                .try_get::<tiberius::numeric::Numeric, _>(i)?
                .map(|v| Value::Number(f64::from(v))),
            ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetime4
            | ColumnType::Datetimen => row
                .try_get::<chrono::NaiveDateTime, _>(i)?
                .map(|v| Value::String(v.format(TIMESTAMP_NTZ_FORMAT).to_string())),
            ColumnType::DatetimeOffsetn => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(i)?
                .map(|v| Value::String(v.format(TIMESTAMP_TZ_FORMAT).to_string())),
            ColumnType::Daten => row
                .try_get::<chrono::NaiveDate, _>(i)?
                .map(|v| Value::String(v.to_string())),
            ColumnType::Timen => row
                .try_get::<chrono::NaiveTime, _>(i)?
                .map(|v| Value::String(v.to_string())),
            _ => row
                .try_get::<&str, _>(i)?
                .map(|v| Value::String(v.to_string())),
        };

        converted.push(value.unwrap_or(Value::Null));
    }

    Ok(converted)
}

fn synapse_column_type(column_type: ColumnType) -> FieldType {
    match column_type {
        ColumnType::Bit | ColumnType::Bitn => FieldType::Boolean,
        ColumnType::Int1 | ColumnType::Int2 | ColumnType::Int4 | ColumnType::Int8
        | ColumnType::Intn => FieldType::Integer,
        ColumnType::Float4 | ColumnType::Float8 | ColumnType::Floatn | ColumnType::Decimaln
        | ColumnType::Numericn => FieldType::Number,
        ColumnType::Daten => FieldType::Date,
        ColumnType::Timen => FieldType::TimeNtz,
        ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetime4
        | ColumnType::Datetimen => FieldType::DateTimeNtz,
        ColumnType::DatetimeOffsetn => FieldType::DateTimeTz,
        _ => FieldType::String,
    }
}

fn synapse_field_type(synapse_type: &str) -> FieldType {
    match synapse_type.to_uppercase().as_str() {
        "BIT" => FieldType::Boolean,
        "INT" | "BIGINT" | "SMALLINT" | "TINYINT" => FieldType::Integer,
        "REAL" | "DECIMAL" | "NUMERIC" | "FLOAT" | "MONEY" | "SMALLMONEY" => FieldType::Number,
        "DATE" => FieldType::Date,
        "TIME" => FieldType::TimeNtz,
        "DATETIME" | "DATETIME2" | "SMALLDATETIME" => FieldType::DateTimeNtz,
        "DATETIMEOFFSET" => FieldType::DateTimeTz,
        _ => FieldType::String,
    }
}
