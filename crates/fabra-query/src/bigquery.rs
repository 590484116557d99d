//! BigQuery client: querying plus the staged-CSV load path.
//!
//! The REST API returns every cell as JSON (scalars as strings); cells are
//! parsed by the declared schema type and normalized to canonical shapes.
//! Staging goes through GCS; the staged objects are deleted after the load
//! regardless of how the run ended.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use fabra_crypto::CryptoService;
use fabra_data::{
    customer_visible, Field, FieldType, QueryResults, Row, RowIterator, Schema, Value,
    TIMESTAMP_NTZ_FORMAT, TIMESTAMP_TZ_FORMAT,
};
use fabra_db::views::FullConnection;
use gcp_bigquery_client::model::{
    get_query_results_parameters::GetQueryResultsParameters, job::Job,
    job_configuration::JobConfiguration, job_configuration_load::JobConfigurationLoad,
    query_request::QueryRequest, table_field_schema::TableFieldSchema, table_reference::TableReference,
    table_row::TableRow, table_schema::TableSchema,
};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::{path::Path as ObjectPath, ObjectStore, PutPayload};
use serde::Deserialize;

use crate::{visible, LoadOptions, QueryClient, StagingOptions, WarehouseClient, WriteDisposition};

/// The subset of a service-account key the client needs beyond the raw JSON.
#[derive(Debug, Clone, Deserialize)]
struct BigQueryCredentials {
    project_id: String,
}

pub struct BigQueryApiClient {
    client: Arc<gcp_bigquery_client::Client>,
    project_id: String,
    location: String,
    credentials_json: String,
}

impl BigQueryApiClient {
    pub async fn from_connection(
        connection: &FullConnection,
        crypto: &dyn CryptoService,
    ) -> Result<Self> {
        let ciphertext = connection
            .credentials
            .as_deref()
            .ok_or_else(|| customer_visible("BigQuery connection must have credentials defined"))?;
        let credentials_json = crypto
            .decrypt_connection_credentials(ciphertext)
            .context("decrypting BigQuery credentials")?;

        let credentials: BigQueryCredentials = serde_json::from_str(&credentials_json)
            .map_err(|_| customer_visible("BigQuery credentials are not a service account key"))?;

        let location = connection
            .location
            .clone()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| customer_visible("BigQuery connection must have location defined"))?;

        let service_account_key = serde_json::from_str(&credentials_json)
            .map_err(|_| customer_visible("BigQuery credentials are not a service account key"))?;
        let client = gcp_bigquery_client::Client::from_service_account_key(service_account_key, false)
            .await
            .map_err(visible)
            .context("building BigQuery client")?;

        Ok(Self {
            client: Arc::new(client),
            project_id: credentials.project_id,
            location,
            credentials_json,
        })
    }

    fn gcs_store(&self, bucket: &str) -> Result<impl ObjectStore> {
        GoogleCloudStorageBuilder::new()
            .with_bucket_name(bucket)
            .with_service_account_key(&self.credentials_json)
            .build()
            .map_err(visible)
            .context("building storage client")
    }

    async fn start_query(&self, query: &str) -> Result<BigQueryIterator> {
        let mut request = QueryRequest::new(query);
        request.use_legacy_sql = false;
        // location must match that of the datasets referenced in the query
        request.location = Some(self.location.clone());

        let response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(visible)
            .context("running query")?;

        let schema_fields = schema_field_names(response.schema.as_ref());
        let schema = convert_bigquery_schema(response.schema.as_ref());
        let job_id = response
            .job_reference
            .as_ref()
            .and_then(|r| r.job_id.clone())
            .unwrap_or_default();

        let buffered = response
            .rows
            .unwrap_or_default()
            .iter()
            .map(|row| convert_bigquery_row(row, &schema_fields))
            .collect::<Result<VecDeque<_>>>()?;

        Ok(BigQueryIterator {
            client: Arc::clone(&self.client),
            project_id: self.project_id.clone(),
            location: self.location.clone(),
            job_id,
            schema,
            native_types: schema_fields,
            buffered,
            page_token: response.page_token,
        })
    }
}

#[async_trait::async_trait]
impl QueryClient for BigQueryApiClient {
    async fn query_iterator(&self, query: &str) -> Result<Box<dyn RowIterator>> {
        Ok(Box::new(self.start_query(query).await?))
    }

    async fn run_query(&self, query: &str) -> Result<QueryResults> {
        let mut iterator = self.start_query(query).await?;
        let mut data = Vec::new();
        while let Some(row) = iterator.next_row().await? {
            data.push(row);
        }

        Ok(QueryResults {
            schema: iterator.schema,
            data,
        })
    }

    async fn get_namespaces(&self) -> Result<Vec<String>> {
        let results = self
            .run_query("SELECT schema_name FROM INFORMATION_SCHEMA.SCHEMATA")
            .await?;
        Ok(crate::postgres::first_column_strings(&results))
    }

    async fn get_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let results = self
            .run_query(&format!(
                "SELECT table_name FROM {namespace}.INFORMATION_SCHEMA.TABLES"
            ))
            .await?;
        Ok(crate::postgres::first_column_strings(&results))
    }

    async fn get_schema(&self, namespace: &str, table_name: &str) -> Result<Schema> {
        let results = self
            .run_query(&format!(
                "SELECT column_name, data_type FROM {namespace}.INFORMATION_SCHEMA.COLUMNS \
                 WHERE table_name = '{table_name}'"
            ))
            .await?;

        Ok(results
            .data
            .iter()
            .filter(|row| !row[0].is_null())
            .map(|row| Field::new(row[0].to_string(), bigquery_field_type(&row[1].to_string())))
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

#[async_trait::async_trait]
impl WarehouseClient for BigQueryApiClient {
    async fn stage_data(&self, csv_data: &str, staging_options: &StagingOptions) -> Result<()> {
        let store = self.gcs_store(&staging_options.bucket)?;
        store
            .put(
                &ObjectPath::from(staging_options.object.as_str()),
                PutPayload::from(csv_data.as_bytes().to_vec()),
            )
            .await
            .map_err(visible)
            .context("staging csv data")?;

        Ok(())
    }

    async fn load_from_staging(
        &self,
        namespace: &str,
        table_name: &str,
        load_options: &LoadOptions,
    ) -> Result<()> {
        let job = Job {
            configuration: Some(JobConfiguration {
                load: Some(JobConfigurationLoad {
                    source_uris: Some(vec![load_options.staging_reference.clone()]),
                    source_format: Some("CSV".to_string()),
                    destination_table: Some(TableReference::new(
                        &self.project_id,
                        namespace,
                        table_name,
                    )),
                    schema: Some(TableSchema::new(
                        load_options
                            .schema
                            .iter()
                            .map(|field| TableFieldSchema {
                                categories: None,
                                description: None,
                                fields: None,
                                policy_tags: None,
                                name: field.name.clone(),
                                r#type: bigquery_load_type(field.field_type),
                                mode: Some(
                                    if field.required { "REQUIRED" } else { "NULLABLE" }.to_string(),
                                ),
                            })
                            .collect(),
                    )),
                    write_disposition: Some(
                        match load_options.write_disposition {
                            WriteDisposition::Truncate => "WRITE_TRUNCATE",
                            WriteDisposition::Append => "WRITE_APPEND",
                        }
                        .to_string(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let inserted = self
            .client
            .job()
            .insert(&self.project_id, job)
            .await
            .map_err(visible)
            .context("starting load job")?;

        let job_id = inserted
            .job_reference
            .and_then(|r| r.job_id)
            .ok_or_else(|| anyhow::anyhow!("load job has no job id"))?;

        loop {
            let state = self
                .client
                .job()
                .get_job(&self.project_id, &job_id, Some(&self.location))
                .await
                .map_err(visible)
                .context("polling load job")?;

            if let Some(status) = state.status {
                if status.state.as_deref() == Some("DONE") {
                    if let Some(error) = status.error_result {
                        return Err(customer_visible(
                            error.message.unwrap_or_else(|| "load job failed".to_string()),
                        ));
                    }
                    return Ok(());
                }
            }

            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }

    async fn cleanup_staging_data(&self, staging_options: &StagingOptions) -> Result<()> {
        let store = self.gcs_store(&staging_options.bucket)?;
        store
            .delete(&ObjectPath::from(staging_options.object.as_str()))
            .await
            .map_err(visible)
            .context("deleting staged object")?;

        Ok(())
    }
}

struct BigQueryIterator {
    client: Arc<gcp_bigquery_client::Client>,
    project_id: String,
    location: String,
    job_id: String,
    schema: Schema,
    native_types: Vec<String>,
    buffered: VecDeque<Row>,
    page_token: Option<String>,
}

#[async_trait::async_trait]
impl RowIterator for BigQueryIterator {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Ok(Some(row));
            }

            let Some(token) = self.page_token.take() else {
                return Ok(None);
            };

            let page = self
                .client
                .job()
                .get_query_results(
                    &self.project_id,
                    &self.job_id,
                    GetQueryResultsParameters {
                        location: Some(self.location.clone()),
                        page_token: Some(token),
                        ..Default::default()
                    },
                )
                .await
                .map_err(visible)
                .context("fetching query results page")?;

            self.page_token = page.page_token;
            self.buffered = page
                .rows
                .unwrap_or_default()
                .iter()
                .map(|row| convert_bigquery_row(row, &self.native_types))
                .collect::<Result<VecDeque<_>>>()?;
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Native type names per column, in schema order.
fn schema_field_names(schema: Option<&TableSchema>) -> Vec<String> {
    schema
        .and_then(|s| s.fields.as_ref())
        .map(|fields| fields.iter().map(native_type_name).collect())
        .unwrap_or_default()
}

fn native_type_name(field: &TableFieldSchema) -> String {
    // The model serializes field types to their REST names ("INTEGER", ...).
    serde_json::to_value(&field.r#type)
        .ok()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_default()
}

fn convert_bigquery_schema(schema: Option<&TableSchema>) -> Schema {
    schema
        .and_then(|s| s.fields.as_ref())
        .map(|fields| {
            fields
                .iter()
                .map(|field| Field::new(field.name.clone(), bigquery_field_type(&native_type_name(field))))
                .collect()
        })
        .unwrap_or_default()
}

fn convert_bigquery_row(row: &TableRow, native_types: &[String]) -> Result<Row> {
    let cells = row.columns.as_deref().unwrap_or_default();
    let mut converted = Row::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        let native = native_types.get(i).map(String::as_str).unwrap_or_default();
        converted.push(convert_bigquery_value(cell.value.as_ref(), native)?);
    }

    Ok(converted)
}

fn convert_bigquery_value(raw: Option<&serde_json::Value>, native_type: &str) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    if raw.is_null() {
        return Ok(Value::Null);
    }

    // Scalars arrive as JSON strings regardless of type.
    let text = match raw {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    Ok(match native_type {
        "INTEGER" | "INT64" => Value::Integer(
            text.parse::<i64>()
                .with_context(|| format!("bad integer cell '{text}'"))?,
        ),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => Value::Number(
            text.parse::<f64>()
                .with_context(|| format!("bad numeric cell '{text}'"))?,
        ),
        "BOOLEAN" | "BOOL" => Value::Boolean(text == "true"),
        "TIMESTAMP" => {
            // epoch seconds with fraction, e.g. "1.136239445E9"
            let seconds = text
                .parse::<f64>()
                .with_context(|| format!("bad timestamp cell '{text}'"))?;
            let datetime = DateTime::<Utc>::from_timestamp_micros((seconds * 1_000_000.0) as i64)
                .ok_or_else(|| anyhow::anyhow!("timestamp out of range: {text}"))?;
            Value::String(datetime.format(TIMESTAMP_TZ_FORMAT).to_string())
        }
        "DATETIME" => {
            let naive = NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                .with_context(|| format!("bad datetime cell '{text}'"))?;
            Value::String(naive.format(TIMESTAMP_NTZ_FORMAT).to_string())
        }
        "JSON" => Value::Json(
            serde_json::from_str(&text).with_context(|| format!("bad json cell '{text}'"))?,
        ),
        _ => Value::String(text),
    })
}

pub(crate) fn bigquery_field_type(bigquery_type: &str) -> FieldType {
    match bigquery_type.to_uppercase().as_str() {
        "INTEGER" | "INT64" => FieldType::Integer,
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => FieldType::Number,
        "BOOLEAN" | "BOOL" => FieldType::Boolean,
        // BigQuery timestamps are datetimes with timezone information
        "TIMESTAMP" => FieldType::DateTimeTz,
        "JSON" => FieldType::Json,
        "DATE" => FieldType::Date,
        // BigQuery times and datetimes carry no timezone
        "TIME" => FieldType::TimeNtz,
        "DATETIME" => FieldType::DateTimeNtz,
        _ => FieldType::String,
    }
}

/// Canonical field type -> load-schema type for the explicit CSV schema.
fn bigquery_load_type(
    field_type: FieldType,
) -> gcp_bigquery_client::model::field_type::FieldType {
    use gcp_bigquery_client::model::field_type::FieldType as BqType;

    match field_type {
        FieldType::Integer => BqType::Integer,
        FieldType::Number => BqType::Numeric,
        FieldType::Boolean => BqType::Boolean,
        FieldType::Timestamp | FieldType::DateTimeTz => BqType::Timestamp,
        FieldType::DateTimeNtz => BqType::Datetime,
        FieldType::Json => BqType::Json,
        FieldType::Date => BqType::Date,
        FieldType::TimeTz | FieldType::TimeNtz => BqType::Time,
        _ => BqType::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_table_matches_backend_names() {
        assert_eq!(bigquery_field_type("INT64"), FieldType::Integer);
        assert_eq!(bigquery_field_type("TIMESTAMP"), FieldType::DateTimeTz);
        assert_eq!(bigquery_field_type("DATETIME"), FieldType::DateTimeNtz);
        assert_eq!(bigquery_field_type("TIME"), FieldType::TimeNtz);
        assert_eq!(bigquery_field_type("GEOGRAPHY"), FieldType::String);
        assert_eq!(bigquery_field_type("json"), FieldType::Json);
    }

    #[test]
    fn timestamp_cells_normalize_to_canonical_format() {
        let raw = serde_json::Value::String("1136239445.0".to_string());
        let value = convert_bigquery_value(Some(&raw), "TIMESTAMP").unwrap();
        assert_eq!(
            value,
            Value::String("2006-01-02 22:04:05.000+00:00".to_string())
        );
    }

    #[test]
    fn datetime_cells_normalize_to_canonical_format() {
        let raw = serde_json::Value::String("2006-01-02T15:04:05".to_string());
        let value = convert_bigquery_value(Some(&raw), "DATETIME").unwrap();
        assert_eq!(value, Value::String("2006-01-02 15:04:05.000".to_string()));
    }

    #[test]
    fn integer_and_json_cells_parse_typed() {
        let raw = serde_json::Value::String("42".to_string());
        assert_eq!(
            convert_bigquery_value(Some(&raw), "INTEGER").unwrap(),
            Value::Integer(42)
        );

        let raw = serde_json::Value::String("{\"hello\":123}".to_string());
        assert_eq!(
            convert_bigquery_value(Some(&raw), "JSON").unwrap(),
            Value::Json(serde_json::json!({"hello": 123}))
        );
    }

    #[test]
    fn missing_cells_are_null() {
        assert_eq!(convert_bigquery_value(None, "STRING").unwrap(), Value::Null);
        assert_eq!(
            convert_bigquery_value(Some(&serde_json::Value::Null), "INTEGER").unwrap(),
            Value::Null
        );
    }
}
