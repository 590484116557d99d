//! Snowflake source client.
//!
//! The driver returns whole result payloads: Arrow record batches for data
//! queries, JSON for metadata queries (`SHOW ...`). Batches are converted
//! column-wise into canonical rows; Snowflake encodes tz-aware timestamps
//! as structs of epoch parts, which are rebuilt here and formatted
//! canonically.

use anyhow::{Context, Result};
use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use fabra_data::{
    Field, FieldType, QueryResults, Row, RowIterator, Schema, Value, TIMESTAMP_NTZ_FORMAT,
    TIMESTAMP_TZ_FORMAT,
};
use serde::Deserialize;
use snowflake_api::{QueryResult, SnowflakeApi};

use crate::{visible, BufferedIterator, QueryClient};

#[derive(Debug, Clone)]
pub struct SnowflakeApiClient {
    pub username: String,
    pub password: String,
    pub warehouse_name: String,
    pub database_name: String,
    pub role: String,
    pub host: String,
}

/// `SHOW COLUMNS` packs the column type into a JSON blob.
#[derive(Debug, Deserialize)]
struct SnowflakeColumnSchema {
    #[serde(rename = "type")]
    column_type: String,
}

impl SnowflakeApiClient {
    fn open_connection(&self) -> Result<SnowflakeApi> {
        // account identifier is the first label of the host
        let account = self.host.split('.').next().unwrap_or(&self.host);

        SnowflakeApi::with_password_auth(
            account,
            Some(&self.warehouse_name),
            Some(&self.database_name),
            None,
            &self.username,
            if self.role.is_empty() { None } else { Some(&self.role) },
            &self.password,
        )
        .map_err(visible)
        .context("opening snowflake connection")
    }

    async fn exec(&self, query: &str) -> Result<QueryResults> {
        let api = self.open_connection()?;
        let result = api.exec(query).await.map_err(visible).context("running query")?;

        match result {
            QueryResult::Arrow(batches) => convert_arrow_batches(&batches),
            QueryResult::Json(json) => convert_json_result(&json),
            QueryResult::Empty => Ok(QueryResults {
                schema: Schema::new(),
                data: Vec::new(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl QueryClient for SnowflakeApiClient {
    async fn query_iterator(&self, query: &str) -> Result<Box<dyn RowIterator>> {
        let results = self.exec(query).await?;
        Ok(Box::new(BufferedIterator::new(results.schema, results.data)))
    }

    async fn run_query(&self, query: &str) -> Result<QueryResults> {
        self.exec(query).await
    }

    async fn get_namespaces(&self) -> Result<Vec<String>> {
        let results = self.exec("SHOW TERSE SCHEMAS").await?;
        // SHOW TERSE output: created_on, name, ...
        Ok(results
            .data
            .iter()
            .filter(|row| row.len() > 1 && !row[1].is_null())
            .map(|row| row[1].to_string())
            .collect())
    }

    async fn get_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let results = self.exec(&format!("SHOW TERSE TABLES IN {namespace}")).await?;
        Ok(results
            .data
            .iter()
            .filter(|row| row.len() > 1 && !row[1].is_null())
            .map(|row| row[1].to_string())
            .collect())
    }

    async fn get_schema(&self, namespace: &str, table_name: &str) -> Result<Schema> {
        let results = self
            .exec(&format!("SHOW COLUMNS IN {namespace}.{table_name}"))
            .await?;

        // SHOW COLUMNS output: table_name, schema_name, column_name, data_type(json), ...
        let mut schema = Schema::new();
        for row in &results.data {
            if row.len() < 4 || row[2].is_null() {
                continue;
            }

            let column: SnowflakeColumnSchema = serde_json::from_str(&row[3].to_string())
                .context("unmarshalling column type")?;
            schema.push(Field::new(
                row[2].to_string(),
                snowflake_field_type(&column.column_type),
            ));
        }

        Ok(schema)
    }

    async fn get_field_values(
        &self,
        namespace: &str,
        table_name: &str,
        field_name: &str,
    ) -> Result<Vec<Value>> {
        let results = self
            .exec(&format!(
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

fn convert_json_result(json: &snowflake_api::JsonResult) -> Result<QueryResults> {
    // Metadata queries deliver every cell as text; the schema carries names
    // only as far as we need them.
    let schema: Schema = json
        .schema
        .iter()
        .map(|field| Field::new(field.name.clone(), FieldType::String))
        .collect();

    let rows = json
        .value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("unexpected json result shape"))?;

    let data = rows
        .iter()
        .map(|row| {
            let cells = row
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("unexpected json row shape"))?;
            Ok(cells
                .iter()
                .map(|cell| match cell {
                    serde_json::Value::Null => Value::Null,
                    serde_json::Value::String(s) => Value::String(s.clone()),
                    other => Value::String(other.to_string()),
                })
                .collect())
        })
        .collect::<Result<Vec<Row>>>()?;

    Ok(QueryResults { schema, data })
}

fn convert_arrow_batches(batches: &[RecordBatch]) -> Result<QueryResults> {
    let Some(first) = batches.first() else {
        return Ok(QueryResults {
            schema: Schema::new(),
            data: Vec::new(),
        });
    };

    let schema: Schema = first
        .schema()
        .fields()
        .iter()
        .map(|field| Field::new(field.name().clone(), arrow_canonical_type(field)))
        .collect();

    let mut data = Vec::new();
    for batch in batches {
        let columns: Vec<Vec<Value>> = batch
            .columns()
            .iter()
            .zip(schema.iter())
            .map(|(column, field)| convert_arrow_column(column.as_ref(), field.field_type))
            .collect::<Result<_>>()?;

        for row_index in 0..batch.num_rows() {
            data.push(columns.iter().map(|col| col[row_index].clone()).collect());
        }
    }

    Ok(QueryResults { schema, data })
}

/// Canonical type from the Snowflake logical type when present, otherwise
/// from the physical Arrow type.
fn arrow_canonical_type(field: &arrow::datatypes::Field) -> FieldType {
    if let Some(logical) = field.metadata().get("logicalType") {
        let scale = field
            .metadata()
            .get("scale")
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        return match (logical.to_uppercase().as_str(), scale) {
            ("FIXED", 0) => FieldType::Integer,
            ("FIXED", _) => FieldType::Number,
            (other, _) => snowflake_field_type(other),
        };
    }

    match field.data_type() {
        DataType::Boolean => FieldType::Boolean,
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => FieldType::Integer,
        DataType::Float16 | DataType::Float32 | DataType::Float64 | DataType::Decimal128(_, _) => {
            FieldType::Number
        }
        DataType::Date32 | DataType::Date64 => FieldType::Date,
        DataType::Time32(_) | DataType::Time64(_) => FieldType::TimeNtz,
        DataType::Timestamp(_, Some(_)) => FieldType::DateTimeTz,
        DataType::Timestamp(_, None) => FieldType::DateTimeNtz,
        DataType::Struct(_) => FieldType::DateTimeTz,
        _ => FieldType::String,
    }
}

fn convert_arrow_column(column: &dyn Array, canonical: FieldType) -> Result<Vec<Value>> {
    let values = match canonical {
        FieldType::Integer => {
            let casted = cast(column, &DataType::Int64).context("casting integer column")?;
            let ints = casted.as_primitive::<Int64Type>();
            (0..ints.len())
                .map(|i| {
                    if ints.is_null(i) {
                        Value::Null
                    } else {
                        Value::Integer(ints.value(i))
                    }
                })
                .collect()
        }
        FieldType::Number => {
            let casted = cast(column, &DataType::Float64).context("casting numeric column")?;
            let floats = casted.as_primitive::<Float64Type>();
            (0..floats.len())
                .map(|i| {
                    if floats.is_null(i) {
                        Value::Null
                    } else {
                        Value::Number(floats.value(i))
                    }
                })
                .collect()
        }
        FieldType::Boolean => {
            let bools = column.as_boolean();
            (0..bools.len())
                .map(|i| {
                    if bools.is_null(i) {
                        Value::Null
                    } else {
                        Value::Boolean(bools.value(i))
                    }
                })
                .collect()
        }
        FieldType::DateTimeTz => convert_arrow_timestamps(column, true)?,
        FieldType::DateTimeNtz | FieldType::Timestamp => convert_arrow_timestamps(column, false)?,
        FieldType::Json | FieldType::Array => {
            let casted = cast(column, &DataType::Utf8).context("casting variant column")?;
            let strings = casted.as_string::<i32>();
            (0..strings.len())
                .map(|i| {
                    if strings.is_null(i) {
                        Value::Null
                    } else {
                        serde_json::from_str(strings.value(i))
                            .map(Value::Json)
                            .unwrap_or_else(|_| Value::String(strings.value(i).to_string()))
                    }
                })
                .collect()
        }
        _ => {
            let casted = cast(column, &DataType::Utf8).context("casting column to text")?;
            let strings = casted.as_string::<i32>();
            (0..strings.len())
                .map(|i| {
                    if strings.is_null(i) {
                        Value::Null
                    } else {
                        Value::String(strings.value(i).to_string())
                    }
                })
                .collect()
        }
    };

    Ok(values)
}

/// Timestamps arrive either as plain Arrow timestamps or, for tz-aware
/// columns, as a struct of epoch seconds + fraction.
fn convert_arrow_timestamps(column: &dyn Array, with_tz: bool) -> Result<Vec<Value>> {
    let format = if with_tz {
        TIMESTAMP_TZ_FORMAT
    } else {
        TIMESTAMP_NTZ_FORMAT
    };

    if let DataType::Struct(_) = column.data_type() {
        let parts = column.as_struct();
        let epochs = cast(
            parts
                .column_by_name("epoch")
                .ok_or_else(|| anyhow::anyhow!("timestamp struct without epoch"))?,
            &DataType::Int64,
        )?;
        let epochs = epochs.as_primitive::<Int64Type>();
        let fractions = parts
            .column_by_name("fraction")
            .map(|f| cast(f, &DataType::Int64))
            .transpose()?;

        return (0..epochs.len())
            .map(|i| {
                if epochs.is_null(i) {
                    return Ok(Value::Null);
                }
                let nanos = fractions
                    .as_ref()
                    .map(|f| f.as_primitive::<Int64Type>().value(i))
                    .unwrap_or(0);
                let datetime = DateTime::<Utc>::from_timestamp(epochs.value(i), nanos as u32)
                    .ok_or_else(|| anyhow::anyhow!("timestamp out of range"))?;
                Ok(if with_tz {
                    Value::String(datetime.format(format).to_string())
                } else {
                    Value::String(datetime.naive_utc().format(format).to_string())
                })
            })
            .collect();
    }

    let DataType::Timestamp(unit, _) = column.data_type() else {
        anyhow::bail!("expected timestamp column, got {:?}", column.data_type());
    };

    let casted = cast(column, &DataType::Timestamp(unit.clone(), None))?;
    let micros = cast(&casted, &DataType::Timestamp(TimeUnit::Microsecond, None))?;
    let micros = micros.as_primitive::<arrow::datatypes::TimestampMicrosecondType>();

    (0..micros.len())
        .map(|i| {
            if micros.is_null(i) {
                return Ok(Value::Null);
            }
            let datetime = DateTime::<Utc>::from_timestamp_micros(micros.value(i))
                .ok_or_else(|| anyhow::anyhow!("timestamp out of range"))?;
            Ok(if with_tz {
                Value::String(datetime.format(format).to_string())
            } else {
                Value::String(datetime.naive_utc().format(format).to_string())
            })
        })
        .collect()
}

fn snowflake_field_type(snowflake_type: &str) -> FieldType {
    match snowflake_type.to_uppercase().as_str() {
        "BIT" | "BOOLEAN" => FieldType::Boolean,
        "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => FieldType::Integer,
        "REAL" | "DOUBLE" | "DECIMAL" | "NUMERIC" | "FLOAT" | "FIXED" => FieldType::Number,
        "DATE" => FieldType::Date,
        "TIME" => FieldType::TimeNtz,
        "TIMESTAMP_TZ" | "TIMESTAMP_LTZ" => FieldType::DateTimeTz,
        "DATETIME" | "TIMESTAMP" | "TIMESTAMP_NTZ" => FieldType::DateTimeNtz,
        "VARIANT" | "OBJECT" => FieldType::Json,
        "ARRAY" => FieldType::Array,
        "TEXT" => FieldType::String,
        _ => FieldType::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_table_matches_backend_names() {
        assert_eq!(snowflake_field_type("VARIANT"), FieldType::Json);
        assert_eq!(snowflake_field_type("TIMESTAMP_TZ"), FieldType::DateTimeTz);
        assert_eq!(snowflake_field_type("TIMESTAMP_NTZ"), FieldType::DateTimeNtz);
        assert_eq!(snowflake_field_type("FIXED"), FieldType::Number);
        assert_eq!(snowflake_field_type("VARCHAR"), FieldType::String);
    }

    #[test]
    fn arrow_batches_convert_row_major() {
        use arrow::array::{Int64Array, StringArray};
        use std::sync::Arc;

        let batch = RecordBatch::try_from_iter(vec![
            (
                "id",
                Arc::new(Int64Array::from(vec![Some(1), Some(2)])) as arrow::array::ArrayRef,
            ),
            (
                "name",
                Arc::new(StringArray::from(vec![Some("a"), None])) as arrow::array::ArrayRef,
            ),
        ])
        .unwrap();

        let results = convert_arrow_batches(&[batch]).unwrap();
        assert_eq!(results.schema[0].field_type, FieldType::Integer);
        assert_eq!(results.schema[1].field_type, FieldType::String);
        assert_eq!(
            results.data,
            vec![
                vec![Value::Integer(1), Value::String("a".into())],
                vec![Value::Integer(2), Value::Null],
            ]
        );
    }
}
