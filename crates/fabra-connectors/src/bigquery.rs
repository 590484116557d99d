//! BigQuery connector: shared SQL read plus the staged-CSV write path.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use fabra_data::{customer_visible, FieldType, Row, Value};
use fabra_db::models::SyncMode;
use fabra_db::views::{FieldMappingView, FullConnection, ObjectView, SyncView};
use fabra_query::{LoadField, LoadOptions, StagingOptions, WarehouseClient, WriteDisposition};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::sql_source::read_sql_source;
use crate::{Connector, DestinationOptions, ReadOutput, WriteOutput};

pub struct BigQueryConnector {
    client: Arc<dyn WarehouseClient>,
}

impl BigQueryConnector {
    pub fn new(client: Arc<dyn WarehouseClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Connector for BigQueryConnector {
    async fn read(
        &self,
        _source_connection: &FullConnection,
        sync: &SyncView,
        field_mappings: &[FieldMappingView],
        rows: &mpsc::Sender<Vec<Row>>,
    ) -> Result<ReadOutput> {
        read_sql_source(self.client.as_ref(), sync, field_mappings, rows).await
    }

    async fn write(
        &self,
        _destination_connection: &FullConnection,
        destination_options: &DestinationOptions,
        object: &ObjectView,
        sync: &SyncView,
        field_mappings: &[FieldMappingView],
        rows: &mut mpsc::Receiver<Vec<Row>>,
    ) -> Result<WriteOutput> {
        // every staged object shares this run-unique prefix
        let object_prefix = Uuid::new_v4().to_string();
        let staging_reference = format!(
            "gs://{}/{}-*",
            destination_options.staging_bucket, object_prefix
        );

        let mut staged: Vec<StagingOptions> = Vec::new();
        let mut batch_num = 0usize;
        let mut rows_written = 0usize;

        let result = async {
            while let Some(batch) = rows.recv().await {
                rows_written += batch.len();
                let staging_options = StagingOptions {
                    bucket: destination_options.staging_bucket.clone(),
                    object: format!("{object_prefix}-{batch_num}"),
                };

                let csv = encode_csv_batch(&batch, field_mappings, object, sync)?;
                self.client
                    .stage_data(&csv, &staging_options)
                    .await
                    .context("staging batch")?;
                staged.push(staging_options);
                batch_num += 1;
            }

            if rows_written > 0 {
                let load_options = LoadOptions {
                    staging_reference: staging_reference.clone(),
                    schema: csv_load_schema(object)?,
                    write_disposition: write_disposition(sync.sync_mode),
                };
                self.client
                    .load_from_staging(
                        object.namespace.as_deref().ok_or_else(|| {
                            customer_visible("object must define a destination namespace")
                        })?,
                        object.table_name.as_deref().ok_or_else(|| {
                            customer_visible("object must define a destination table")
                        })?,
                        &load_options,
                    )
                    .await
                    .context("loading data from staging")?;
            }

            Ok(WriteOutput { rows_written })
        }
        .await;

        // always clean up the staging bucket, even when the run was
        // cancelled: the cleanup task is detached from this future
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            for staging_options in staged {
                if let Err(error) = client.cleanup_staging_data(&staging_options).await {
                    warn!(object = %staging_options.object, %error, "failed to clean up staged object");
                }
            }
        });

        result
    }
}

/// Encodes one batch into CSV lines in object-field order.
///
/// Token rules: null is the empty token; strings are double-quoted; JSON
/// (and merged `is_json_field` groups) is marshalled then double-quoted
/// with embedded quotes doubled; everything else is the bare textual form.
/// The trailing column is the end customer id, identical on every row.
fn encode_csv_batch(
    rows: &[Row],
    field_mappings: &[FieldMappingView],
    object: &ObjectView,
    sync: &SyncView,
) -> Result<String> {
    // count fields since several JSON mappings may share one destination;
    // omitted fields are skipped so indexes are positional in the output
    let mut num_fields = 0usize;
    let mut field_id_to_index: HashMap<i64, usize> = HashMap::new();
    for object_field in &object.object_fields {
        if !object_field.omit {
            field_id_to_index.insert(object_field.id, num_fields);
            num_fields += 1;
        }
    }

    // extra column for the end customer id
    num_fields += 1;

    let mut row_tokens: Vec<String> = vec![String::new(); num_fields];
    row_tokens[num_fields - 1] = sync.end_customer_id.clone();

    let mut lines: Vec<String> = Vec::with_capacity(rows.len());
    for row in rows {
        let mut json_groups: HashMap<usize, serde_json::Map<String, serde_json::Value>> =
            HashMap::new();

        for (i, value) in row.iter().enumerate() {
            let field_mapping = field_mappings
                .get(i)
                .ok_or_else(|| anyhow::anyhow!("row wider than field mappings"))?;
            let Some(&dest_index) = field_id_to_index.get(&field_mapping.destination_field_id)
            else {
                // mapped to an omitted field: never written
                continue;
            };

            if field_mapping.is_json_field {
                // collect raw values, nulls included, and merge per column
                json_groups
                    .entry(dest_index)
                    .or_default()
                    .insert(field_mapping.source_field_name.clone(), value.to_json());
            } else if value.is_null() {
                // the empty token reads back as null on load
                row_tokens[dest_index] = String::new();
            } else {
                row_tokens[dest_index] = match field_mapping.source_field_type {
                    FieldType::Json | FieldType::Array => csv_json_token(&value.to_json())?,
                    FieldType::String => format!("\"{value}\""),
                    _ => value.to_string(),
                };
            }
        }

        for (dest_index, group) in json_groups {
            row_tokens[dest_index] = csv_json_token(&serde_json::Value::Object(group))?;
        }

        lines.push(row_tokens.join(","));
    }

    Ok(lines.join("\n"))
}

/// JSON-bearing tokens are escaped the way the loader expects from CSV:
/// marshalled, then double-quoted with every quote doubled.
fn csv_json_token(value: &serde_json::Value) -> Result<String> {
    let marshalled = serde_json::to_string(value).context("marshalling json value")?;
    Ok(format!("\"{}\"", marshalled.replace('"', "\"\"")))
}

fn write_disposition(sync_mode: SyncMode) -> WriteDisposition {
    match sync_mode {
        SyncMode::FullOverwrite => WriteDisposition::Truncate,
        SyncMode::FullAppend => WriteDisposition::Append,
        SyncMode::IncrementalAppend => WriteDisposition::Append,
        // incremental update loads into a staging table that is truncated
        // each run, ahead of the merge into the destination
        SyncMode::IncrementalUpdate => WriteDisposition::Truncate,
    }
}

/// Explicit load schema: every non-omitted object field in order, then the
/// required end-customer-id column.
fn csv_load_schema(object: &ObjectView) -> Result<Vec<LoadField>> {
    let end_customer_id_field = object
        .end_customer_id_field
        .as_deref()
        .ok_or_else(|| customer_visible("object must define an end customer id column"))?;

    let mut schema: Vec<LoadField> = object
        .object_fields
        .iter()
        .filter(|of| !of.omit)
        .map(|of| LoadField {
            name: of.name.clone(),
            field_type: of.field_type,
            required: !of.optional,
        })
        .collect();

    schema.push(LoadField {
        name: end_customer_id_field.to_string(),
        field_type: FieldType::String,
        required: true,
    });

    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabra_db::models::{SyncStatus, TargetType};
    use fabra_db::views::ObjectFieldView;
    use serde_json::json;

    fn object_field(id: i64, name: &str, field_type: FieldType, omit: bool) -> ObjectFieldView {
        ObjectFieldView {
            id,
            name: name.to_string(),
            field_type,
            omit,
            optional: false,
            display_name: None,
            description: None,
        }
    }

    fn test_object(fields: Vec<ObjectFieldView>) -> ObjectView {
        ObjectView {
            id: 7,
            display_name: "users".to_string(),
            destination_id: 1,
            target_type: TargetType::SingleExisting,
            namespace: Some("namespace".to_string()),
            table_name: Some("table".to_string()),
            sync_mode: SyncMode::FullAppend,
            cursor_field: None,
            primary_key: None,
            end_customer_id_field: Some("end_customer_id".to_string()),
            recurring: false,
            frequency: None,
            frequency_units: None,
            object_fields: fields,
        }
    }

    fn test_sync() -> SyncView {
        SyncView {
            id: 1,
            organization_id: 1,
            status: SyncStatus::Active,
            end_customer_id: "abc123".to_string(),
            display_name: "test".to_string(),
            source_id: 1,
            object_id: 7,
            namespace: None,
            table_name: None,
            custom_join: None,
            cursor_position: None,
            source_cursor_field: None,
            source_primary_key: None,
            sync_mode: SyncMode::FullAppend,
            recurring: false,
            frequency: None,
            frequency_units: None,
        }
    }

    fn mapping(
        name: &str,
        field_type: FieldType,
        destination_field_id: i64,
        is_json_field: bool,
    ) -> FieldMappingView {
        FieldMappingView {
            source_field_name: name.to_string(),
            source_field_type: field_type,
            destination_field_id,
            destination_field_name: String::new(),
            destination_field_type: field_type,
            is_json_field,
        }
    }

    #[test]
    fn csv_line_matches_loader_dialect() {
        let object = test_object(vec![
            object_field(1, "string", FieldType::String, false),
            object_field(2, "integer", FieldType::Integer, false),
            object_field(3, "boolean", FieldType::Boolean, false),
            object_field(4, "datetime_tz", FieldType::DateTimeTz, false),
            object_field(5, "datetime_ntz", FieldType::DateTimeNtz, false),
            object_field(6, "json", FieldType::Json, false),
        ]);
        let mappings = vec![
            mapping("source_string", FieldType::String, 1, false),
            mapping("source_integer", FieldType::Integer, 2, false),
            mapping("source_boolean", FieldType::Boolean, 3, false),
            mapping("source_datetime_tz", FieldType::DateTimeTz, 4, false),
            mapping("source_datetime_ntz", FieldType::DateTimeNtz, 5, false),
            mapping("source_json", FieldType::Json, 6, false),
        ];
        let row: Row = vec![
            Value::String("string".into()),
            Value::Integer(2),
            Value::Boolean(false),
            Value::String("2006-01-02 15:04:05.000-07:00".into()),
            Value::String("2006-01-02 15:04:05.000".into()),
            Value::Json(json!({"hello": 123})),
        ];

        let csv = encode_csv_batch(&[row], &mappings, &object, &test_sync()).unwrap();
        assert_eq!(
            csv,
            "\"string\",2,false,2006-01-02 15:04:05.000-07:00,2006-01-02 15:04:05.000,\"{\"\"hello\"\":123}\",abc123"
        );
    }

    #[test]
    fn null_values_become_empty_tokens() {
        let object = test_object(vec![
            object_field(1, "string", FieldType::String, false),
            object_field(2, "integer", FieldType::Integer, false),
        ]);
        let mappings = vec![
            mapping("source_string", FieldType::String, 1, false),
            mapping("source_integer", FieldType::Integer, 2, false),
        ];
        let row: Row = vec![Value::Null, Value::Integer(4)];

        let csv = encode_csv_batch(&[row], &mappings, &object, &test_sync()).unwrap();
        assert_eq!(csv, ",4,abc123");
    }

    #[test]
    fn omitted_fields_never_reach_the_csv() {
        let object = test_object(vec![
            object_field(1, "kept", FieldType::String, false),
            object_field(2, "hidden", FieldType::String, true),
        ]);
        let mappings = vec![
            mapping("source_kept", FieldType::String, 1, false),
            mapping("source_hidden", FieldType::String, 2, false),
        ];
        let row: Row = vec![
            Value::String("kept".into()),
            Value::String("hidden".into()),
        ];

        let csv = encode_csv_batch(&[row], &mappings, &object, &test_sync()).unwrap();
        assert_eq!(csv, "\"kept\",abc123");
    }

    #[test]
    fn json_mappings_merge_into_one_column() {
        let object = test_object(vec![object_field(1, "payload", FieldType::Json, false)]);
        let mappings = vec![
            mapping("a", FieldType::String, 1, true),
            mapping("b", FieldType::Integer, 1, true),
        ];
        let row: Row = vec![Value::String("x".into()), Value::Integer(9)];

        let csv = encode_csv_batch(&[row], &mappings, &object, &test_sync()).unwrap();
        assert_eq!(csv, "\"{\"\"a\"\":\"\"x\"\",\"\"b\"\":9}\",abc123");
    }

    #[test]
    fn write_disposition_follows_sync_mode() {
        assert_eq!(
            write_disposition(SyncMode::FullOverwrite),
            WriteDisposition::Truncate
        );
        assert_eq!(
            write_disposition(SyncMode::FullAppend),
            WriteDisposition::Append
        );
        assert_eq!(
            write_disposition(SyncMode::IncrementalAppend),
            WriteDisposition::Append
        );
        assert_eq!(
            write_disposition(SyncMode::IncrementalUpdate),
            WriteDisposition::Truncate
        );
    }

    #[test]
    fn load_schema_appends_required_end_customer_column() {
        let object = test_object(vec![
            object_field(1, "kept", FieldType::String, false),
            object_field(2, "hidden", FieldType::Integer, true),
        ]);

        let schema = csv_load_schema(&object).unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema[0].name, "kept");
        assert_eq!(schema[1].name, "end_customer_id");
        assert_eq!(schema[1].field_type, FieldType::String);
        assert!(schema[1].required);
    }
}
