//! MongoDB source connector.
//!
//! The document store guarantees neither field order nor field presence, so
//! rows are rewritten into field-mapping order through a name-to-value map
//! before they enter the pipeline.

use anyhow::{Context, Result};
use chrono::DateTime;
use fabra_crypto::CryptoService;
use fabra_data::{customer_visible, FieldType, Row, Schema, Value, TIMESTAMP_TZ_FORMAT};
use fabra_db::views::{FieldMappingView, FullConnection, ObjectView, SyncView};
use fabra_query::{MongoDbApiClient, MongoQuery};
use mongodb::bson::{doc, Bson, Document};
use tokio::sync::mpsc;

use crate::{
    source_cursor_field_type, Connector, DestinationOptions, ReadOutput, WriteOutput,
    READ_BATCH_SIZE,
};

pub struct MongoDbConnector {
    client: MongoDbApiClient,
}

impl MongoDbConnector {
    pub fn from_connection(
        connection: &FullConnection,
        crypto: &dyn CryptoService,
    ) -> Result<Self> {
        let password_ciphertext = connection
            .password
            .as_deref()
            .ok_or_else(|| customer_visible("MongoDB connection is missing credentials"))?;
        let password = crypto
            .decrypt_connection_credentials(password_ciphertext)
            .context("decrypting MongoDB credentials")?;

        Ok(Self {
            client: MongoDbApiClient {
                username: connection
                    .username
                    .clone()
                    .ok_or_else(|| customer_visible("MongoDB connection must have username defined"))?,
                password,
                host: connection
                    .host
                    .clone()
                    .ok_or_else(|| customer_visible("MongoDB connection must have host defined"))?,
                connection_options: connection.connection_options.clone().unwrap_or_default(),
            },
        })
    }
}

#[async_trait::async_trait]
impl Connector for MongoDbConnector {
    async fn read(
        &self,
        _source_connection: &FullConnection,
        sync: &SyncView,
        field_mappings: &[FieldMappingView],
        rows: &mpsc::Sender<Vec<Row>>,
    ) -> Result<ReadOutput> {
        let read_query = build_find_query(sync, field_mappings)?;
        let mut iterator = self
            .client
            .find_iterator(&read_query)
            .await
            .context("getting iterator")?;

        let schema = iterator.schema().clone();
        let mut batch: Vec<Row> = Vec::new();
        let mut last_row: Option<Row> = None;

        while let Some(row) = iterator.next_row().await.context("iterating data")? {
            let reordered = reorder_row(row, &schema, field_mappings);
            batch.push(reordered);
            if batch.len() == READ_BATCH_SIZE {
                last_row = batch.last().cloned();
                rows.send(std::mem::take(&mut batch))
                    .await
                    .context("row channel closed")?;
            }
        }

        if !batch.is_empty() {
            last_row = batch.last().cloned();
            rows.send(batch).await.context("row channel closed")?;
        }

        // rows were reordered, so cursor lookup goes through the mappings
        let cursor_position = new_cursor_position(last_row.as_ref(), field_mappings, sync);
        Ok(ReadOutput { cursor_position })
    }

    async fn write(
        &self,
        _destination_connection: &FullConnection,
        _destination_options: &DestinationOptions,
        _object: &ObjectView,
        _sync: &SyncView,
        _field_mappings: &[FieldMappingView],
        _rows: &mut mpsc::Receiver<Vec<Row>>,
    ) -> Result<WriteOutput> {
        Err(customer_visible("mongodb destination not implemented"))
    }
}

/// Translates the sync into a find request: database = namespace,
/// collection = table, projection of exactly the mapped fields without the
/// document id, ascending cursor sort, and a strict `$gt` filter when the
/// run resumes from a stored cursor.
fn build_find_query(sync: &SyncView, field_mappings: &[FieldMappingView]) -> Result<MongoQuery> {
    let database = sync
        .namespace
        .clone()
        .ok_or_else(|| customer_visible("sync must define a namespace"))?;
    let collection = sync
        .table_name
        .clone()
        .ok_or_else(|| customer_visible("sync must define a table"))?;

    let mut projection = doc! { "_id": 0 };
    for field_mapping in field_mappings {
        projection.insert(field_mapping.source_field_name.as_str(), 1);
    }

    let mut query = MongoQuery {
        database,
        collection,
        filter: Document::new(),
        projection,
        sort: None,
    };

    if sync.sync_mode.uses_cursor() {
        let cursor_field = sync
            .source_cursor_field
            .as_deref()
            .ok_or_else(|| customer_visible("incremental sync must define a cursor field"))?;

        query.sort = Some(doc! { cursor_field: 1 });

        if let Some(cursor_position) = &sync.cursor_position {
            let cursor_field_type = source_cursor_field_type(cursor_field, field_mappings)
                .context("getting source cursor field type")?;

            let comparison: Bson = match cursor_field_type {
                FieldType::DateTimeTz => {
                    let parsed =
                        DateTime::parse_from_str(cursor_position, TIMESTAMP_TZ_FORMAT)
                            .context("parsing cursor position")?;
                    Bson::DateTime(mongodb::bson::DateTime::from_chrono(parsed))
                }
                _ => Bson::String(cursor_position.clone()),
            };

            // TODO: allow choosing other comparison operators
            query.filter = doc! { cursor_field: { "$gt": comparison } };
        }
    }

    Ok(query)
}

/// Rewrites a schema-ordered row into field-mapping order. Fields the
/// mapping names but the document lacks read as null.
fn reorder_row(row: Row, schema: &Schema, field_mappings: &[FieldMappingView]) -> Row {
    let by_name: std::collections::HashMap<&str, &Value> = schema
        .iter()
        .zip(row.iter())
        .map(|(field, value)| (field.name.as_str(), value))
        .collect();

    field_mappings
        .iter()
        .map(|fm| {
            by_name
                .get(fm.source_field_name.as_str())
                .map(|v| (*v).clone())
                .unwrap_or(Value::Null)
        })
        .collect()
}

/// Cursor token from the last row. Datetime cursors keep the canonical
/// tz-aware form unquoted so the next run can re-parse them; the quoted
/// form is reserved for types that re-embed in SQL.
fn new_cursor_position(
    last_row: Option<&Row>,
    field_mappings: &[FieldMappingView],
    sync: &SyncView,
) -> Option<String> {
    let cursor_field = sync.source_cursor_field.as_deref()?;
    let last_row = last_row?;

    let (position, field_mapping) = field_mappings
        .iter()
        .enumerate()
        .find(|(_, fm)| fm.source_field_name == cursor_field)?;

    let value = last_row.get(position)?;
    match field_mapping.source_field_type {
        FieldType::Integer | FieldType::Number | FieldType::Timestamp | FieldType::DateTimeTz => {
            Some(value.to_string())
        }
        _ => Some(format!("'{value}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabra_data::Field;
    use fabra_db::models::{SyncMode, SyncStatus};

    fn test_sync(mode: SyncMode) -> SyncView {
        SyncView {
            id: 1,
            organization_id: 1,
            status: SyncStatus::Active,
            end_customer_id: "abc123".to_string(),
            display_name: "test".to_string(),
            source_id: 1,
            object_id: 1,
            namespace: Some("appdb".to_string()),
            table_name: Some("events".to_string()),
            custom_join: None,
            cursor_position: None,
            source_cursor_field: None,
            source_primary_key: None,
            sync_mode: mode,
            recurring: false,
            frequency: None,
            frequency_units: None,
        }
    }

    fn mapping(name: &str, field_type: FieldType) -> FieldMappingView {
        FieldMappingView {
            source_field_name: name.to_string(),
            source_field_type: field_type,
            destination_field_id: 1,
            destination_field_name: name.to_string(),
            destination_field_type: field_type,
            is_json_field: false,
        }
    }

    #[test]
    fn projection_lists_mapped_fields_and_drops_id() {
        let sync = test_sync(SyncMode::FullAppend);
        let mappings = vec![
            mapping("name", FieldType::String),
            mapping("count", FieldType::Integer),
        ];

        let query = build_find_query(&sync, &mappings).unwrap();
        assert_eq!(query.database, "appdb");
        assert_eq!(query.collection, "events");
        assert_eq!(
            query.projection,
            doc! { "_id": 0, "name": 1, "count": 1 }
        );
        assert!(query.filter.is_empty());
        assert!(query.sort.is_none());
    }

    #[test]
    fn datetime_cursor_becomes_native_datetime_filter() {
        let mut sync = test_sync(SyncMode::IncrementalAppend);
        sync.source_cursor_field = Some("updated_at".to_string());
        sync.cursor_position = Some("2006-01-02 22:04:05.000+00:00".to_string());
        let mappings = vec![mapping("updated_at", FieldType::DateTimeTz)];

        let query = build_find_query(&sync, &mappings).unwrap();
        assert_eq!(query.sort, Some(doc! { "updated_at": 1 }));

        let filter = query.filter.get_document("updated_at").unwrap();
        let Bson::DateTime(dt) = filter.get("$gt").unwrap() else {
            panic!("expected a native datetime comparison");
        };
        assert_eq!(dt.timestamp_millis(), 1_136_239_445_000);
    }

    #[test]
    fn string_cursor_passes_through() {
        let mut sync = test_sync(SyncMode::IncrementalAppend);
        sync.source_cursor_field = Some("seq".to_string());
        sync.cursor_position = Some("41".to_string());
        let mappings = vec![mapping("seq", FieldType::Integer)];

        let query = build_find_query(&sync, &mappings).unwrap();
        assert_eq!(
            query.filter,
            doc! { "seq": { "$gt": "41" } }
        );
    }

    #[test]
    fn rows_reorder_into_mapping_order() {
        let schema: Schema = vec![
            Field::new("b", FieldType::Integer),
            Field::new("a", FieldType::String),
        ];
        let mappings = vec![
            mapping("a", FieldType::String),
            mapping("b", FieldType::Integer),
            mapping("c", FieldType::String),
        ];
        let row: Row = vec![Value::Integer(5), Value::String("x".into())];

        assert_eq!(
            reorder_row(row, &schema, &mappings),
            vec![Value::String("x".into()), Value::Integer(5), Value::Null]
        );
    }

    #[test]
    fn datetime_cursor_is_not_quoted() {
        let mut sync = test_sync(SyncMode::IncrementalAppend);
        sync.source_cursor_field = Some("updated_at".to_string());
        let mappings = vec![mapping("updated_at", FieldType::DateTimeTz)];
        let row: Row = vec![Value::String("2008-01-02 15:04:05.000+00:00".into())];

        assert_eq!(
            new_cursor_position(Some(&row), &mappings, &sync),
            Some("2008-01-02 15:04:05.000+00:00".to_string())
        );
    }
}
