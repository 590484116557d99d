//! Shared SQL-generating reader for the warehouse and database sources.
//!
//! All SQL backends read the same way: build one SELECT over the mapped
//! source fields (or use the sync's custom join verbatim), scan it in
//! batches, and compute the next cursor from the last row. Only the client
//! underneath differs.

use anyhow::{Context, Result};
use fabra_data::{Row, RowIterator, Schema, Value};
use fabra_db::views::{FieldMappingView, FullConnection, ObjectView, SyncView};
use fabra_query::QueryClient;
use tokio::sync::mpsc;

use crate::{
    Connector, DestinationOptions, ReadOutput, WriteOutput, READ_BATCH_SIZE,
};

pub struct SqlSourceConnector {
    client: Box<dyn QueryClient>,
}

impl SqlSourceConnector {
    pub fn new(client: Box<dyn QueryClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Connector for SqlSourceConnector {
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
        _destination_options: &DestinationOptions,
        _object: &ObjectView,
        _sync: &SyncView,
        _field_mappings: &[FieldMappingView],
        _rows: &mut mpsc::Receiver<Vec<Row>>,
    ) -> Result<WriteOutput> {
        Err(fabra_data::customer_visible(
            "this connection type is not a supported destination",
        ))
    }
}

/// The read path shared by every SQL backend, BigQuery included.
pub(crate) async fn read_sql_source(
    client: &dyn QueryClient,
    sync: &SyncView,
    field_mappings: &[FieldMappingView],
    rows: &mpsc::Sender<Vec<Row>>,
) -> Result<ReadOutput> {
    let read_query = build_read_query(sync, field_mappings)?;
    let mut iterator = client
        .query_iterator(&read_query)
        .await
        .context("getting iterator")?;

    let last_row = stream_batches(iterator.as_mut(), rows).await?;
    let cursor_position = new_cursor_position(last_row.as_ref(), iterator.schema(), sync);

    Ok(ReadOutput { cursor_position })
}

/// Builds the SELECT for a sync. The cursor literal is embedded exactly as
/// stored: the stored token already carries quoting appropriate to its
/// type.
pub(crate) fn build_read_query(
    sync: &SyncView,
    field_mappings: &[FieldMappingView],
) -> Result<String> {
    let query = match &sync.custom_join {
        Some(custom_join) => custom_join.clone(),
        None => {
            let namespace = sync.namespace.as_deref().ok_or_else(|| {
                fabra_data::customer_visible("sync must define a namespace or a custom join")
            })?;
            let table_name = sync.table_name.as_deref().ok_or_else(|| {
                fabra_data::customer_visible("sync must define a table or a custom join")
            })?;

            let select_fields: Vec<&str> = field_mappings
                .iter()
                .map(|fm| fm.source_field_name.as_str())
                .collect();
            format!(
                "SELECT {} FROM {namespace}.{table_name}",
                select_fields.join(",")
            )
        }
    };

    if sync.sync_mode.uses_cursor() {
        let cursor_field = sync.source_cursor_field.as_deref().ok_or_else(|| {
            fabra_data::customer_visible("incremental sync must define a cursor field")
        })?;

        // TODO: allow choosing other comparison operators
        match &sync.cursor_position {
            Some(cursor_position) => Ok(format!(
                "{query} WHERE {cursor_field} > {cursor_position} ORDER BY {cursor_field} ASC;"
            )),
            None => Ok(format!("{query} ORDER BY {cursor_field} ASC;")),
        }
    } else {
        Ok(format!("{query};"))
    }
}

/// Accumulates scanned rows into batches of [`READ_BATCH_SIZE`] and pushes
/// them downstream, returning the final row of the scan.
pub(crate) async fn stream_batches(
    iterator: &mut dyn RowIterator,
    rows: &mpsc::Sender<Vec<Row>>,
) -> Result<Option<Row>> {
    let mut batch: Vec<Row> = Vec::new();
    let mut last_row: Option<Row> = None;

    while let Some(row) = iterator.next_row().await.context("iterating data")? {
        batch.push(row);
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

    Ok(last_row)
}

/// The next cursor is the textual form of the cursor column in the last
/// row: rows are sorted by the cursor field, so the last row carries the
/// greatest value seen. Integer and number cursors stay bare; every other
/// type is single-quoted for re-embedding in a SQL predicate.
pub(crate) fn new_cursor_position(
    last_row: Option<&Row>,
    schema: &Schema,
    sync: &SyncView,
) -> Option<String> {
    let cursor_field = sync.source_cursor_field.as_deref()?;
    let last_row = last_row?;

    let (position, field) = schema
        .iter()
        .enumerate()
        .find(|(_, field)| field.name == cursor_field)?;

    let value: &Value = last_row.get(position)?;
    if field.field_type.unquoted_cursor() {
        Some(value.to_string())
    } else {
        Some(format!("'{value}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabra_data::{Field, FieldType};
    use fabra_db::models::{SyncMode, SyncStatus};

    fn test_sync(mode: SyncMode) -> SyncView {
        SyncView {
            id: 1,
            organization_id: 1,
            status: SyncStatus::Active,
            end_customer_id: "abc123".to_string(),
            display_name: "test sync".to_string(),
            source_id: 1,
            object_id: 1,
            namespace: Some("namespace".to_string()),
            table_name: Some("table".to_string()),
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
            destination_field_id: 0,
            destination_field_name: name.trim_start_matches("source_").to_string(),
            destination_field_type: field_type,
            is_json_field: false,
        }
    }

    #[test]
    fn full_refresh_query_has_no_cursor_clauses() {
        let sync = test_sync(SyncMode::FullAppend);
        let mappings = vec![
            mapping("source_string", FieldType::String),
            mapping("source_integer", FieldType::Integer),
        ];
        assert_eq!(
            build_read_query(&sync, &mappings).unwrap(),
            "SELECT source_string,source_integer FROM namespace.table;"
        );
    }

    #[test]
    fn custom_join_is_used_verbatim() {
        let mut sync = test_sync(SyncMode::FullAppend);
        sync.custom_join = Some("SELECT a, b FROM ns.t1 JOIN ns.t2 ON t1.id = t2.id".to_string());
        assert_eq!(
            build_read_query(&sync, &[]).unwrap(),
            "SELECT a, b FROM ns.t1 JOIN ns.t2 ON t1.id = t2.id;"
        );
    }

    #[test]
    fn first_cursor_orders_without_predicate() {
        let mut sync = test_sync(SyncMode::IncrementalAppend);
        sync.source_cursor_field = Some("source_datetime_tz".to_string());
        let mappings = vec![mapping("source_datetime_tz", FieldType::DateTimeTz)];
        assert_eq!(
            build_read_query(&sync, &mappings).unwrap(),
            "SELECT source_datetime_tz FROM namespace.table ORDER BY source_datetime_tz ASC;"
        );
    }

    #[test]
    fn successive_cursor_embeds_stored_literal() {
        let mut sync = test_sync(SyncMode::IncrementalAppend);
        sync.source_cursor_field = Some("source_datetime_tz".to_string());
        sync.cursor_position = Some("'2007-01-02 15:04:05.000-07:00'".to_string());
        let mappings = vec![mapping("source_datetime_tz", FieldType::DateTimeTz)];
        assert_eq!(
            build_read_query(&sync, &mappings).unwrap(),
            "SELECT source_datetime_tz FROM namespace.table \
             WHERE source_datetime_tz > '2007-01-02 15:04:05.000-07:00' \
             ORDER BY source_datetime_tz ASC;"
        );
    }

    #[test]
    fn integer_cursor_stays_bare() {
        let schema: Schema = vec![Field::new("source_integer", FieldType::Integer)];
        let mut sync = test_sync(SyncMode::IncrementalAppend);
        sync.source_cursor_field = Some("source_integer".to_string());

        let row: Row = vec![Value::Integer(2)];
        assert_eq!(
            new_cursor_position(Some(&row), &schema, &sync),
            Some("2".to_string())
        );
    }

    #[test]
    fn datetime_cursor_is_quoted() {
        let schema: Schema = vec![Field::new("source_datetime_tz", FieldType::DateTimeTz)];
        let mut sync = test_sync(SyncMode::IncrementalAppend);
        sync.source_cursor_field = Some("source_datetime_tz".to_string());

        let row: Row = vec![Value::String("2008-01-02 15:04:05.000-07:00".to_string())];
        assert_eq!(
            new_cursor_position(Some(&row), &schema, &sync),
            Some("'2008-01-02 15:04:05.000-07:00'".to_string())
        );
    }

    #[test]
    fn no_rows_means_no_cursor() {
        let schema: Schema = vec![Field::new("source_integer", FieldType::Integer)];
        let mut sync = test_sync(SyncMode::IncrementalAppend);
        sync.source_cursor_field = Some("source_integer".to_string());
        assert_eq!(new_cursor_position(None, &schema, &sync), None);
    }
}
