// SQL reader scenarios: query construction, cursor bookkeeping, batching.
//
// The canned client asserts the exact query text the reader builds, so a
// drifting SELECT or cursor predicate fails loudly here.

mod support;

use fabra_connectors::{BigQueryConnector, Connector, ReadOutput, READ_BATCH_SIZE};
use fabra_data::{Row, Value};
use fabra_db::models::{ConnectionType, SyncMode};
use std::sync::Arc;
use support::*;
use tokio::sync::mpsc;

async fn drive_read(
    client: MockWarehouseClient,
    sync: fabra_db::views::SyncView,
) -> (ReadOutput, Vec<Row>, usize) {
    let connector = BigQueryConnector::new(Arc::new(client));
    let connection = test_connection(ConnectionType::BigQuery);
    let mappings = field_mappings();

    let (tx, mut rx) = mpsc::channel::<Vec<Row>>(1);
    let reader = tokio::spawn(async move {
        connector
            .read(&connection, &sync, &mappings, &tx)
            .await
    });

    let mut rows = Vec::new();
    let mut num_batches = 0;
    while let Some(batch) = rx.recv().await {
        assert!(batch.len() <= READ_BATCH_SIZE);
        rows.extend(batch);
        num_batches += 1;
    }

    let output = reader.await.unwrap().unwrap();
    (output, rows, num_batches)
}

#[tokio::test]
async fn reads_in_batches() {
    // a source bigger than one batch splits into exactly two
    let source_rows: Vec<Row> = (0..2 * READ_BATCH_SIZE as i64)
        .map(|i| vec![Value::Integer(i)])
        .collect();

    let client = MockWarehouseClient {
        expected_query: Some(
            "SELECT source_string,source_integer,source_boolean,source_datetime_tz,\
             source_datetime_ntz,source_json FROM namespace.table;"
                .to_string(),
        ),
        rows: source_rows.clone(),
        schema: vec![fabra_data::Field::new(
            "value",
            fabra_data::FieldType::Integer,
        )],
        ..Default::default()
    };

    let (output, rows, num_batches) = drive_read(client, test_sync(SyncMode::FullAppend)).await;

    assert_eq!(output.cursor_position, None);
    assert_eq!(rows.len(), source_rows.len());
    assert_eq!(num_batches, 2);
}

#[tokio::test]
async fn queries_for_first_cursor_correctly() {
    let mut sync = test_sync(SyncMode::IncrementalAppend);
    sync.source_cursor_field = Some("source_datetime_tz".to_string());

    let source_rows: Vec<Row> = (0..10)
        .map(|_| source_row("2006-01-02 15:04:05.000-07:00"))
        .collect();

    let client = MockWarehouseClient {
        expected_query: Some(
            "SELECT source_string,source_integer,source_boolean,source_datetime_tz,\
             source_datetime_ntz,source_json FROM namespace.table \
             ORDER BY source_datetime_tz ASC;"
                .to_string(),
        ),
        rows: source_rows.clone(),
        schema: source_schema(),
        ..Default::default()
    };

    let (output, rows, num_batches) = drive_read(client, sync).await;

    assert_eq!(
        output.cursor_position.as_deref(),
        Some("'2006-01-02 15:04:05.000-07:00'")
    );
    assert_eq!(rows, source_rows);
    assert_eq!(num_batches, 1);
}

#[tokio::test]
async fn queries_for_successive_cursors_correctly() {
    let mut sync = test_sync(SyncMode::IncrementalAppend);
    sync.source_cursor_field = Some("source_datetime_tz".to_string());
    sync.cursor_position = Some("'2007-01-02 15:04:05.000-07:00'".to_string());

    let source_rows = vec![source_row("2008-01-02 15:04:05.000-07:00")];

    let client = MockWarehouseClient {
        expected_query: Some(
            "SELECT source_string,source_integer,source_boolean,source_datetime_tz,\
             source_datetime_ntz,source_json FROM namespace.table \
             WHERE source_datetime_tz > '2007-01-02 15:04:05.000-07:00' \
             ORDER BY source_datetime_tz ASC;"
                .to_string(),
        ),
        rows: source_rows.clone(),
        schema: source_schema(),
        ..Default::default()
    };

    let (output, rows, num_batches) = drive_read(client, sync).await;

    assert_eq!(
        output.cursor_position.as_deref(),
        Some("'2008-01-02 15:04:05.000-07:00'")
    );
    assert_eq!(rows, source_rows);
    assert_eq!(num_batches, 1);
}

#[tokio::test]
async fn does_not_wrap_integer_cursor_in_quotes() {
    let mut sync = test_sync(SyncMode::IncrementalAppend);
    sync.source_cursor_field = Some("source_integer".to_string());
    sync.cursor_position = Some("1".to_string());

    let mut row = source_row("2006-01-02 15:04:05.000-07:00");
    row[1] = Value::Integer(2);

    let client = MockWarehouseClient {
        expected_query: Some(
            "SELECT source_string,source_integer,source_boolean,source_datetime_tz,\
             source_datetime_ntz,source_json FROM namespace.table \
             WHERE source_integer > 1 ORDER BY source_integer ASC;"
                .to_string(),
        ),
        rows: vec![row],
        schema: source_schema(),
        ..Default::default()
    };

    let (output, rows, num_batches) = drive_read(client, sync).await;

    assert_eq!(output.cursor_position.as_deref(), Some("2"));
    assert_eq!(rows.len(), 1);
    assert_eq!(num_batches, 1);
}
