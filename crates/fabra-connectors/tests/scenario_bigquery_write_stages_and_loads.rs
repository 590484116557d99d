// BigQuery write path: CSV encoding, staging, load, cleanup.

mod support;

use fabra_connectors::{BigQueryConnector, Connector, DestinationOptions};
use fabra_data::{Row, Value};
use fabra_db::models::{ConnectionType, SyncMode, TargetType};
use fabra_query::WriteDisposition;
use std::sync::Arc;
use support::*;
use tokio::sync::mpsc;

fn csv_row() -> Row {
    vec![
        Value::String("string".into()),
        Value::Integer(2),
        Value::Boolean(false),
        Value::String("2006-01-02 15:04:05.000-07:00".into()),
        Value::String("2006-01-02 15:04:05.000".into()),
        Value::Json(serde_json::json!({"hello": 123})),
    ]
}

#[tokio::test]
async fn writes_one_staged_batch_and_loads_it() {
    let client = Arc::new(MockWarehouseClient::default());
    let connector = BigQueryConnector::new(Arc::clone(&client));

    let connection = test_connection(ConnectionType::BigQuery);
    let options = DestinationOptions {
        staging_bucket: "staging".to_string(),
    };
    let object = test_object(TargetType::SingleExisting, object_fields());
    let sync = test_sync(SyncMode::FullAppend);
    let mappings = field_mappings();

    let (tx, mut rx) = mpsc::channel::<Vec<Row>>(1);
    tx.send((0..10).map(|_| csv_row()).collect()).await.unwrap();
    drop(tx);

    let output = connector
        .write(&connection, &options, &object, &sync, &mappings, &mut rx)
        .await
        .unwrap();

    assert_eq!(output.rows_written, 10);

    // strings quoted; integers, booleans and datetimes bare; json escaped
    let expected_line = "\"string\",2,false,2006-01-02 15:04:05.000-07:00,\
                         2006-01-02 15:04:05.000,\"{\"\"hello\"\":123}\",abc123";
    let expected_csv = vec![expected_line; 10].join("\n");

    let staged = client.staged.lock().unwrap().clone();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].0.bucket, "staging");
    assert!(staged[0].0.object.ends_with("-0"));
    assert_eq!(staged[0].1, expected_csv);

    let loads = client.loads.lock().unwrap().clone();
    assert_eq!(loads.len(), 1);
    let (namespace, table, load_options) = &loads[0];
    assert_eq!(namespace, "namespace");
    assert_eq!(table, "table");
    assert_eq!(load_options.write_disposition, WriteDisposition::Append);
    assert!(load_options.staging_reference.starts_with("gs://staging/"));
    assert!(load_options.staging_reference.ends_with("-*"));

    let schema_names: Vec<&str> = load_options
        .schema
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(
        schema_names,
        vec!["string", "integer", "boolean", "datetime_tz", "datetime_ntz", "json", "end_customer_id"]
    );
    // the json column was declared optional; the trailing id column is not
    assert!(!load_options.schema[5].required);
    assert!(load_options.schema[6].required);

    // cleanup is detached from the write itself; give it a beat
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let cleaned = client.cleaned.lock().unwrap().clone();
    assert_eq!(cleaned.len(), 1);
    assert_eq!(cleaned[0], staged[0].0);
}

#[tokio::test]
async fn zero_rows_skips_the_load_entirely() {
    let client = Arc::new(MockWarehouseClient::default());
    let connector = BigQueryConnector::new(Arc::clone(&client));

    let connection = test_connection(ConnectionType::BigQuery);
    let options = DestinationOptions {
        staging_bucket: "staging".to_string(),
    };
    let object = test_object(TargetType::SingleExisting, object_fields());
    let sync = test_sync(SyncMode::FullOverwrite);
    let mappings = field_mappings();

    let (tx, mut rx) = mpsc::channel::<Vec<Row>>(1);
    drop(tx);

    let output = connector
        .write(&connection, &options, &object, &sync, &mappings, &mut rx)
        .await
        .unwrap();

    assert_eq!(output.rows_written, 0);
    assert!(client.staged.lock().unwrap().is_empty());
    assert!(client.loads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn each_batch_is_its_own_staged_object() {
    let client = Arc::new(MockWarehouseClient::default());
    let connector = BigQueryConnector::new(Arc::clone(&client));

    let connection = test_connection(ConnectionType::BigQuery);
    let options = DestinationOptions {
        staging_bucket: "staging".to_string(),
    };
    let object = test_object(TargetType::SingleExisting, object_fields());
    let sync = test_sync(SyncMode::IncrementalUpdate);
    let mappings = field_mappings();

    let (tx, mut rx) = mpsc::channel::<Vec<Row>>(2);
    tx.send(vec![csv_row()]).await.unwrap();
    tx.send(vec![csv_row()]).await.unwrap();
    drop(tx);

    let output = connector
        .write(&connection, &options, &object, &sync, &mappings, &mut rx)
        .await
        .unwrap();

    assert_eq!(output.rows_written, 2);

    let staged = client.staged.lock().unwrap().clone();
    assert_eq!(staged.len(), 2);
    assert!(staged[0].0.object.ends_with("-0"));
    assert!(staged[1].0.object.ends_with("-1"));
    // both objects share one run prefix, so the wildcard load covers both
    let prefix = staged[0].0.object.trim_end_matches("-0").to_string();
    assert_eq!(staged[1].0.object.trim_end_matches("-1"), prefix);

    let loads = client.loads.lock().unwrap().clone();
    assert_eq!(loads.len(), 1);
    assert_eq!(
        loads[0].2.write_disposition,
        WriteDisposition::Truncate
    );
}
