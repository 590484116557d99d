//! Shared fixtures for connector scenario tests: a canned warehouse client
//! and builders for the config views.
//!
//! Each scenario binary compiles this module separately and uses a subset.
#![allow(dead_code)]

use std::sync::Mutex;

use anyhow::Result;
use fabra_data::{Field, FieldType, QueryResults, Row, RowIterator, Schema, Value};
use fabra_db::models::{ConnectionType, SyncMode, SyncStatus, TargetType};
use fabra_db::views::{
    FieldMappingView, FullConnection, ObjectFieldView, ObjectView, SyncView,
};
use fabra_query::{LoadOptions, QueryClient, StagingOptions, WarehouseClient};

pub struct MockIterator {
    schema: Schema,
    rows: std::collections::VecDeque<Row>,
}

#[async_trait::async_trait]
impl RowIterator for MockIterator {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Canned warehouse client: asserts the query text it receives and records
/// everything staged, loaded, and cleaned up.
#[derive(Default)]
pub struct MockWarehouseClient {
    pub expected_query: Option<String>,
    pub rows: Vec<Row>,
    pub schema: Schema,
    pub staged: Mutex<Vec<(StagingOptions, String)>>,
    pub loads: Mutex<Vec<(String, String, LoadOptions)>>,
    pub cleaned: Mutex<Vec<StagingOptions>>,
}

#[async_trait::async_trait]
impl QueryClient for MockWarehouseClient {
    async fn query_iterator(&self, query: &str) -> Result<Box<dyn RowIterator>> {
        if let Some(expected) = &self.expected_query {
            assert_eq!(query, expected, "reader built an unexpected query");
        }

        Ok(Box::new(MockIterator {
            schema: self.schema.clone(),
            rows: self.rows.clone().into(),
        }))
    }

    async fn run_query(&self, _query: &str) -> Result<QueryResults> {
        Ok(QueryResults {
            schema: self.schema.clone(),
            data: self.rows.clone(),
        })
    }

    async fn get_namespaces(&self) -> Result<Vec<String>> {
        Ok(vec![])
    }

    async fn get_tables(&self, _namespace: &str) -> Result<Vec<String>> {
        Ok(vec![])
    }

    async fn get_schema(&self, _namespace: &str, _table_name: &str) -> Result<Schema> {
        Ok(self.schema.clone())
    }

    async fn get_field_values(
        &self,
        _namespace: &str,
        _table_name: &str,
        _field_name: &str,
    ) -> Result<Vec<Value>> {
        Ok(vec![])
    }
}

#[async_trait::async_trait]
impl WarehouseClient for MockWarehouseClient {
    async fn stage_data(&self, csv_data: &str, staging_options: &StagingOptions) -> Result<()> {
        self.staged
            .lock()
            .unwrap()
            .push((staging_options.clone(), csv_data.to_string()));
        Ok(())
    }

    async fn load_from_staging(
        &self,
        namespace: &str,
        table_name: &str,
        load_options: &LoadOptions,
    ) -> Result<()> {
        self.loads.lock().unwrap().push((
            namespace.to_string(),
            table_name.to_string(),
            load_options.clone(),
        ));
        Ok(())
    }

    async fn cleanup_staging_data(&self, staging_options: &StagingOptions) -> Result<()> {
        self.cleaned.lock().unwrap().push(staging_options.clone());
        Ok(())
    }
}

pub fn source_schema() -> Schema {
    vec![
        Field::new("source_string", FieldType::String),
        Field::new("source_integer", FieldType::Integer),
        Field::new("source_boolean", FieldType::Boolean),
        Field::new("source_datetime_tz", FieldType::DateTimeTz),
        Field::new("source_datetime_ntz", FieldType::DateTimeNtz),
        Field::new("source_json", FieldType::Json),
    ]
}

pub fn source_row(datetime_tz: &str) -> Row {
    vec![
        Value::String("string".into()),
        Value::Integer(1),
        Value::Boolean(false),
        Value::String(datetime_tz.into()),
        Value::String("2006-01-02 15:04:05.000".into()),
        Value::Json(serde_json::json!({"hello": 123})),
    ]
}

pub fn field_mappings() -> Vec<FieldMappingView> {
    let fields = [
        ("source_string", FieldType::String, 1),
        ("source_integer", FieldType::Integer, 2),
        ("source_boolean", FieldType::Boolean, 3),
        ("source_datetime_tz", FieldType::DateTimeTz, 4),
        ("source_datetime_ntz", FieldType::DateTimeNtz, 5),
        ("source_json", FieldType::Json, 6),
    ];

    fields
        .iter()
        .map(|(name, field_type, destination_field_id)| FieldMappingView {
            source_field_name: name.to_string(),
            source_field_type: *field_type,
            destination_field_id: *destination_field_id,
            destination_field_name: name.trim_start_matches("source_").to_string(),
            destination_field_type: *field_type,
            is_json_field: false,
        })
        .collect()
}

pub fn object_fields() -> Vec<ObjectFieldView> {
    let fields = [
        (1, "string", FieldType::String, false),
        (2, "integer", FieldType::Integer, false),
        (3, "boolean", FieldType::Boolean, false),
        (4, "datetime_tz", FieldType::DateTimeTz, false),
        (5, "datetime_ntz", FieldType::DateTimeNtz, false),
        (6, "json", FieldType::Json, true),
    ];

    fields
        .iter()
        .map(|(id, name, field_type, optional)| ObjectFieldView {
            id: *id,
            name: name.to_string(),
            field_type: *field_type,
            omit: false,
            optional: *optional,
            display_name: None,
            description: None,
        })
        .collect()
}

pub fn test_object(target_type: TargetType, fields: Vec<ObjectFieldView>) -> ObjectView {
    ObjectView {
        id: 7,
        display_name: "users".to_string(),
        destination_id: 1,
        target_type,
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

pub fn test_sync(sync_mode: SyncMode) -> SyncView {
    SyncView {
        id: 1,
        organization_id: 1,
        status: SyncStatus::Active,
        end_customer_id: "abc123".to_string(),
        display_name: "test sync".to_string(),
        source_id: 1,
        object_id: 7,
        namespace: Some("namespace".to_string()),
        table_name: Some("table".to_string()),
        custom_join: None,
        cursor_position: None,
        source_cursor_field: None,
        source_primary_key: None,
        sync_mode,
        recurring: false,
        frequency: None,
        frequency_units: None,
    }
}

pub fn test_connection(connection_type: ConnectionType) -> FullConnection {
    FullConnection {
        id: 1,
        organization_id: 1,
        connection_type,
        credentials: None,
        username: None,
        password: None,
        location: None,
        warehouse_name: None,
        database_name: None,
        role: None,
        host: None,
        port: None,
        connection_options: None,
    }
}
