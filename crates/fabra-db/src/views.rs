//! Resolved views over the config store: the shapes activities exchange.
//!
//! Models are row-level; views are what the sync workflow actually
//! consumes, with nullable columns surfaced as options and field mappings
//! joined against their destination object fields.

use chrono::Duration;
use fabra_data::FieldType;
use serde::{Deserialize, Serialize};

use crate::models::{
    self, ConnectionType, FrequencyUnits, SyncMode, SyncStatus, TargetType,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncView {
    pub id: i64,
    pub organization_id: i64,
    pub status: SyncStatus,
    pub end_customer_id: String,
    pub display_name: String,
    pub source_id: i64,
    pub object_id: i64,
    pub namespace: Option<String>,
    pub table_name: Option<String>,
    pub custom_join: Option<String>,
    pub cursor_position: Option<String>,
    pub source_cursor_field: Option<String>,
    pub source_primary_key: Option<String>,
    pub sync_mode: SyncMode,
    pub recurring: bool,
    pub frequency: Option<i64>,
    pub frequency_units: Option<FrequencyUnits>,
}

/// Full credential bundle. Never returned to clients; only the replicate
/// activity sees it, and credential fields stay ciphertext until then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullConnection {
    pub id: i64,
    pub organization_id: i64,
    pub connection_type: ConnectionType,
    pub credentials: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub location: Option<String>,
    pub warehouse_name: Option<String>,
    pub database_name: Option<String>,
    pub role: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub connection_options: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectView {
    pub id: i64,
    pub display_name: String,
    pub destination_id: i64,
    pub target_type: TargetType,
    pub namespace: Option<String>,
    pub table_name: Option<String>,
    pub sync_mode: SyncMode,
    pub cursor_field: Option<String>,
    pub primary_key: Option<String>,
    pub end_customer_id_field: Option<String>,
    pub recurring: bool,
    pub frequency: Option<i64>,
    pub frequency_units: Option<FrequencyUnits>,
    pub object_fields: Vec<ObjectFieldView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectFieldView {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub omit: bool,
    pub optional: bool,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

/// One field mapping joined with its destination object field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMappingView {
    pub source_field_name: String,
    pub source_field_type: FieldType,
    pub destination_field_id: i64,
    pub destination_field_name: String,
    pub destination_field_type: FieldType,
    pub is_json_field: bool,
}

pub fn convert_sync(sync: &models::Sync) -> SyncView {
    SyncView {
        id: sync.id,
        organization_id: sync.organization_id,
        status: sync.status,
        end_customer_id: sync.end_customer_id.clone(),
        display_name: sync.display_name.clone(),
        source_id: sync.source_id,
        object_id: sync.object_id,
        namespace: sync.namespace.clone(),
        table_name: sync.table_name.clone(),
        custom_join: sync.custom_join.clone(),
        cursor_position: sync.cursor_position.clone(),
        source_cursor_field: sync.source_cursor_field.clone(),
        source_primary_key: sync.source_primary_key.clone(),
        sync_mode: sync.sync_mode,
        recurring: sync.recurring,
        frequency: sync.frequency,
        frequency_units: sync.frequency_units,
    }
}

pub fn convert_full_connection(connection: &models::Connection) -> FullConnection {
    FullConnection {
        id: connection.id,
        organization_id: connection.organization_id,
        connection_type: connection.connection_type,
        credentials: connection.credentials.clone(),
        username: connection.username.clone(),
        password: connection.password.clone(),
        location: connection.location.clone(),
        warehouse_name: connection.warehouse_name.clone(),
        database_name: connection.database_name.clone(),
        role: connection.role.clone(),
        host: connection.host.clone(),
        port: connection.port.clone(),
        connection_options: connection.connection_options.clone(),
    }
}

pub fn convert_object_field(object_field: &models::ObjectField) -> ObjectFieldView {
    ObjectFieldView {
        id: object_field.id,
        name: object_field.name.clone(),
        field_type: object_field.field_type,
        omit: object_field.omit,
        optional: object_field.optional,
        display_name: object_field.display_name.clone(),
        description: object_field.description.clone(),
    }
}

pub fn convert_object(object: &models::Object, object_fields: &[models::ObjectField]) -> ObjectView {
    ObjectView {
        id: object.id,
        display_name: object.display_name.clone(),
        destination_id: object.destination_id,
        target_type: object.target_type,
        namespace: object.namespace.clone(),
        table_name: object.table_name.clone(),
        sync_mode: object.sync_mode,
        cursor_field: object.cursor_field.clone(),
        primary_key: object.primary_key.clone(),
        end_customer_id_field: object.end_customer_id_field.clone(),
        recurring: object.recurring,
        frequency: object.frequency,
        frequency_units: object.frequency_units,
        object_fields: object_fields.iter().map(convert_object_field).collect(),
    }
}

/// Joins each mapping with its destination object field by id. Mapping
/// order is preserved; it defines column order through the whole pipeline.
pub fn convert_field_mappings(
    field_mappings: &[models::FieldMapping],
    object_fields: &[models::ObjectField],
) -> Vec<FieldMappingView> {
    let by_id: std::collections::HashMap<i64, &models::ObjectField> =
        object_fields.iter().map(|of| (of.id, of)).collect();

    field_mappings
        .iter()
        .map(|fm| {
            let destination = by_id.get(&fm.destination_field_id);
            FieldMappingView {
                source_field_name: fm.source_field_name.clone(),
                source_field_type: fm.source_field_type,
                destination_field_id: fm.destination_field_id,
                destination_field_name: destination
                    .map(|of| of.name.clone())
                    .unwrap_or_default(),
                destination_field_type: destination
                    .map(|of| of.field_type)
                    .unwrap_or(FieldType::String),
                is_json_field: fm.is_json_field,
            }
        })
        .collect()
}

/// Human-readable elapsed time for run listings, e.g. "1 hour 2 minutes".
/// Sub-second runs read as "1 second"; no one cares about the difference.
pub fn duration_string(duration: Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::new();
    for (count, unit) in [(hours, "hour"), (minutes, "minute"), (seconds, "second")] {
        match count {
            0 => {}
            1 => parts.push(format!("1 {unit}")),
            n => parts.push(format!("{n} {unit}s")),
        }
    }

    if parts.is_empty() {
        return "1 second".to_string();
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_field(id: i64, name: &str, field_type: FieldType, omit: bool) -> models::ObjectField {
        models::ObjectField {
            id,
            object_id: 1,
            name: name.to_string(),
            field_type,
            omit,
            optional: false,
            display_name: None,
            description: None,
        }
    }

    #[test]
    fn field_mappings_join_destination_fields_in_mapping_order() {
        let object_fields = vec![
            object_field(10, "string", FieldType::String, false),
            object_field(11, "integer", FieldType::Integer, false),
        ];
        let mappings = vec![
            models::FieldMapping {
                id: 1,
                sync_id: 1,
                source_field_name: "source_integer".to_string(),
                source_field_type: FieldType::Integer,
                destination_field_id: 11,
                is_json_field: false,
            },
            models::FieldMapping {
                id: 2,
                sync_id: 1,
                source_field_name: "source_string".to_string(),
                source_field_type: FieldType::String,
                destination_field_id: 10,
                is_json_field: false,
            },
        ];

        let views = convert_field_mappings(&mappings, &object_fields);
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].source_field_name, "source_integer");
        assert_eq!(views[0].destination_field_name, "integer");
        assert_eq!(views[0].destination_field_type, FieldType::Integer);
        assert_eq!(views[1].destination_field_name, "string");
    }

    #[test]
    fn duration_strings() {
        assert_eq!(duration_string(Duration::seconds(0)), "1 second");
        assert_eq!(duration_string(Duration::seconds(1)), "1 second");
        assert_eq!(duration_string(Duration::seconds(59)), "59 seconds");
        assert_eq!(duration_string(Duration::seconds(61)), "1 minute 1 second");
        assert_eq!(
            duration_string(Duration::seconds(3600 + 120)),
            "1 hour 2 minutes"
        );
    }
}
