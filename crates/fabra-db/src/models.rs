//! Row-level model types mirroring the config-store tables.

use anyhow::Result;
use chrono::{DateTime, Utc};
use fabra_data::FieldType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullOverwrite,
    // for testing only: not exposed to customers in the UI
    FullAppend,
    IncrementalAppend,
    IncrementalUpdate,
}

impl SyncMode {
    pub fn uses_cursor(&self) -> bool {
        matches!(self, SyncMode::IncrementalAppend | SyncMode::IncrementalUpdate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::FullOverwrite => "full_overwrite",
            SyncMode::FullAppend => "full_append",
            SyncMode::IncrementalAppend => "incremental_append",
            SyncMode::IncrementalUpdate => "incremental_update",
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full_overwrite" => Ok(SyncMode::FullOverwrite),
            "full_append" => Ok(SyncMode::FullAppend),
            "incremental_append" => Ok(SyncMode::IncrementalAppend),
            "incremental_update" => Ok(SyncMode::IncrementalUpdate),
            other => Err(anyhow::anyhow!("unrecognized sync mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Active,
    Paused,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Active => "active",
            SyncStatus::Paused => "paused",
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SyncStatus::Active),
            "paused" => Ok(SyncStatus::Paused),
            other => Err(anyhow::anyhow!("unrecognized sync status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Failed,
    Completed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Running => "running",
            SyncRunStatus::Failed => "failed",
            SyncRunStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for SyncRunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(SyncRunStatus::Running),
            "failed" => Ok(SyncRunStatus::Failed),
            "completed" => Ok(SyncRunStatus::Completed),
            other => Err(anyhow::anyhow!("unrecognized sync run status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    #[serde(rename = "bigquery")]
    BigQuery,
    Snowflake,
    Redshift,
    Synapse,
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "mongodb")]
    MongoDb,
    #[serde(rename = "dynamodb")]
    DynamoDb,
    Webhook,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::BigQuery => "bigquery",
            ConnectionType::Snowflake => "snowflake",
            ConnectionType::Redshift => "redshift",
            ConnectionType::Synapse => "synapse",
            ConnectionType::Postgres => "postgres",
            ConnectionType::MySql => "mysql",
            ConnectionType::MongoDb => "mongodb",
            ConnectionType::DynamoDb => "dynamodb",
            ConnectionType::Webhook => "webhook",
        }
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bigquery" => Ok(ConnectionType::BigQuery),
            "snowflake" => Ok(ConnectionType::Snowflake),
            "redshift" => Ok(ConnectionType::Redshift),
            "synapse" => Ok(ConnectionType::Synapse),
            "postgres" => Ok(ConnectionType::Postgres),
            "mysql" => Ok(ConnectionType::MySql),
            "mongodb" => Ok(ConnectionType::MongoDb),
            "dynamodb" => Ok(ConnectionType::DynamoDb),
            "webhook" => Ok(ConnectionType::Webhook),
            other => Err(anyhow::anyhow!("unrecognized connection type '{other}'")),
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    SingleExisting,
    TablePerCustomer,
    Webhook,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::SingleExisting => "single_existing",
            TargetType::TablePerCustomer => "table_per_customer",
            TargetType::Webhook => "webhook",
        }
    }
}

impl std::str::FromStr for TargetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "single_existing" => Ok(TargetType::SingleExisting),
            "table_per_customer" => Ok(TargetType::TablePerCustomer),
            "webhook" => Ok(TargetType::Webhook),
            other => Err(anyhow::anyhow!("unrecognized target type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyUnits {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl FrequencyUnits {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrequencyUnits::Minutes => "minutes",
            FrequencyUnits::Hours => "hours",
            FrequencyUnits::Days => "days",
            FrequencyUnits::Weeks => "weeks",
        }
    }
}

impl std::str::FromStr for FrequencyUnits {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "minutes" => Ok(FrequencyUnits::Minutes),
            "hours" => Ok(FrequencyUnits::Hours),
            "days" => Ok(FrequencyUnits::Days),
            "weeks" => Ok(FrequencyUnits::Weeks),
            other => Err(anyhow::anyhow!("unrecognized frequency units '{other}'")),
        }
    }
}

/// Credentials bundle for one backend. Credential-bearing columns hold
/// opaque ciphertext.
#[derive(Debug, Clone)]
pub struct Connection {
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

#[derive(Debug, Clone)]
pub struct Source {
    pub id: i64,
    pub organization_id: i64,
    pub display_name: String,
    pub end_customer_id: String,
    pub connection_id: i64,
}

#[derive(Debug, Clone)]
pub struct Destination {
    pub id: i64,
    pub organization_id: i64,
    pub display_name: String,
    pub connection_id: i64,
    pub staging_bucket: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Object {
    pub id: i64,
    pub organization_id: i64,
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
}

#[derive(Debug, Clone)]
pub struct ObjectField {
    pub id: i64,
    pub object_id: i64,
    pub name: String,
    pub field_type: FieldType,
    pub omit: bool,
    pub optional: bool,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub id: i64,
    pub sync_id: i64,
    pub source_field_name: String,
    pub source_field_type: FieldType,
    pub destination_field_id: i64,
    pub is_json_field: bool,
}

#[derive(Debug, Clone)]
pub struct Sync {
    pub id: i64,
    pub organization_id: i64,
    pub display_name: String,
    pub status: SyncStatus,
    pub workflow_id: String,
    pub end_customer_id: String,
    pub source_id: i64,
    pub object_id: i64,
    pub namespace: Option<String>,
    pub table_name: Option<String>,
    pub custom_join: Option<String>,
    pub sync_mode: SyncMode,
    pub recurring: bool,
    pub frequency: Option<i64>,
    pub frequency_units: Option<FrequencyUnits>,
    pub source_cursor_field: Option<String>,
    pub source_primary_key: Option<String>,
    /// Current value of the cursor: where the next incremental run starts.
    pub cursor_position: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncRun {
    pub id: i64,
    pub organization_id: i64,
    pub sync_id: i64,
    pub workflow_id: String,
    pub status: SyncRunStatus,
    pub error: Option<String>,
    pub rows_written: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
