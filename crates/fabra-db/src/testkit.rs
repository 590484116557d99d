//! Fixture builders for integration tests. Everything is inserted through
//! the same SQL the repositories use; ids come back from the database.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

use crate::models::{Connection, ConnectionType, Destination, Object, ObjectField, Source, SyncMode};
use crate::syncs::{self, NewSync};

pub async fn create_connection(
    pool: &PgPool,
    organization_id: i64,
    connection_type: ConnectionType,
) -> Result<Connection> {
    let row = sqlx::query(
        "insert into connections (organization_id, connection_type, username, password, host, database_name) \
         values ($1, $2, 'user', '75617373776f7264', 'localhost:9', 'testdb') \
         returning id",
    )
    .bind(organization_id)
    .bind(connection_type.as_str())
    .fetch_one(pool)
    .await
    .context("creating test connection")?;

    crate::connections::load_connection_by_id(pool, organization_id, row.try_get("id")?).await
}

pub async fn create_source(
    pool: &PgPool,
    organization_id: i64,
    end_customer_id: &str,
    connection_id: i64,
) -> Result<Source> {
    let row = sqlx::query(
        "insert into sources (organization_id, display_name, end_customer_id, connection_id) \
         values ($1, 'test source', $2, $3) \
         returning id",
    )
    .bind(organization_id)
    .bind(end_customer_id)
    .bind(connection_id)
    .fetch_one(pool)
    .await
    .context("creating test source")?;

    crate::sources::load_source_by_id(pool, organization_id, end_customer_id, row.try_get("id")?)
        .await
}

pub async fn create_destination(
    pool: &PgPool,
    organization_id: i64,
    connection_id: i64,
) -> Result<Destination> {
    let row = sqlx::query(
        "insert into destinations (organization_id, display_name, connection_id, staging_bucket) \
         values ($1, 'test destination', $2, 'staging') \
         returning id",
    )
    .bind(organization_id)
    .bind(connection_id)
    .fetch_one(pool)
    .await
    .context("creating test destination")?;

    crate::destinations::load_destination_by_id(pool, organization_id, row.try_get("id")?).await
}

pub async fn create_object(
    pool: &PgPool,
    organization_id: i64,
    destination_id: i64,
    sync_mode: SyncMode,
) -> Result<Object> {
    let row = sqlx::query(
        "insert into objects (organization_id, display_name, destination_id, target_type, \
             namespace, table_name, sync_mode, end_customer_id_field) \
         values ($1, 'test object', $2, 'single_existing', 'namespace', 'table', $3, 'end_customer_id') \
         returning id",
    )
    .bind(organization_id)
    .bind(destination_id)
    .bind(sync_mode.as_str())
    .fetch_one(pool)
    .await
    .context("creating test object")?;

    crate::objects::load_object_by_id(pool, organization_id, row.try_get("id")?).await
}

pub async fn create_object_field(
    pool: &PgPool,
    object_id: i64,
    name: &str,
    field_type: fabra_data::FieldType,
) -> Result<ObjectField> {
    sqlx::query(
        "insert into object_fields (object_id, name, field_type) values ($1, $2, $3)",
    )
    .bind(object_id)
    .bind(name)
    .bind(field_type.as_str())
    .execute(pool)
    .await
    .context("creating test object field")?;

    let fields = crate::objects::load_object_fields(pool, object_id).await?;
    fields
        .into_iter()
        .find(|f| f.name == name)
        .ok_or_else(|| anyhow::anyhow!("object field not created"))
}

pub async fn create_field_mapping(
    pool: &PgPool,
    sync_id: i64,
    source_field_name: &str,
    source_field_type: fabra_data::FieldType,
    destination_field_id: i64,
) -> Result<()> {
    sqlx::query(
        "insert into field_mappings (sync_id, source_field_name, source_field_type, \
             destination_field_id, is_json_field) \
         values ($1, $2, $3, $4, false)",
    )
    .bind(sync_id)
    .bind(source_field_name)
    .bind(source_field_type.as_str())
    .bind(destination_field_id)
    .execute(pool)
    .await
    .context("creating test field mapping")?;

    Ok(())
}

pub async fn create_sync(
    pool: &PgPool,
    organization_id: i64,
    end_customer_id: &str,
    source_id: i64,
    object_id: i64,
    sync_mode: SyncMode,
) -> Result<crate::models::Sync> {
    syncs::create_sync(
        pool,
        NewSync {
            organization_id,
            display_name: "test sync",
            end_customer_id,
            source_id,
            object_id,
            namespace: Some("namespace"),
            table_name: Some("table"),
            custom_join: None,
            source_cursor_field: None,
            source_primary_key: None,
            sync_mode,
            recurring: false,
            frequency: None,
            frequency_units: None,
        },
    )
    .await
}

/// Unique-enough organization id so concurrent test runs do not collide.
pub fn test_organization_id() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64 % 1_000_000_000)
        .unwrap_or(0)
}
