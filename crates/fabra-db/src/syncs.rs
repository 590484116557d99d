//! Sync repository.

use anyhow::{Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{FieldMapping, Sync, SyncMode, SyncStatus};

const SYNC_COLUMNS: &str = "id, organization_id, display_name, status, workflow_id, \
     end_customer_id, source_id, object_id, namespace, table_name, custom_join, \
     sync_mode, recurring, frequency, frequency_units, source_cursor_field, \
     source_primary_key, cursor_position";

fn sync_from_row(row: &PgRow) -> Result<Sync> {
    Ok(Sync {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        display_name: row.try_get("display_name")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        workflow_id: row.try_get("workflow_id")?,
        end_customer_id: row.try_get("end_customer_id")?,
        source_id: row.try_get("source_id")?,
        object_id: row.try_get("object_id")?,
        namespace: row.try_get("namespace")?,
        table_name: row.try_get("table_name")?,
        custom_join: row.try_get("custom_join")?,
        sync_mode: row.try_get::<String, _>("sync_mode")?.parse()?,
        recurring: row.try_get("recurring")?,
        frequency: row.try_get("frequency")?,
        frequency_units: row
            .try_get::<Option<String>, _>("frequency_units")?
            .map(|u| u.parse())
            .transpose()?,
        source_cursor_field: row.try_get("source_cursor_field")?,
        source_primary_key: row.try_get("source_primary_key")?,
        cursor_position: row.try_get("cursor_position")?,
    })
}

pub async fn load_sync_by_id(pool: &PgPool, organization_id: i64, sync_id: i64) -> Result<Sync> {
    let row = sqlx::query(&format!(
        "select {SYNC_COLUMNS} from syncs \
         where id = $1 and organization_id = $2 and deactivated_at is null"
    ))
    .bind(sync_id)
    .bind(organization_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("loading sync {sync_id}"))?;

    sync_from_row(&row)
}

pub async fn load_field_mappings_for_sync(pool: &PgPool, sync_id: i64) -> Result<Vec<FieldMapping>> {
    let rows = sqlx::query(
        "select id, sync_id, source_field_name, source_field_type, destination_field_id, is_json_field \
         from field_mappings \
         where sync_id = $1 and deactivated_at is null \
         order by id",
    )
    .bind(sync_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("loading field mappings for sync {sync_id}"))?;

    rows.iter()
        .map(|row| {
            Ok(FieldMapping {
                id: row.try_get("id")?,
                sync_id: row.try_get("sync_id")?,
                source_field_name: row.try_get("source_field_name")?,
                source_field_type: row.try_get::<String, _>("source_field_type")?.parse()?,
                destination_field_id: row.try_get("destination_field_id")?,
                is_json_field: row.try_get("is_json_field")?,
            })
        })
        .collect()
}

/// Overwrite the sync's cursor position. Runs only after a successful
/// replicate; on workflow failure the cursor is left untouched so the next
/// run re-reads from the previous position.
pub async fn update_cursor(pool: &PgPool, sync_id: i64, cursor_position: &str) -> Result<()> {
    sqlx::query("update syncs set cursor_position = $1 where id = $2")
        .bind(cursor_position)
        .bind(sync_id)
        .execute(pool)
        .await
        .with_context(|| format!("updating cursor for sync {sync_id}"))?;

    Ok(())
}

pub struct NewSync<'a> {
    pub organization_id: i64,
    pub display_name: &'a str,
    pub end_customer_id: &'a str,
    pub source_id: i64,
    pub object_id: i64,
    pub namespace: Option<&'a str>,
    pub table_name: Option<&'a str>,
    pub custom_join: Option<&'a str>,
    pub source_cursor_field: Option<&'a str>,
    pub source_primary_key: Option<&'a str>,
    pub sync_mode: SyncMode,
    pub recurring: bool,
    pub frequency: Option<i64>,
    pub frequency_units: Option<crate::models::FrequencyUnits>,
}

/// Create a sync. The workflow id is assigned here and never changes; the
/// durable engine owns its meaning.
pub async fn create_sync(pool: &PgPool, new: NewSync<'_>) -> Result<Sync> {
    let row = sqlx::query(&format!(
        "insert into syncs (organization_id, display_name, status, workflow_id, \
             end_customer_id, source_id, object_id, namespace, table_name, custom_join, \
             sync_mode, recurring, frequency, frequency_units, source_cursor_field, \
             source_primary_key) \
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
         returning {SYNC_COLUMNS}"
    ))
    .bind(new.organization_id)
    .bind(new.display_name)
    .bind(SyncStatus::Active.as_str())
    .bind(Uuid::new_v4().to_string())
    .bind(new.end_customer_id)
    .bind(new.source_id)
    .bind(new.object_id)
    .bind(new.namespace)
    .bind(new.table_name)
    .bind(new.custom_join)
    .bind(new.sync_mode.as_str())
    .bind(new.recurring)
    .bind(new.frequency)
    .bind(new.frequency_units.map(|u| u.as_str()))
    .bind(new.source_cursor_field)
    .bind(new.source_primary_key)
    .fetch_one(pool)
    .await
    .context("creating sync")?;

    sync_from_row(&row)
}

pub async fn deactivate_sync_by_id(pool: &PgPool, sync_id: i64) -> Result<()> {
    sqlx::query("update syncs set deactivated_at = now() where id = $1")
        .bind(sync_id)
        .execute(pool)
        .await
        .with_context(|| format!("deactivating sync {sync_id}"))?;

    Ok(())
}

pub async fn update_sync_status(pool: &PgPool, sync_id: i64, status: SyncStatus) -> Result<()> {
    sqlx::query("update syncs set status = $1 where id = $2")
        .bind(status.as_str())
        .bind(sync_id)
        .execute(pool)
        .await
        .with_context(|| format!("updating status for sync {sync_id}"))?;

    Ok(())
}
