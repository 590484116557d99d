//! Object and object-field repositories.

use anyhow::{Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{Object, ObjectField};

fn object_from_row(row: &PgRow) -> Result<Object> {
    Ok(Object {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        display_name: row.try_get("display_name")?,
        destination_id: row.try_get("destination_id")?,
        target_type: row.try_get::<String, _>("target_type")?.parse()?,
        namespace: row.try_get("namespace")?,
        table_name: row.try_get("table_name")?,
        sync_mode: row.try_get::<String, _>("sync_mode")?.parse()?,
        cursor_field: row.try_get("cursor_field")?,
        primary_key: row.try_get("primary_key")?,
        end_customer_id_field: row.try_get("end_customer_id_field")?,
        recurring: row.try_get("recurring")?,
        frequency: row.try_get("frequency")?,
        frequency_units: row
            .try_get::<Option<String>, _>("frequency_units")?
            .map(|u| u.parse())
            .transpose()?,
    })
}

pub async fn load_object_by_id(
    pool: &PgPool,
    organization_id: i64,
    object_id: i64,
) -> Result<Object> {
    let row = sqlx::query(
        "select id, organization_id, display_name, destination_id, target_type, namespace, \
                table_name, sync_mode, cursor_field, primary_key, end_customer_id_field, \
                recurring, frequency, frequency_units \
         from objects \
         where id = $1 and organization_id = $2 and deactivated_at is null",
    )
    .bind(object_id)
    .bind(organization_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("loading object {object_id}"))?;

    object_from_row(&row)
}

/// Object fields in declaration order; order defines the staged CSV column
/// layout.
pub async fn load_object_fields(pool: &PgPool, object_id: i64) -> Result<Vec<ObjectField>> {
    let rows = sqlx::query(
        "select id, object_id, name, field_type, omit, optional, display_name, description \
         from object_fields \
         where object_id = $1 and deactivated_at is null \
         order by id",
    )
    .bind(object_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("loading object fields for object {object_id}"))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectField {
                id: row.try_get("id")?,
                object_id: row.try_get("object_id")?,
                name: row.try_get("name")?,
                field_type: row.try_get::<String, _>("field_type")?.parse()?,
                omit: row.try_get("omit")?,
                optional: row.try_get("optional")?,
                display_name: row.try_get("display_name")?,
                description: row.try_get("description")?,
            })
        })
        .collect()
}
