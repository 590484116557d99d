//! Destination repository.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

use crate::models::Destination;

pub async fn load_destination_by_id(
    pool: &PgPool,
    organization_id: i64,
    destination_id: i64,
) -> Result<Destination> {
    let row = sqlx::query(
        "select id, organization_id, display_name, connection_id, staging_bucket \
         from destinations \
         where id = $1 and organization_id = $2 and deactivated_at is null",
    )
    .bind(destination_id)
    .bind(organization_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("loading destination {destination_id}"))?;

    Ok(Destination {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        display_name: row.try_get("display_name")?,
        connection_id: row.try_get("connection_id")?,
        staging_bucket: row.try_get("staging_bucket")?,
    })
}
