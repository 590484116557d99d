//! Source repository. Sources belong to one end customer; loads are scoped
//! by both organization and end customer id.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

use crate::models::Source;

pub async fn load_source_by_id(
    pool: &PgPool,
    organization_id: i64,
    end_customer_id: &str,
    source_id: i64,
) -> Result<Source> {
    let row = sqlx::query(
        "select id, organization_id, display_name, end_customer_id, connection_id \
         from sources \
         where id = $1 and organization_id = $2 and end_customer_id = $3 \
           and deactivated_at is null",
    )
    .bind(source_id)
    .bind(organization_id)
    .bind(end_customer_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("loading source {source_id}"))?;

    Ok(Source {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        display_name: row.try_get("display_name")?,
        end_customer_id: row.try_get("end_customer_id")?,
        connection_id: row.try_get("connection_id")?,
    })
}
