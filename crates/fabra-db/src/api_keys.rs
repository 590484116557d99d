//! End-customer API keys.
//!
//! Optional ciphertext keyed by (organization, end customer). When present
//! and the destination is a webhook, the decrypted key is embedded in each
//! payload so the receiver can re-authenticate on the customer's behalf.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

pub async fn load_end_customer_api_key(
    pool: &PgPool,
    organization_id: i64,
    end_customer_id: &str,
) -> Result<Option<String>> {
    let row = sqlx::query(
        "select encrypted_api_key from end_customer_api_keys \
         where organization_id = $1 and end_customer_id = $2 and deactivated_at is null",
    )
    .bind(organization_id)
    .bind(end_customer_id)
    .fetch_optional(pool)
    .await
    .context("loading end customer api key")?;

    Ok(row
        .map(|r| r.try_get::<String, _>("encrypted_api_key"))
        .transpose()?)
}
