// crates/fabra-db/src/lib.rs
//
// Config store over Postgres. Repositories are plain async functions over a
// PgPool; every query excludes soft-deleted rows and scopes by organization
// where the caller supplies one.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod api_keys;
pub mod connections;
pub mod destinations;
pub mod models;
pub mod objects;
pub mod sources;
pub mod sync_runs;
pub mod syncs;
#[cfg(feature = "testkit")]
pub mod testkit;
pub mod views;

pub const ENV_DB_URL: &str = "FABRA_DATABASE_URL";

/// Connect to Postgres using FABRA_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Test helper used by integration tests:
/// - Connect using FABRA_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}
