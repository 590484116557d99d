//! Sync-run repository.
//!
//! The engine guarantees at most one running workflow per workflow id; the
//! partial unique index in the schema additionally guarantees at most one
//! running run per sync. `create_or_start` must stay idempotent because the
//! engine may restart the RecordStatus activity.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{SyncRun, SyncRunStatus};

const RUN_COLUMNS: &str = "id, organization_id, sync_id, workflow_id, status, error, \
     rows_written, started_at, completed_at";

fn run_from_row(row: &PgRow) -> Result<SyncRun> {
    Ok(SyncRun {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        sync_id: row.try_get("sync_id")?,
        workflow_id: row.try_get("workflow_id")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        error: row.try_get("error")?,
        rows_written: row.try_get("rows_written")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Create a running run, or adopt the running run that already carries this
/// workflow id. A retried create activity therefore never produces a second
/// row.
pub async fn create_or_start_sync_run(
    pool: &PgPool,
    organization_id: i64,
    sync_id: i64,
    workflow_id: &str,
) -> Result<SyncRun> {
    if let Some(existing) = load_active_by_workflow_id(pool, workflow_id).await? {
        return Ok(existing);
    }

    let row = sqlx::query(&format!(
        "insert into sync_runs (organization_id, sync_id, workflow_id, status, started_at) \
         values ($1, $2, $3, $4, $5) \
         returning {RUN_COLUMNS}"
    ))
    .bind(organization_id)
    .bind(sync_id)
    .bind(workflow_id)
    .bind(SyncRunStatus::Running.as_str())
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .with_context(|| format!("creating sync run for sync {sync_id}"))?;

    run_from_row(&row)
}

/// Close (or re-stamp) a run. Safe to retry: the same terminal values are
/// written again.
pub async fn update_sync_run(
    pool: &PgPool,
    run_id: i64,
    new_status: SyncRunStatus,
    error: Option<&str>,
    rows_written: Option<i64>,
) -> Result<SyncRun> {
    let row = sqlx::query(&format!(
        "update sync_runs \
         set status = $1, completed_at = $2, \
             error = coalesce($3, error), \
             rows_written = coalesce($4, rows_written) \
         where id = $5 \
         returning {RUN_COLUMNS}"
    ))
    .bind(new_status.as_str())
    .bind(Utc::now())
    .bind(error)
    .bind(rows_written)
    .bind(run_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("updating sync run {run_id}"))?;

    run_from_row(&row)
}

/// Workflow ids are unique among running workflows; the status filter makes
/// doubly sure we adopt the right run.
pub async fn load_active_by_workflow_id(
    pool: &PgPool,
    workflow_id: &str,
) -> Result<Option<SyncRun>> {
    let row = sqlx::query(&format!(
        "select {RUN_COLUMNS} from sync_runs \
         where workflow_id = $1 and status = $2 and deactivated_at is null"
    ))
    .bind(workflow_id)
    .bind(SyncRunStatus::Running.as_str())
    .fetch_optional(pool)
    .await
    .with_context(|| format!("loading active run for workflow {workflow_id}"))?;

    row.as_ref().map(run_from_row).transpose()
}

pub async fn load_all_runs_for_sync(
    pool: &PgPool,
    organization_id: i64,
    sync_id: i64,
) -> Result<Vec<SyncRun>> {
    let rows = sqlx::query(&format!(
        "select {RUN_COLUMNS} from sync_runs \
         where organization_id = $1 and sync_id = $2 and deactivated_at is null \
         order by created_at desc"
    ))
    .bind(organization_id)
    .bind(sync_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("loading runs for sync {sync_id}"))?;

    rows.iter().map(run_from_row).collect()
}
