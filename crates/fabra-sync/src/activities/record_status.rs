//! RecordStatus: opens and closes sync-run rows.
//!
//! The engine may restart this activity, so creating a run adopts an
//! existing running row with the same workflow id instead of inserting a
//! second one.

use anyhow::{Context, Result};
use fabra_db::models::{SyncRun, SyncRunStatus};
use fabra_db::sync_runs;
use serde::{Deserialize, Serialize};

use super::Activities;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordStatusInput {
    Create {
        organization_id: i64,
        sync_id: i64,
        workflow_id: String,
    },
    Complete {
        sync_run_id: i64,
        new_status: SyncRunStatus,
        rows_written: Option<i64>,
        error: Option<String>,
    },
}

impl Activities {
    pub async fn record_status(&self, input: RecordStatusInput) -> Result<SyncRun> {
        match input {
            RecordStatusInput::Create {
                organization_id,
                sync_id,
                workflow_id,
            } => sync_runs::create_or_start_sync_run(&self.db, organization_id, sync_id, &workflow_id)
                .await
                .context("recording run start"),
            RecordStatusInput::Complete {
                sync_run_id,
                new_status,
                rows_written,
                error,
            } => sync_runs::update_sync_run(
                &self.db,
                sync_run_id,
                new_status,
                error.as_deref(),
                rows_written,
            )
            .await
            .context("recording run completion"),
        }
    }
}
