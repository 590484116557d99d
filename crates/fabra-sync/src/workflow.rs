//! The sync workflow: RecordStatus → FetchConfig → Replicate →
//! UpdateCursor → RecordStatus, with every mid-flight error funnelled into
//! a terminal failed-run record.

use std::time::Duration;

use anyhow::{Context, Result};
use fabra_data::customer_visible_message;
use fabra_db::models::{SyncRun, SyncRunStatus};
use serde::{Deserialize, Serialize};

use crate::activities::{
    Activities, FetchConfigInput, RecordStatusInput, UpdateCursorInput,
};
use crate::engine::{execute_activity, ActivityContext, ActivityOptions, RetryPolicy};

/// What the control plane persists for a failed run when the error is not
/// safe to show: the detail stays in the engine's audit log.
const OPAQUE_ERROR: &str = "unexpected error";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncInput {
    pub organization_id: i64,
    pub sync_id: i64,
}

const DEFAULT_RETRY: RetryPolicy = RetryPolicy {
    initial_interval: Duration::from_secs(1),
    backoff_coefficient: 2.0,
    maximum_interval: Duration::from_secs(60),
    maximum_attempts: 3,
    non_retryable_customer_errors: false,
};

pub const RECORD_OPTIONS: ActivityOptions = ActivityOptions {
    start_to_close_timeout: Duration::from_secs(3 * 60),
    heartbeat_timeout: None,
    retry: DEFAULT_RETRY,
};

pub const FETCH_OPTIONS: ActivityOptions = ActivityOptions {
    start_to_close_timeout: Duration::from_secs(2 * 60),
    heartbeat_timeout: None,
    retry: DEFAULT_RETRY,
};

pub const REPLICATE_OPTIONS: ActivityOptions = ActivityOptions {
    start_to_close_timeout: Duration::from_secs(24 * 60 * 60),
    heartbeat_timeout: Some(Duration::from_secs(5 * 60)),
    retry: RetryPolicy {
        initial_interval: Duration::from_secs(1),
        backoff_coefficient: 2.0,
        maximum_interval: Duration::from_secs(60),
        maximum_attempts: 3,
        non_retryable_customer_errors: true,
    },
};

pub const CURSOR_OPTIONS: ActivityOptions = ActivityOptions {
    start_to_close_timeout: Duration::from_secs(3 * 60),
    heartbeat_timeout: None,
    retry: DEFAULT_RETRY,
};

pub async fn run_sync_workflow(
    activities: &Activities,
    ctx: &ActivityContext,
    workflow_id: &str,
    input: SyncInput,
) -> Result<()> {
    let sync_run = execute_activity(&RECORD_OPTIONS, "RecordStatus", || {
        activities.record_status(RecordStatusInput::Create {
            organization_id: input.organization_id,
            sync_id: input.sync_id,
            workflow_id: workflow_id.to_string(),
        })
    })
    .await
    .context("RecordStatus")?;

    let fetch_input = FetchConfigInput {
        organization_id: input.organization_id,
        sync_id: input.sync_id,
    };
    let sync_config = match execute_activity(&FETCH_OPTIONS, "FetchConfig", || {
        activities.fetch_config(fetch_input)
    })
    .await
    {
        Ok(config) => config,
        Err(error) => {
            record_failure(activities, &sync_run, &error).await;
            return Err(error.context("FetchConfig"));
        }
    };

    let replicate_output = match execute_activity(&REPLICATE_OPTIONS, "Replicate", || {
        activities.replicate(ctx, sync_config.clone())
    })
    .await
    {
        Ok(output) => output,
        Err(error) => {
            record_failure(activities, &sync_run, &error).await;
            return Err(error.context("Replicate"));
        }
    };

    if sync_config.sync.sync_mode.uses_cursor() {
        if let Some(cursor_position) = &replicate_output.cursor_position {
            let cursor_input = UpdateCursorInput {
                sync: sync_config.sync.clone(),
                cursor_position: cursor_position.clone(),
            };
            if let Err(error) = execute_activity(&CURSOR_OPTIONS, "UpdateCursor", || {
                activities.update_cursor(cursor_input.clone())
            })
            .await
            {
                record_failure(activities, &sync_run, &error).await;
                return Err(error.context("UpdateCursor"));
            }
        }
    }

    execute_activity(&RECORD_OPTIONS, "RecordStatus", || {
        activities.record_status(RecordStatusInput::Complete {
            sync_run_id: sync_run.id,
            new_status: SyncRunStatus::Completed,
            rows_written: Some(replicate_output.rows_written as i64),
            error: None,
        })
    })
    .await
    .context("RecordStatus")?;

    Ok(())
}

/// Every run ends with a terminal row, even when the workflow itself is
/// about to fail. Customer-visible messages are persisted as-is; anything
/// else is recorded opaquely.
async fn record_failure(activities: &Activities, sync_run: &SyncRun, error: &anyhow::Error) {
    let error_string =
        customer_visible_message(error).unwrap_or_else(|| OPAQUE_ERROR.to_string());

    let record = execute_activity(&RECORD_OPTIONS, "RecordStatus", || {
        activities.record_status(RecordStatusInput::Complete {
            sync_run_id: sync_run.id,
            new_status: SyncRunStatus::Failed,
            rows_written: None,
            error: Some(error_string.clone()),
        })
    })
    .await;

    // the workflow is already failing for the original reason; a failed
    // status write only gets logged
    if let Err(record_error) = record {
        tracing::error!(%record_error, "failed to record run failure");
    }
}
