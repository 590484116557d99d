//! Replicate: streams one sync's rows from source to destination.

use anyhow::{Context, Result};
use fabra_connectors::{destination_connector, source_connector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{Activities, SyncConfig};
use crate::engine::ActivityContext;
use crate::pipeline::run_pipeline;

pub type ReplicateInput = SyncConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicateOutput {
    pub rows_written: usize,
    pub cursor_position: Option<String>,
}

impl Activities {
    pub async fn replicate(
        &self,
        ctx: &ActivityContext,
        input: ReplicateInput,
    ) -> Result<ReplicateOutput> {
        let source = source_connector(&input.source_connection, self.crypto.as_ref())
            .await
            .context("building source connector")?;

        let destination = destination_connector(
            &input.destination_connection,
            Arc::clone(&self.crypto),
            input.encrypted_end_customer_api_key.clone(),
        )
        .await
        .context("building destination connector")?;

        let output = run_pipeline(ctx, source, destination, &input).await?;

        Ok(ReplicateOutput {
            rows_written: output.write.rows_written,
            cursor_position: output.read.cursor_position,
        })
    }
}
