//! UpdateCursor: advances the sync's cursor after a successful replicate.
//!
//! On workflow failure this never runs, so the next run re-reads from the
//! previous position; incremental destinations must tolerate replay of the
//! tail.

use anyhow::{Context, Result};
use fabra_db::syncs;
use fabra_db::views::SyncView;
use serde::{Deserialize, Serialize};

use super::Activities;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCursorInput {
    pub sync: SyncView,
    pub cursor_position: String,
}

impl Activities {
    pub async fn update_cursor(&self, input: UpdateCursorInput) -> Result<()> {
        // reload rather than trusting the caller's copy of the sync
        let sync = syncs::load_sync_by_id(&self.db, input.sync.organization_id, input.sync.id)
            .await
            .context("loading sync")?;

        syncs::update_cursor(&self.db, sync.id, &input.cursor_position)
            .await
            .context("updating cursor")
    }
}
