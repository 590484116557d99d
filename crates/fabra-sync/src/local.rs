//! In-process engine for dev and tests.
//!
//! The hosted durable engine owns scheduling, state persistence, and replay;
//! this stand-in executes the same workflow code with the guarantees the
//! workflow relies on: at most one running workflow per workflow id, and
//! per-activity retry envelopes via `execute_activity`.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::activities::Activities;
use crate::engine::{ActivityContext, Heartbeat, NoopHeartbeat};
use crate::workflow::{run_sync_workflow, SyncInput};

pub struct LocalEngine {
    activities: Arc<Activities>,
    heartbeat: Arc<dyn Heartbeat>,
    running: Mutex<HashSet<String>>,
}

impl LocalEngine {
    pub fn new(activities: Arc<Activities>) -> Self {
        Self {
            activities,
            heartbeat: Arc::new(NoopHeartbeat),
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Arc<dyn Heartbeat>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Executes the sync workflow for one trigger. Concurrent triggers for
    /// the same sync are rejected while its workflow is running, which is
    /// the hosted engine's one-workflow-per-id guarantee.
    pub async fn trigger(&self, input: SyncInput, cancellation: CancellationToken) -> Result<()> {
        let sync =
            fabra_db::syncs::load_sync_by_id(&self.activities.db, input.organization_id, input.sync_id)
                .await
                .context("loading sync for trigger")?;
        let workflow_id = sync.workflow_id.clone();

        {
            let mut running = self.running.lock().await;
            if !running.insert(workflow_id.clone()) {
                anyhow::bail!("workflow {workflow_id} is already running");
            }
        }

        let ctx = ActivityContext::new(Arc::clone(&self.heartbeat), cancellation);
        let result = run_sync_workflow(&self.activities, &ctx, &workflow_id, input).await;

        self.running.lock().await.remove(&workflow_id);
        result
    }

    /// Drains triggers until the channel closes or shutdown fires. In-flight
    /// workflows are cancelled on shutdown; the engine retries them on
    /// restart.
    pub async fn run(
        &self,
        mut triggers: mpsc::Receiver<SyncInput>,
        shutdown: CancellationToken,
    ) {
        loop {
            let input = tokio::select! {
                _ = shutdown.cancelled() => break,
                input = triggers.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };

            info!(sync_id = input.sync_id, "starting sync workflow");
            match self.trigger(input, shutdown.child_token()).await {
                Ok(()) => info!(sync_id = input.sync_id, "sync workflow completed"),
                Err(workflow_error) => {
                    error!(sync_id = input.sync_id, %workflow_error, "sync workflow failed");
                }
            }
        }
    }
}
