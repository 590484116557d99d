//! fabra-worker entry point.
//!
//! A long-lived process: it connects to the config store, registers the
//! sync workflow and its activities with the engine, and drains triggers
//! until interrupted. SIGINT/SIGTERM start a graceful shutdown; in-flight
//! activities are cancelled and retried by the engine on restart.

use std::sync::Arc;

use anyhow::{Context, Result};
use fabra_crypto::PassthroughCrypto;
use fabra_sync::{Activities, LocalEngine, SyncInput, SYNC_TASK_QUEUE};
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Trigger channel: the control plane NOTIFYs sync inputs here.
const TRIGGER_CHANNEL: &str = "fabra_sync_trigger";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let pool = fabra_db::connect_from_env().await?;

    // The KMS-backed crypto service ships with the hosted deployment; local
    // builds run against the passthrough implementation.
    let activities = Arc::new(Activities::new(pool.clone(), Arc::new(PassthroughCrypto::new())));
    let engine = LocalEngine::new(activities);

    let shutdown = CancellationToken::new();
    let (trigger_tx, trigger_rx) = mpsc::channel::<SyncInput>(16);

    let listener_task = tokio::spawn(listen_for_triggers(
        pool,
        trigger_tx,
        shutdown.clone(),
    ));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_interrupt().await;
            info!("shutdown signal received, draining in-flight work");
            shutdown.cancel();
        }
    });

    info!(task_queue = SYNC_TASK_QUEUE, "fabra-worker listening for sync triggers");
    engine.run(trigger_rx, shutdown).await;

    if let Err(join_error) = listener_task.await {
        warn!(%join_error, "trigger listener exited abnormally");
    }

    info!("fabra-worker stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Forwards NOTIFY payloads (`{"organization_id": .., "sync_id": ..}`) into
/// the trigger channel until shutdown.
async fn listen_for_triggers(
    pool: sqlx::PgPool,
    triggers: mpsc::Sender<SyncInput>,
    shutdown: CancellationToken,
) {
    let mut listener = match PgListener::connect_with(&pool).await {
        Ok(listener) => listener,
        Err(connect_error) => {
            error!(%connect_error, "could not open trigger listener");
            return;
        }
    };

    if let Err(listen_error) = listener.listen(TRIGGER_CHANNEL).await {
        error!(%listen_error, "could not subscribe to trigger channel");
        return;
    }

    loop {
        let notification = tokio::select! {
            _ = shutdown.cancelled() => break,
            notification = listener.recv() => notification,
        };

        let notification = match notification {
            Ok(notification) => notification,
            Err(recv_error) => {
                warn!(%recv_error, "trigger listener reconnecting");
                continue;
            }
        };

        match serde_json::from_str::<SyncInput>(notification.payload()) {
            Ok(input) => {
                if triggers.send(input).await.is_err() {
                    break;
                }
            }
            Err(parse_error) => {
                warn!(%parse_error, payload = notification.payload(), "ignoring malformed trigger");
            }
        }
    }
}

async fn wait_for_interrupt() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
