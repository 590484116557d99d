//! The replicate pipeline: one reader, one writer, a bounded row channel
//! between them.
//!
//! Each side runs in its own task behind a supervisor that turns panics and
//! errors into messages on an error channel. A failed side is parked
//! instead of dropped so the row channel never closes on an error path;
//! closure only ever means the reader finished cleanly, so the writer
//! cannot mistake a failure for end-of-stream. Backpressure falls out of
//! the channel bound: a slow writer halts the reader.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use fabra_connectors::{Connector, ReadOutput, WriteOutput};
use fabra_data::Row;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::activities::SyncConfig;
use crate::engine::{ActivityContext, Heartbeat};

/// How often the replicate activity pulses the engine while the pipeline
/// runs.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

pub struct PipelineOutput {
    pub read: ReadOutput,
    pub write: WriteOutput,
}

pub async fn run_pipeline(
    ctx: &ActivityContext,
    source_connector: Box<dyn Connector>,
    destination_connector: Box<dyn Connector>,
    config: &SyncConfig,
) -> Result<PipelineOutput> {
    let (rows_tx, mut rows_rx) = mpsc::channel::<Vec<Row>>(1);
    let (read_output_tx, mut read_output_rx) = oneshot::channel::<ReadOutput>();
    let (write_output_tx, mut write_output_rx) = oneshot::channel::<WriteOutput>();
    let (read_err_tx, mut read_err_rx) = mpsc::channel::<anyhow::Error>(1);
    let (write_err_tx, mut write_err_rx) = mpsc::channel::<anyhow::Error>(1);

    let read_task = tokio::spawn({
        let config = config.clone();
        async move {
            let read = AssertUnwindSafe(source_connector.read(
                &config.source_connection,
                &config.sync,
                &config.field_mappings,
                &rows_tx,
            ))
            .catch_unwind()
            .await;

            match read {
                Ok(Ok(output)) => {
                    // dropping the sender is the end-of-stream signal
                    drop(rows_tx);
                    let _ = read_output_tx.send(output);
                }
                Ok(Err(error)) => {
                    let _ = read_err_tx.send(error).await;
                    std::future::pending::<()>().await;
                }
                Err(panic) => {
                    let _ = read_err_tx
                        .send(anyhow!("panic: {}", panic_message(panic.as_ref())))
                        .await;
                    std::future::pending::<()>().await;
                }
            }
        }
    });

    let write_task = tokio::spawn({
        let config = config.clone();
        async move {
            let write = AssertUnwindSafe(destination_connector.write(
                &config.destination_connection,
                &config.destination_options,
                &config.object,
                &config.sync,
                &config.field_mappings,
                &mut rows_rx,
            ))
            .catch_unwind()
            .await;

            match write {
                Ok(Ok(output)) => {
                    let _ = write_output_tx.send(output);
                }
                Ok(Err(error)) => {
                    let _ = write_err_tx.send(error).await;
                    std::future::pending::<()>().await;
                }
                Err(panic) => {
                    let _ = write_err_tx
                        .send(anyhow!("panic: {}", panic_message(panic.as_ref())))
                        .await;
                    std::future::pending::<()>().await;
                }
            }
        }
    });

    let heartbeat_task = tokio::spawn({
        let heartbeat: Arc<dyn Heartbeat> = Arc::clone(&ctx.heartbeat);
        async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                // first tick completes immediately
                ticker.tick().await;
                heartbeat.record_heartbeat();
            }
        }
    });

    let mut read_output: Option<ReadOutput> = None;
    let mut write_output: Option<WriteOutput> = None;

    // wait for both outputs in any order, bailing on the first error
    let outcome = loop {
        tokio::select! {
            biased;
            Some(error) = read_err_rx.recv() => break Err(error.context("replicate read")),
            Some(error) = write_err_rx.recv() => break Err(error.context("replicate write")),
            _ = ctx.cancellation.cancelled() => break Err(anyhow!("replicate cancelled")),
            output = &mut read_output_rx, if read_output.is_none() => {
                match output {
                    Ok(output) => read_output = Some(output),
                    Err(_) => break Err(anyhow!("reader exited without a result")),
                }
            }
            output = &mut write_output_rx, if write_output.is_none() => {
                match output {
                    Ok(output) => write_output = Some(output),
                    Err(_) => break Err(anyhow!("writer exited without a result")),
                }
            }
        }

        if let (Some(read), Some(write)) = (read_output.as_ref(), write_output.as_ref()) {
            info!(
                rows_written = write.rows_written,
                cursor = read.cursor_position.as_deref().unwrap_or(""),
                "replication finished"
            );
            break Ok(());
        }
    };

    read_task.abort();
    write_task.abort();
    heartbeat_task.abort();

    outcome?;

    Ok(PipelineOutput {
        read: read_output.unwrap_or_default(),
        write: write_output.unwrap_or_default(),
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker crashed".to_string()
    }
}
