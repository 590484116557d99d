//! fabra-sync
//!
//! The durable-workflow layer of the sync engine: the four activities, the
//! workflow that sequences them, their retry envelopes, and the replicate
//! pipeline. The hosted engine calls into these; the in-process engine in
//! [`local`] runs them directly for dev and tests.

pub mod activities;
pub mod engine;
pub mod local;
pub mod pipeline;
pub mod workflow;

pub use activities::{
    Activities, FetchConfigInput, RecordStatusInput, ReplicateInput, ReplicateOutput, SyncConfig,
    UpdateCursorInput,
};
pub use engine::{
    execute_activity, ActivityContext, ActivityOptions, Heartbeat, NoopHeartbeat, RetryPolicy,
    SYNC_TASK_QUEUE,
};
pub use local::LocalEngine;
pub use workflow::{run_sync_workflow, SyncInput};
