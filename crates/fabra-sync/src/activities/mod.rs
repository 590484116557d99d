//! The four activities the worker registers with the engine. Each is a
//! method on [`Activities`], which carries the config-store pool and the
//! crypto service.

mod fetch_config;
mod record_status;
mod replicate;
mod update_cursor;

pub use fetch_config::{FetchConfigInput, SyncConfig};
pub use record_status::RecordStatusInput;
pub use replicate::{ReplicateInput, ReplicateOutput};
pub use update_cursor::UpdateCursorInput;

use std::sync::Arc;

use fabra_crypto::CryptoService;
use sqlx::PgPool;

pub struct Activities {
    pub db: PgPool,
    pub crypto: Arc<dyn CryptoService>,
}

impl Activities {
    pub fn new(db: PgPool, crypto: Arc<dyn CryptoService>) -> Self {
        Self { db, crypto }
    }
}
