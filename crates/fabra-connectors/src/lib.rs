//! fabra-connectors
//!
//! The connector contract and its implementations. A connector's `read`
//! produces row batches on a bounded channel and finishes with a
//! [`ReadOutput`]; `write` consumes batches until the channel closes and
//! finishes with a [`WriteOutput`]. The replicate pipeline owns the channel
//! wiring and failure propagation; connectors never retry internally.

use anyhow::Result;
use fabra_crypto::CryptoService;
use fabra_data::{customer_visible, FieldType, Row};
use fabra_db::models::ConnectionType;
use fabra_db::views::{FieldMappingView, FullConnection, ObjectView, SyncView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod bigquery;
pub mod mongodb;
pub mod sql_source;
pub mod webhook;

pub use bigquery::BigQueryConnector;
pub use mongodb::MongoDbConnector;
pub use sql_source::SqlSourceConnector;
pub use webhook::WebhookConnector;

/// Rows accumulated per batch before it is pushed downstream. Bounds
/// memory, not correctness.
pub const READ_BATCH_SIZE: usize = 1_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationOptions {
    pub staging_bucket: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOutput {
    pub cursor_position: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutput {
    pub rows_written: usize,
}

/// One backend adapter. Column order in every batch equals field-mapping
/// order. Nulls survive as explicit nulls. For cursor-using syncs, rows are
/// ascending by the source cursor field; ties carry no further ordering.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn read(
        &self,
        source_connection: &FullConnection,
        sync: &SyncView,
        field_mappings: &[FieldMappingView],
        rows: &mpsc::Sender<Vec<Row>>,
    ) -> Result<ReadOutput>;

    #[allow(clippy::too_many_arguments)]
    async fn write(
        &self,
        destination_connection: &FullConnection,
        destination_options: &DestinationOptions,
        object: &ObjectView,
        sync: &SyncView,
        field_mappings: &[FieldMappingView],
        rows: &mut mpsc::Receiver<Vec<Row>>,
    ) -> Result<WriteOutput>;
}

/// Builds the reader for a sync's source connection.
pub async fn source_connector(
    connection: &FullConnection,
    crypto: &dyn CryptoService,
) -> Result<Box<dyn Connector>> {
    match connection.connection_type {
        ConnectionType::BigQuery => {
            let client = fabra_query::warehouse_client_for_connection(connection, crypto).await?;
            Ok(Box::new(BigQueryConnector::new(Arc::from(client))))
        }
        ConnectionType::Snowflake
        | ConnectionType::Redshift
        | ConnectionType::Synapse
        | ConnectionType::Postgres
        | ConnectionType::MySql => {
            let client = fabra_query::client_for_connection(connection, crypto).await?;
            Ok(Box::new(SqlSourceConnector::new(client)))
        }
        ConnectionType::MongoDb => Ok(Box::new(MongoDbConnector::from_connection(
            connection, crypto,
        )?)),
        other => Err(customer_visible(format!(
            "source not implemented for {other}"
        ))),
    }
}

/// Builds the writer for a sync's destination connection.
pub async fn destination_connector(
    connection: &FullConnection,
    crypto: Arc<dyn CryptoService>,
    encrypted_end_customer_api_key: Option<String>,
) -> Result<Box<dyn Connector>> {
    match connection.connection_type {
        ConnectionType::BigQuery => {
            let client =
                fabra_query::warehouse_client_for_connection(connection, crypto.as_ref()).await?;
            Ok(Box::new(BigQueryConnector::new(Arc::from(client))))
        }
        ConnectionType::Webhook => Ok(Box::new(WebhookConnector::new(
            crypto,
            encrypted_end_customer_api_key,
        ))),
        other => Err(customer_visible(format!(
            "destination not implemented for {other}"
        ))),
    }
}

/// The declared source type of the sync's cursor field.
pub fn source_cursor_field_type(
    source_cursor_field: &str,
    field_mappings: &[FieldMappingView],
) -> Result<FieldType> {
    field_mappings
        .iter()
        .find(|fm| fm.source_field_name == source_cursor_field)
        .map(|fm| fm.source_field_type)
        .ok_or_else(|| {
            customer_visible(format!(
                "could not find field for cursor field name: {source_cursor_field}"
            ))
        })
}
