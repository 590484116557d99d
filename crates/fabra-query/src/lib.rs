//! fabra-query
//!
//! Backend clients. Each customer backend gets a client struct holding its
//! (decrypted) connection parameters; connections are opened per operation
//! and released when the scan finishes, on every exit path.
//!
//! Native column types are classified into canonical field types by a
//! per-backend lookup; unknown types degrade to `STRING`. Datetime values
//! are normalized to the two canonical textual shapes at this boundary so
//! nothing downstream ever sees a backend-native representation.

use anyhow::Result;
use fabra_crypto::CryptoService;
use fabra_data::{customer_visible, QueryResults, RowIterator, Schema, Value};
use fabra_db::models::ConnectionType;
use fabra_db::views::FullConnection;
use serde::{Deserialize, Serialize};

pub mod bigquery;
pub mod mongodb;
pub mod mysql;
pub mod postgres;
pub mod redshift;
pub mod snowflake;
pub mod synapse;

pub use bigquery::BigQueryApiClient;
pub use mongodb::{MongoDbApiClient, MongoQuery};
pub use mysql::MySqlApiClient;
pub use postgres::PostgresApiClient;
pub use redshift::RedshiftApiClient;
pub use snowflake::SnowflakeApiClient;
pub use synapse::SynapseApiClient;

/// One staged object in the destination's staging bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingOptions {
    pub bucket: String,
    pub object: String,
}

/// How a load lands in the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteDisposition {
    Truncate,
    Append,
}

/// Column of the explicit schema a staged load carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadField {
    pub name: String,
    pub field_type: fabra_data::FieldType,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Wildcard staging reference, e.g. `gs://bucket/prefix-*`.
    pub staging_reference: String,
    pub schema: Vec<LoadField>,
    pub write_disposition: WriteDisposition,
}

/// Read-side surface every backend speaks.
#[async_trait::async_trait]
pub trait QueryClient: Send + Sync {
    /// Streaming scan over an arbitrary read query.
    async fn query_iterator(&self, query: &str) -> Result<Box<dyn RowIterator>>;

    /// Fully-buffered query, for small control-plane reads.
    async fn run_query(&self, query: &str) -> Result<QueryResults>;

    async fn get_namespaces(&self) -> Result<Vec<String>>;

    async fn get_tables(&self, namespace: &str) -> Result<Vec<String>>;

    async fn get_schema(&self, namespace: &str, table_name: &str) -> Result<Schema>;

    async fn get_field_values(
        &self,
        namespace: &str,
        table_name: &str,
        field_name: &str,
    ) -> Result<Vec<Value>>;
}

/// A warehouse that loads staged CSV objects.
#[async_trait::async_trait]
pub trait WarehouseClient: QueryClient {
    async fn stage_data(&self, csv_data: &str, staging_options: &StagingOptions) -> Result<()>;

    async fn load_from_staging(
        &self,
        namespace: &str,
        table_name: &str,
        load_options: &LoadOptions,
    ) -> Result<()>;

    /// Deletes one staged object. Callers pass no cancellation scope here on
    /// purpose: cleanup must still run when the surrounding run is
    /// cancelled, so storage is never leaked.
    async fn cleanup_staging_data(&self, staging_options: &StagingOptions) -> Result<()>;
}

/// Builds the client for a source or destination connection, decrypting its
/// credentials. This is the only place ciphertext becomes plaintext.
pub async fn client_for_connection(
    connection: &FullConnection,
    crypto: &dyn CryptoService,
) -> Result<Box<dyn QueryClient>> {
    match connection.connection_type {
        ConnectionType::BigQuery => Ok(Box::new(
            bigquery::BigQueryApiClient::from_connection(connection, crypto).await?,
        )),
        ConnectionType::Snowflake => Ok(Box::new(snowflake::SnowflakeApiClient {
            username: required(connection.username.as_deref(), "Snowflake", "username")?,
            password: decrypt_password(connection, crypto)?,
            warehouse_name: required(connection.warehouse_name.as_deref(), "Snowflake", "warehouse")?,
            database_name: required(connection.database_name.as_deref(), "Snowflake", "database")?,
            role: connection.role.clone().unwrap_or_default(),
            host: required(connection.host.as_deref(), "Snowflake", "host")?,
        })),
        ConnectionType::Redshift => Ok(Box::new(redshift::RedshiftApiClient {
            username: required(connection.username.as_deref(), "Redshift", "username")?,
            password: decrypt_password(connection, crypto)?,
            database_name: required(connection.database_name.as_deref(), "Redshift", "database")?,
            host: required(connection.host.as_deref(), "Redshift", "host")?,
        })),
        ConnectionType::Synapse => Ok(Box::new(synapse::SynapseApiClient {
            username: required(connection.username.as_deref(), "Synapse", "username")?,
            password: decrypt_password(connection, crypto)?,
            database_name: required(connection.database_name.as_deref(), "Synapse", "database")?,
            host: required(connection.host.as_deref(), "Synapse", "host")?,
        })),
        ConnectionType::Postgres => Ok(Box::new(postgres::PostgresApiClient {
            username: required(connection.username.as_deref(), "Postgres", "username")?,
            password: decrypt_password(connection, crypto)?,
            database_name: required(connection.database_name.as_deref(), "Postgres", "database")?,
            host: required(connection.host.as_deref(), "Postgres", "host")?,
        })),
        ConnectionType::MySql => Ok(Box::new(mysql::MySqlApiClient {
            username: required(connection.username.as_deref(), "MySQL", "username")?,
            password: decrypt_password(connection, crypto)?,
            database_name: required(connection.database_name.as_deref(), "MySQL", "database")?,
            host: required(connection.host.as_deref(), "MySQL", "host")?,
        })),
        ConnectionType::MongoDb => Ok(Box::new(mongodb::MongoDbApiClient {
            username: required(connection.username.as_deref(), "MongoDB", "username")?,
            password: decrypt_password(connection, crypto)?,
            host: required(connection.host.as_deref(), "MongoDB", "host")?,
            connection_options: connection.connection_options.clone().unwrap_or_default(),
        })),
        other => Err(customer_visible(format!(
            "connections of type {other} are not supported yet"
        ))),
    }
}

/// Like [`client_for_connection`], but for warehouses that can load staged
/// data. BigQuery is the only implemented warehouse sink.
pub async fn warehouse_client_for_connection(
    connection: &FullConnection,
    crypto: &dyn CryptoService,
) -> Result<Box<dyn WarehouseClient>> {
    match connection.connection_type {
        ConnectionType::BigQuery => Ok(Box::new(
            bigquery::BigQueryApiClient::from_connection(connection, crypto).await?,
        )),
        other => Err(customer_visible(format!(
            "{other} destinations cannot load staged data"
        ))),
    }
}

/// Backend failures surface to the customer with the backend's own message:
/// bad SQL, auth failures, and unreachable hosts are theirs to fix.
pub(crate) fn visible<E: std::fmt::Display>(err: E) -> anyhow::Error {
    customer_visible(err.to_string())
}

fn required(value: Option<&str>, backend: &str, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(customer_visible(format!(
            "{backend} connection must have {field} defined"
        ))),
    }
}

fn decrypt_password(connection: &FullConnection, crypto: &dyn CryptoService) -> Result<String> {
    let ciphertext = connection
        .password
        .as_deref()
        .ok_or_else(|| customer_visible("connection is missing credentials"))?;
    crypto.decrypt_connection_credentials(ciphertext)
}

/// Iterator over a channel fed by a scan task. The task owns the database
/// connection and exits when the receiver is dropped, so cancelling a read
/// releases the connection deterministically.
pub(crate) struct ChannelIterator {
    schema: Schema,
    rows: tokio::sync::mpsc::Receiver<Result<fabra_data::Row>>,
}

impl ChannelIterator {
    pub(crate) fn new(
        schema: Schema,
        rows: tokio::sync::mpsc::Receiver<Result<fabra_data::Row>>,
    ) -> Self {
        Self { schema, rows }
    }
}

#[async_trait::async_trait]
impl RowIterator for ChannelIterator {
    async fn next_row(&mut self) -> Result<Option<fabra_data::Row>> {
        match self.rows.recv().await {
            Some(row) => row.map(Some),
            None => Ok(None),
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Iterator over rows already materialized in memory, for backends whose
/// client library returns whole result payloads.
pub(crate) struct BufferedIterator {
    schema: Schema,
    rows: std::collections::VecDeque<fabra_data::Row>,
}

impl BufferedIterator {
    pub(crate) fn new(schema: Schema, rows: Vec<fabra_data::Row>) -> Self {
        Self {
            schema,
            rows: rows.into(),
        }
    }
}

#[async_trait::async_trait]
impl RowIterator for BufferedIterator {
    async fn next_row(&mut self) -> Result<Option<fabra_data::Row>> {
        Ok(self.rows.pop_front())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabra_data::{Field, FieldType};

    #[tokio::test]
    async fn buffered_iterator_drains_in_order() {
        let schema = vec![Field::new("a", FieldType::Integer)];
        let mut it = BufferedIterator::new(
            schema,
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
        );
        assert_eq!(it.next_row().await.unwrap(), Some(vec![Value::Integer(1)]));
        assert_eq!(it.next_row().await.unwrap(), Some(vec![Value::Integer(2)]));
        assert_eq!(it.next_row().await.unwrap(), None);
    }

    #[tokio::test]
    async fn channel_iterator_ends_when_sender_drops() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let mut it = ChannelIterator::new(vec![], rx);
        tx.send(Ok(vec![Value::Boolean(true)])).await.unwrap();
        drop(tx);
        assert_eq!(it.next_row().await.unwrap(), Some(vec![Value::Boolean(true)]));
        assert_eq!(it.next_row().await.unwrap(), None);
    }

    #[test]
    fn missing_required_field_is_customer_visible() {
        let err = required(None, "BigQuery", "location").unwrap_err();
        assert!(fabra_data::customer_visible_message(&err).is_some());
    }
}
