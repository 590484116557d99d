//! FetchConfig: resolves everything a replicate needs into one value.

use anyhow::{Context, Result};
use fabra_connectors::{source_cursor_field_type, DestinationOptions};
use fabra_data::customer_visible;
use fabra_db::views::{
    self, FieldMappingView, FullConnection, ObjectView, SyncView,
};
use fabra_db::{api_keys, connections, destinations, objects, sources, syncs};
use serde::{Deserialize, Serialize};

use super::Activities;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FetchConfigInput {
    pub organization_id: i64,
    pub sync_id: i64,
}

/// The fully-resolved configuration one sync run executes against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub sync: SyncView,
    pub source_connection: FullConnection,
    pub destination_connection: FullConnection,
    pub destination_options: DestinationOptions,
    pub object: ObjectView,
    pub field_mappings: Vec<FieldMappingView>,
    /// Still ciphertext here; decrypted inside the replicate activity.
    pub encrypted_end_customer_api_key: Option<String>,
}

impl Activities {
    pub async fn fetch_config(&self, input: FetchConfigInput) -> Result<SyncConfig> {
        let sync = syncs::load_sync_by_id(&self.db, input.organization_id, input.sync_id)
            .await
            .context("failed to load sync")?;

        let source = sources::load_source_by_id(
            &self.db,
            input.organization_id,
            &sync.end_customer_id,
            sync.source_id,
        )
        .await
        .context("failed to load source")?;

        let source_connection =
            connections::load_connection_by_id(&self.db, input.organization_id, source.connection_id)
                .await
                .context("failed to load source connection")?;

        let object = objects::load_object_by_id(&self.db, input.organization_id, sync.object_id)
            .await
            .context("failed to load object")?;

        let destination = destinations::load_destination_by_id(
            &self.db,
            input.organization_id,
            object.destination_id,
        )
        .await
        .context("failed to load destination")?;

        let destination_connection = connections::load_connection_by_id(
            &self.db,
            input.organization_id,
            destination.connection_id,
        )
        .await
        .context("failed to load destination connection")?;

        let field_mappings = syncs::load_field_mappings_for_sync(&self.db, input.sync_id)
            .await
            .context("failed to load field mappings")?;

        let object_fields = objects::load_object_fields(&self.db, object.id)
            .await
            .context("failed to load object fields")?;

        // this may be missing, and that's fine: it isn't required
        let encrypted_end_customer_api_key =
            api_keys::load_end_customer_api_key(&self.db, input.organization_id, &sync.end_customer_id)
                .await
                .context("failed to load end customer api key")?;

        let sync_view = views::convert_sync(&sync);
        let field_mapping_views = views::convert_field_mappings(&field_mappings, &object_fields);

        // a cursor field must exist in the mappings and carry an orderable
        // type, or every incremental run would fail at the source
        if let Some(cursor_field) = sync_view.source_cursor_field.as_deref() {
            let cursor_type = source_cursor_field_type(cursor_field, &field_mapping_views)?;
            if !cursor_type.cursor_capable() {
                return Err(customer_visible(format!(
                    "field {cursor_field} of type {cursor_type} cannot be used as a cursor"
                )));
            }
        }

        Ok(SyncConfig {
            sync: sync_view,
            source_connection: views::convert_full_connection(&source_connection),
            destination_connection: views::convert_full_connection(&destination_connection),
            destination_options: DestinationOptions {
                staging_bucket: destination.staging_bucket.unwrap_or_default(),
            },
            object: views::convert_object(&object, &object_fields),
            field_mappings: field_mapping_views,
            encrypted_end_customer_api_key,
        })
    }
}
