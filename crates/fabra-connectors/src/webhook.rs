//! Webhook destination connector.
//!
//! Rows are encoded into JSON objects keyed by destination field names,
//! wrapped in a signed envelope, and POSTed to the customer's endpoint in
//! batches of at most [`MAX_WEBHOOK_BATCH_SIZE`]. Delivery is paced by a
//! token bucket; when the bucket is empty the writer waits rather than
//! fails.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::{Context, Result};
use fabra_crypto::{sign_payload, CryptoService};
use fabra_data::{customer_visible, Row};
use fabra_db::views::{FieldMappingView, FullConnection, ObjectFieldView, ObjectView, SyncView};
use governor::{Quota, RateLimiter};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{Connector, DestinationOptions, ReadOutput, WriteOutput};

pub const MAX_WEBHOOK_BATCH_SIZE: usize = 1_000;
pub const REFILL_RATE: u32 = 100;
pub const MAX_BURST: u32 = 100;

pub const SIGNATURE_HEADER: &str = "X-FABRA-SIGNATURE";

#[derive(Debug, Serialize)]
struct WebhookData<'a> {
    object_id: i64,
    object_name: &'a str,
    end_customer_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_customer_api_key: Option<&'a str>,
    fabra_timestamp: i64,
    data: Vec<serde_json::Map<String, serde_json::Value>>,
}

pub struct WebhookConnector {
    crypto: Arc<dyn CryptoService>,
    encrypted_end_customer_api_key: Option<String>,
    http: reqwest::Client,
}

impl WebhookConnector {
    pub fn new(
        crypto: Arc<dyn CryptoService>,
        encrypted_end_customer_api_key: Option<String>,
    ) -> Self {
        Self {
            crypto,
            encrypted_end_customer_api_key,
            http: reqwest::Client::new(),
        }
    }

    async fn send_data(
        &self,
        object: &ObjectView,
        end_customer_id: &str,
        end_customer_api_key: Option<&str>,
        data: Vec<serde_json::Map<String, serde_json::Value>>,
        webhook_url: &str,
        signing_key: &str,
    ) -> Result<()> {
        let payload = WebhookData {
            object_id: object.id,
            object_name: &object.display_name,
            end_customer_id,
            end_customer_api_key,
            fabra_timestamp: chrono::Utc::now().timestamp(),
            data,
        };
        let body = serde_json::to_vec(&payload).context("marshalling webhook payload")?;
        let signature = sign_payload(signing_key, &body);

        let response = self
            .http
            .post(webhook_url)
            .header("Content-Type", "application/json; charset=UTF-8")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| customer_visible(e.to_string()))
            .context("posting webhook payload")?;

        // a non-2xx does not fail the batch; the receiver owns its errors
        if !response.status().is_success() {
            warn!(status = %response.status(), "webhook endpoint returned a non-success status");
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Connector for WebhookConnector {
    async fn read(
        &self,
        _source_connection: &FullConnection,
        _sync: &SyncView,
        _field_mappings: &[FieldMappingView],
        _rows: &mpsc::Sender<Vec<Row>>,
    ) -> Result<ReadOutput> {
        Err(customer_visible("webhook source not supported"))
    }

    async fn write(
        &self,
        destination_connection: &FullConnection,
        _destination_options: &DestinationOptions,
        object: &ObjectView,
        sync: &SyncView,
        field_mappings: &[FieldMappingView],
        rows: &mut mpsc::Receiver<Vec<Row>>,
    ) -> Result<WriteOutput> {
        // TODO: allow customizing the rate limit per destination
        let limiter = RateLimiter::direct(
            Quota::per_second(NonZeroU32::new(REFILL_RATE).expect("nonzero refill rate"))
                .allow_burst(NonZeroU32::new(MAX_BURST).expect("nonzero burst")),
        );

        let signing_key_ciphertext = destination_connection
            .credentials
            .as_deref()
            .ok_or_else(|| customer_visible("webhook destination is missing its signing key"))?;
        let signing_key = self
            .crypto
            .decrypt_webhook_signing_key(signing_key_ciphertext)?;

        let end_customer_api_key = self
            .encrypted_end_customer_api_key
            .as_deref()
            .map(|ciphertext| self.crypto.decrypt_end_customer_api_key(ciphertext))
            .transpose()?;

        let webhook_url = destination_connection
            .host
            .as_deref()
            .ok_or_else(|| customer_visible("webhook destination is missing its URL"))?;

        let destination_fields = destination_fields_by_id(object);

        let mut buffered: Vec<serde_json::Map<String, serde_json::Value>> = Vec::new();
        let mut rows_written = 0usize;

        while let Some(batch) = rows.recv().await {
            rows_written += batch.len();
            for row in batch {
                buffered.push(encode_row(&row, field_mappings, &destination_fields));

                if buffered.len() == MAX_WEBHOOK_BATCH_SIZE {
                    // TODO: retry failed deliveries
                    limiter.until_ready().await;
                    self.send_data(
                        object,
                        &sync.end_customer_id,
                        end_customer_api_key.as_deref(),
                        std::mem::take(&mut buffered),
                        webhook_url,
                        &signing_key,
                    )
                    .await?;
                }
            }
        }

        if !buffered.is_empty() {
            limiter.until_ready().await;
            self.send_data(
                object,
                &sync.end_customer_id,
                end_customer_api_key.as_deref(),
                buffered,
                webhook_url,
                &signing_key,
            )
            .await?;
        }

        Ok(WriteOutput { rows_written })
    }
}

fn destination_fields_by_id(object: &ObjectView) -> HashMap<i64, &ObjectFieldView> {
    object
        .object_fields
        .iter()
        .map(|field| (field.id, field))
        .collect()
}

/// One row as a JSON object: keys are destination field names, nulls are
/// left out entirely, and `is_json_field` mappings nest under their
/// destination field, merging with siblings. Omitted fields never appear.
fn encode_row(
    row: &Row,
    field_mappings: &[FieldMappingView],
    destination_fields: &HashMap<i64, &ObjectFieldView>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut output = serde_json::Map::new();

    for (i, value) in row.iter().enumerate() {
        let Some(field_mapping) = field_mappings.get(i) else {
            continue;
        };
        let Some(destination_field) = destination_fields.get(&field_mapping.destination_field_id)
        else {
            continue;
        };
        if destination_field.omit {
            continue;
        }

        if field_mapping.is_json_field {
            // raw values land in the nested object even when they are null
            let nested = output
                .entry(destination_field.name.clone())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let serde_json::Value::Object(nested) = nested {
                nested.insert(field_mapping.source_field_name.clone(), value.to_json());
            }
        } else if !value.is_null() {
            output.insert(destination_field.name.clone(), value.to_json());
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabra_data::{FieldType, Value};
    use fabra_db::models::{SyncMode, TargetType};
    use serde_json::json;

    fn object_field(id: i64, name: &str, omit: bool) -> ObjectFieldView {
        ObjectFieldView {
            id,
            name: name.to_string(),
            field_type: FieldType::String,
            omit,
            optional: false,
            display_name: None,
            description: None,
        }
    }

    fn test_object(fields: Vec<ObjectFieldView>) -> ObjectView {
        ObjectView {
            id: 3,
            display_name: "orders".to_string(),
            destination_id: 1,
            target_type: TargetType::Webhook,
            namespace: None,
            table_name: None,
            sync_mode: SyncMode::FullAppend,
            cursor_field: None,
            primary_key: None,
            end_customer_id_field: None,
            recurring: false,
            frequency: None,
            frequency_units: None,
            object_fields: fields,
        }
    }

    fn mapping(name: &str, destination_field_id: i64, is_json_field: bool) -> FieldMappingView {
        FieldMappingView {
            source_field_name: name.to_string(),
            source_field_type: FieldType::String,
            destination_field_id,
            destination_field_name: String::new(),
            destination_field_type: FieldType::String,
            is_json_field,
        }
    }

    #[test]
    fn nulls_are_excluded_from_the_payload() {
        let object = test_object(vec![
            object_field(1, "name", false),
            object_field(2, "city", false),
        ]);
        let fields = destination_fields_by_id(&object);
        let mappings = vec![mapping("name", 1, false), mapping("city", 2, false)];
        let row: Row = vec![Value::String("ada".into()), Value::Null];

        let encoded = encode_row(&row, &mappings, &fields);
        assert_eq!(serde_json::Value::Object(encoded), json!({"name": "ada"}));
    }

    #[test]
    fn json_mappings_merge_and_keep_nulls() {
        let object = test_object(vec![object_field(1, "attributes", false)]);
        let fields = destination_fields_by_id(&object);
        let mappings = vec![
            mapping("color", 1, true),
            mapping("size", 1, true),
        ];
        let row: Row = vec![Value::String("red".into()), Value::Null];

        let encoded = encode_row(&row, &mappings, &fields);
        assert_eq!(
            serde_json::Value::Object(encoded),
            json!({"attributes": {"color": "red", "size": null}})
        );
    }

    #[test]
    fn omitted_destination_fields_never_appear() {
        let object = test_object(vec![
            object_field(1, "kept", false),
            object_field(2, "hidden", true),
        ]);
        let fields = destination_fields_by_id(&object);
        let mappings = vec![mapping("kept", 1, false), mapping("hidden", 2, false)];
        let row: Row = vec![Value::String("a".into()), Value::String("b".into())];

        let encoded = encode_row(&row, &mappings, &fields);
        assert_eq!(serde_json::Value::Object(encoded), json!({"kept": "a"}));
    }

    #[test]
    fn envelope_serializes_without_absent_api_key() {
        let payload = WebhookData {
            object_id: 3,
            object_name: "orders",
            end_customer_id: "abc123",
            end_customer_api_key: None,
            fabra_timestamp: 1_700_000_000,
            data: vec![],
        };
        let encoded = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            encoded,
            json!({
                "object_id": 3,
                "object_name": "orders",
                "end_customer_id": "abc123",
                "fabra_timestamp": 1_700_000_000,
                "data": []
            })
        );
    }
}
