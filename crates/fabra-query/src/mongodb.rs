//! MongoDB source client.
//!
//! Queries are structured find requests rather than SQL strings. Field
//! order inside documents is not guaranteed, so rows are rebuilt in schema
//! order from a name-to-value map. Schema discovery samples up to 10,000
//! documents and takes the first non-null type observed per field.

use anyhow::{Context, Result};
use fabra_data::{
    Field, FieldType, QueryResults, Row, RowIterator, Schema, Value, TIMESTAMP_TZ_FORMAT,
};
use futures_util::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::Client;

use crate::{visible, QueryClient};

const SCHEMA_SAMPLE_SIZE: i64 = 10_000;

#[derive(Debug, Clone)]
pub struct MongoDbApiClient {
    pub username: String,
    pub password: String,
    pub host: String,
    pub connection_options: String,
}

/// A structured find request: the MongoDB analog of a read query.
#[derive(Debug, Clone, Default)]
pub struct MongoQuery {
    pub database: String,
    pub collection: String,
    pub filter: Document,
    pub projection: Document,
    pub sort: Option<Document>,
}

impl MongoDbApiClient {
    async fn open_connection(&self) -> Result<Client> {
        let uri = format!(
            "mongodb+srv://{}:{}@{}/?{}",
            self.username, self.password, self.host, self.connection_options
        );

        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(visible)
            .context("parsing mongodb connection string")?;
        options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());

        Client::with_options(options)
            .map_err(visible)
            .context("opening mongodb connection")
    }

    /// Streaming scan for a structured find request. The sampled schema is
    /// resolved concurrently with opening the cursor.
    pub async fn find_iterator(&self, query: &MongoQuery) -> Result<Box<dyn RowIterator>> {
        let client = self.open_connection().await?;
        let collection = client
            .database(&query.database)
            .collection::<Document>(&query.collection);

        let schema_task = {
            let collection = collection.clone();
            tokio::spawn(async move { sample_schema(&collection).await })
        };

        let mut find = collection
            .find(query.filter.clone())
            .projection(query.projection.clone());
        if let Some(sort) = &query.sort {
            find = find.sort(sort.clone());
        }

        let cursor = find.await.map_err(visible).context("running find")?;
        let schema = schema_task
            .await
            .context("schema sampling task failed")??;

        Ok(Box::new(MongoDbIterator {
            schema,
            cursor,
            _client: client,
        }))
    }

    pub async fn run_find(&self, query: &MongoQuery) -> Result<QueryResults> {
        let mut iterator = self.find_iterator(query).await?;
        let schema = iterator.schema().clone();
        let mut data = Vec::new();
        while let Some(row) = iterator.next_row().await? {
            data.push(row);
        }

        Ok(QueryResults { schema, data })
    }
}

#[async_trait::async_trait]
impl QueryClient for MongoDbApiClient {
    async fn query_iterator(&self, _query: &str) -> Result<Box<dyn RowIterator>> {
        anyhow::bail!("mongodb reads are structured find requests; use find_iterator")
    }

    async fn run_query(&self, _query: &str) -> Result<QueryResults> {
        anyhow::bail!("mongodb reads are structured find requests; use run_find")
    }

    async fn get_namespaces(&self) -> Result<Vec<String>> {
        let client = self.open_connection().await?;
        client
            .list_database_names()
            .await
            .map_err(visible)
            .context("listing database names")
    }

    async fn get_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let client = self.open_connection().await?;
        client
            .database(namespace)
            .list_collection_names()
            .await
            .map_err(visible)
            .context("listing collection names")
    }

    async fn get_schema(&self, namespace: &str, table_name: &str) -> Result<Schema> {
        let client = self.open_connection().await?;
        let collection = client.database(namespace).collection::<Document>(table_name);
        sample_schema(&collection).await
    }

    async fn get_field_values(
        &self,
        namespace: &str,
        table_name: &str,
        field_name: &str,
    ) -> Result<Vec<Value>> {
        let client = self.open_connection().await?;
        let values = client
            .database(namespace)
            .collection::<Document>(table_name)
            .distinct(field_name, doc! {})
            .await
            .map_err(visible)
            .context("reading distinct field values")?;

        Ok(values
            .iter()
            .map(convert_bson_value)
            .collect())
    }
}

struct MongoDbIterator {
    schema: Schema,
    cursor: mongodb::Cursor<Document>,
    // keeps the session alive for the cursor's lifetime
    _client: Client,
}

#[async_trait::async_trait]
impl RowIterator for MongoDbIterator {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        let Some(document) = self
            .cursor
            .try_next()
            .await
            .map_err(visible)
            .context("advancing cursor")?
        else {
            return Ok(None);
        };

        Ok(Some(convert_document(&document, &self.schema)))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Discovers field names with one aggregation, then the dominant bson type
/// per field with another. Fields that first appear beyond the sample are
/// invisible until a later sample catches them.
async fn sample_schema(collection: &mongodb::Collection<Document>) -> Result<Schema> {
    let fields = sample_field_names(collection).await?;

    let mut schema = Schema::new();
    for field in fields {
        let pipeline = vec![
            doc! { "$limit": SCHEMA_SAMPLE_SIZE },
            doc! { "$project": { "_id": 0, "fieldType": { "$type": format!("${field}") } } },
            doc! { "$group": { "_id": { "fieldType": "$fieldType" }, "count": { "$sum": 1 } } },
        ];

        let mut cursor = collection
            .aggregate(pipeline)
            .await
            .map_err(visible)
            .context("sampling field types")?;

        // first non-null type wins, even when most documents miss the field
        let mut field_type = "null".to_string();
        while let Some(result) = cursor
            .try_next()
            .await
            .map_err(visible)
            .context("reading type sample")?
        {
            let observed = result
                .get_document("_id")
                .ok()
                .and_then(|id| id.get_str("fieldType").ok())
                .unwrap_or("null");
            if observed != "missing" && observed != "null" {
                field_type = observed.to_string();
                break;
            }
        }

        schema.push(Field::new(field, mongodb_field_type(&field_type)));
    }

    Ok(schema)
}

async fn sample_field_names(collection: &mongodb::Collection<Document>) -> Result<Vec<String>> {
    let pipeline = vec![
        doc! { "$limit": SCHEMA_SAMPLE_SIZE },
        doc! { "$project": { "data": { "$objectToArray": "$$ROOT" } } },
        doc! { "$unwind": "$data" },
        doc! { "$group": { "_id": 0, "fields": { "$addToSet": "$data.k" } } },
    ];

    let mut cursor = collection
        .aggregate(pipeline)
        .await
        .map_err(visible)
        .context("sampling field names")?;

    let Some(result) = cursor
        .try_next()
        .await
        .map_err(visible)
        .context("reading field sample")?
    else {
        return Ok(Vec::new());
    };

    Ok(result
        .get_array("fields")
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| f.as_str().map(|s| s.to_string()))
                .filter(|name| name != "_id")
                .collect()
        })
        .unwrap_or_default())
}

/// Documents do not guarantee field order; rebuild each row in schema
/// order. Missing fields read as null.
pub(crate) fn convert_document(document: &Document, schema: &Schema) -> Row {
    schema
        .iter()
        .map(|field| match document.get(&field.name) {
            None => Value::Null,
            Some(value) => convert_bson_value(value),
        })
        .collect()
}

pub(crate) fn convert_bson_value(value: &Bson) -> Value {
    match value {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Boolean(*b),
        Bson::Int32(i) => Value::Integer(*i as i64),
        Bson::Int64(i) => Value::Integer(*i),
        Bson::Double(n) => Value::Number(*n),
        Bson::Decimal128(d) => d
            .to_string()
            .parse::<f64>()
            .map(Value::Number)
            .unwrap_or_else(|_| Value::String(d.to_string())),
        Bson::DateTime(dt) => Value::String(
            dt.to_chrono()
                .with_timezone(&chrono::Utc)
                .format(TIMESTAMP_TZ_FORMAT)
                .to_string(),
        ),
        Bson::Timestamp(ts) => Value::Integer(ts.time as i64),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Document(d) => Value::Json(document_to_json(d)),
        Bson::Array(a) => Value::Json(serde_json::Value::Array(
            a.iter().map(bson_to_json).collect(),
        )),
        Bson::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

/// Plain maps and arrays, recursively; no extended-JSON wrappers.
fn document_to_json(document: &Document) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in document {
        if matches!(value, Bson::Null) {
            continue;
        }
        map.insert(key.clone(), bson_to_json(value));
    }
    serde_json::Value::Object(map)
}

fn bson_to_json(value: &Bson) -> serde_json::Value {
    match value {
        Bson::Document(d) => document_to_json(d),
        Bson::Array(a) => serde_json::Value::Array(a.iter().map(bson_to_json).collect()),
        Bson::Null => serde_json::Value::Null,
        Bson::Boolean(b) => serde_json::Value::Bool(*b),
        Bson::Int32(i) => serde_json::Value::from(*i),
        Bson::Int64(i) => serde_json::Value::from(*i),
        Bson::Double(n) => serde_json::Value::from(*n),
        Bson::String(s) => serde_json::Value::String(s.clone()),
        Bson::DateTime(dt) => serde_json::Value::String(
            dt.to_chrono()
                .with_timezone(&chrono::Utc)
                .format(TIMESTAMP_TZ_FORMAT)
                .to_string(),
        ),
        Bson::ObjectId(oid) => serde_json::Value::String(oid.to_hex()),
        other => serde_json::Value::String(other.to_string()),
    }
}

fn mongodb_field_type(mongodb_type: &str) -> FieldType {
    match mongodb_type.to_uppercase().as_str() {
        "INT" | "INT32" | "LONG" => FieldType::Integer,
        // MongoDB dates are UTC instants
        "DATE" | "DATETIME" => FieldType::DateTimeTz,
        "TIMESTAMP" => FieldType::Timestamp,
        "DECIMAL" | "DOUBLE" | "FLOAT64" => FieldType::Number,
        "ARRAY" => FieldType::Array,
        "OBJECT" => FieldType::Json,
        "BOOL" => FieldType::Boolean,
        _ => FieldType::String,
    }
}
