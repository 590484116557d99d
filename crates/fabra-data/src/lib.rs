//! fabra-data
//!
//! Canonical data model shared by every backend adapter: field types,
//! schemas, row values, the row-iterator contract, and the canonical
//! datetime formats. Connectors normalize native values into these types on
//! read and out of them on write.

pub mod error;
pub mod value;

pub use error::{customer_visible, customer_visible_message, CustomerVisibleError};
pub use value::Value;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Textual shape of every tz-aware datetime flowing through the pipeline,
/// e.g. `2006-01-02 15:04:05.000-07:00`.
pub const TIMESTAMP_TZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f%:z";

/// Textual shape of every tz-naive datetime, e.g. `2006-01-02 15:04:05.000`.
pub const TIMESTAMP_NTZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Canonical field type. Every backend maps its native types into this set;
/// unknown native types degrade to `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "INTEGER")]
    Integer,
    #[serde(rename = "NUMBER")]
    Number,
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "TIME_TZ")]
    TimeTz,
    #[serde(rename = "TIME_NTZ")]
    TimeNtz,
    #[serde(rename = "DATETIME_TZ")]
    DateTimeTz,
    #[serde(rename = "DATETIME_NTZ")]
    DateTimeNtz,
    #[serde(rename = "TIMESTAMP")]
    Timestamp,
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "ARRAY")]
    Array,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Integer => "INTEGER",
            FieldType::Number => "NUMBER",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Date => "DATE",
            FieldType::TimeTz => "TIME_TZ",
            FieldType::TimeNtz => "TIME_NTZ",
            FieldType::DateTimeTz => "DATETIME_TZ",
            FieldType::DateTimeNtz => "DATETIME_NTZ",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Json => "JSON",
            FieldType::Array => "ARRAY",
        }
    }

    /// True for the types allowed as a sync cursor field.
    pub fn cursor_capable(&self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::DateTimeTz
                | FieldType::DateTimeNtz
                | FieldType::Timestamp
                | FieldType::Integer
                | FieldType::Number
        )
    }

    /// Cursor literals for these types are embedded in SQL without quotes.
    pub fn unquoted_cursor(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Number)
    }
}

impl std::str::FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STRING" => Ok(FieldType::String),
            "INTEGER" => Ok(FieldType::Integer),
            "NUMBER" => Ok(FieldType::Number),
            "BOOLEAN" => Ok(FieldType::Boolean),
            "DATE" => Ok(FieldType::Date),
            "TIME_TZ" => Ok(FieldType::TimeTz),
            "TIME_NTZ" => Ok(FieldType::TimeNtz),
            "DATETIME_TZ" => Ok(FieldType::DateTimeTz),
            "DATETIME_NTZ" => Ok(FieldType::DateTimeNtz),
            "TIMESTAMP" => Ok(FieldType::Timestamp),
            "JSON" => Ok(FieldType::Json),
            "ARRAY" => Ok(FieldType::Array),
            other => Err(anyhow::anyhow!("unrecognized field type '{other}'")),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named, typed column of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Ordered sequence of fields. Order is semantically significant: it is the
/// order rows are produced and the order field mappings align to.
pub type Schema = Vec<Field>;

/// Ordered sequence of values parallel to a [`Schema`].
pub type Row = Vec<Value>;

/// Streaming scan over a backend query result.
///
/// `next_row` returns `Ok(None)` at end-of-stream. Implementations release
/// the underlying connection when dropped or when the scan is exhausted.
#[async_trait::async_trait]
pub trait RowIterator: Send {
    async fn next_row(&mut self) -> Result<Option<Row>>;

    fn schema(&self) -> &Schema;
}

/// Fully-buffered query result, used by the non-streaming query surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResults {
    pub schema: Schema,
    pub data: Vec<Row>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_round_trips_through_str() {
        for ft in [
            FieldType::String,
            FieldType::Integer,
            FieldType::Number,
            FieldType::Boolean,
            FieldType::Date,
            FieldType::TimeTz,
            FieldType::TimeNtz,
            FieldType::DateTimeTz,
            FieldType::DateTimeNtz,
            FieldType::Timestamp,
            FieldType::Json,
            FieldType::Array,
        ] {
            let parsed: FieldType = ft.as_str().parse().unwrap();
            assert_eq!(parsed, ft);
        }
    }

    #[test]
    fn field_type_serde_uses_wire_names() {
        let json = serde_json::to_string(&FieldType::DateTimeTz).unwrap();
        assert_eq!(json, "\"DATETIME_TZ\"");
        let back: FieldType = serde_json::from_str("\"TIME_NTZ\"").unwrap();
        assert_eq!(back, FieldType::TimeNtz);
    }

    #[test]
    fn unknown_field_type_is_an_error() {
        assert!("VARCHAR".parse::<FieldType>().is_err());
    }

    #[test]
    fn cursor_capability() {
        assert!(FieldType::Integer.cursor_capable());
        assert!(FieldType::DateTimeTz.cursor_capable());
        assert!(!FieldType::Json.cursor_capable());
        assert!(!FieldType::String.cursor_capable());
    }

    #[test]
    fn canonical_formats_render_expected_shapes() {
        use chrono::{FixedOffset, TimeZone};

        let tz = FixedOffset::west_opt(7 * 3600).unwrap();
        let dt = tz.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap();
        assert_eq!(
            dt.format(TIMESTAMP_TZ_FORMAT).to_string(),
            "2006-01-02 15:04:05.000-07:00"
        );
        assert_eq!(
            dt.naive_local().format(TIMESTAMP_NTZ_FORMAT).to_string(),
            "2006-01-02 15:04:05.000"
        );
    }
}
