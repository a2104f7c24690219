//! Untyped record representation exchanged with the store.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};

/// A single record: column name to JSON value.
pub type Row = serde_json::Map<String, JsonValue>;

/// Serialize a domain value into a row. The value must serialize to a JSON object.
pub fn to_row<T: Serialize>(value: &T) -> DomainResult<Row> {
    match serde_json::to_value(value) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(DomainError::malformed(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(DomainError::malformed(e.to_string())),
    }
}

/// Deserialize a row into a domain value. Unknown columns are ignored.
pub fn from_row<T: DeserializeOwned>(row: &Row) -> DomainResult<T> {
    serde_json::from_value(JsonValue::Object(row.clone()))
        .map_err(|e| DomainError::malformed(e.to_string()))
}
