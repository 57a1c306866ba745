//! Raw JSON result → typed record.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DecodeError;
use crate::types::quantity;

/// Decode a raw result into `T`.
pub fn decode<T: DeserializeOwned>(raw: Value) -> Result<T, DecodeError> {
    serde_json::from_value(raw).map_err(|source| DecodeError::Json {
        target: std::any::type_name::<T>(),
        source,
    })
}

/// Decode a result that the node reports as `null` when the record is unknown.
pub fn decode_optional<T: DeserializeOwned>(raw: Value) -> Result<Option<T>, DecodeError> {
    match raw {
        Value::Null => Ok(None),
        raw => decode(raw).map(Some),
    }
}

/// Decode a JSON array result into its items, in order.
pub fn decode_list<T: DeserializeOwned>(raw: Value) -> Result<Vec<T>, DecodeError> {
    match raw {
        // Some nodes answer an empty poll with `null`.
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.into_iter().map(decode).collect(),
        other => Err(DecodeError::UnexpectedShape {
            expected: "array",
            found: kind(&other).into(),
        }),
    }
}

/// Decode a hex quantity such as the result of `eth_blockNumber`.
pub fn decode_quantity(raw: Value) -> Result<u64, DecodeError> {
    match &raw {
        Value::String(s) => quantity::parse(s).map_err(|_| DecodeError::Quantity(s.clone())),
        Value::Number(n) => n.as_u64().ok_or_else(|| DecodeError::Quantity(n.to_string())),
        other => Err(DecodeError::UnexpectedShape {
            expected: "hex quantity",
            found: kind(other).into(),
        }),
    }
}

/// Decode an opaque id (filter id, subscription id). Numeric ids are kept as
/// their decimal text.
pub fn decode_id(raw: Value) -> Result<String, DecodeError> {
    match raw {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(DecodeError::UnexpectedShape {
            expected: "id string",
            found: kind(&other).into(),
        }),
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
