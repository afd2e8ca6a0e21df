//! Thin wrapper over [ciborium] so the rest of the crate has one place to encode
//! and decode [CBOR](https://cbor.io), and one error type for it.
use serde::{de, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CborError {
    /// CBOR decoding failure.
    #[error("CBOR decoding failure: {0}")]
    DecodeFailed(String),
    /// CBOR encoding failure.
    #[error("CBOR encoding failure: {0}")]
    EncodeFailed(String),
    /// Unexpected CBOR item encountered (got, want).
    #[error("unexpected item: {0}, want {1}")]
    UnexpectedItem(&'static str, &'static str),
}

pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CborError::EncodeFailed(e.to_string()))?;
    Ok(buf)
}

pub fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    ciborium::from_reader(slice).map_err(|e| CborError::DecodeFailed(e.to_string()))
}

/// Convert a `ciborium::Value` into a type `T`
#[allow(clippy::needless_pass_by_value)]
pub fn from_value<T>(value: ciborium::Value) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    // Round-trips through a buffer so tagged items are seen by the
    // ciborium deserializer exactly as they appear on the wire.
    let buf = to_vec(&value)?;
    from_slice(buf.as_slice())
}

pub fn into_value<S>(v: S) -> Result<ciborium::Value, CborError>
where
    S: Serialize,
{
    let bytes = to_vec(&v)?;
    from_slice(&bytes)
}

/// Name of a CBOR item kind, for error messages.
pub(crate) fn kind(value: &ciborium::Value) -> &'static str {
    match value {
        ciborium::Value::Integer(_) => "integer",
        ciborium::Value::Bytes(_) => "bstr",
        ciborium::Value::Float(_) => "float",
        ciborium::Value::Text(_) => "tstr",
        ciborium::Value::Bool(_) => "bool",
        ciborium::Value::Null => "null",
        ciborium::Value::Tag(_, _) => "tag",
        ciborium::Value::Array(_) => "array",
        ciborium::Value::Map(_) => "map",
        _ => "unknown",
    }
}
