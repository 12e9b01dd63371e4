//! # CBOR
//!
//! This module provides CBOR helper functions and types.

use anyhow::{Context, Result, anyhow};
use ciborium::Value;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialize a value to a CBOR byte vector.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn to_vec<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)?;
    Ok(buf)
}

/// Deserialize a value from a CBOR byte slice.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR for `T`.
pub fn from_slice<T>(slice: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    ciborium::from_reader(slice).context("failed to deserialize CBOR")
}

/// Strip any tags wrapping a value.
pub fn untag(mut value: Value) -> Value {
    while let Value::Tag(_, inner) = value {
        value = *inner;
    }
    value
}

/// Fields of a CBOR map keyed by text strings.
#[derive(Debug)]
pub struct Fields(pub Vec<(Value, Value)>);

impl Fields {
    /// Unwrap a (possibly tagged) CBOR map.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a map.
    pub fn new(value: Value, name: &str) -> Result<Self> {
        match untag(value) {
            Value::Map(entries) => Ok(Self(entries)),
            _ => Err(anyhow!("`{name}` is not a map")),
        }
    }

    /// Returns `true` if the map contains `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k.as_text() == Some(key))
    }

    /// Remove and return the value for `key`.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        let index = self.0.iter().position(|(k, _)| k.as_text() == Some(key))?;
        Some(self.0.swap_remove(index).1)
    }

    /// Remove and return the value for a required `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` is missing.
    pub fn require(&mut self, key: &str) -> Result<Value> {
        self.take(key).ok_or_else(|| anyhow!("missing `{key}`"))
    }
}

/// Convert a CBOR text value.
///
/// # Errors
///
/// Returns an error if the value is not a text string.
pub fn text(value: Value, name: &str) -> Result<String> {
    match untag(value) {
        Value::Text(text) => Ok(text),
        _ => Err(anyhow!("`{name}` is not a text string")),
    }
}

/// Convert a CBOR byte string value.
///
/// # Errors
///
/// Returns an error if the value is not a byte string.
pub fn bytes(value: Value, name: &str) -> Result<Vec<u8>> {
    match untag(value) {
        Value::Bytes(bytes) => Ok(bytes),
        _ => Err(anyhow!("`{name}` is not a byte string")),
    }
}

/// Convert a CBOR integer value.
///
/// # Errors
///
/// Returns an error if the value is not an integer within `i64` range.
pub fn integer(value: &Value, name: &str) -> Result<i64> {
    value
        .as_integer()
        .and_then(|i| i64::try_from(i).ok())
        .ok_or_else(|| anyhow!("`{name}` is not an integer"))
}

#[cfg(test)]
mod tests {
    use ciborium::cbor;

    use super::*;

    #[test]
    fn fields() {
        let value = cbor!({"docType" => "org.iso.18013.5.1.mDL", "status" => 0}).expect("valid");
        let mut fields = Fields::new(Value::Tag(24, Box::new(value)), "doc").expect("is a map");

        assert!(fields.contains("docType"));
        assert_eq!(
            text(fields.require("docType").expect("exists"), "docType").expect("is text"),
            "org.iso.18013.5.1.mDL"
        );
        assert!(!fields.contains("docType"));
        assert!(fields.require("issuerSigned").is_err());
        assert_eq!(integer(&fields.require("status").expect("exists"), "status").expect("int"), 0);
    }

    #[test]
    fn round_trip() {
        let value = cbor!(["DeviceAuthentication", null, 1]).expect("valid");
        let bytes = to_vec(&value).expect("should serialize");
        let decoded: Value = from_slice(&bytes).expect("should deserialize");
        assert_eq!(decoded, value);
    }
}
