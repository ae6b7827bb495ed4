//! CBOR encoding for typed records.

use crate::error::{Result, StoreError};

/// Serialize a value using CBOR.
///
/// # Errors
///
/// Returns `StoreError::Encoding` if the value cannot be encoded.
pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Encoding(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
///
/// # Errors
///
/// Returns `StoreError::Encoding` if the bytes are not a valid encoding of `T`.
pub fn decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| StoreError::Encoding(e.to_string()))
}
