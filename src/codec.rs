//! Payload encoding for stored values.
//!
//! Every value a component writes to the store (cached results, queue items,
//! published messages, data-manager records) goes through this module.
//! The format is JSON; it is an internal detail, not a compatibility promise.

use crate::error::Result;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes a value into the bytes stored for it.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Deserializes bytes previously produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}
