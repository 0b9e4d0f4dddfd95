//! Typed message payloads, encoded as CBOR.
//!
//! Envelopes stay in bincode; only the message a handler sees goes
//! through here, so services can evolve their types with serde defaults.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CodecError, Result};

/// Serializes `message` into a payload.
///
/// # Errors
///
/// Returns [`CodecError::SerializationFailed`] if serde rejects the value.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes> {
    let mut payload = BytesMut::new().writer();
    ciborium::into_writer(message, &mut payload).map_err(CodecError::from)?;
    Ok(payload.into_inner().freeze())
}

/// Deserializes a payload produced by [`encode`].
///
/// # Errors
///
/// Returns [`CodecError::DeserializationFailed`] if the bytes are not CBOR
/// or do not match `T`.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(ciborium::from_reader(payload).map_err(CodecError::from)?)
}
