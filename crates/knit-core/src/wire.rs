//! Argument values and the opaque wire codec.
//!
//! Remote arguments are ordered lists of CBOR values. The core never looks
//! inside them; transports serialize them with [`encode`] and [`decode`].

use bytes::Bytes;
pub use ciborium::Value;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::TransportError;

/// Ordered argument list carried by every method call and signal.
pub type Args = Vec<Value>;

/// Serialize a value to CBOR.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, TransportError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| TransportError::Wire(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Deserialize a value from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransportError> {
    ciborium::from_reader(bytes).map_err(|e| TransportError::Wire(e.to_string()))
}

/// Read an integer argument as `i64`.
pub fn as_i64(value: &Value) -> Option<i64> {
    value.as_integer().and_then(|i| i64::try_from(i).ok())
}
