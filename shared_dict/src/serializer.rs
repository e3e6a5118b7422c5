//! Caller-supplied key/value codec.
//!
//! The core never inspects payload bytes — it only calls `encode`/`decode`
//! on whatever [`Serializer`] the map was constructed with. A JSON default
//! is provided for convenience (ambient, not a core requirement).

use crate::error::ShmError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A byte-in/byte-out encoder/decoder pair for one value type `T`.
///
/// Implementors report failures as plain strings; the core wraps them into
/// [`ShmError::SerializerError`].
pub trait Serializer<T> {
    /// Encode a value to bytes.
    fn encode(&self, value: &T) -> Result<Vec<u8>, String>;

    /// Decode bytes back into a value.
    fn decode(&self, bytes: &[u8]) -> Result<T, String>;
}

pub(crate) fn wrap_encode<T, S: Serializer<T>>(s: &S, value: &T) -> Result<Vec<u8>, ShmError> {
    s.encode(value)
        .map_err(|reason| ShmError::SerializerError { reason })
}

pub(crate) fn wrap_decode<T, S: Serializer<T>>(s: &S, bytes: &[u8]) -> Result<T, ShmError> {
    s.decode(bytes)
        .map_err(|reason| ShmError::SerializerError { reason })
}

/// Default `serde_json`-based serializer for any `Serialize +
/// DeserializeOwned` value.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T: Serialize + DeserializeOwned> Serializer<T> for JsonSerializer {
    fn encode(&self, value: &T) -> Result<Vec<u8>, String> {
        serde_json::to_vec(value).map_err(|e| e.to_string())
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn json_serializer_round_trips() {
        let codec = JsonSerializer;
        let value = Point { x: 1, y: -2 };
        let bytes = codec.encode(&value).unwrap();
        let decoded: Point = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn decode_failure_is_reported_as_string() {
        let codec = JsonSerializer;
        let result: Result<Point, String> = codec.decode(b"not json");
        assert!(result.is_err());
    }
}
