//! Value codec contract and built-in implementations.
//!
//! Codecs translate between typed values and the byte payload carried inside
//! the binary envelope. They never see the envelope header, and they are
//! fully user-replaceable through the builder.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheError;

/// Serialization contract for cached values.
pub trait Codec<V>: Send + Sync {
    fn marshal(&self, value: &V) -> Result<Vec<u8>, CacheError>;
    fn unmarshal(&self, data: &[u8]) -> Result<V, CacheError>;
}

/// General-purpose JSON codec backed by `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl<V> Codec<V> for JsonCodec
where
    V: Serialize + DeserializeOwned,
{
    fn marshal(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(value).map_err(|e| CacheError::codec(format!("json marshal: {e}")))
    }

    fn unmarshal(&self, data: &[u8]) -> Result<V, CacheError> {
        serde_json::from_slice(data).map_err(|e| CacheError::codec(format!("json unmarshal: {e}")))
    }
}

/// Passthrough codec for `String` values. The payload is the UTF-8 bytes of
/// the string itself, with no framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawStringCodec;

impl Codec<String> for RawStringCodec {
    fn marshal(&self, value: &String) -> Result<Vec<u8>, CacheError> {
        Ok(value.as_bytes().to_vec())
    }

    fn unmarshal(&self, data: &[u8]) -> Result<String, CacheError> {
        String::from_utf8(data.to_vec())
            .map_err(|e| CacheError::codec(format!("invalid utf-8 payload: {e}")))
    }
}

/// Passthrough codec for raw byte values.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawBytesCodec;

impl Codec<Vec<u8>> for RawBytesCodec {
    fn marshal(&self, value: &Vec<u8>) -> Result<Vec<u8>, CacheError> {
        Ok(value.clone())
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        Ok(data.to_vec())
    }
}
