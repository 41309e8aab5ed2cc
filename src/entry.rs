//! The envelope stored in every backing layer.
//!
//! Binary frame layout (little-endian):
//!
//! ```text
//! +----------------+----------------+--------+------------------+
//! | create_at (8B) | ttl_ns (8B)    | nil 1B | payload (n bytes)|
//! +----------------+----------------+--------+------------------+
//! ```
//!
//! The 17-byte header is fixed; frames shorter than that are invalid. The
//! payload is the codec-encoded value and is empty for negatively cached
//! entries. The logical TTL inside the frame is independent of the
//! delete-TTL the backing store was written with, so a store may hold a
//! logically expired envelope that is still usable as a stale fallback.

use std::borrow::Cow;
use std::time::Duration;

use crate::codec::Codec;
use crate::error::CacheError;
use crate::utils::now_ms;

const CREATE_AT_SIZE: usize = 8;
const TTL_SIZE: usize = 8;
const HEADER_SIZE: usize = CREATE_AT_SIZE + TTL_SIZE + 1;

/// A cached value together with its creation instant, logical TTL and
/// absent-value marker. Entries are immutable once created.
#[derive(Clone)]
pub(crate) struct Entry<V> {
    /// Creation instant, milliseconds since UNIX epoch.
    create_at: i64,
    /// Logical lifetime in nanoseconds. `<= 0` means the entry never
    /// logically expires.
    ttl_ns: i64,
    /// 1 when this entry negatively caches an absent value.
    nil_byte: u8,
    /// The decoded value, present when the entry was built locally.
    val: Option<V>,
    /// The codec payload, present when the entry was parsed from a store.
    val_bytes: Vec<u8>,
}

impl<V> Entry<V> {
    /// Create a new entry carrying `value` (or an absent-value marker) with
    /// the given logical TTL.
    pub(crate) fn new(value: Option<V>, ttl: Duration) -> Self {
        let nil_byte = u8::from(value.is_none());
        Entry {
            create_at: now_ms(),
            ttl_ns: ttl.as_nanos().min(i64::MAX as u128) as i64,
            nil_byte,
            val: value,
            val_bytes: Vec::new(),
        }
    }

    /// Parse an envelope frame. Frames shorter than the fixed header are
    /// invalid and yield `None`. The payload is copied out of `bytes`.
    pub(crate) fn deserialize(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        let create_at = i64::from_le_bytes(bytes[..CREATE_AT_SIZE].try_into().ok()?);
        let ttl_ns =
            i64::from_le_bytes(bytes[CREATE_AT_SIZE..CREATE_AT_SIZE + TTL_SIZE].try_into().ok()?);
        Some(Entry {
            create_at,
            ttl_ns,
            nil_byte: bytes[HEADER_SIZE - 1],
            val: None,
            val_bytes: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    /// Encode the envelope frame. Entries parsed from a store re-use their
    /// original payload bytes; the codec runs only for locally built values.
    pub(crate) fn serialize(&self, codec: &dyn Codec<V>) -> Result<Vec<u8>, CacheError> {
        let payload: Cow<'_, [u8]> = if !self.val_bytes.is_empty() {
            Cow::Borrowed(&self.val_bytes)
        } else if let Some(val) = &self.val {
            Cow::Owned(codec.marshal(val)?)
        } else {
            Cow::Borrowed(&[][..])
        };
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&self.create_at.to_le_bytes());
        frame.extend_from_slice(&self.ttl_ns.to_le_bytes());
        frame.push(self.nil_byte);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Whether the logical TTL has elapsed. Entries with a non-positive TTL
    /// never expire.
    pub(crate) fn is_expired(&self) -> bool {
        if self.ttl_ns <= 0 {
            return false;
        }
        self.create_at + self.ttl_ns / 1_000_000 < now_ms()
    }

    pub(crate) fn is_nil(&self) -> bool {
        self.nil_byte == 1
    }

    /// Decode the carried value. Returns `None` for negatively cached
    /// entries without consulting the codec.
    pub(crate) fn value(&self, codec: &dyn Codec<V>) -> Result<Option<V>, CacheError>
    where
        V: Clone,
    {
        if self.is_nil() {
            return Ok(None);
        }
        if let Some(val) = &self.val {
            return Ok(Some(val.clone()));
        }
        codec.unmarshal(&self.val_bytes).map(Some)
    }

    /// Creation instant, the ordering key when reconciling duplicate
    /// envelopes across layers.
    pub(crate) fn create_at(&self) -> i64 {
        self.create_at
    }

    #[cfg(test)]
    pub(crate) fn with_create_at(mut self, create_at: i64) -> Self {
        self.create_at = create_at;
        self
    }
}
