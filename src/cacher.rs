use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// A byte-oriented key-value store with a per-write delete-TTL.
///
/// This is the only contract the two-tier coordinator needs from a backing
/// layer. Values are opaque envelope frames; the store is free to evict them
/// by its own policy before the TTL elapses.
///
/// An absent key is a miss, not an error: `get` returns `Ok(None)` and
/// `mget` simply omits the key from the returned map.
#[async_trait]
pub trait Cacher: Send + Sync {
    /// Return the stored bytes for `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Return the stored bytes for every present key. Missing keys are
    /// omitted from the map.
    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError>;

    /// Store `val` under `key`. A zero `ttl` means no store-level expiry.
    async fn set(&self, key: &str, val: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Store every pair with the same delete-TTL.
    async fn mset(&self, kvs: &HashMap<String, Vec<u8>>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every key in `keys`.
    async fn mdelete(&self, keys: &[String]) -> Result<(), CacheError>;
}
