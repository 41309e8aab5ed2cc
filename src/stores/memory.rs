use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use crate::cacher::Cacher;
use crate::error::CacheError;

/// Configuration for MemoryCacher.
#[derive(Debug, Clone)]
pub struct MemoryCacherConfig {
    /// Total capacity in megabytes, counted over key and value bytes.
    /// The store evicts on its own once full.
    pub max_size_mb: u64,
}

impl Default for MemoryCacherConfig {
    fn default() -> Self {
        MemoryCacherConfig { max_size_mb: 64 }
    }
}

#[derive(Clone)]
struct StoredBytes {
    bytes: Arc<[u8]>,
    ttl: Option<Duration>,
}

/// Per-entry expiration driven by the TTL recorded at write time.
struct StoredBytesExpiry;

impl Expiry<String, StoredBytes> for StoredBytesExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredBytes,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredBytes,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process byte store backed by Moka.
///
/// Capacity is bounded in megabytes; Moka evicts on its own when full.
/// TTLs are second-granular: sub-second TTLs round down to "no expiry",
/// and a zero TTL means entries live until evicted.
pub struct MemoryCacher {
    cache: Cache<String, StoredBytes>,
}

impl MemoryCacher {
    /// Create a new MemoryCacher with the given configuration.
    pub fn new(config: MemoryCacherConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_size_mb * 1024 * 1024)
            .weigher(|key: &String, value: &StoredBytes| {
                (key.len() + value.bytes.len()).min(u32::MAX as usize) as u32
            })
            .expire_after(StoredBytesExpiry)
            .build();
        MemoryCacher { cache }
    }
}

fn second_granular(ttl: Duration) -> Option<Duration> {
    match ttl.as_secs() {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

#[async_trait]
impl Cacher for MemoryCacher {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.cache.get(key).await.map(|v| v.bytes.to_vec()))
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        let mut result = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(v) = self.cache.get(key).await {
                result.insert(key.clone(), v.bytes.to_vec());
            }
        }
        Ok(result)
    }

    async fn set(&self, key: &str, val: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let stored = StoredBytes {
            bytes: Arc::from(val),
            ttl: second_granular(ttl),
        };
        self.cache.insert(key.to_string(), stored).await;
        Ok(())
    }

    async fn mset(&self, kvs: &HashMap<String, Vec<u8>>, ttl: Duration) -> Result<(), CacheError> {
        let ttl = second_granular(ttl);
        for (key, val) in kvs {
            let stored = StoredBytes {
                bytes: Arc::from(val.as_slice()),
                ttl,
            };
            self.cache.insert(key.clone(), stored).await;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn mdelete(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.cache.invalidate(key).await;
        }
        Ok(())
    }
}
