use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use crate::cacher::Cacher;
use crate::error::CacheError;

/// Configuration for RedisCacher.
#[derive(Debug, Clone)]
pub struct RedisCacherConfig {
    /// Redis connection URL.
    ///
    /// Format: `redis://[username:password@]host[:port][/database]`
    pub url: String,
}

/// Redis-backed byte store.
///
/// Batch reads use `MGET`; batch writes are pipelined. TTLs are written with
/// millisecond precision; a zero TTL stores the key without expiry. A nil
/// reply is a miss, not an error.
pub struct RedisCacher {
    connection: MultiplexedConnection,
}

impl RedisCacher {
    /// Connect to Redis and create a new RedisCacher.
    pub async fn new(config: RedisCacherConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CacheError::operation("redis", "", format!("failed to create client: {e}"))
        })?;
        let connection = client.get_multiplexed_async_connection().await.map_err(|e| {
            CacheError::operation("redis", "", format!("failed to connect: {e}"))
        })?;
        Ok(RedisCacher { connection })
    }

    /// Wrap an existing multiplexed connection.
    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        RedisCacher { connection }
    }
}

#[async_trait]
impl Cacher for RedisCacher {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection.clone();
        let val: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::operation("redis", key, format!("GET failed: {e}")))?;
        Ok(val.filter(|v| !v.is_empty()))
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.connection.clone();
        let values: Vec<Option<Vec<u8>>> = conn.mget(keys).await.map_err(|e| {
            CacheError::operation("redis", &keys.join(","), format!("MGET failed: {e}"))
        })?;
        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, val)| {
                let val = val.filter(|v| !v.is_empty())?;
                Some((key.clone(), val))
            })
            .collect())
    }

    async fn set(&self, key: &str, val: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        if ttl.is_zero() {
            let _: () = conn
                .set(key, val)
                .await
                .map_err(|e| CacheError::operation("redis", key, format!("SET failed: {e}")))?;
        } else {
            let _: () = conn
                .pset_ex(key, val, ttl.as_millis() as u64)
                .await
                .map_err(|e| CacheError::operation("redis", key, format!("PSETEX failed: {e}")))?;
        }
        Ok(())
    }

    async fn mset(&self, kvs: &HashMap<String, Vec<u8>>, ttl: Duration) -> Result<(), CacheError> {
        if kvs.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        for (key, val) in kvs {
            if ttl.is_zero() {
                pipe.set(key, val.as_slice()).ignore();
            } else {
                pipe.pset_ex(key, val.as_slice(), ttl.as_millis() as u64)
                    .ignore();
            }
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(|e| {
            CacheError::operation("redis", "", format!("pipelined SET failed: {e}"))
        })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| CacheError::operation("redis", key, format!("DEL failed: {e}")))?;
        Ok(())
    }

    async fn mdelete(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let _: () = conn.del(keys).await.map_err(|e| {
            CacheError::operation("redis", &keys.join(","), format!("DEL failed: {e}"))
        })?;
        Ok(())
    }
}
