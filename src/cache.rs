//! The typed cache facade and its source-resolution strategies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::codec::Codec;
use crate::entry::Entry;
use crate::error::CacheError;
use crate::logger::Logger;
use crate::singleflight::Flight;
use crate::wrapper::TieredCache;

/// Error type produced by user-supplied loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Derives the storage key string for a logical key.
pub type GenKeyFn<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

/// Loads a single value from the source of truth. `Ok(None)` means the key
/// does not exist at the source.
pub type LoaderFn<K, V> =
    Arc<dyn Fn(K) -> BoxFuture<'static, Result<Option<V>, BoxError>> + Send + Sync>;

/// Loads a batch of values from the source of truth. The returned vec must
/// match the input keys in length and position.
pub type MultiLoaderFn<K, V> =
    Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, Result<Vec<Option<V>>, BoxError>> + Send + Sync>;

/// Upper bound on concurrent point loads when a batch request fans out over
/// the single-key loader.
const MAX_SOURCE_CONCURRENCY: usize = 50;

/// How reads resolve between the cache layers and the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStrategy {
    /// Serve fresh cache entries; load from source on miss or expiry.
    CacheFirst,
    /// Load from source; fall back to fresh cache entries on source error.
    SourceFirst,
    /// Serve fresh cache entries only; never load.
    CacheOnly,
    /// Always load from source; never read or write the cache.
    SourceOnly,
    /// Like `CacheFirst`, but a source error falls back to any cached
    /// envelope, even an expired one.
    ExpiredBackup,
}

/// A typed two-tier read-through / write-through cache.
///
/// `CacheX` is cheap to clone and safe for concurrent use; clones share the
/// underlying layers, loaders and in-flight load coalescing. Build one with
/// [`CacheBuilder`](crate::CacheBuilder).
pub struct CacheX<K, V> {
    pub(crate) namespace: String,
    pub(crate) codec: Arc<dyn Codec<V>>,
    pub(crate) expire_ttl: Duration,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) cache: Arc<TieredCache<V>>,
    pub(crate) gen_key: GenKeyFn<K>,
    pub(crate) loader: Option<LoaderFn<K, V>>,
    pub(crate) multi_loader: Option<MultiLoaderFn<K, V>>,
    pub(crate) cache_nil: bool,
    pub(crate) flight: Arc<Flight<Entry<V>>>,
    pub(crate) m_flight: Arc<Flight<HashMap<String, Entry<V>>>>,
    pub(crate) strategy: SourceStrategy,
}

impl<K, V> std::fmt::Debug for CacheX<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheX")
            .field("namespace", &self.namespace)
            .field("expire_ttl", &self.expire_ttl)
            .field("cache_nil", &self.cache_nil)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl<K, V> Clone for CacheX<K, V> {
    fn clone(&self) -> Self {
        CacheX {
            namespace: self.namespace.clone(),
            codec: Arc::clone(&self.codec),
            expire_ttl: self.expire_ttl,
            logger: Arc::clone(&self.logger),
            cache: Arc::clone(&self.cache),
            gen_key: Arc::clone(&self.gen_key),
            loader: self.loader.clone(),
            multi_loader: self.multi_loader.clone(),
            cache_nil: self.cache_nil,
            flight: Arc::clone(&self.flight),
            m_flight: Arc::clone(&self.m_flight),
            strategy: self.strategy,
        }
    }
}

impl<K, V> CacheX<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Return a view of this cache with a different source strategy. The
    /// clone shares the layers, loaders and in-flight coalescing of the
    /// original.
    pub fn with_source_strategy(&self, strategy: SourceStrategy) -> Self {
        let mut cache = self.clone();
        cache.strategy = strategy;
        cache
    }

    /// Get the value for `key`, resolving between cache and source per the
    /// configured strategy. `Ok(None)` means the value is absent.
    pub async fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        match self.strategy {
            SourceStrategy::CacheFirst => self.cache_first_get(key).await,
            SourceStrategy::SourceFirst => self.source_first_get(key).await,
            SourceStrategy::CacheOnly => self.cache_only_get(key).await,
            SourceStrategy::SourceOnly => self.source_only_get(key).await,
            SourceStrategy::ExpiredBackup => self.expired_backup_get(key).await,
        }
    }

    /// Store `value` under `key` with the configured logical TTL. An absent
    /// value is written as a negative-cache envelope only when `cache_nil`
    /// is enabled; otherwise it is silently dropped.
    pub async fn set(&self, key: &K, value: Option<V>) -> Result<(), CacheError> {
        let entry = Entry::new(value, self.expire_ttl);
        if entry.is_nil() && !self.cache_nil {
            return Ok(());
        }
        self.cache.set(&self.cache_key(key), &entry).await
    }

    /// Remove `key` from every layer.
    pub async fn del(&self, key: &K) -> Result<(), CacheError> {
        self.cache.delete(&self.cache_key(key)).await
    }

    /// Get a batch of values. The returned vec matches `keys` in length and
    /// position; absent values are `None`.
    pub async fn mget(&self, keys: &[K]) -> Result<Vec<Option<V>>, CacheError> {
        match self.strategy {
            SourceStrategy::CacheFirst => self.cache_first_mget(keys).await,
            SourceStrategy::SourceFirst => self.source_first_mget(keys).await,
            SourceStrategy::CacheOnly => self.cache_only_mget(keys).await,
            SourceStrategy::SourceOnly => self.source_only_mget(keys).await,
            SourceStrategy::ExpiredBackup => self.expired_backup_mget(keys).await,
        }
    }

    /// Store a batch. `keys` and `values` must have the same length.
    pub async fn mset(&self, keys: &[K], values: &[Option<V>]) -> Result<(), CacheError> {
        if keys.len() != values.len() {
            return Err(CacheError::LengthMismatch {
                expected: keys.len(),
                got: values.len(),
            });
        }
        let mut kvs = HashMap::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            kvs.insert(
                self.cache_key(key),
                Entry::new(value.clone(), self.expire_ttl),
            );
        }
        self.cache.mset(&kvs).await
    }

    /// Remove a batch of keys from every layer.
    pub async fn mdel(&self, keys: &[K]) -> Result<(), CacheError> {
        self.cache.mdelete(&self.unique_cache_keys(keys)).await
    }

    // ------------------------------------------------------------------
    // Point strategies
    // ------------------------------------------------------------------

    async fn cache_first_get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let cache_key = self.cache_key(key);
        if let Some(value) = self.fresh_cached_value(&cache_key).await {
            return Ok(value);
        }
        let from_source = self.load(key.clone()).await?;
        self.write_back(&cache_key, &from_source).await;
        from_source.value(self.codec.as_ref())
    }

    async fn source_first_get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let cache_key = self.cache_key(key);
        match self.load(key.clone()).await {
            Ok(from_source) => {
                self.write_back(&cache_key, &from_source).await;
                from_source.value(self.codec.as_ref())
            }
            Err(err) => {
                // Source failed: a fresh cache entry backs it up.
                if let Some(value) = self.fresh_cached_value(&cache_key).await {
                    return Ok(value);
                }
                Err(err)
            }
        }
    }

    async fn cache_only_get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let cache_key = self.cache_key(key);
        if let Some(value) = self.fresh_cached_value(&cache_key).await {
            return Ok(value);
        }
        Ok(None)
    }

    async fn source_only_get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let from_source = self.load(key.clone()).await?;
        from_source.value(self.codec.as_ref())
    }

    async fn expired_backup_get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let cache_key = self.cache_key(key);
        let from_cache = self.cache.get(&cache_key).await;
        if let Some(entry) = &from_cache
            && !entry.is_expired()
            && let Some(value) = self.decode(&cache_key, entry)
        {
            return Ok(value);
        }
        match self.load(key.clone()).await {
            Ok(from_source) => {
                self.write_back(&cache_key, &from_source).await;
                from_source.value(self.codec.as_ref())
            }
            Err(err) => {
                // Source failed: any cached envelope backs it up, expired
                // or not.
                if let Some(entry) = &from_cache
                    && let Some(value) = self.decode(&cache_key, entry)
                {
                    return Ok(value);
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Batch strategies
    // ------------------------------------------------------------------

    async fn cache_first_mget(&self, keys: &[K]) -> Result<Vec<Option<V>>, CacheError> {
        let from_cache = self.cache.mget(&self.unique_cache_keys(keys)).await;
        let (mut hit, expired, miss) = self.partition_batch(keys, &from_cache);
        if expired.is_empty() && miss.is_empty() {
            return Ok(self.pack_batch(keys, &hit));
        }
        let to_load: Vec<K> = expired.into_iter().chain(miss).collect();
        let from_source = self.m_load(to_load).await?;
        self.write_back_many(&from_source).await;
        hit.extend(from_source);
        Ok(self.pack_batch(keys, &hit))
    }

    async fn source_first_mget(&self, keys: &[K]) -> Result<Vec<Option<V>>, CacheError> {
        match self.m_load(keys.to_vec()).await {
            Ok(from_source) => {
                self.write_back_many(&from_source).await;
                Ok(self.pack_batch(keys, &from_source))
            }
            Err(_) => {
                // Source failed: serve whatever fresh entries the cache
                // holds and leave the rest absent.
                let from_cache = self.cache.mget(&self.unique_cache_keys(keys)).await;
                let (hit, _, _) = self.partition_batch(keys, &from_cache);
                Ok(self.pack_batch(keys, &hit))
            }
        }
    }

    async fn cache_only_mget(&self, keys: &[K]) -> Result<Vec<Option<V>>, CacheError> {
        let from_cache = self.cache.mget(&self.unique_cache_keys(keys)).await;
        let (hit, _, _) = self.partition_batch(keys, &from_cache);
        Ok(self.pack_batch(keys, &hit))
    }

    async fn source_only_mget(&self, keys: &[K]) -> Result<Vec<Option<V>>, CacheError> {
        let from_source = self.m_load(keys.to_vec()).await?;
        Ok(self.pack_batch(keys, &from_source))
    }

    async fn expired_backup_mget(&self, keys: &[K]) -> Result<Vec<Option<V>>, CacheError> {
        let from_cache = self.cache.mget(&self.unique_cache_keys(keys)).await;
        let (mut hit, expired, miss) = self.partition_batch(keys, &from_cache);
        if expired.is_empty() && miss.is_empty() {
            return Ok(self.pack_batch(keys, &hit));
        }
        let to_load: Vec<K> = expired.into_iter().chain(miss).collect();
        match self.m_load(to_load).await {
            Ok(from_source) => {
                self.write_back_many(&from_source).await;
                hit.extend(from_source);
                Ok(self.pack_batch(keys, &hit))
            }
            // Source failed: serve the cache map verbatim, expired
            // envelopes included.
            Err(_) => Ok(self.pack_batch(keys, &from_cache)),
        }
    }

    // ------------------------------------------------------------------
    // Source loading
    // ------------------------------------------------------------------

    async fn load(&self, key: K) -> Result<Entry<V>, CacheError> {
        if self.loader.is_some() {
            return self.point_load(key).await;
        }
        if self.multi_loader.is_some() {
            let cache_key = self.cache_key(&key);
            let mut from_source = self.batch_load(vec![key]).await?;
            return from_source
                .remove(&cache_key)
                .ok_or_else(|| CacheError::loader("batch loader returned no entry for key"));
        }
        Err(CacheError::loader("no loader configured"))
    }

    async fn m_load(&self, keys: Vec<K>) -> Result<HashMap<String, Entry<V>>, CacheError> {
        if self.multi_loader.is_some() {
            return self.batch_load(keys).await;
        }
        if self.loader.is_some() {
            // Bounded fan-out from the batch request onto per-key point
            // loads; the first failure aborts the batch.
            return stream::iter(keys)
                .map(|key| async move {
                    let cache_key = self.cache_key(&key);
                    let entry = self.point_load(key).await?;
                    Ok::<_, CacheError>((cache_key, entry))
                })
                .buffer_unordered(MAX_SOURCE_CONCURRENCY)
                .try_collect()
                .await;
        }
        Err(CacheError::loader("no loader configured"))
    }

    /// Single-key load through the point loader, coalesced per cache key.
    async fn point_load(&self, key: K) -> Result<Entry<V>, CacheError> {
        let Some(loader) = self.loader.clone() else {
            return Err(CacheError::loader("no loader configured"));
        };
        let cache_key = self.cache_key(&key);
        let expire_ttl = self.expire_ttl;
        self.flight
            .run(&cache_key, async move {
                let value = loader(key)
                    .await
                    .map_err(|e| CacheError::loader(e.to_string()))?;
                Ok(Entry::new(value, expire_ttl))
            })
            .await
    }

    /// Batch load through the multi loader, coalesced on the sorted key set.
    async fn batch_load(&self, keys: Vec<K>) -> Result<HashMap<String, Entry<V>>, CacheError> {
        let Some(multi_loader) = self.multi_loader.clone() else {
            return Err(CacheError::loader("no loader configured"));
        };
        let cache_keys: Vec<String> = keys.iter().map(|k| self.cache_key(k)).collect();
        let mut group_parts: Vec<&str> = {
            let unique: HashSet<&str> = cache_keys.iter().map(String::as_str).collect();
            unique.into_iter().collect()
        };
        group_parts.sort_unstable();
        let group_key = format!("m{}", group_parts.join(","));

        let expire_ttl = self.expire_ttl;
        self.m_flight
            .run(&group_key, async move {
                let values = multi_loader(keys)
                    .await
                    .map_err(|e| CacheError::loader(e.to_string()))?;
                if values.len() != cache_keys.len() {
                    return Err(CacheError::LengthMismatch {
                        expected: cache_keys.len(),
                        got: values.len(),
                    });
                }
                Ok(cache_keys
                    .into_iter()
                    .zip(values)
                    .map(|(cache_key, value)| (cache_key, Entry::new(value, expire_ttl)))
                    .collect())
            })
            .await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn cache_key(&self, key: &K) -> String {
        format!("{}:{}", self.namespace, (self.gen_key)(key))
    }

    /// Namespaced cache keys in first-seen order, deduplicated.
    fn unique_cache_keys(&self, keys: &[K]) -> Vec<String> {
        let mut seen = HashSet::with_capacity(keys.len());
        keys.iter()
            .map(|k| self.cache_key(k))
            .filter(|ck| seen.insert(ck.clone()))
            .collect()
    }

    /// Decode a fresh cached envelope, or `None` if the key missed, the
    /// envelope expired, or decoding failed (logged, treated as a miss).
    async fn fresh_cached_value(&self, cache_key: &str) -> Option<Option<V>> {
        let entry = self.cache.get(cache_key).await?;
        if entry.is_expired() {
            return None;
        }
        self.decode(cache_key, &entry)
    }

    fn decode(&self, cache_key: &str, entry: &Entry<V>) -> Option<Option<V>> {
        match entry.value(self.codec.as_ref()) {
            Ok(value) => Some(value),
            Err(err) => {
                self.logger.warn(&format!(
                    "cachex: decode failed for '{cache_key}': {err}"
                ));
                None
            }
        }
    }

    /// Best-effort write-back on the read path. Failures are logged, never
    /// surfaced.
    async fn write_back(&self, cache_key: &str, entry: &Entry<V>) {
        if entry.is_nil() && !self.cache_nil {
            return;
        }
        if let Err(err) = self.cache.set(cache_key, entry).await {
            self.logger.warn(&format!(
                "cachex: write-back failed for '{cache_key}': {err}"
            ));
        }
    }

    async fn write_back_many(&self, kvs: &HashMap<String, Entry<V>>) {
        if let Err(err) = self.cache.mset(kvs).await {
            self.logger
                .warn(&format!("cachex: batch write-back failed: {err}"));
        }
    }

    /// Split a batch cache result into fresh hits, expired keys, and misses.
    fn partition_batch(
        &self,
        keys: &[K],
        from_cache: &HashMap<String, Entry<V>>,
    ) -> (HashMap<String, Entry<V>>, Vec<K>, Vec<K>) {
        let mut hit = HashMap::new();
        let mut expired = Vec::new();
        let mut miss = Vec::new();
        for key in keys {
            let cache_key = self.cache_key(key);
            match from_cache.get(&cache_key) {
                None => miss.push(key.clone()),
                Some(entry) if entry.is_expired() => expired.push(key.clone()),
                Some(entry) => {
                    hit.insert(cache_key, entry.clone());
                }
            }
        }
        (hit, expired, miss)
    }

    /// Assemble the position-preserving result vec for a batch read.
    fn pack_batch(&self, keys: &[K], kvs: &HashMap<String, Entry<V>>) -> Vec<Option<V>> {
        keys.iter()
            .map(|key| {
                let cache_key = self.cache_key(key);
                let entry = kvs.get(&cache_key)?;
                self.decode(&cache_key, entry)?
            })
            .collect()
    }
}
