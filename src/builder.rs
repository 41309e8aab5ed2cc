//! Builder API for assembling a [`CacheX`] instance.
//!
//! Setters are copy-on-write: each returns a new builder and leaves the
//! receiver unchanged, so a partially configured builder can be reused as a
//! template for several cache instances. `build` validates the configuration
//! and produces an immutable facade.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{BoxError, CacheX, GenKeyFn, LoaderFn, MultiLoaderFn, SourceStrategy};
use crate::cacher::Cacher;
use crate::codec::{Codec, JsonCodec};
use crate::error::CacheError;
use crate::logger::{Logger, TracingLogger};
use crate::singleflight::Flight;
use crate::wrapper::TieredCache;

/// Configuration collector for [`CacheX`].
///
/// # Example
///
/// ```ignore
/// use cachex::{CacheBuilder, MemoryCacher, MemoryCacherConfig, SourceStrategy};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let cache = CacheBuilder::<u64, String>::new()
///     .with_namespace("users")
///     .with_l1(Arc::new(MemoryCacher::new(MemoryCacherConfig::default())))
///     .with_gen_key_fn(|id: &u64| id.to_string())
///     .with_loader(|id: u64| async move { Ok(Some(format!("user-{id}"))) })
///     .with_expire_ttl(Duration::from_secs(60))
///     .with_del_ttl(Duration::from_secs(600))
///     .build()?;
/// ```
pub struct CacheBuilder<K, V> {
    namespace: String,
    codec: Arc<dyn Codec<V>>,
    expire_ttl: Duration,
    del_ttl: Duration,
    del_ttl_jitter: Duration,
    l2_ttl_factor: f64,
    logger: Arc<dyn Logger>,
    l1: Option<Arc<dyn Cacher>>,
    l2: Option<Arc<dyn Cacher>>,
    gen_key: Option<GenKeyFn<K>>,
    loader: Option<LoaderFn<K, V>>,
    multi_loader: Option<MultiLoaderFn<K, V>>,
    cache_nil: bool,
    strategy: SourceStrategy,
}

impl<K, V> Clone for CacheBuilder<K, V> {
    fn clone(&self) -> Self {
        CacheBuilder {
            namespace: self.namespace.clone(),
            codec: Arc::clone(&self.codec),
            expire_ttl: self.expire_ttl,
            del_ttl: self.del_ttl,
            del_ttl_jitter: self.del_ttl_jitter,
            l2_ttl_factor: self.l2_ttl_factor,
            logger: Arc::clone(&self.logger),
            l1: self.l1.clone(),
            l2: self.l2.clone(),
            gen_key: self.gen_key.clone(),
            loader: self.loader.clone(),
            multi_loader: self.multi_loader.clone(),
            cache_nil: self.cache_nil,
            strategy: self.strategy,
        }
    }
}

impl<K, V> CacheBuilder<K, V>
where
    V: Serialize + DeserializeOwned,
{
    /// Create a builder with defaults: namespace `"default"`, JSON codec,
    /// `CacheFirst` strategy, tracing-backed logger, negative caching off,
    /// and zero TTLs (entries never logically expire, stores keep them
    /// indefinitely).
    ///
    /// The JSON default is why `V` must be serde-capable here; use
    /// [`with_codec`](Self::with_codec) to swap in any other codec.
    pub fn new() -> Self {
        CacheBuilder {
            namespace: "default".to_string(),
            codec: Arc::new(JsonCodec),
            expire_ttl: Duration::ZERO,
            del_ttl: Duration::ZERO,
            del_ttl_jitter: Duration::from_secs(1),
            l2_ttl_factor: 1.3,
            logger: Arc::new(TracingLogger),
            l1: None,
            l2: None,
            gen_key: None,
            loader: None,
            multi_loader: None,
            cache_nil: false,
            strategy: SourceStrategy::CacheFirst,
        }
    }
}

impl<K, V> Default for CacheBuilder<K, V>
where
    V: Serialize + DeserializeOwned,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Set the namespace prefixed onto every storage key.
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        let mut builder = self.clone();
        builder.namespace = namespace.into();
        builder
    }

    /// Set the logical TTL written into each envelope. Zero means entries
    /// never logically expire.
    pub fn with_expire_ttl(&self, ttl: Duration) -> Self {
        let mut builder = self.clone();
        builder.expire_ttl = ttl;
        builder
    }

    /// Set the base delete-TTL handed to the backing stores. Keep it longer
    /// than the logical TTL so expired envelopes stay available for
    /// stale-on-error fallback.
    pub fn with_del_ttl(&self, ttl: Duration) -> Self {
        let mut builder = self.clone();
        builder.del_ttl = ttl;
        builder
    }

    /// Set the upper bound of the random jitter added to every delete-TTL.
    pub fn with_del_ttl_jitter(&self, bound: Duration) -> Self {
        let mut builder = self.clone();
        builder.del_ttl_jitter = bound;
        builder
    }

    /// Set the multiplier applied to the L2 delete-TTL so L2 outlives L1.
    pub fn with_l2_ttl_factor(&self, factor: f64) -> Self {
        let mut builder = self.clone();
        builder.l2_ttl_factor = factor;
        builder
    }

    /// Replace the default tracing-backed logger.
    pub fn with_logger(&self, logger: Arc<dyn Logger>) -> Self {
        let mut builder = self.clone();
        builder.logger = logger;
        builder
    }

    /// Set the near (in-process) cache layer.
    pub fn with_l1(&self, cacher: Arc<dyn Cacher>) -> Self {
        let mut builder = self.clone();
        builder.l1 = Some(cacher);
        builder
    }

    /// Set the far (shared) cache layer. Requires an L1 layer.
    pub fn with_l2(&self, cacher: Arc<dyn Cacher>) -> Self {
        let mut builder = self.clone();
        builder.l2 = Some(cacher);
        builder
    }

    /// Set the function deriving a storage key string from a logical key.
    pub fn with_gen_key_fn<F>(&self, gen_key: F) -> Self
    where
        F: Fn(&K) -> String + Send + Sync + 'static,
    {
        let mut builder = self.clone();
        builder.gen_key = Some(Arc::new(gen_key));
        builder
    }

    /// Set the single-key source loader.
    pub fn with_loader<F, Fut>(&self, loader: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<V>, BoxError>> + Send + 'static,
    {
        let mut builder = self.clone();
        builder.loader = Some(Arc::new(
            move |key: K| -> futures::future::BoxFuture<'static, Result<Option<V>, BoxError>> {
                Box::pin(loader(key))
            },
        ));
        builder
    }

    /// Set the batch source loader. Its result must match the input keys in
    /// length and position.
    pub fn with_multi_loader<F, Fut>(&self, multi_loader: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Option<V>>, BoxError>> + Send + 'static,
    {
        let mut builder = self.clone();
        builder.multi_loader = Some(Arc::new(
            move |keys: Vec<K>| -> futures::future::BoxFuture<
                'static,
                Result<Vec<Option<V>>, BoxError>,
            > { Box::pin(multi_loader(keys)) },
        ));
        builder
    }

    /// Set the source-resolution strategy.
    pub fn with_source_strategy(&self, strategy: SourceStrategy) -> Self {
        let mut builder = self.clone();
        builder.strategy = strategy;
        builder
    }

    /// Enable caching of absent values as negative-cache envelopes.
    pub fn with_cache_nil(&self, cache_nil: bool) -> Self {
        let mut builder = self.clone();
        builder.cache_nil = cache_nil;
        builder
    }

    /// Replace the value codec.
    pub fn with_codec(&self, codec: Arc<dyn Codec<V>>) -> Self {
        let mut builder = self.clone();
        builder.codec = codec;
        builder
    }

    /// Validate the configuration and produce an immutable cache.
    pub fn build(&self) -> Result<CacheX<K, V>, CacheError> {
        if self.namespace.is_empty() {
            return Err(CacheError::config("namespace is empty"));
        }
        let Some(gen_key) = self.gen_key.clone() else {
            return Err(CacheError::config("gen key fn not set"));
        };
        if self.l2.is_some() && self.l1.is_none() {
            return Err(CacheError::config("l2 cacher requires an l1 cacher"));
        }
        if self.l1.is_none()
            && self.l2.is_none()
            && self.loader.is_none()
            && self.multi_loader.is_none()
        {
            return Err(CacheError::config("no cacher or loader configured"));
        }
        if !self.l2_ttl_factor.is_finite() || self.l2_ttl_factor < 1.0 {
            return Err(CacheError::config("l2 ttl factor must be >= 1.0"));
        }

        let cache = TieredCache {
            l1: self.l1.clone(),
            l2: self.l2.clone(),
            cache_nil: self.cache_nil,
            del_ttl: self.del_ttl,
            jitter_bound: self.del_ttl_jitter,
            l2_ttl_factor: self.l2_ttl_factor,
            codec: Arc::clone(&self.codec),
            logger: Arc::clone(&self.logger),
        };

        Ok(CacheX {
            namespace: self.namespace.clone(),
            codec: Arc::clone(&self.codec),
            expire_ttl: self.expire_ttl,
            logger: Arc::clone(&self.logger),
            cache: Arc::new(cache),
            gen_key,
            loader: self.loader.clone(),
            multi_loader: self.multi_loader.clone(),
            cache_nil: self.cache_nil,
            flight: Arc::new(Flight::new()),
            m_flight: Arc::new(Flight::new()),
            strategy: self.strategy,
        })
    }
}
