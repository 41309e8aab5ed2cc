//! Two-tier coordinator over the backing stores.
//!
//! Reads consult L1 before L2 and back-fill L1 on an L2 hit; writes fan out
//! to L2 first, then L1, each layer with its own jittered delete-TTL. When
//! both layers hold only expired envelopes the freshest one (largest
//! creation instant) is still returned: expiry filtering is the facade's
//! job, not this module's.
//!
//! Cache-side read failures are logged at warn and treated as misses; write
//! failures are combined into a composite error preserving both layers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cacher::Cacher;
use crate::codec::Codec;
use crate::entry::Entry;
use crate::error::CacheError;
use crate::logger::Logger;
use crate::utils::jitter;

#[derive(Clone, Copy)]
enum Tier {
    L1,
    L2,
}

pub(crate) struct TieredCache<V> {
    pub(crate) l1: Option<Arc<dyn Cacher>>,
    pub(crate) l2: Option<Arc<dyn Cacher>>,
    pub(crate) cache_nil: bool,
    /// Base delete-TTL configured by the builder.
    pub(crate) del_ttl: Duration,
    /// Upper bound of the per-write random jitter.
    pub(crate) jitter_bound: Duration,
    /// L2 delete-TTL multiplier, keeping L2 alive strictly longer than L1.
    pub(crate) l2_ttl_factor: f64,
    pub(crate) codec: Arc<dyn Codec<V>>,
    pub(crate) logger: Arc<dyn Logger>,
}

impl<V> TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Read one key. Returns a fresh L1 envelope, else a fresh L2 envelope
    /// (back-filling L1), else whichever expired envelope is newest.
    pub(crate) async fn get(&self, key: &str) -> Option<Entry<V>> {
        let from_l1 = self.layer_get(self.l1.as_ref(), key).await;
        if let Some(entry) = &from_l1
            && !entry.is_expired()
        {
            return from_l1;
        }

        let from_l2 = self.layer_get(self.l2.as_ref(), key).await;
        if let Some(entry) = &from_l2
            && !entry.is_expired()
        {
            if let Err(err) = self.backfill_one(key, entry).await {
                self.logger
                    .warn(&format!("cachex: l1 backfill failed for '{key}': {err}"));
            }
            return from_l2;
        }

        latest(from_l1, from_l2)
    }

    /// Read a batch of keys. Keys missing or expired in L1 are looked up in
    /// L2; fresh L2 envelopes are back-filled into L1 best-effort. The
    /// returned map holds, per key, the freshest envelope either layer had
    /// (possibly expired), or nothing at all.
    pub(crate) async fn mget(&self, keys: &[String]) -> HashMap<String, Entry<V>> {
        let mut from_l1 = self.layer_mget(self.l1.as_ref(), keys).await;

        let mut merged: HashMap<String, Entry<V>> = HashMap::with_capacity(keys.len());
        let mut miss: Vec<String> = Vec::new();
        for key in keys {
            match from_l1.remove(key) {
                Some(entry) if !entry.is_expired() => {
                    merged.insert(key.clone(), entry);
                }
                Some(entry) => {
                    merged.insert(key.clone(), entry);
                    miss.push(key.clone());
                }
                None => miss.push(key.clone()),
            }
        }
        if miss.is_empty() {
            return merged;
        }

        let mut from_l2 = self.layer_mget(self.l2.as_ref(), &miss).await;
        let mut backfill: HashMap<String, Entry<V>> = HashMap::new();
        for key in &miss {
            let l2_entry = from_l2.remove(key);
            if let Some(entry) = &l2_entry
                && !entry.is_expired()
            {
                backfill.insert(key.clone(), entry.clone());
            }
            if let Some(entry) = latest(merged.remove(key), l2_entry) {
                merged.insert(key.clone(), entry);
            }
        }

        if !backfill.is_empty()
            && let Err(err) = self.backfill_many(&backfill).await
        {
            self.logger
                .warn(&format!("cachex: l1 backfill failed: {err}"));
        }
        merged
    }

    /// Write one envelope to both layers, L2 first. The frame is encoded
    /// once and shared between the layers.
    pub(crate) async fn set(&self, key: &str, entry: &Entry<V>) -> Result<(), CacheError> {
        let frame = entry.serialize(self.codec.as_ref())?;
        let l2_err = self
            .layer_set(self.l2.as_ref(), key, &frame, self.del_ttl_for(Tier::L2))
            .await
            .err();
        let l1_err = self
            .layer_set(self.l1.as_ref(), key, &frame, self.del_ttl_for(Tier::L1))
            .await
            .err();
        combine(l1_err, l2_err)
    }

    /// Write a batch to both layers, L2 first. Nil envelopes are skipped
    /// unless negative caching is enabled.
    pub(crate) async fn mset(&self, kvs: &HashMap<String, Entry<V>>) -> Result<(), CacheError> {
        let frames = self.encode_frames(kvs)?;
        if frames.is_empty() {
            return Ok(());
        }
        let l2_err = self
            .layer_mset(self.l2.as_ref(), &frames, self.del_ttl_for(Tier::L2))
            .await
            .err();
        let l1_err = self
            .layer_mset(self.l1.as_ref(), &frames, self.del_ttl_for(Tier::L1))
            .await
            .err();
        combine(l1_err, l2_err)
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let l2_err = match self.l2.as_ref() {
            Some(cacher) => cacher.delete(key).await.err(),
            None => None,
        };
        let l1_err = match self.l1.as_ref() {
            Some(cacher) => cacher.delete(key).await.err(),
            None => None,
        };
        combine(l1_err, l2_err)
    }

    pub(crate) async fn mdelete(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let l2_err = match self.l2.as_ref() {
            Some(cacher) => cacher.mdelete(keys).await.err(),
            None => None,
        };
        let l1_err = match self.l1.as_ref() {
            Some(cacher) => cacher.mdelete(keys).await.err(),
            None => None,
        };
        combine(l1_err, l2_err)
    }

    async fn layer_get(&self, layer: Option<&Arc<dyn Cacher>>, key: &str) -> Option<Entry<V>> {
        let cacher = layer?;
        match cacher.get(key).await {
            Ok(Some(bytes)) => Entry::deserialize(&bytes),
            Ok(None) => None,
            Err(err) => {
                self.logger
                    .warn(&format!("cachex: cacher get error: {err}"));
                None
            }
        }
    }

    async fn layer_mget(
        &self,
        layer: Option<&Arc<dyn Cacher>>,
        keys: &[String],
    ) -> HashMap<String, Entry<V>> {
        let Some(cacher) = layer else {
            return HashMap::new();
        };
        match cacher.mget(keys).await {
            Ok(kvs) => kvs
                .iter()
                .filter_map(|(k, bytes)| Entry::deserialize(bytes).map(|e| (k.clone(), e)))
                .collect(),
            Err(err) => {
                self.logger
                    .warn(&format!("cachex: cacher mget error: {err}"));
                HashMap::new()
            }
        }
    }

    async fn layer_set(
        &self,
        layer: Option<&Arc<dyn Cacher>>,
        key: &str,
        frame: &[u8],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        match layer {
            Some(cacher) => cacher.set(key, frame, ttl).await,
            None => Ok(()),
        }
    }

    async fn layer_mset(
        &self,
        layer: Option<&Arc<dyn Cacher>>,
        frames: &HashMap<String, Vec<u8>>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        match layer {
            Some(cacher) => cacher.mset(frames, ttl).await,
            None => Ok(()),
        }
    }

    async fn backfill_one(&self, key: &str, entry: &Entry<V>) -> Result<(), CacheError> {
        let frame = entry.serialize(self.codec.as_ref())?;
        self.layer_set(self.l1.as_ref(), key, &frame, self.del_ttl_for(Tier::L1))
            .await
    }

    async fn backfill_many(&self, kvs: &HashMap<String, Entry<V>>) -> Result<(), CacheError> {
        let frames = self.encode_frames(kvs)?;
        if frames.is_empty() {
            return Ok(());
        }
        self.layer_mset(self.l1.as_ref(), &frames, self.del_ttl_for(Tier::L1))
            .await
    }

    fn encode_frames(
        &self,
        kvs: &HashMap<String, Entry<V>>,
    ) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        let mut frames = HashMap::with_capacity(kvs.len());
        for (key, entry) in kvs {
            if entry.is_nil() && !self.cache_nil {
                continue;
            }
            frames.insert(key.clone(), entry.serialize(self.codec.as_ref())?);
        }
        Ok(frames)
    }

    /// Per-write delete-TTL: the base TTL (scaled for L2) plus a random
    /// jitter that spreads out expiry of keys written together.
    fn del_ttl_for(&self, tier: Tier) -> Duration {
        let jitter = jitter(self.jitter_bound);
        match tier {
            Tier::L1 => self.del_ttl + jitter,
            Tier::L2 => self.del_ttl.mul_f64(self.l2_ttl_factor) + jitter,
        }
    }
}

fn combine(l1: Option<CacheError>, l2: Option<CacheError>) -> Result<(), CacheError> {
    if l1.is_none() && l2.is_none() {
        return Ok(());
    }
    Err(CacheError::store(l1, l2))
}

/// The envelope with the larger creation instant wins.
fn latest<V>(a: Option<Entry<V>>, b: Option<Entry<V>>) -> Option<Entry<V>> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if a.create_at() > b.create_at() {
                Some(a)
            } else {
                Some(b)
            }
        }
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawStringCodec;
    use crate::logger::TracingLogger;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    /// In-memory cacher recording operation counts, written TTLs, and
    /// optionally failing all writes.
    #[derive(Default)]
    struct MockCacher {
        data: RwLock<HashMap<String, Vec<u8>>>,
        gets: AtomicUsize,
        sets: AtomicUsize,
        set_ttls: Mutex<Vec<Duration>>,
        fail_writes: bool,
    }

    impl MockCacher {
        fn failing() -> Self {
            MockCacher {
                fail_writes: true,
                ..Default::default()
            }
        }

        async fn put_entry(&self, key: &str, entry: &Entry<String>) {
            let frame = entry.serialize(&RawStringCodec).unwrap();
            self.data.write().await.insert(key.to_string(), frame);
        }

        fn recorded_ttls(&self) -> Vec<Duration> {
            self.set_ttls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Cacher for MockCacher {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.read().await.get(key).cloned())
        }

        async fn mget(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let data = self.data.read().await;
            Ok(keys
                .iter()
                .filter_map(|k| data.get(k).map(|v| (k.clone(), v.clone())))
                .collect())
        }

        async fn set(&self, key: &str, val: &[u8], ttl: Duration) -> Result<(), CacheError> {
            if self.fail_writes {
                return Err(CacheError::operation("mock", key, "write failed"));
            }
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.set_ttls.lock().unwrap().push(ttl);
            self.data.write().await.insert(key.to_string(), val.to_vec());
            Ok(())
        }

        async fn mset(
            &self,
            kvs: &HashMap<String, Vec<u8>>,
            ttl: Duration,
        ) -> Result<(), CacheError> {
            if self.fail_writes {
                return Err(CacheError::operation("mock", "", "write failed"));
            }
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.set_ttls.lock().unwrap().push(ttl);
            let mut data = self.data.write().await;
            for (k, v) in kvs {
                data.insert(k.clone(), v.clone());
            }
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            if self.fail_writes {
                return Err(CacheError::operation("mock", key, "delete failed"));
            }
            self.data.write().await.remove(key);
            Ok(())
        }

        async fn mdelete(&self, keys: &[String]) -> Result<(), CacheError> {
            if self.fail_writes {
                return Err(CacheError::operation("mock", "", "delete failed"));
            }
            let mut data = self.data.write().await;
            for k in keys {
                data.remove(k);
            }
            Ok(())
        }
    }

    fn tiered(
        l1: Option<Arc<MockCacher>>,
        l2: Option<Arc<MockCacher>>,
        del_ttl: Duration,
    ) -> TieredCache<String> {
        TieredCache {
            l1: l1.map(|c| c as Arc<dyn Cacher>),
            l2: l2.map(|c| c as Arc<dyn Cacher>),
            cache_nil: false,
            del_ttl,
            jitter_bound: Duration::from_secs(1),
            l2_ttl_factor: 1.3,
            codec: Arc::new(RawStringCodec),
            logger: Arc::new(TracingLogger),
        }
    }

    fn fresh_entry(val: &str) -> Entry<String> {
        Entry::new(Some(val.to_string()), Duration::from_secs(60))
    }

    fn expired_entry(val: &str) -> Entry<String> {
        Entry::new(Some(val.to_string()), Duration::from_millis(10))
            .with_create_at(crate::utils::now_ms() - 1_000)
    }

    #[tokio::test]
    async fn test_fresh_l1_hit_skips_l2() {
        let l1 = Arc::new(MockCacher::default());
        let l2 = Arc::new(MockCacher::default());
        l1.put_entry("k", &fresh_entry("from_l1")).await;

        let cache = tiered(Some(l1), Some(l2.clone()), Duration::from_secs(60));
        let got = cache.get("k").await.unwrap();
        assert_eq!(got.value(&RawStringCodec).unwrap(), Some("from_l1".into()));
        assert_eq!(l2.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_l1_and_l2_miss_returns_expired() {
        let l1 = Arc::new(MockCacher::default());
        let l2 = Arc::new(MockCacher::default());
        l1.put_entry("k", &expired_entry("from_l1")).await;

        let cache = tiered(Some(l1), Some(l2), Duration::from_secs(60));
        let got = cache.get("k").await.unwrap();
        assert!(got.is_expired());
        assert_eq!(got.value(&RawStringCodec).unwrap(), Some("from_l1".into()));
    }

    #[tokio::test]
    async fn test_l1_miss_l2_hit_backfills_l1() {
        let l1 = Arc::new(MockCacher::default());
        let l2 = Arc::new(MockCacher::default());
        l2.put_entry("k", &fresh_entry("from_l2")).await;

        let cache = tiered(Some(l1.clone()), Some(l2), Duration::from_secs(60));
        let got = cache.get("k").await.unwrap();
        assert_eq!(got.value(&RawStringCodec).unwrap(), Some("from_l2".into()));

        // The envelope was copied into L1 with L1's delete-TTL.
        assert_eq!(l1.sets.load(Ordering::SeqCst), 1);
        let backfilled = l1.data.read().await.get("k").cloned().unwrap();
        let entry: Entry<String> = Entry::deserialize(&backfilled).unwrap();
        assert_eq!(entry.value(&RawStringCodec).unwrap(), Some("from_l2".into()));
    }

    #[tokio::test]
    async fn test_both_expired_returns_latest() {
        let l1 = Arc::new(MockCacher::default());
        let l2 = Arc::new(MockCacher::default());
        let older = expired_entry("older").with_create_at(1_000);
        let newer = expired_entry("newer").with_create_at(2_000);
        l1.put_entry("k", &older).await;
        l2.put_entry("k", &newer).await;

        let cache = tiered(Some(l1), Some(l2), Duration::from_secs(60));
        let got = cache.get("k").await.unwrap();
        assert_eq!(got.create_at(), 2_000);
        assert_eq!(got.value(&RawStringCodec).unwrap(), Some("newer".into()));
    }

    #[tokio::test]
    async fn test_missing_everywhere_returns_none() {
        let cache = tiered(
            Some(Arc::new(MockCacher::default())),
            Some(Arc::new(MockCacher::default())),
            Duration::from_secs(60),
        );
        assert!(cache.get("absent").await.is_none());
    }

    #[tokio::test]
    async fn test_mget_merges_layers() {
        let l1 = Arc::new(MockCacher::default());
        let l2 = Arc::new(MockCacher::default());
        l1.put_entry("hit", &fresh_entry("l1_hit")).await;
        l2.put_entry("deep", &fresh_entry("l2_hit")).await;
        l2.put_entry("stale", &expired_entry("l2_stale")).await;

        let cache = tiered(Some(l1.clone()), Some(l2), Duration::from_secs(60));
        let keys: Vec<String> = ["hit", "deep", "stale", "gone"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let got = cache.mget(&keys).await;

        assert_eq!(
            got["hit"].value(&RawStringCodec).unwrap(),
            Some("l1_hit".into())
        );
        assert_eq!(
            got["deep"].value(&RawStringCodec).unwrap(),
            Some("l2_hit".into())
        );
        assert!(got["stale"].is_expired());
        assert!(!got.contains_key("gone"));

        // Only the fresh L2 envelope is back-filled.
        let l1_data = l1.data.read().await;
        assert!(l1_data.contains_key("deep"));
        assert!(!l1_data.contains_key("stale"));
    }

    #[tokio::test]
    async fn test_set_writes_both_layers_with_jittered_ttls() {
        let l1 = Arc::new(MockCacher::default());
        let l2 = Arc::new(MockCacher::default());
        let del_ttl = Duration::from_secs(10);
        let cache = tiered(Some(l1.clone()), Some(l2.clone()), del_ttl);

        cache.set("k", &fresh_entry("v")).await.unwrap();

        let l1_ttl = l1.recorded_ttls()[0];
        assert!(l1_ttl >= del_ttl && l1_ttl < del_ttl + Duration::from_secs(1));

        let l2_ttl = l2.recorded_ttls()[0];
        let l2_base = del_ttl.mul_f64(1.3);
        assert!(l2_ttl >= l2_base && l2_ttl < l2_base + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_partial_write_failure_is_composite_error() {
        let l1 = Arc::new(MockCacher::failing());
        let l2 = Arc::new(MockCacher::default());
        let cache = tiered(Some(l1), Some(l2), Duration::from_secs(10));

        let err = cache.set("k", &fresh_entry("v")).await.unwrap_err();
        match err {
            CacheError::Store { l1, l2 } => {
                assert!(l1.is_some());
                assert!(l2.is_none());
            }
            other => panic!("expected composite store error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mset_skips_nil_without_cache_nil() {
        let l1 = Arc::new(MockCacher::default());
        let cache = tiered(Some(l1.clone()), None, Duration::from_secs(10));

        let mut kvs = HashMap::new();
        kvs.insert("nil".to_string(), Entry::new(None, Duration::from_secs(60)));
        kvs.insert("val".to_string(), fresh_entry("v"));
        cache.mset(&kvs).await.unwrap();

        let data = l1.data.read().await;
        assert!(!data.contains_key("nil"));
        assert!(data.contains_key("val"));
    }

    #[tokio::test]
    async fn test_mset_writes_nil_with_cache_nil() {
        let l1 = Arc::new(MockCacher::default());
        let mut cache = tiered(Some(l1.clone()), None, Duration::from_secs(10));
        cache.cache_nil = true;

        let mut kvs = HashMap::new();
        kvs.insert("nil".to_string(), Entry::new(None, Duration::from_secs(60)));
        cache.mset(&kvs).await.unwrap();

        assert!(l1.data.read().await.contains_key("nil"));
    }

    #[tokio::test]
    async fn test_delete_fans_out() {
        let l1 = Arc::new(MockCacher::default());
        let l2 = Arc::new(MockCacher::default());
        l1.put_entry("k", &fresh_entry("v")).await;
        l2.put_entry("k", &fresh_entry("v")).await;

        let cache = tiered(Some(l1.clone()), Some(l2.clone()), Duration::from_secs(10));
        cache.delete("k").await.unwrap();

        assert!(l1.data.read().await.is_empty());
        assert!(l2.data.read().await.is_empty());
    }
}
