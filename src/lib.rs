//! cachex - a two-tier read-through / write-through generic cache
//!
//! This library provides a typed cache facade with:
//! - Two cache layers: a near L1 (in-process) and a far L2 (shared, e.g. Redis)
//! - Read-through loading with single-flight deduplication of concurrent loads
//! - Five source-resolution strategies, including stale-on-error fallback
//! - Negative caching of absent values
//! - A compact binary envelope carrying a logical TTL independent of the
//!   store-level delete-TTL, so expired entries stay usable as fallbacks
//! - Batch operations with partial-hit / partial-miss reconciliation
//!
//! # Example
//!
//! ```ignore
//! use cachex::{CacheBuilder, MemoryCacher, MemoryCacherConfig, RedisCacher, RedisCacherConfig};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let l1 = Arc::new(MemoryCacher::new(MemoryCacherConfig::default()));
//!     let l2 = Arc::new(RedisCacher::new(RedisCacherConfig {
//!         url: "redis://localhost:6379".into(),
//!     }).await?);
//!
//!     let users = CacheBuilder::<u64, User>::new()
//!         .with_namespace("users")
//!         .with_l1(l1)
//!         .with_l2(l2)
//!         .with_gen_key_fn(|id: &u64| id.to_string())
//!         .with_loader(|id: u64| async move {
//!             // Load from the database here.
//!             Ok(Some(User { id, name: format!("user-{id}") }))
//!         })
//!         .with_expire_ttl(Duration::from_secs(60))
//!         .with_del_ttl(Duration::from_secs(600))
//!         .build()?;
//!
//!     let user = users.get(&123).await?;
//!     Ok(())
//! }
//! ```

mod builder;
mod cache;
mod cacher;
mod codec;
mod entry;
mod error;
mod logger;
mod singleflight;
pub mod stores;
mod utils;
mod wrapper;

// Re-export public API
pub use builder::CacheBuilder;
pub use cache::{BoxError, CacheX, GenKeyFn, LoaderFn, MultiLoaderFn, SourceStrategy};
pub use cacher::Cacher;
pub use codec::{Codec, JsonCodec, RawBytesCodec, RawStringCodec};
pub use error::CacheError;
pub use logger::{Logger, TracingLogger};
pub use stores::memory::{MemoryCacher, MemoryCacherConfig};
pub use stores::redis::{RedisCacher, RedisCacherConfig};
