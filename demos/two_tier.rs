//! Walkthrough of a two-tier cache: in-process L1 over a shared Redis L2,
//! read-through loading, and a stale-tolerant view of the same cache.
//!
//! Requires a Redis instance on localhost:
//!
//! ```sh
//! cargo run --example two_tier
//! ```

use std::sync::Arc;
use std::time::Duration;

use cachex::{
    CacheBuilder, MemoryCacher, MemoryCacherConfig, RedisCacher, RedisCacherConfig, SourceStrategy,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let l1 = Arc::new(MemoryCacher::new(MemoryCacherConfig { max_size_mb: 32 }));
    let l2 = Arc::new(
        RedisCacher::new(RedisCacherConfig {
            url: "redis://localhost:6379".into(),
        })
        .await?,
    );

    let users = CacheBuilder::<u64, User>::new()
        .with_namespace("users")
        .with_l1(l1)
        .with_l2(l2)
        .with_gen_key_fn(|id: &u64| id.to_string())
        .with_loader(|id: u64| async move {
            // Stand-in for a database query.
            println!("loading user {id} from source");
            Ok(Some(User {
                id,
                name: format!("user-{id}"),
            }))
        })
        .with_expire_ttl(Duration::from_secs(60))
        .with_del_ttl(Duration::from_secs(600))
        .build()?;

    // First read loads from source and fills both layers.
    let user = users.get(&1).await?;
    println!("first read: {user:?}");

    // Second read is served from L1 without touching the loader.
    let user = users.get(&1).await?;
    println!("second read: {user:?}");

    // Explicit write-through and delete.
    users
        .set(
            &2,
            Some(User {
                id: 2,
                name: "explicit".into(),
            }),
        )
        .await?;
    println!("batch read: {:?}", users.mget(&[1, 2, 3]).await?);
    users.del(&2).await?;

    // A stale-tolerant view shares layers and in-flight loads with `users`
    // but serves expired entries when the source is down.
    let resilient = users.with_source_strategy(SourceStrategy::ExpiredBackup);
    let user = resilient.get(&1).await?;
    println!("resilient read: {user:?}");

    Ok(())
}
