//! Counter stores
//!
//! A store tracks one counter per client key and expires it after the
//! configured TTL. Two backends are provided:
//!
//! - [`MemoryStore`]: in-process map, for single-instance deployments
//! - [`RedisStore`]: shared counters in Redis (single node or cluster)
//!
//! The backend is picked once from [`StoreKind`] by [`build`]; an invalid
//! kind never gets past configuration parsing.

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::config::{LimiterConfig, StoreKind};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Outcome of a single increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    /// Post-increment count of the key in its current window
    pub count: u64,
    /// Time left before the counter expires
    pub expires_in: Duration,
}

/// Storage interface for per-key request counters.
///
/// `increment` must be atomic per key: concurrent calls on the same key never
/// lose an update. A missing or expired counter starts over at 1 with the
/// store's TTL. Implementations do not retry failed backend calls.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(&self, key: &str) -> Result<Increment>;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;
}

/// Build the store selected by the configuration.
pub async fn build(config: &LimiterConfig) -> Result<Arc<dyn CounterStore>> {
    match config.kind {
        StoreKind::Memory => {
            let store = MemoryStore::new(config.ttl);
            store.spawn_sweeper(config.cleanup_interval);
            info!(ttl = ?config.ttl, "Using in-memory counter store");
            Ok(Arc::new(store))
        }
        StoreKind::Redis => {
            let store = RedisStore::connect(
                &config.redis_addr,
                config.redis_cluster_mode,
                config.ttl,
                config.key_prefix.clone(),
            )
            .await?;
            info!(
                cluster = config.redis_cluster_mode,
                ttl = ?config.ttl,
                "Using Redis counter store"
            );
            Ok(Arc::new(store))
        }
    }
}
