//! Shared key-value capability backing the cache and the rate-limit counters.
//!
//! All cross-request state lives behind this trait so gateway instances scale
//! horizontally without in-process coordination, and so tests can inject an
//! in-memory fake.

mod memory;
#[cfg(feature = "store-redis")]
mod redis_store;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
#[cfg(feature = "store-redis")]
pub use redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "store-redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a fixed-window counter bump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowCount {
    /// The request fit inside the window; carries the new count.
    Admitted(u32),
    /// The counter had already reached the limit; nothing was incremented.
    Exhausted,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Upsert with expiry. Overwrites any existing entry and resets its TTL.
    async fn put_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Fixed-window counter bump: creates the counter at 1 with `window_secs`
    /// expiry when absent, otherwise increments it in place (expiry
    /// unchanged) unless the count has already reached `limit`. The
    /// check-and-increment must be atomic with respect to other gateway
    /// instances.
    async fn incr_window(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<WindowCount, StoreError>;
}

pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0))
            .as_secs()
    }
}
