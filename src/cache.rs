use std::sync::Arc;

use crate::store::KeyValueStore;

pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Completion cache keyed by conversation fingerprint.
///
/// Caching is an optimization, never a correctness requirement: a store
/// failure degrades a lookup to a miss and drops a write, with a warning.
#[derive(Clone)]
pub struct CompletionCache {
    store: Arc<dyn KeyValueStore>,
    ttl_secs: u64,
}

impl CompletionCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache store unavailable; treating as miss");
                None
            }
        }
    }

    pub async fn put(&self, key: &str, text: &str) {
        if let Err(err) = self.store.put_ex(key, text, self.ttl_secs).await {
            tracing::warn!(key, error = %err, "cache store unavailable; completion not cached");
        }
    }
}
