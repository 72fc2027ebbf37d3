use std::sync::Arc;

use crate::store::{KeyValueStore, WindowCount};

pub const DEFAULT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_WINDOW_LIMIT: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after_secs: u64 },
}

/// Fixed-window request budget per client id, counted in the shared store.
///
/// Fixed windows allow up to ~2x the limit in a burst that straddles a window
/// boundary; that imprecision is accepted in exchange for a single atomic
/// counter op per request.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    limit: u32,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, limit: u32, window_secs: u64) -> Self {
        Self {
            store,
            limit,
            window_secs,
        }
    }

    /// Admits or denies one request for `client_id`. A store failure admits
    /// the request: availability of the chat path outranks enforcement of
    /// this auxiliary policy.
    pub async fn admit(&self, client_id: &str) -> Admission {
        if self.limit == 0 {
            return Admission::Denied {
                retry_after_secs: self.window_secs,
            };
        }

        let key = format!("ratelimit:{client_id}");
        match self
            .store
            .incr_window(&key, self.limit, self.window_secs)
            .await
        {
            Ok(WindowCount::Admitted(count)) => {
                tracing::debug!(client_id, count, limit = self.limit, "request admitted");
                Admission::Allowed
            }
            Ok(WindowCount::Exhausted) => Admission::Denied {
                retry_after_secs: self.window_secs,
            },
            Err(err) => {
                tracing::warn!(client_id, error = %err, "rate-limit store unavailable; admitting request");
                Admission::Allowed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use crate::utils::test_support::ManualClock;

    struct DownStore;

    #[async_trait]
    impl KeyValueStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn put_ex(&self, _key: &str, _value: &str, _ttl: u64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn incr_window(
            &self,
            _key: &str,
            _limit: u32,
            _window_secs: u64,
        ) -> Result<WindowCount, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_then_denies() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = RateLimiter::new(store, 10, 60);

        for _ in 0..10 {
            assert_eq!(limiter.admit("10.0.0.1").await, Admission::Allowed);
        }
        assert_eq!(
            limiter.admit("10.0.0.1").await,
            Admission::Denied {
                retry_after_secs: 60
            }
        );
    }

    #[tokio::test]
    async fn window_expiry_resets_the_budget() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = RateLimiter::new(store, 2, 60);

        assert_eq!(limiter.admit("c").await, Admission::Allowed);
        assert_eq!(limiter.admit("c").await, Admission::Allowed);
        assert!(matches!(limiter.admit("c").await, Admission::Denied { .. }));

        clock.advance(60);
        assert_eq!(limiter.admit("c").await, Admission::Allowed);
    }

    #[tokio::test]
    async fn clients_are_budgeted_independently() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::with_clock(clock));
        let limiter = RateLimiter::new(store, 1, 60);

        assert_eq!(limiter.admit("a").await, Admission::Allowed);
        assert!(matches!(limiter.admit("a").await, Admission::Denied { .. }));
        assert_eq!(limiter.admit("b").await, Admission::Allowed);
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(DownStore), 10, 60);
        assert_eq!(limiter.admit("c").await, Admission::Allowed);
    }

    #[tokio::test]
    async fn zero_limit_denies_everything() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store, 0, 60);
        assert!(matches!(limiter.admit("c").await, Admission::Denied { .. }));
    }
}
