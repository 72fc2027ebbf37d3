use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub requests: u64,
    pub rejected_invalid: u64,
    pub rate_limited: u64,
    pub cache_hits: u64,
    pub provider_calls: u64,
    pub provider_errors: u64,
}

/// Per-process request counters. Shared across handler tasks, so plain
/// atomics rather than a guarded struct.
#[derive(Debug, Default)]
pub struct Observability {
    requests: AtomicU64,
    rejected_invalid: AtomicU64,
    rate_limited: AtomicU64,
    cache_hits: AtomicU64,
    provider_calls: AtomicU64,
    provider_errors: AtomicU64,
}

impl Observability {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_invalid(&self) {
        self.rejected_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_error(&self) {
        self.provider_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
        }
    }
}
