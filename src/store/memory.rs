use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Clock, KeyValueStore, StoreError, SystemClock, WindowCount};

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: u64,
}

/// In-process store for tests and single-node development. Expiry is lazy:
/// entries past their deadline are dropped on the next touch.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_epoch_seconds();
        let mut entries = self.lock();
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        if now >= entry.expires_at {
            entries.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn put_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let now = self.clock.now_epoch_seconds();
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now.saturating_add(ttl_secs),
            },
        );
        Ok(())
    }

    async fn incr_window(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<WindowCount, StoreError> {
        let now = self.clock.now_epoch_seconds();
        let mut entries = self.lock();

        let live_count = entries.get(key).and_then(|entry| {
            if now >= entry.expires_at {
                None
            } else {
                entry.value.parse::<u32>().ok()
            }
        });

        match live_count {
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: now.saturating_add(window_secs),
                    },
                );
                Ok(WindowCount::Admitted(1))
            }
            Some(count) if count >= limit => Ok(WindowCount::Exhausted),
            Some(count) => {
                let next = count.saturating_add(1);
                if let Some(entry) = entries.get_mut(key) {
                    entry.value = next.to_string();
                }
                Ok(WindowCount::Admitted(next))
            }
        }
    }
}
