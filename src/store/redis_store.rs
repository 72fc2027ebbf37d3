use async_trait::async_trait;
use redis::AsyncCommands;

use super::{KeyValueStore, StoreError, WindowCount};

/// Redis-backed store shared by all gateway instances.
#[derive(Clone, Debug)]
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStore {
    pub fn new(url: impl AsRef<str>) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url.as_ref()).map_err(StoreError::Redis)?,
            prefix: "fable".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: Option<String> = conn.get(self.prefixed("__ping__")).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(self.prefixed(key)).await?;
        Ok(value)
    }

    async fn put_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(self.prefixed(key), value, ttl_secs).await?;
        Ok(())
    }

    async fn incr_window(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<WindowCount, StoreError> {
        let mut conn = self.connection().await?;

        // Check-and-increment must be atomic across gateway instances; the
        // EX is only set on creation so increments never extend the window.
        let script = redis::Script::new(
            r#"
local current = redis.call("GET", KEYS[1])
if not current then
  redis.call("SET", KEYS[1], 1, "EX", tonumber(ARGV[2]))
  return 1
end
if tonumber(current) >= tonumber(ARGV[1]) then
  return -1
end
return redis.call("INCR", KEYS[1])
"#,
        );

        let result: i64 = script
            .key(self.prefixed(key))
            .arg(limit)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await?;

        if result < 0 {
            Ok(WindowCount::Exhausted)
        } else {
            Ok(WindowCount::Admitted(result.min(i64::from(u32::MAX)) as u32))
        }
    }
}
