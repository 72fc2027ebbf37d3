use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::FableError;
use crate::cache::{self, CompletionCache};
use crate::fingerprint::fingerprint;
use crate::model::{ChunkStream, GenerateRequest, LanguageModel};
use crate::observability::{Observability, ObservabilitySnapshot};
use crate::ratelimit::{self, Admission, RateLimiter};
use crate::relay::{self, SseByteStream};
use crate::store::KeyValueStore;
use crate::validate::{ValidationError, parse_chat_request};

pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Copy, Debug)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub provider_timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.8,
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
    #[error("model provider request failed: {0}")]
    Provider(FableError),
}

/// What the handler should send back: a fully known cached completion, or a
/// live provider stream to relay.
pub enum ChatOutcome {
    Cached(String),
    Stream { key: String, chunks: ChunkStream },
}

// The chunk stream is opaque, so only the discriminant and key are shown.
impl std::fmt::Debug for ChatOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cached(text) => f.debug_tuple("Cached").field(text).finish(),
            Self::Stream { key, .. } => f
                .debug_struct("Stream")
                .field("key", key)
                .finish_non_exhaustive(),
        }
    }
}

/// Orchestrates one `/chat` request: validate, rate-check, fingerprint, cache
/// lookup, provider call. Holds no per-request state; all cross-request state
/// lives in the injected store.
pub struct ChatGateway {
    model: Arc<dyn LanguageModel>,
    cache: CompletionCache,
    limiter: RateLimiter,
    generation: GenerationConfig,
    observability: Observability,
}

impl ChatGateway {
    pub fn new(model: Arc<dyn LanguageModel>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            model,
            cache: CompletionCache::new(store.clone(), cache::DEFAULT_TTL_SECS),
            limiter: RateLimiter::new(
                store,
                ratelimit::DEFAULT_WINDOW_LIMIT,
                ratelimit::DEFAULT_WINDOW_SECS,
            ),
            generation: GenerationConfig::default(),
            observability: Observability::default(),
        }
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_rate_limit(mut self, store: Arc<dyn KeyValueStore>, limit: u32, window_secs: u64) -> Self {
        self.limiter = RateLimiter::new(store, limit, window_secs);
        self
    }

    pub fn with_cache_ttl(mut self, store: Arc<dyn KeyValueStore>, ttl_secs: u64) -> Self {
        self.cache = CompletionCache::new(store, ttl_secs);
        self
    }

    pub fn observability(&self) -> ObservabilitySnapshot {
        self.observability.snapshot()
    }

    /// Runs the pre-stream pipeline. Rate checking deliberately precedes the
    /// cache lookup, so cache hits still consume budget.
    pub async fn handle(&self, body: &[u8], client_id: &str) -> Result<ChatOutcome, GatewayError> {
        self.observability.record_request();

        let request = match parse_chat_request(body) {
            Ok(request) => request,
            Err(err) => {
                self.observability.record_rejected_invalid();
                return Err(err.into());
            }
        };

        match self.limiter.admit(client_id).await {
            Admission::Allowed => {}
            Admission::Denied { retry_after_secs } => {
                self.observability.record_rate_limited();
                tracing::info!(client_id, "request rate limited");
                return Err(GatewayError::RateLimited { retry_after_secs });
            }
        }

        let key = fingerprint(&request.messages);

        if let Some(text) = self.cache.get(&key).await {
            self.observability.record_cache_hit();
            tracing::debug!(key = %key, "serving cached completion");
            return Ok(ChatOutcome::Cached(text));
        }

        self.observability.record_provider_call();
        tracing::debug!(
            key = %key,
            provider = self.model.provider(),
            model = self.model.model_id(),
            "opening provider stream"
        );

        let generate = GenerateRequest {
            messages: request.messages,
            max_tokens: self.generation.max_tokens,
            temperature: self.generation.temperature,
        };

        let opened =
            tokio::time::timeout(self.generation.provider_timeout, self.model.stream(generate))
                .await;
        let chunks = match opened {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(err)) => {
                self.observability.record_provider_error();
                return Err(GatewayError::Provider(err));
            }
            Err(_) => {
                self.observability.record_provider_error();
                return Err(GatewayError::Provider(FableError::ProviderTimeout(
                    self.generation.provider_timeout.as_secs(),
                )));
            }
        };

        Ok(ChatOutcome::Stream { key, chunks })
    }

    /// Wraps an opened provider stream in the SSE relay, bounded by the
    /// remaining provider budget.
    pub fn relay_stream(&self, key: String, chunks: ChunkStream) -> SseByteStream {
        relay::relay(
            chunks,
            self.cache.clone(),
            key,
            Some(self.generation.provider_timeout),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures_util::stream;

    use super::*;
    use crate::store::MemoryStore;

    struct ScriptedModel {
        reply: String,
        stream_calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                stream_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn provider(&self) -> &str {
            "scripted"
        }

        fn model_id(&self) -> &str {
            "scripted-test"
        }

        async fn generate(&self, _request: GenerateRequest) -> crate::Result<String> {
            Ok(self.reply.clone())
        }

        async fn stream(&self, _request: GenerateRequest) -> crate::Result<ChunkStream> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.reply.clone();
            Ok(Box::pin(stream::once(async move { Ok(reply) })))
        }
    }

    fn body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "messages": [{ "role": "user", "content": "hi" }],
        }))
        .expect("body")
    }

    #[tokio::test]
    async fn invalid_body_is_rejected_before_any_provider_call() {
        let model = Arc::new(ScriptedModel::new("reply"));
        let gateway = ChatGateway::new(model.clone(), Arc::new(MemoryStore::new()));

        let err = gateway
            .handle(b"not json", "c")
            .await
            .expect_err("validation error");
        assert!(matches!(err, GatewayError::Validation(_)));
        assert_eq!(model.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn completed_stream_populates_the_cache_for_the_next_request() {
        let model = Arc::new(ScriptedModel::new("a fine tale"));
        let gateway = ChatGateway::new(model.clone(), Arc::new(MemoryStore::new()));

        let outcome = gateway.handle(&body(), "c").await.expect("outcome");
        let ChatOutcome::Stream { key, chunks } = outcome else {
            panic!("expected a stream on a cold cache");
        };

        use futures_util::StreamExt;
        let _drained: Vec<_> = gateway.relay_stream(key, chunks).collect().await;

        let outcome = gateway.handle(&body(), "c").await.expect("outcome");
        let ChatOutcome::Cached(text) = outcome else {
            panic!("expected a cache hit");
        };
        assert_eq!(text, "a fine tale");
        assert_eq!(model.stream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.observability().cache_hits, 1);
    }

    #[tokio::test]
    async fn denied_requests_never_reach_the_provider() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let model = Arc::new(ScriptedModel::new("reply"));
        let gateway = ChatGateway::new(model.clone(), store.clone())
            .with_rate_limit(store, 1, 60);

        let first = gateway.handle(&body(), "c").await;
        assert!(first.is_ok());

        let err = gateway.handle(&body(), "c").await.expect_err("denied");
        assert!(matches!(
            err,
            GatewayError::RateLimited {
                retry_after_secs: 60
            }
        ));
        assert_eq!(model.stream_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_conversations_have_distinct_cache_entries() {
        let model = Arc::new(ScriptedModel::new("reply"));
        let gateway = ChatGateway::new(model.clone(), Arc::new(MemoryStore::new()));

        let other = serde_json::to_vec(&serde_json::json!({
            "messages": [{ "role": "user", "content": "different" }],
        }))
        .expect("body");

        let first = gateway.handle(&body(), "c").await.expect("outcome");
        let second = gateway.handle(&other, "c").await.expect("outcome");

        let (ChatOutcome::Stream { key: key_a, .. }, ChatOutcome::Stream { key: key_b, .. }) =
            (first, second)
        else {
            panic!("expected streams on a cold cache");
        };
        assert_ne!(key_a, key_b);
    }
}
