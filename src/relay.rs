//! Bridges a provider chunk stream to the client-facing SSE body while
//! accumulating the full text for the cache.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::time::Instant;

use crate::cache::CompletionCache;
use crate::model::ChunkStream;

pub type SseByteStream = BoxStream<'static, Result<Bytes, Infallible>>;

pub const DONE_EVENT: &[u8] = b"data: [DONE]\n\n";

pub fn text_event(chunk: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", serde_json::json!({ "text": chunk })))
}

pub fn error_event(message: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", serde_json::json!({ "error": message })))
}

struct RelayState {
    chunks: ChunkStream,
    cache: CompletionCache,
    key: String,
    accumulated: String,
    deadline: Option<Instant>,
    done: bool,
}

/// Forwards chunks in arrival order, one SSE event per chunk, then exactly one
/// terminal marker. The cache is written only after the provider stream ends
/// cleanly with non-empty text; dropping the returned stream (client
/// disconnect) discards the accumulation unwritten. A provider error or an
/// expired deadline is surfaced in-band and ends the stream without caching.
pub fn relay(
    chunks: ChunkStream,
    cache: CompletionCache,
    key: String,
    timeout: Option<Duration>,
) -> SseByteStream {
    let state = RelayState {
        chunks,
        cache,
        key,
        accumulated: String::new(),
        deadline: timeout.map(|limit| Instant::now() + limit),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        let next = match state.deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, state.chunks.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        state.done = true;
                        tracing::warn!(key = %state.key, "provider stream timed out mid-flight");
                        return Some((Ok(error_event("model provider timed out")), state));
                    }
                }
            }
            None => state.chunks.next().await,
        };

        match next {
            Some(Ok(chunk)) => {
                state.accumulated.push_str(&chunk);
                Some((Ok(text_event(&chunk)), state))
            }
            Some(Err(err)) => {
                // Headers are already committed; the failure goes in-band and
                // the partial accumulation is discarded.
                state.done = true;
                tracing::warn!(key = %state.key, error = %err, "provider stream failed mid-flight");
                Some((Ok(error_event(&err.to_string())), state))
            }
            None => {
                state.done = true;
                if !state.accumulated.is_empty() {
                    state.cache.put(&state.key, &state.accumulated).await;
                }
                Some((Ok(Bytes::from_static(DONE_EVENT)), state))
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::stream as futstream;

    use super::*;
    use crate::FableError;
    use crate::store::{KeyValueStore, MemoryStore};

    fn cache_on(store: Arc<MemoryStore>) -> CompletionCache {
        CompletionCache::new(store, 3600)
    }

    async fn collect_bytes(stream: SseByteStream) -> String {
        let frames: Vec<_> = stream.collect().await;
        frames
            .into_iter()
            .map(|frame| {
                let bytes = frame.expect("infallible frame");
                String::from_utf8(bytes.to_vec()).expect("utf8 frame")
            })
            .collect()
    }

    fn chunk_stream(chunks: Vec<crate::Result<&'static str>>) -> ChunkStream {
        Box::pin(futstream::iter(
            chunks.into_iter().map(|chunk| chunk.map(str::to_string)),
        ))
    }

    #[tokio::test]
    async fn forwards_chunks_in_order_then_done_and_caches() {
        let store = Arc::new(MemoryStore::new());
        let chunks = chunk_stream(vec![Ok("Once "), Ok("upon "), Ok("a time")]);

        let body = collect_bytes(relay(chunks, cache_on(store.clone()), "key".to_string(), None))
            .await;

        assert_eq!(
            body,
            "data: {\"text\":\"Once \"}\n\n\
             data: {\"text\":\"upon \"}\n\n\
             data: {\"text\":\"a time\"}\n\n\
             data: [DONE]\n\n"
        );
        assert_eq!(
            store.get("key").await.expect("get"),
            Some("Once upon a time".to_string())
        );
    }

    #[tokio::test]
    async fn provider_error_is_emitted_in_band_and_nothing_is_cached() {
        let store = Arc::new(MemoryStore::new());
        let chunks = chunk_stream(vec![
            Ok("partial"),
            Err(FableError::InvalidResponse("stream cut".to_string())),
        ]);

        let body = collect_bytes(relay(chunks, cache_on(store.clone()), "key".to_string(), None))
            .await;

        assert!(body.starts_with("data: {\"text\":\"partial\"}\n\n"));
        assert!(body.contains("\"error\""));
        assert!(!body.contains("[DONE]"));
        assert_eq!(store.get("key").await.expect("get"), None);
    }

    #[tokio::test]
    async fn empty_provider_stream_emits_only_done_and_skips_the_cache() {
        let store = Arc::new(MemoryStore::new());
        let chunks = chunk_stream(Vec::new());

        let body = collect_bytes(relay(chunks, cache_on(store.clone()), "key".to_string(), None))
            .await;

        assert_eq!(body, "data: [DONE]\n\n");
        assert_eq!(store.get("key").await.expect("get"), None);
    }

    #[tokio::test]
    async fn dropping_the_stream_mid_flight_discards_the_accumulation() {
        let store = Arc::new(MemoryStore::new());
        let chunks = chunk_stream(vec![Ok("one"), Ok("two"), Ok("three")]);

        let mut stream = relay(chunks, cache_on(store.clone()), "key".to_string(), None);
        let first = stream.next().await.expect("first frame").expect("bytes");
        assert_eq!(&first[..], b"data: {\"text\":\"one\"}\n\n");
        drop(stream);

        assert_eq!(store.get("key").await.expect("get"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_provider_hits_the_deadline_with_an_in_band_error() {
        let store = Arc::new(MemoryStore::new());
        let chunks: ChunkStream = Box::pin(futstream::pending());

        let mut stream = relay(
            chunks,
            cache_on(store.clone()),
            "key".to_string(),
            Some(Duration::from_secs(5)),
        );

        let frame = stream.next().await.expect("frame").expect("bytes");
        let text = String::from_utf8(frame.to_vec()).expect("utf8");
        assert!(text.contains("timed out"));
        assert!(stream.next().await.is_none());
        assert_eq!(store.get("key").await.expect("get"), None);
    }
}
