use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::Result;
use crate::types::ChatMessage;

/// Lazy, finite, non-restartable sequence of text chunks from the provider.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// The full validated dialogue plus generation parameters, as handed to the
/// model provider.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn provider(&self) -> &str;
    fn model_id(&self) -> &str;

    /// Single non-streamed completion.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Token-by-token stream; chunks arrive in generation order and the
    /// stream ends when generation ends or fails.
    async fn stream(&self, request: GenerateRequest) -> Result<ChunkStream>;
}
