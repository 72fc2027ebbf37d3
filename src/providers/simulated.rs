use async_trait::async_trait;
use futures_util::stream;

use crate::Result;
use crate::model::{ChunkStream, GenerateRequest, LanguageModel};
use crate::types::Role;

const CHUNK_CHARS: usize = 10;

/// Local stand-in for the hosted model: rule-based replies keyed off the last
/// user message, streamed in small chunks. Lives behind the same
/// `LanguageModel` seam as the real provider so the gateway never knows the
/// difference.
#[derive(Debug, Default)]
pub struct SimulatedModel;

impl SimulatedModel {
    fn respond(request: &GenerateRequest) -> String {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default();
        let lower = last_user.to_lowercase();

        if lower.contains("hello") || lower.contains("hi") {
            "Hello! I'm running in development mode. How can I help you with your adventure?"
                .to_string()
        } else if lower.contains("medieval") || lower.contains("castle") || lower.contains("knight")
        {
            "Ah, brave adventurer! In this medieval realm, you find yourself standing before a \
             great castle. What do you choose to do?"
                .to_string()
        } else if lower.contains("space") || lower.contains("sci-fi") || lower.contains("future") {
            "Welcome to the future, space traveler! Your ship's AI systems are online. What is \
             your next course of action?"
                .to_string()
        } else {
            format!(
                "I am a simulated AI response for local development. Your message was: {last_user}"
            )
        }
    }
}

fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for (count, ch) in text.chars().enumerate() {
        if count > 0 && count % size == 0 {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl LanguageModel for SimulatedModel {
    fn provider(&self) -> &str {
        "simulated"
    }

    fn model_id(&self) -> &str {
        "simulated-fallback"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        Ok(Self::respond(&request))
    }

    async fn stream(&self, request: GenerateRequest) -> Result<ChunkStream> {
        let chunks = chunk_text(&Self::respond(&request), CHUNK_CHARS);
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::types::ChatMessage;

    fn request_for(content: &str) -> GenerateRequest {
        GenerateRequest {
            messages: vec![ChatMessage::new(Role::User, content)],
            max_tokens: 256,
            temperature: 0.8,
        }
    }

    #[tokio::test]
    async fn picks_a_themed_reply_by_keyword() {
        let model = SimulatedModel;
        let medieval = model
            .generate(request_for("I approach the castle"))
            .await
            .expect("reply");
        assert!(medieval.contains("medieval realm"));

        let scifi = model
            .generate(request_for("set course for deep space"))
            .await
            .expect("reply");
        assert!(scifi.contains("space traveler"));
    }

    #[tokio::test]
    async fn echoes_unmatched_messages_in_the_default_reply() {
        let model = SimulatedModel;
        let reply = model
            .generate(request_for("open the door"))
            .await
            .expect("reply");
        assert!(reply.ends_with("open the door"));
    }

    #[tokio::test]
    async fn stream_reassembles_to_the_full_reply_in_small_chunks() {
        let model = SimulatedModel;
        let full = model
            .generate(request_for("hello there"))
            .await
            .expect("reply");
        let chunks: Vec<String> = model
            .stream(request_for("hello there"))
            .await
            .expect("stream")
            .map(|chunk| chunk.expect("chunk"))
            .collect()
            .await;

        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
        assert_eq!(chunks.concat(), full);
    }

    #[test]
    fn chunking_respects_utf8_boundaries() {
        let chunks = chunk_text("héllo wörld, héllo wörld", 10);
        assert_eq!(chunks.concat(), "héllo wörld, héllo wörld");
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
    }
}
