use serde_json::Value;
use thiserror::Error;

use crate::types::{ChatMessage, ChatRequest, Role};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request body is not valid JSON")]
    MalformedBody,
    #[error("{0}")]
    MissingField(&'static str),
    #[error("message role must be user, assistant, or system (got {0:?})")]
    InvalidRole(String),
}

/// Parses raw request bytes into a validated `ChatRequest`. Pure; the first
/// violated rule is reported.
///
/// An empty `messages` array is accepted: the source contract only requires
/// the field to be an array, and per-message rules apply to whatever elements
/// are present.
pub fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, ValidationError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| ValidationError::MalformedBody)?;

    let messages = value
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(ValidationError::MissingField(
            "messages field is required and must be an array",
        ))?;

    let mut parsed = Vec::with_capacity(messages.len());
    for message in messages {
        // Empty strings count as absent, same as a missing key.
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let (Some(role), Some(content)) = (role, content) else {
            return Err(ValidationError::MissingField(
                "each message must have role and content fields",
            ));
        };
        let role =
            Role::parse(role).ok_or_else(|| ValidationError::InvalidRole(role.to_string()))?;
        parsed.push(ChatMessage::new(role, content));
    }

    Ok(ChatRequest { messages: parsed })
}
