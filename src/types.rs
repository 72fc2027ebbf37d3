use serde::{Deserialize, Serialize};

/// Dialogue participant. Serialized lowercase on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of the dialogue history. Order in the surrounding sequence is
/// semantically significant; messages are never mutated after receipt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A validated `/chat` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

/// Non-streamed completion body, also used for cache hits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub response: String,
    pub success: bool,
}

impl ChatCompletion {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            success: true,
        }
    }
}
