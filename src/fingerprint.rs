use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::types::ChatMessage;

/// Content-addressed cache key for a conversation: SHA-256 over a
/// length-prefixed serialization of the message sequence, as 64 lowercase hex
/// characters.
///
/// Length prefixes keep the encoding unambiguous, so any change to a role, to
/// content bytes, or to message order produces a different digest, while
/// byte-identical sequences always produce the same one.
pub fn fingerprint(messages: &[ChatMessage]) -> String {
    let mut hasher = Sha256::new();
    for message in messages {
        let role = message.role.as_str();
        hasher.update((role.len() as u64).to_be_bytes());
        hasher.update(role.as_bytes());
        hasher.update((message.content.len() as u64).to_be_bytes());
        hasher.update(message.content.as_bytes());
    }

    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
