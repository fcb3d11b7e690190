use chirp_backend::{ChatDocument, NewChatDocument};

/// One rendered feed entry. Messages carry no client-side id; their place in
/// the feed window is their identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    pub sender: String,
    pub sent_at_ms: u64,
}

impl From<ChatDocument> for ChatMessage {
    fn from(document: ChatDocument) -> Self {
        Self {
            text: document.text,
            sender: document.sender,
            sent_at_ms: document.timestamp_ms,
        }
    }
}

/// A submission produced by the composer, ready for the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub text: String,
    pub sender: String,
    pub sent_at_ms: u64,
}

impl From<NewChatMessage> for NewChatDocument {
    fn from(message: NewChatMessage) -> Self {
        Self {
            text: message.text,
            sender: message.sender,
            timestamp_ms: message.sent_at_ms,
        }
    }
}
