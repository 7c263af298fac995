// ABOUTME: Chat transcript entries recorded by a build session
// ABOUTME: Messages are immutable once created; only constructors set their fields

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// What a message represents, for styling in a view layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Prompt,
    Acknowledgement,
    Error,
    Ready,
}

/// A single entry in a session's chat history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    id: Uuid,
    role: ChatRole,
    kind: MessageKind,
    content: String,
    timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// A prompt typed by the user
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, MessageKind::Prompt, content)
    }

    pub fn assistant(kind: MessageKind, content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, kind, content)
    }

    fn new(role: ChatRole, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            kind,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> ChatRole {
        self.role
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message() {
        let msg = ChatMessage::user("build a todo app");
        assert_eq!(msg.role(), ChatRole::User);
        assert_eq!(msg.kind(), MessageKind::Prompt);
        assert_eq!(msg.content(), "build a todo app");
    }

    #[test]
    fn test_assistant_message_serialization() {
        let msg = ChatMessage::assistant(MessageKind::Error, "boom");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["kind"], "error");
        assert_eq!(value["content"], "boom");
        assert!(value["timestamp"].is_string());
    }
}
