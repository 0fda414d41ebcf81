//! Message model representing one entry in the chat transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message sender.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the user.
    User,
    /// Reply from the assistant (including error entries).
    Assistant,
}

impl Role {
    /// Convert role to a display string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse role from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a message within one chat session.
///
/// Ordering is by creation time, with the role as a tie-break suffix so a
/// user message and the assistant reply landing in the same millisecond
/// stay distinct and ordered. The chat session bumps the timestamp where
/// needed to keep identifiers unique and non-decreasing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageId {
    timestamp_ms: i64,
    role: Role,
}

impl MessageId {
    /// Create an identifier from a creation time and role.
    pub fn new(created_at: DateTime<Utc>, role: Role) -> Self {
        Self {
            timestamp_ms: created_at.timestamp_millis(),
            role,
        }
    }

    /// Create an identifier from an explicit millisecond timestamp.
    pub const fn from_parts(timestamp_ms: i64, role: Role) -> Self {
        Self { timestamp_ms, role }
    }

    /// Millisecond timestamp component.
    pub const fn timestamp_ms(self) -> i64 {
        self.timestamp_ms
    }

    /// Role suffix component.
    pub const fn role(self) -> Role {
        self.role
    }
}

/// A message in the chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, also the ordering key.
    pub id: MessageId,
    /// Role of the sender.
    pub role: Role,
    /// Full text body. For assistant messages this is the complete text as
    /// received from the gateway, independent of how much has been revealed.
    pub content: String,
    /// Video URLs attached to an assistant reply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_links: Vec<String>,
}

impl Message {
    /// Create a new message without media links.
    pub fn new(id: MessageId, content: String) -> Self {
        Self {
            id,
            role: id.role(),
            content,
            media_links: Vec::new(),
        }
    }

    /// Create a new assistant message with attached media links.
    pub fn with_media(id: MessageId, content: String, media_links: Vec<String>) -> Self {
        Self {
            id,
            role: id.role(),
            content,
            media_links,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        assert_eq!(Role::from_str("user"), Some(Role::User));
        assert_eq!(Role::from_str("assistant"), Some(Role::Assistant));
        assert_eq!(Role::from_str("system"), None);
        assert_eq!(Role::User.to_string(), "user");
    }

    #[test]
    fn ids_order_by_time_then_role() {
        let earlier = MessageId::from_parts(1_000, Role::Assistant);
        let later = MessageId::from_parts(2_000, Role::User);
        assert!(earlier < later);

        // Same millisecond: the user message sorts before the assistant reply.
        let user = MessageId::from_parts(1_000, Role::User);
        let assistant = MessageId::from_parts(1_000, Role::Assistant);
        assert!(user < assistant);
        assert_ne!(user, assistant);
    }

    #[test]
    fn message_role_matches_id() {
        let id = MessageId::from_parts(42, Role::Assistant);
        let message = Message::new(id, "hello".to_string());
        assert_eq!(message.role, Role::Assistant);
        assert!(message.media_links.is_empty());
    }
}
