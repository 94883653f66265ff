use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public view of an account. The password hash never leaves the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Pending,
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 4] = [Self::Pending, Self::Sent, Self::Delivered, Self::Read];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for MessageStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub content: String,
    pub status: MessageStatus,
    pub edited: bool,
    pub edited_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Created by the store whenever a message is first saved with a receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message_id: Uuid,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Content of a message as it was before one edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHistoryEntry {
    pub id: Uuid,
    pub message_id: Uuid,
    pub old_content: String,
    pub edited_at: DateTime<Utc>,
}

/// A message with its replies, oldest reply first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadNode {
    pub message: Message,
    pub replies: Vec<ThreadNode>,
}

impl ThreadNode {
    /// Number of messages in the tree, including the root.
    pub fn size(&self) -> usize {
        1 + self.replies.iter().map(ThreadNode::size).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Delivered".parse::<MessageStatus>().unwrap(), MessageStatus::Delivered);
        assert_eq!(" read ".parse::<MessageStatus>().unwrap(), MessageStatus::Read);
        assert!("archived".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&MessageStatus::Sent).unwrap();
        assert_eq!(json, "\"sent\"");
        assert_eq!(MessageStatus::default(), MessageStatus::Pending);
    }
}
