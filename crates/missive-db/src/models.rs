//! Database row types. These map directly to SQLite rows and are kept
//! distinct from the missive-types API models; `into_api` converts.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use tracing::warn;
use uuid::Uuid;

use missive_types::MessageStatus;
use missive_types::models::{
    Conversation, Message, MessageHistoryEntry, Notification, ThreadNode, User,
};

pub struct UserRow {
    pub id: String,
    pub email: String,
    /// Argon2id PHC string.
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub is_staff: bool,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub participant_ids: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    /// `None` until the row is first saved.
    pub id: Option<String>,
    pub conversation_id: Option<String>,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub parent_id: Option<String>,
    pub content: String,
    pub status: MessageStatus,
    pub edited: bool,
    pub edited_by: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    /// An unsaved message from `sender_id`.
    pub fn new(sender_id: &str, content: impl Into<String>) -> Self {
        Self {
            id: None,
            conversation_id: None,
            sender_id: sender_id.to_string(),
            receiver_id: None,
            parent_id: None,
            content: content.into(),
            status: MessageStatus::default(),
            edited: false,
            edited_by: None,
            created_at: now(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.receiver_id.as_deref() == Some(user_id)
    }
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub is_read: bool,
    pub created_at: String,
}

pub struct HistoryRow {
    pub id: String,
    pub message_id: String,
    pub old_content: String,
    pub edited_at: String,
}

pub struct MessageThread {
    pub message: MessageRow,
    pub replies: Vec<MessageThread>,
}

// -- Timestamps --

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// lexical order in SQLite matches chronological order.
pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now() -> String {
    timestamp(&Utc::now())
}

fn parse_timestamp(raw: &str, owner: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by hand through the sqlite3 shell use datetime('now').
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on '{}': {}", raw, owner, e);
            DateTime::default()
        })
}

fn parse_id(raw: &str, owner: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}' on '{}': {}", raw, owner, e);
        Uuid::default()
    })
}

fn parse_opt_id(raw: Option<&str>, owner: &str) -> Option<Uuid> {
    raw.map(|id| parse_id(id, owner))
}

// -- Row mapping --

pub(crate) const USER_COLUMNS: &str = "id, email, password, first_name, last_name, phone_number, \
     is_active, is_staff, created_at, updated_at";

pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, parent_id, \
     content, status, edited, edited_by, created_at";

pub(crate) const NOTIFICATION_COLUMNS: &str = "id, user_id, message_id, is_read, created_at";

pub(crate) const HISTORY_COLUMNS: &str = "id, message_id, old_content, edited_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        phone_number: row.get(5)?,
        is_active: row.get(6)?,
        is_staff: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let status: String = row.get(6)?;
    let status = status
        .parse::<MessageStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(MessageRow {
        id: Some(row.get(0)?),
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        parent_id: row.get(4)?,
        content: row.get(5)?,
        status,
        edited: row.get(7)?,
        edited_by: row.get(8)?,
        created_at: row.get(9)?,
    })
}

pub(crate) fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message_id: row.get(2)?,
        is_read: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryRow> {
    Ok(HistoryRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        old_content: row.get(2)?,
        edited_at: row.get(3)?,
    })
}

// -- API conversion --

impl UserRow {
    pub fn into_api(self) -> User {
        User {
            id: parse_id(&self.id, "user"),
            created_at: parse_timestamp(&self.created_at, &self.id),
            updated_at: parse_timestamp(&self.updated_at, &self.id),
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            phone_number: self.phone_number,
            is_active: self.is_active,
            is_staff: self.is_staff,
        }
    }
}

impl ConversationRow {
    pub fn into_api(self) -> Conversation {
        Conversation {
            id: parse_id(&self.id, "conversation"),
            participants: self
                .participant_ids
                .iter()
                .map(|id| parse_id(id, &self.id))
                .collect(),
            created_at: parse_timestamp(&self.created_at, &self.id),
            updated_at: parse_timestamp(&self.updated_at, &self.id),
        }
    }
}

impl MessageRow {
    pub fn into_api(self) -> Message {
        let owner = self.id.clone().unwrap_or_default();
        Message {
            id: parse_opt_id(self.id.as_deref(), "message").unwrap_or_default(),
            conversation_id: parse_opt_id(self.conversation_id.as_deref(), &owner),
            sender_id: parse_id(&self.sender_id, &owner),
            receiver_id: parse_opt_id(self.receiver_id.as_deref(), &owner),
            parent_id: parse_opt_id(self.parent_id.as_deref(), &owner),
            edited_by: parse_opt_id(self.edited_by.as_deref(), &owner),
            created_at: parse_timestamp(&self.created_at, &owner),
            content: self.content,
            status: self.status,
            edited: self.edited,
        }
    }
}

impl NotificationRow {
    pub fn into_api(self) -> Notification {
        Notification {
            id: parse_id(&self.id, "notification"),
            user_id: parse_id(&self.user_id, &self.id),
            message_id: parse_id(&self.message_id, &self.id),
            is_read: self.is_read,
            created_at: parse_timestamp(&self.created_at, &self.id),
        }
    }
}

impl HistoryRow {
    pub fn into_api(self) -> MessageHistoryEntry {
        MessageHistoryEntry {
            id: parse_id(&self.id, "history"),
            message_id: parse_id(&self.message_id, &self.id),
            edited_at: parse_timestamp(&self.edited_at, &self.id),
            old_content: self.old_content,
        }
    }
}

impl MessageThread {
    pub fn into_api(self) -> ThreadNode {
        ThreadNode {
            message: self.message.into_api(),
            replies: self.replies.into_iter().map(MessageThread::into_api).collect(),
        }
    }
}
