use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use missive_types::MessageStatus;
use missive_types::api::{CascadeReport, MAX_PAGE_SIZE, MessageFilter, Page};

use crate::accounts::query_user_by_id;
use crate::conversations::{query_is_participant, touch_conversation};
use crate::hooks::cascade;
use crate::models::{
    HISTORY_COLUMNS, HistoryRow, MESSAGE_COLUMNS, MessageRow, MessageThread, history_from_row,
    message_from_row, timestamp,
};
use crate::{Database, DbError, DbResult};

pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Message this one replies to.
    pub parent_id: Option<String>,
    pub content: String,
}

impl NewMessage {
    pub fn direct(sender_id: &str, receiver_id: &str, content: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            receiver_id: Some(receiver_id.to_string()),
            conversation_id: None,
            parent_id: None,
            content: content.to_string(),
        }
    }
}

impl Database {
    // -- Writes --

    /// Insert `message` if it has no identity or its row is gone, update it
    /// otherwise. Returns true when a row was inserted.
    ///
    /// Only `content`, `status`, `edited` and `edited_by` change on update.
    /// On error `message` is left as it was passed in.
    pub fn save_message(&self, message: &mut MessageRow) -> DbResult<bool> {
        let snapshot = message.clone();
        let result = self.with_tx(|tx| self.save_in(tx, message));
        if result.is_err() {
            *message = snapshot;
        }
        result
    }

    fn save_in(&self, tx: &Transaction<'_>, message: &mut MessageRow) -> DbResult<bool> {
        if let (Some(id), Some(parent_id)) = (message.id(), message.parent_id.as_deref()) {
            if parent_leads_back(tx, parent_id, id)? {
                return Err(DbError::invalid("parent_id", "a message cannot reply to itself"));
            }
        }

        // Only the history hook may raise `edited`.
        message.edited = match message.id() {
            Some(id) => stored_edited(tx, id)?,
            None => false,
        };

        self.hooks.before_message_save(tx, message)?;

        let stored_edited = match message.id.clone() {
            Some(id) => update_message(tx, &id, message)?,
            None => {
                message.id = Some(Uuid::new_v4().to_string());
                None
            }
        };

        let created = match stored_edited {
            Some(edited) => {
                message.edited = edited;
                false
            }
            None => {
                // A fresh row has no history yet.
                message.edited = false;
                insert_message(tx, message)?;
                if let Some(conversation_id) = message.conversation_id.as_deref() {
                    touch_conversation(tx, conversation_id)?;
                }
                true
            }
        };

        self.hooks.after_message_save(tx, message, created)?;
        Ok(created)
    }

    /// Send a message with status `sent`.
    ///
    /// A reply without a conversation joins its parent's conversation. When
    /// the message belongs to a conversation the sender must take part in it.
    pub fn send_message(&self, new: NewMessage) -> DbResult<MessageRow> {
        if new.content.trim().is_empty() {
            return Err(DbError::invalid("content", "must not be empty"));
        }

        let message = self.with_tx(|tx| {
            let sender = query_user_by_id(tx, &new.sender_id)?
                .ok_or_else(|| DbError::not_found("user", new.sender_id.clone()))?;
            if !sender.is_active {
                return Err(DbError::forbidden("inactive users cannot send messages"));
            }
            if let Some(receiver_id) = new.receiver_id.as_deref() {
                if query_user_by_id(tx, receiver_id)?.is_none() {
                    return Err(DbError::not_found("user", receiver_id));
                }
            }

            let mut conversation_id = new.conversation_id.clone();
            if let Some(parent_id) = new.parent_id.as_deref() {
                let parent = query_message(tx, parent_id)?
                    .ok_or_else(|| DbError::not_found("message", parent_id))?;
                if conversation_id.is_none() {
                    conversation_id = parent.conversation_id;
                } else if parent.conversation_id.is_some() && parent.conversation_id != conversation_id {
                    return Err(DbError::invalid(
                        "parent_id",
                        "reply must stay in its parent's conversation",
                    ));
                }
            }

            if let Some(conversation_id) = conversation_id.as_deref() {
                if !query_is_participant(tx, conversation_id, &sender.id)? {
                    return Err(DbError::forbidden("sender is not a participant of this conversation"));
                }
            }

            let mut message = MessageRow::new(&sender.id, new.content.clone());
            message.receiver_id = new.receiver_id.clone();
            message.conversation_id = conversation_id;
            message.parent_id = new.parent_id.clone();
            message.status = MessageStatus::Sent;

            self.save_in(tx, &mut message)?;
            Ok(message)
        })?;

        info!(message_id = ?message.id, sender_id = %message.sender_id, "Message sent");
        Ok(message)
    }

    /// Replace a message's content on behalf of `editor_id`.
    pub fn edit_message(&self, id: &str, editor_id: &str, content: &str) -> DbResult<MessageRow> {
        if content.trim().is_empty() {
            return Err(DbError::invalid("content", "must not be empty"));
        }

        self.with_tx(|tx| {
            let mut message = query_message(tx, id)?.ok_or_else(|| DbError::not_found("message", id))?;
            if message.content == content {
                return Ok(message);
            }
            message.content = content.to_string();
            message.edited_by = Some(editor_id.to_string());
            self.save_in(tx, &mut message)?;
            Ok(message)
        })
    }

    pub fn set_message_status(&self, id: &str, status: MessageStatus) -> DbResult<MessageRow> {
        self.with_tx(|tx| {
            let mut message = query_message(tx, id)?.ok_or_else(|| DbError::not_found("message", id))?;
            message.status = status;
            self.save_in(tx, &mut message)?;
            Ok(message)
        })
    }

    /// Delete a message and every reply beneath it, with their
    /// notifications and history.
    pub fn delete_message(&self, id: &str) -> DbResult<CascadeReport> {
        let report = self.with_tx(|tx| {
            if query_message(tx, id)?.is_none() {
                return Err(DbError::not_found("message", id));
            }
            cascade::cascade_message(tx, id)
        })?;

        info!(message_id = id, removed = report.messages, "Message deleted");
        Ok(report)
    }

    // -- Reads --

    pub fn get_message(&self, id: &str) -> DbResult<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Prior contents of a message, oldest edit first.
    pub fn message_history(&self, message_id: &str) -> DbResult<Vec<HistoryRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {HISTORY_COLUMNS} FROM message_history
                 WHERE message_id = ?1
                 ORDER BY edited_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([message_id], history_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The message and all replies beneath it, each level oldest first.
    pub fn message_thread(&self, id: &str) -> DbResult<Option<MessageThread>> {
        let rows = self.with_conn(|conn| {
            let sql = format!(
                "WITH RECURSIVE thread(id) AS (
                     SELECT id FROM messages WHERE id = ?1
                     UNION
                     SELECT m.id FROM messages m JOIN thread t ON m.parent_id = t.id
                 )
                 SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE id IN (SELECT id FROM thread)
                 ORDER BY created_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut root = None;
        let mut children: HashMap<String, Vec<MessageRow>> = HashMap::new();
        for row in rows {
            if row.id() == Some(id) {
                root = Some(row);
            } else if let Some(parent_id) = row.parent_id.clone() {
                children.entry(parent_id).or_default().push(row);
            }
        }

        debug!(message_id = id, found = root.is_some(), "Thread loaded");
        Ok(root.map(|root| build_thread(root, &mut children)))
    }

    /// Messages received by `user_id` that have not reached `read`, newest first.
    pub fn unread_messages(&self, user_id: &str) -> DbResult<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE receiver_id = ?1 AND status != 'read'
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One page (1-based) of a conversation's messages, newest first.
    pub fn list_conversation_messages(
        &self,
        conversation_id: &str,
        filter: &MessageFilter,
        page: u32,
        page_size: u32,
    ) -> DbResult<Page<MessageRow>> {
        if page == 0 {
            return Err(DbError::invalid("page", "pages start at 1"));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(DbError::invalid(
                "page_size",
                format!("must be between 1 and {}", MAX_PAGE_SIZE),
            ));
        }

        let status = filter.status.map(MessageStatus::as_str);
        let after = filter.created_after.as_ref().map(timestamp);
        let before = filter.created_before.as_ref().map(timestamp);
        const WHERE: &str = "WHERE conversation_id = ?1
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR created_at >= ?3)
               AND (?4 IS NULL OR created_at <= ?4)";

        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM messages {WHERE}"),
                rusqlite::params![conversation_id, status, after, before],
                |row| row.get(0),
            )?;

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages {WHERE}
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?5 OFFSET ?6"
            );
            let offset = i64::from(page - 1) * i64::from(page_size);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, status, after, before, page_size, offset],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Page::new(rows, count.max(0) as u64, page, page_size))
        })
    }
}

fn build_thread(message: MessageRow, children: &mut HashMap<String, Vec<MessageRow>>) -> MessageThread {
    let replies = message
        .id()
        .and_then(|id| children.remove(id))
        .unwrap_or_default()
        .into_iter()
        .map(|reply| build_thread(reply, children))
        .collect();
    MessageThread { message, replies }
}

pub(crate) fn query_message(conn: &Connection, id: &str) -> DbResult<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], message_from_row).optional()?)
}

fn stored_edited(conn: &Connection, id: &str) -> DbResult<bool> {
    let edited: Option<bool> = conn
        .query_row("SELECT edited FROM messages WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(edited.unwrap_or(false))
}

/// True when `message_id` is `parent_id` or one of its ancestors.
fn parent_leads_back(conn: &Connection, parent_id: &str, message_id: &str) -> DbResult<bool> {
    if parent_id == message_id {
        return Ok(true);
    }
    let found: Option<i64> = conn
        .query_row(
            "WITH RECURSIVE ancestors(id) AS (
                 SELECT ?1
                 UNION
                 SELECT m.parent_id FROM messages m JOIN ancestors a ON m.id = a.id
                 WHERE m.parent_id IS NOT NULL
             )
             SELECT 1 FROM ancestors WHERE id = ?2",
            (parent_id, message_id),
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Returns the stored `edited` flag, or `None` when no row has this id.
/// `edited` never goes back to false once set.
fn update_message(conn: &Connection, id: &str, message: &MessageRow) -> DbResult<Option<bool>> {
    let edited = conn
        .query_row(
            "UPDATE messages
             SET content = ?2, status = ?3, edited = MAX(edited, ?4), edited_by = ?5
             WHERE id = ?1
             RETURNING edited",
            rusqlite::params![
                id,
                message.content,
                message.status.as_str(),
                message.edited,
                message.edited_by,
            ],
            |row| row.get(0),
        )
        .optional()?;
    Ok(edited)
}

fn insert_message(conn: &Connection, message: &MessageRow) -> DbResult<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, parent_id,
                               content, status, edited, edited_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            message.id,
            message.conversation_id,
            message.sender_id,
            message.receiver_id,
            message.parent_id,
            message.content,
            message.status.as_str(),
            message.edited,
            message.edited_by,
            message.created_at,
        ],
    )?;
    Ok(())
}
