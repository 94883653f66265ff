use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::accounts::query_user_by_id;
use crate::models::{ConversationRow, now};
use crate::{Database, DbError, DbResult};

impl Database {
    pub fn create_conversation(&self, participant_ids: &[&str]) -> DbResult<ConversationRow> {
        if participant_ids.is_empty() {
            return Err(DbError::invalid("participants", "at least one is required"));
        }

        let conversation = self.with_tx(|tx| {
            let id = Uuid::new_v4().to_string();
            let stamp = now();
            tx.execute(
                "INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
                (&id, &stamp),
            )?;

            for user_id in participant_ids {
                insert_participant(tx, &id, user_id)?;
            }

            query_conversation(tx, &id)?.ok_or_else(|| DbError::not_found("conversation", id))
        })?;

        info!(
            conversation_id = %conversation.id,
            participants = conversation.participant_ids.len(),
            "Conversation created"
        );
        Ok(conversation)
    }

    /// Adding an existing participant is a no-op.
    pub fn add_participant(&self, conversation_id: &str, user_id: &str) -> DbResult<ConversationRow> {
        self.with_tx(|tx| {
            if query_conversation(tx, conversation_id)?.is_none() {
                return Err(DbError::not_found("conversation", conversation_id));
            }
            insert_participant(tx, conversation_id, user_id)?;
            touch_conversation(tx, conversation_id)?;
            query_conversation(tx, conversation_id)?
                .ok_or_else(|| DbError::not_found("conversation", conversation_id))
        })
    }

    pub fn get_conversation(&self, id: &str) -> DbResult<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> DbResult<bool> {
        self.with_conn(|conn| query_is_participant(conn, conversation_id, user_id))
    }

    /// Conversations the user takes part in, most recently active first.
    pub fn conversations_for_user(&self, user_id: &str) -> DbResult<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.updated_at DESC",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut conversations = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(c) = query_conversation(conn, &id)? {
                    conversations.push(c);
                }
            }
            Ok(conversations)
        })
    }
}

fn insert_participant(conn: &Connection, conversation_id: &str, user_id: &str) -> DbResult<()> {
    if query_user_by_id(conn, user_id)?.is_none() {
        return Err(DbError::not_found("user", user_id));
    }
    conn.execute(
        "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
        (conversation_id, user_id),
    )?;
    Ok(())
}

pub(crate) fn query_is_participant(conn: &Connection, conversation_id: &str, user_id: &str) -> DbResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
            (conversation_id, user_id),
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn touch_conversation(conn: &Connection, conversation_id: &str) -> DbResult<()> {
    conn.execute(
        "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
        (conversation_id, now()),
    )?;
    Ok(())
}

fn query_conversation(conn: &Connection, id: &str) -> DbResult<Option<ConversationRow>> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, created_at, updated_at FROM conversations WHERE id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((id, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1 ORDER BY user_id",
    )?;
    let participant_ids = stmt
        .query_map([&id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(ConversationRow {
        id,
        participant_ids,
        created_at,
        updated_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn participants_are_tracked() {
        let db = testutil::db();
        let a = testutil::user(&db, "a@example.com");
        let b = testutil::user(&db, "b@example.com");
        let c = testutil::user(&db, "c@example.com");

        let conv = db.create_conversation(&[a.id.as_str(), b.id.as_str()]).unwrap();
        assert_eq!(conv.participant_ids.len(), 2);
        assert!(db.is_participant(&conv.id, &a.id).unwrap());
        assert!(!db.is_participant(&conv.id, &c.id).unwrap());

        let conv = db.add_participant(&conv.id, &c.id).unwrap();
        let conv = db.add_participant(&conv.id, &c.id).unwrap();
        assert_eq!(conv.participant_ids.len(), 3);

        assert_eq!(db.conversations_for_user(&c.id).unwrap().len(), 1);
    }

    #[test]
    fn unknown_participant_aborts_creation() {
        let db = testutil::db();
        let a = testutil::user(&db, "a@example.com");

        assert!(matches!(
            db.create_conversation(&[a.id.as_str(), "ghost"]),
            Err(DbError::NotFound { entity: "user", .. })
        ));
        assert!(db.conversations_for_user(&a.id).unwrap().is_empty());
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let db = testutil::db();
        assert!(db.create_conversation(&[]).is_err());
    }
}
