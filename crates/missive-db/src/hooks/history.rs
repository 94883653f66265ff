use rusqlite::{OptionalExtension, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::DbResult;
use crate::hooks::MessageHook;
use crate::models::{MessageRow, now};

/// Snapshots a message's persisted content before an update replaces it.
///
/// Only a change of `content` is recorded. The incoming row is marked
/// `edited` so the flag lands in the same write.
pub struct EditHistoryRecorder;

impl MessageHook for EditHistoryRecorder {
    fn name(&self) -> &'static str {
        "record_edit_history"
    }

    fn before_save(&self, tx: &Transaction<'_>, incoming: &mut MessageRow) -> DbResult<()> {
        let Some(message_id) = incoming.id.clone() else {
            return Ok(());
        };

        let persisted: Option<String> = tx
            .query_row("SELECT content FROM messages WHERE id = ?1", [&message_id], |row| row.get(0))
            .optional()?;

        // Identity without a row: deleted underneath us, nothing to snapshot.
        let Some(old_content) = persisted else {
            debug!(message_id = %message_id, "No persisted row, skipping history");
            return Ok(());
        };

        if old_content == incoming.content {
            return Ok(());
        }

        tx.execute(
            "INSERT INTO message_history (id, message_id, old_content, edited_at)
             VALUES (?1, ?2, ?3, ?4)",
            (Uuid::new_v4().to_string(), &message_id, &old_content, now()),
        )?;
        incoming.edited = true;

        debug!(message_id = %message_id, "Edit history recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use missive_types::MessageStatus;

    use crate::models::MessageRow;
    use crate::testutil;

    #[test]
    fn content_change_records_old_value() {
        let db = testutil::db();
        let sender = testutil::user(&db, "s@example.com");

        let mut msg = MessageRow::new(&sender.id, "hi");
        db.save_message(&mut msg).unwrap();
        assert!(!msg.edited);

        msg.content = "hello".into();
        db.save_message(&mut msg).unwrap();
        assert!(msg.edited);

        let id = msg.id.clone().unwrap();
        let history = db.message_history(&id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_content, "hi");

        let stored = db.get_message(&id).unwrap().unwrap();
        assert!(stored.edited);
        assert_eq!(stored.content, "hello");
    }

    #[test]
    fn status_change_records_nothing() {
        let db = testutil::db();
        let sender = testutil::user(&db, "s@example.com");

        let mut msg = MessageRow::new(&sender.id, "hi");
        db.save_message(&mut msg).unwrap();
        msg.status = MessageStatus::Read;
        db.save_message(&mut msg).unwrap();

        let id = msg.id.clone().unwrap();
        assert!(db.message_history(&id).unwrap().is_empty());
        assert!(!db.get_message(&id).unwrap().unwrap().edited);
    }

    #[test]
    fn every_change_is_kept_oldest_first() {
        let db = testutil::db();
        let sender = testutil::user(&db, "s@example.com");

        let mut msg = MessageRow::new(&sender.id, "v1");
        db.save_message(&mut msg).unwrap();
        for next in ["v2", "v3", "v3", "v4"] {
            msg.content = next.into();
            db.save_message(&mut msg).unwrap();
        }

        let old: Vec<String> = db
            .message_history(msg.id().unwrap())
            .unwrap()
            .into_iter()
            .map(|h| h.old_content)
            .collect();
        assert_eq!(old, vec!["v1", "v2", "v3"]);
    }

    #[test]
    fn identity_without_row_is_inserted_without_history() {
        let db = testutil::db();
        let sender = testutil::user(&db, "s@example.com");

        let mut msg = MessageRow::new(&sender.id, "ghost");
        msg.id = Some(uuid::Uuid::new_v4().to_string());
        assert!(db.save_message(&mut msg).unwrap());

        assert!(db.message_history(msg.id().unwrap()).unwrap().is_empty());
        assert!(!msg.edited);
    }
}
