use rusqlite::Transaction;
use tracing::debug;
use uuid::Uuid;

use crate::DbResult;
use crate::hooks::MessageHook;
use crate::models::{MessageRow, now};

/// Creates one unread notification for the receiver of each new message.
pub struct NotificationGenerator;

impl MessageHook for NotificationGenerator {
    fn name(&self) -> &'static str {
        "notify_receiver"
    }

    fn after_save(&self, tx: &Transaction<'_>, message: &MessageRow, created: bool) -> DbResult<()> {
        if !created {
            return Ok(());
        }

        let (Some(message_id), Some(receiver_id)) = (message.id(), message.receiver_id.as_deref()) else {
            debug!(message_id = ?message.id, "No receiver, skipping notification");
            return Ok(());
        };

        tx.execute(
            "INSERT INTO notifications (id, user_id, message_id, is_read, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            (Uuid::new_v4().to_string(), receiver_id, message_id, now()),
        )?;

        debug!(message_id, receiver_id, "Notification created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::models::MessageRow;
    use crate::testutil;

    #[test]
    fn new_message_notifies_receiver_once() {
        let db = testutil::db();
        let sender = testutil::user(&db, "s@example.com");
        let receiver = testutil::user(&db, "r@example.com");

        let mut msg = MessageRow::new(&sender.id, "hi");
        msg.receiver_id = Some(receiver.id.clone());
        assert!(db.save_message(&mut msg).unwrap());

        let notes = db.list_notifications(&receiver.id, None).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].message_id, msg.id.clone().unwrap());
        assert!(!notes[0].is_read);
        assert!(db.list_notifications(&sender.id, None).unwrap().is_empty());
    }

    #[test]
    fn updates_never_notify_again() {
        let db = testutil::db();
        let sender = testutil::user(&db, "s@example.com");
        let receiver = testutil::user(&db, "r@example.com");

        let mut msg = MessageRow::new(&sender.id, "hi");
        msg.receiver_id = Some(receiver.id.clone());
        db.save_message(&mut msg).unwrap();

        msg.content = "hello".into();
        assert!(!db.save_message(&mut msg).unwrap());
        msg.status = missive_types::MessageStatus::Delivered;
        db.save_message(&mut msg).unwrap();

        assert_eq!(db.list_notifications(&receiver.id, None).unwrap().len(), 1);
    }

    #[test]
    fn missing_receiver_is_not_an_error() {
        let db = testutil::db();
        let sender = testutil::user(&db, "s@example.com");

        let mut msg = MessageRow::new(&sender.id, "note to self");
        assert!(db.save_message(&mut msg).unwrap());

        let total: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM notifications", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(total, 0);
    }
}
