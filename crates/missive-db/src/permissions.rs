//! Access rules, expressed as predicates over loaded rows.

use crate::models::{MessageRow, NotificationRow, UserRow};
use crate::{Database, DbResult};

pub fn can_edit_message(user: &UserRow, message: &MessageRow) -> bool {
    user.is_active && message.sender_id == user.id
}

pub fn can_delete_message(user: &UserRow, message: &MessageRow) -> bool {
    user.is_active && (message.sender_id == user.id || user.is_staff)
}

/// Either party may move the status (delivered, read).
pub fn can_update_status(user: &UserRow, message: &MessageRow) -> bool {
    user.is_active && message.involves(&user.id)
}

pub fn can_read_notification(user: &UserRow, notification: &NotificationRow) -> bool {
    user.is_active && notification.user_id == user.id
}

/// Users may manage only their own account, staff may manage any.
pub fn can_manage_user(actor: &UserRow, target: &UserRow) -> bool {
    actor.is_active && (actor.id == target.id || actor.is_staff)
}

impl Database {
    /// Sender, receiver, or a participant of the message's conversation.
    pub fn can_view_message(&self, user: &UserRow, message: &MessageRow) -> DbResult<bool> {
        if !user.is_active {
            return Ok(false);
        }
        if message.involves(&user.id) {
            return Ok(true);
        }
        match message.conversation_id.as_deref() {
            Some(conversation_id) => self.is_participant(conversation_id, &user.id),
            None => Ok(false),
        }
    }

    pub fn can_view_conversation(&self, user: &UserRow, conversation_id: &str) -> DbResult<bool> {
        Ok(user.is_active && self.is_participant(conversation_id, &user.id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::NewMessage;
    use crate::testutil;

    #[test]
    fn participants_see_conversation_messages() {
        let db = testutil::db();
        let a = testutil::user(&db, "a@example.com");
        let b = testutil::user(&db, "b@example.com");
        let c = testutil::user(&db, "c@example.com");
        let outsider = testutil::user(&db, "x@example.com");
        let conv = db
            .create_conversation(&[a.id.as_str(), b.id.as_str(), c.id.as_str()])
            .unwrap();

        let mut new = NewMessage::direct(&a.id, &b.id, "group hello");
        new.conversation_id = Some(conv.id.clone());
        let msg = db.send_message(new).unwrap();

        assert!(db.can_view_message(&a, &msg).unwrap());
        assert!(db.can_view_message(&c, &msg).unwrap());
        assert!(!db.can_view_message(&outsider, &msg).unwrap());
        assert!(db.can_view_conversation(&c, &conv.id).unwrap());
        assert!(!db.can_view_conversation(&outsider, &conv.id).unwrap());
    }

    #[test]
    fn only_sender_edits() {
        let db = testutil::db();
        let a = testutil::user(&db, "a@example.com");
        let b = testutil::user(&db, "b@example.com");
        let msg = db.send_message(NewMessage::direct(&a.id, &b.id, "mine")).unwrap();

        assert!(can_edit_message(&a, &msg));
        assert!(!can_edit_message(&b, &msg));
        assert!(can_update_status(&b, &msg));
        assert!(!can_delete_message(&b, &msg));
    }

    #[test]
    fn inactive_users_can_do_nothing() {
        let db = testutil::db();
        let a = testutil::user(&db, "a@example.com");
        let b = testutil::user(&db, "b@example.com");
        let msg = db.send_message(NewMessage::direct(&a.id, &b.id, "hi")).unwrap();

        db.deactivate_user(&a.id).unwrap();
        let a = db.get_user_by_id(&a.id).unwrap().unwrap();
        assert!(!can_edit_message(&a, &msg));
        assert!(!db.can_view_message(&a, &msg).unwrap());
        assert!(!can_manage_user(&a, &a));
    }

    #[test]
    fn staff_manage_anyone() {
        let db = testutil::db();
        let a = testutil::user(&db, "a@example.com");
        let b = testutil::user(&db, "b@example.com");
        let mut staff = testutil::user(&db, "staff@example.com");
        staff.is_staff = true;

        assert!(can_manage_user(&a, &a));
        assert!(!can_manage_user(&a, &b));
        assert!(can_manage_user(&staff, &b));
    }

    #[test]
    fn either_party_moves_status() {
        let db = testutil::db();
        let a = testutil::user(&db, "a@example.com");
        let b = testutil::user(&db, "b@example.com");
        let x = testutil::user(&db, "x@example.com");
        let msg = db.send_message(NewMessage::direct(&a.id, &b.id, "hi")).unwrap();

        assert!(can_update_status(&a, &msg));
        assert!(can_update_status(&b, &msg));
        assert!(!can_update_status(&x, &msg));
    }
}
