//! Lifecycle hooks run by the store around message and user writes.
//!
//! Hooks are registered explicitly through [`Hooks`] and invoked in
//! registration order, inside the transaction of the triggering write. A
//! hook error aborts that transaction.

pub mod cascade;
pub mod history;
pub mod notify;

use rusqlite::Transaction;
use tracing::debug;

use crate::DbResult;
use crate::models::{MessageRow, UserRow};

pub use cascade::CascadeCleanup;
pub use history::EditHistoryRecorder;
pub use notify::NotificationGenerator;

pub trait MessageHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called before `incoming` is written. The persisted row, if any, is
    /// still unmodified and may be read through `tx`.
    fn before_save(&self, _tx: &Transaction<'_>, _incoming: &mut MessageRow) -> DbResult<()> {
        Ok(())
    }

    /// Called after `message` was written. `created` is true when the write
    /// inserted a new row.
    fn after_save(&self, _tx: &Transaction<'_>, _message: &MessageRow, _created: bool) -> DbResult<()> {
        Ok(())
    }
}

pub trait UserHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called before the user row is deleted, in the same transaction.
    fn on_deleted(&self, tx: &Transaction<'_>, user: &UserRow) -> DbResult<()>;
}

pub struct Hooks {
    message: Vec<Box<dyn MessageHook>>,
    user: Vec<Box<dyn UserHook>>,
}

impl Hooks {
    pub fn empty() -> Self {
        Self {
            message: Vec::new(),
            user: Vec::new(),
        }
    }

    /// History capture, notification generation and cascade cleanup.
    pub fn standard() -> Self {
        Self::empty()
            .with_message_hook(EditHistoryRecorder)
            .with_message_hook(NotificationGenerator)
            .with_user_hook(CascadeCleanup)
    }

    pub fn with_message_hook(mut self, hook: impl MessageHook + 'static) -> Self {
        self.message.push(Box::new(hook));
        self
    }

    pub fn with_user_hook(mut self, hook: impl UserHook + 'static) -> Self {
        self.user.push(Box::new(hook));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.message
            .iter()
            .map(|h| h.name())
            .chain(self.user.iter().map(|h| h.name()))
            .collect()
    }

    pub(crate) fn before_message_save(&self, tx: &Transaction<'_>, incoming: &mut MessageRow) -> DbResult<()> {
        for hook in &self.message {
            debug!(hook = hook.name(), message_id = ?incoming.id, "before_save");
            hook.before_save(tx, incoming)?;
        }
        Ok(())
    }

    pub(crate) fn after_message_save(&self, tx: &Transaction<'_>, message: &MessageRow, created: bool) -> DbResult<()> {
        for hook in &self.message {
            debug!(hook = hook.name(), message_id = ?message.id, created, "after_save");
            hook.after_save(tx, message, created)?;
        }
        Ok(())
    }

    pub(crate) fn user_deleted(&self, tx: &Transaction<'_>, user: &UserRow) -> DbResult<()> {
        for hook in &self.user {
            debug!(hook = hook.name(), user_id = %user.id, "on_deleted");
            hook.on_deleted(tx, user)?;
        }
        Ok(())
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::DbError;
    use crate::testutil;

    struct Counting(Arc<AtomicUsize>);

    impl MessageHook for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn after_save(&self, _tx: &Transaction<'_>, _message: &MessageRow, _created: bool) -> DbResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl MessageHook for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn after_save(&self, _tx: &Transaction<'_>, _message: &MessageRow, _created: bool) -> DbResult<()> {
            Err(DbError::invalid("hook", "refused"))
        }
    }

    #[test]
    fn standard_hooks_in_order() {
        assert_eq!(
            Hooks::standard().names(),
            vec!["record_edit_history", "notify_receiver", "cascade_user_cleanup"]
        );
        assert!(Hooks::empty().names().is_empty());
    }

    #[test]
    fn custom_hook_runs_on_every_save() {
        let count = Arc::new(AtomicUsize::new(0));
        let db = testutil::db().with_hooks(Hooks::empty().with_message_hook(Counting(count.clone())));
        let sender = testutil::user(&db, "a@example.com");

        let mut msg = MessageRow::new(&sender.id, "one");
        db.save_message(&mut msg).unwrap();
        msg.content = "two".into();
        db.save_message(&mut msg).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_hook_rolls_back_the_write() {
        let db = testutil::db().with_hooks(Hooks::empty().with_message_hook(Failing));
        let sender = testutil::user(&db, "a@example.com");

        let mut msg = MessageRow::new(&sender.id, "doomed");
        assert!(db.save_message(&mut msg).is_err());

        let stored: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(stored, 0);
    }
}
