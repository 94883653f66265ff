use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::models::{NOTIFICATION_COLUMNS, NotificationRow, notification_from_row};
use crate::{Database, DbError, DbResult};

impl Database {
    /// Notifications addressed to `user_id`, newest first. `read` filters on
    /// the read flag when given.
    pub fn list_notifications(&self, user_id: &str, read: Option<bool>) -> DbResult<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1 AND (?2 IS NULL OR is_read = ?2)
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, read], notification_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_notification(&self, id: &str) -> DbResult<Option<NotificationRow>> {
        self.with_conn(|conn| query_notification(conn, id))
    }

    pub fn unread_notification_count(&self, user_id: &str) -> DbResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    /// Only the recipient may change the read flag.
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> DbResult<NotificationRow> {
        self.with_tx(|tx| {
            let mut notification =
                query_notification(tx, id)?.ok_or_else(|| DbError::not_found("notification", id))?;
            if notification.user_id != user_id {
                return Err(DbError::forbidden("notification belongs to another user"));
            }

            tx.execute("UPDATE notifications SET is_read = 1 WHERE id = ?1", [id])?;
            notification.is_read = true;
            Ok(notification)
        })
    }

    /// Returns the number of notifications that changed.
    pub fn mark_all_notifications_read(&self, user_id: &str) -> DbResult<usize> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                [user_id],
            )?)
        })?;
        debug!(user_id, changed, "Notifications marked read");
        Ok(changed)
    }
}

fn query_notification(conn: &Connection, id: &str) -> DbResult<Option<NotificationRow>> {
    let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], notification_from_row).optional()?)
}
