use rusqlite::Connection;
use tracing::info;

use crate::DbResult;

/// Foreign keys are declared without `ON DELETE` actions: deletions clean up
/// dependants explicitly (see `hooks::cascade`), and a missed dependant
/// surfaces as a constraint failure instead of silently vanishing.
pub fn run(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id            TEXT PRIMARY KEY,
                email         TEXT NOT NULL UNIQUE,
                password      TEXT NOT NULL,
                first_name    TEXT NOT NULL,
                last_name     TEXT NOT NULL,
                phone_number  TEXT UNIQUE,
                is_active     INTEGER NOT NULL DEFAULT 1,
                is_staff      INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE conversation_participants (
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                user_id          TEXT NOT NULL REFERENCES users(id),
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON conversation_participants(user_id);

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT REFERENCES conversations(id),
                sender_id        TEXT NOT NULL REFERENCES users(id),
                receiver_id      TEXT REFERENCES users(id),
                parent_id        TEXT REFERENCES messages(id),
                content          TEXT NOT NULL,
                status           TEXT NOT NULL DEFAULT 'pending',
                edited           INTEGER NOT NULL DEFAULT 0,
                edited_by        TEXT REFERENCES users(id),
                created_at       TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);
            CREATE INDEX idx_messages_sender ON messages(sender_id);
            CREATE INDEX idx_messages_receiver ON messages(receiver_id, status);
            CREATE INDEX idx_messages_parent ON messages(parent_id);

            CREATE TABLE notifications (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id),
                message_id  TEXT NOT NULL REFERENCES messages(id),
                is_read     INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_user
                ON notifications(user_id, created_at);
            CREATE INDEX idx_notifications_message
                ON notifications(message_id);

            CREATE TABLE message_history (
                id           TEXT PRIMARY KEY,
                message_id   TEXT NOT NULL REFERENCES messages(id),
                old_content  TEXT NOT NULL,
                edited_at    TEXT NOT NULL
            );

            CREATE INDEX idx_history_message
                ON message_history(message_id, edited_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }
}
