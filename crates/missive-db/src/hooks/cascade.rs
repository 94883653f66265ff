use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, Transaction, params_from_iter};
use tracing::info;

use missive_types::api::CascadeReport;

use crate::DbResult;
use crate::hooks::UserHook;
use crate::models::UserRow;

/// SQLite's default host-parameter limit is far above this; keep statements small.
const CHUNK: usize = 500;

/// Removes everything that references a user before the user row goes.
pub struct CascadeCleanup;

impl UserHook for CascadeCleanup {
    fn name(&self) -> &'static str {
        "cascade_user_cleanup"
    }

    fn on_deleted(&self, tx: &Transaction<'_>, user: &UserRow) -> DbResult<()> {
        let report = cascade_user(tx, &user.id)?;
        info!(
            user_id = %user.id,
            messages = report.messages,
            notifications = report.notifications,
            history = report.history,
            memberships = report.memberships,
            "User data removed"
        );
        Ok(())
    }
}

enum Seed<'a> {
    /// Messages the user sent or received.
    User(&'a str),
    Message(&'a str),
}

/// Delete every message `user_id` sent or received, the replies beneath
/// them, their notifications and history, the notifications addressed to
/// the user, and the user's conversation memberships. References to the user
/// as `edited_by` on surviving messages are cleared.
pub fn cascade_user(conn: &Connection, user_id: &str) -> DbResult<CascadeReport> {
    let doomed = doomed_messages(conn, Seed::User(user_id))?;
    let mut report = purge_messages(conn, &doomed)?;

    report.notifications += conn.execute("DELETE FROM notifications WHERE user_id = ?1", [user_id])?;
    report.memberships += conn.execute(
        "DELETE FROM conversation_participants WHERE user_id = ?1",
        [user_id],
    )?;
    conn.execute("UPDATE messages SET edited_by = NULL WHERE edited_by = ?1", [user_id])?;

    Ok(report)
}

/// Delete one message together with its reply subtree.
pub fn cascade_message(conn: &Connection, message_id: &str) -> DbResult<CascadeReport> {
    let doomed = doomed_messages(conn, Seed::Message(message_id))?;
    purge_messages(conn, &doomed)
}

/// Seed messages plus all transitive replies, deepest first, so that a reply
/// is always deleted no later than its parent. The walk is keyed on id alone
/// and terminates even if stored parent links form a loop.
fn doomed_messages(conn: &Connection, seed: Seed<'_>) -> DbResult<Vec<String>> {
    let (filter, id) = match seed {
        Seed::User(id) => ("sender_id = ?1 OR receiver_id = ?1", id),
        Seed::Message(id) => ("id = ?1", id),
    };

    let sql = format!(
        "WITH RECURSIVE doomed(id) AS (
             SELECT id FROM messages WHERE {filter}
             UNION
             SELECT m.id FROM messages m JOIN doomed d ON m.parent_id = d.id
         )
         SELECT m.id, m.parent_id FROM messages m WHERE m.id IN (SELECT id FROM doomed)"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let parents: HashMap<&str, &str> = rows
        .iter()
        .filter_map(|(id, parent)| parent.as_deref().map(|p| (id.as_str(), p)))
        .collect();

    let mut ordered: Vec<(usize, &str)> = rows
        .iter()
        .map(|(id, _)| (depth(&parents, id), id.as_str()))
        .collect();
    ordered.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(ordered.into_iter().map(|(_, id)| id.to_string()).collect())
}

/// Number of parent links above `id`, stopping at the first repeat.
fn depth(parents: &HashMap<&str, &str>, id: &str) -> usize {
    let mut seen = HashSet::new();
    let mut current = id;
    while let Some(&parent) = parents.get(current) {
        if !seen.insert(parent) {
            break;
        }
        current = parent;
    }
    seen.len()
}

fn purge_messages(conn: &Connection, ids: &[String]) -> DbResult<CascadeReport> {
    let mut report = CascadeReport::default();

    for chunk in ids.chunks(CHUNK) {
        let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
        let placeholders = placeholders.join(", ");

        report.history += conn.execute(
            &format!("DELETE FROM message_history WHERE message_id IN ({placeholders})"),
            params_from_iter(chunk),
        )?;
        report.notifications += conn.execute(
            &format!("DELETE FROM notifications WHERE message_id IN ({placeholders})"),
            params_from_iter(chunk),
        )?;
        report.messages += conn.execute(
            &format!("DELETE FROM messages WHERE id IN ({placeholders})"),
            params_from_iter(chunk),
        )?;
    }

    Ok(report)
}
