use adlens_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::info;

use crate::parse_timestamp;

/// A conversation session row. Sessions are archived, never deleted.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub account_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub active: bool,
}

/// Persisted transcript row loaded from the session store.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Persistent storage for conversation sessions and transcript history.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening session store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    account_id TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    active INTEGER NOT NULL DEFAULT 1
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_user
                    ON sessions(user_id, active);

                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    session_id TEXT NOT NULL REFERENCES sessions(id),
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_session
                    ON messages(session_id, created_at);",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create a session on first contact or bump its last-activity time.
    pub fn upsert_session(&self, session_id: &str, user_id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (id, user_id)
                 VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET
                   updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                   active = 1",
                params![session_id, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to upsert session: {e}")))?;
        Ok(())
    }

    /// Record the account the session is primarily working against.
    pub fn set_session_account(&self, session_id: &str, account_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sessions SET account_id = ?2,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![session_id, account_id],
            )
            .map_err(|e| Error::Database(format!("failed to set session account: {e}")))?;
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.conn
            .query_row(
                "SELECT id, user_id, account_id, created_at, updated_at, active
                 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    let created_raw: String = row.get(3)?;
                    let updated_raw: String = row.get(4)?;
                    Ok(SessionRecord {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        account_id: row.get(2)?,
                        created_at: parse_timestamp(&created_raw),
                        updated_at: parse_timestamp(&updated_raw),
                        active: row.get::<_, i64>(5)? != 0,
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load session: {e}")))
    }

    /// Mark a session inactive. The row and its transcript are retained.
    pub fn archive_session(&self, session_id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE sessions SET active = 0 WHERE id = ?1 AND active = 1",
                params![session_id],
            )
            .map_err(|e| Error::Database(format!("failed to archive session: {e}")))?;
        Ok(rows > 0)
    }

    /// Archive every active session with no activity for `idle_hours`.
    /// Returns the number archived. Runs from the maintenance sweep, never
    /// inline with request handling.
    pub fn archive_idle_sessions(&self, idle_hours: i64) -> Result<usize> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(idle_hours))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id FROM sessions
                 WHERE active = 1 AND julianday(updated_at) < julianday(?1)",
            )
            .map_err(|e| Error::Database(format!("failed to prepare idle query: {e}")))?;

        let rows = stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to list idle sessions: {e}")))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(|e| Error::Database(format!("failed to read session id: {e}")))?);
        }

        let mut archived = 0;
        for id in &ids {
            if self.archive_session(id)? {
                archived += 1;
            }
        }
        Ok(archived)
    }

    /// Append a single transcript message to a session.
    pub fn append_message(&self, session_id: &str, role: &str, content: &str) -> Result<()> {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO messages (id, session_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message_id,
                    session_id,
                    role,
                    content,
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| Error::Database(format!("failed to append message: {e}")))?;
        Ok(())
    }

    /// Load recent messages for a session in chronological order.
    pub fn load_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT role, content, created_at
                 FROM messages
                 WHERE session_id = ?1
                 ORDER BY rowid DESC
                 LIMIT ?2",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![session_id, limit as i64], |row| {
                let created_raw: String = row.get(2)?;
                Ok(StoredMessage {
                    role: row.get(0)?,
                    content: row.get(1)?,
                    created_at: parse_timestamp(&created_raw),
                })
            })
            .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(
                row.map_err(|e| Error::Database(format!("failed to read message row: {e}")))?,
            );
        }

        // Query is DESC for efficient tail fetch; return in chronological order.
        messages.reverse();
        Ok(messages)
    }

    /// Delete all but the most recent `keep` messages for a session.
    /// Returns the number of deleted rows.
    pub fn prune_old_messages(&self, session_id: &str, keep: usize) -> Result<usize> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM messages WHERE session_id = ?1 AND rowid NOT IN (
                    SELECT rowid FROM messages WHERE session_id = ?1
                    ORDER BY rowid DESC LIMIT ?2
                )",
                params![session_id, keep as i64],
            )
            .map_err(|e| Error::Database(format!("failed to prune old messages: {e}")))?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionStore;

    #[test]
    fn upsert_and_load_recent_messages_round_trip() {
        let store = SessionStore::in_memory().expect("in-memory store should open");
        let session_id = "session-1";

        store
            .upsert_session(session_id, "user-1")
            .expect("session upsert should succeed");

        store
            .append_message(session_id, "user", "hello")
            .expect("user message append should succeed");
        store
            .append_message(session_id, "assistant", "hi there")
            .expect("assistant message append should succeed");

        let messages = store
            .load_recent_messages(session_id, 10)
            .expect("message load should succeed");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].content, "hi there");
    }

    #[test]
    fn upsert_is_idempotent_and_reactivates() {
        let store = SessionStore::in_memory().expect("in-memory store should open");
        store.upsert_session("s1", "u1").unwrap();
        assert!(store.archive_session("s1").unwrap());

        let archived = store.load_session("s1").unwrap().expect("session exists");
        assert!(!archived.active);

        // Re-contact reactivates the same row
        store.upsert_session("s1", "u1").unwrap();
        let active = store.load_session("s1").unwrap().expect("session exists");
        assert!(active.active);
        assert_eq!(active.user_id, "u1");
    }

    #[test]
    fn archive_session_is_not_a_delete() {
        let store = SessionStore::in_memory().expect("in-memory store should open");
        store.upsert_session("s1", "u1").unwrap();
        store.append_message("s1", "user", "kept").unwrap();

        store.archive_session("s1").unwrap();

        assert!(store.load_session("s1").unwrap().is_some());
        assert_eq!(store.load_recent_messages("s1", 10).unwrap().len(), 1);
        // Archiving twice reports nothing changed
        assert!(!store.archive_session("s1").unwrap());
    }

    #[test]
    fn archive_idle_sessions_skips_recently_active() {
        let store = SessionStore::in_memory().expect("in-memory store should open");
        store.upsert_session("stale", "u1").unwrap();
        store.upsert_session("fresh", "u1").unwrap();

        let old = (chrono::Utc::now() - chrono::Duration::hours(100))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        store
            .conn
            .execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = 'stale'",
                rusqlite::params![old],
            )
            .expect("backdate session");

        let archived = store.archive_idle_sessions(72).expect("archive sweep");
        assert_eq!(archived, 1);

        assert!(!store.load_session("stale").unwrap().unwrap().active);
        assert!(store.load_session("fresh").unwrap().unwrap().active);
    }

    #[test]
    fn set_session_account_round_trip() {
        let store = SessionStore::in_memory().expect("in-memory store should open");
        store.upsert_session("s1", "u1").unwrap();
        store.set_session_account("s1", "acct-42").unwrap();

        let session = store.load_session("s1").unwrap().expect("session exists");
        assert_eq!(session.account_id.as_deref(), Some("acct-42"));
    }

    #[test]
    fn prune_old_messages_keeps_recent() {
        let store = SessionStore::in_memory().expect("in-memory store should open");
        store.upsert_session("s1", "u1").unwrap();

        for i in 0..10 {
            store
                .append_message("s1", "user", &format!("msg-{i}"))
                .unwrap();
        }

        let deleted = store.prune_old_messages("s1", 3).expect("prune");
        assert_eq!(deleted, 7);

        let remaining = store.load_recent_messages("s1", 100).unwrap();
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[0].content, "msg-7");
        assert_eq!(remaining[2].content, "msg-9");
    }
}
