use adlens_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::parse_timestamp;

/// Snapshot of one thread's in-flight orchestration state. Exactly one live
/// checkpoint exists per thread identifier; saves are last-write-wins.
///
/// The `state` payload is opaque JSON owned by the orchestrator, so the
/// storage layer stays independent of the state machine's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub user_id: String,
    pub session_id: String,
    pub state: serde_json::Value,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Short-term memory tier: write-heavy, read-once-per-turn, per-thread.
pub struct CheckpointStore {
    conn: Connection,
}

impl CheckpointStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening checkpoint store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
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
                "CREATE TABLE IF NOT EXISTS checkpoints (
                    thread_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    state TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );",
            )
            .map_err(|e| Error::Database(format!("checkpoint migration failed: {e}")))?;
        Ok(())
    }

    /// Load the live checkpoint for a thread. Absence is a normal case: a
    /// fresh conversation has no checkpoint and callers initialize state.
    pub fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.conn
            .query_row(
                "SELECT thread_id, user_id, session_id, state, updated_at
                 FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
                |row| {
                    let state_raw: String = row.get(3)?;
                    let updated_raw: String = row.get(4)?;
                    Ok(Checkpoint {
                        thread_id: row.get(0)?,
                        user_id: row.get(1)?,
                        session_id: row.get(2)?,
                        state: serde_json::from_str(&state_raw)
                            .unwrap_or(serde_json::Value::Null),
                        updated_at: parse_timestamp(&updated_raw),
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load checkpoint: {e}")))
    }

    /// Overwrite the thread's checkpoint (last-write-wins).
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO checkpoints (thread_id, user_id, session_id, state, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(thread_id) DO UPDATE SET
                   state = excluded.state,
                   updated_at = excluded.updated_at",
                params![
                    checkpoint.thread_id,
                    checkpoint.user_id,
                    checkpoint.session_id,
                    checkpoint.state.to_string(),
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| Error::Database(format!("failed to save checkpoint: {e}")))?;
        Ok(())
    }
}
