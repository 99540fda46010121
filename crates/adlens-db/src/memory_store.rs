use adlens_common::{Error, Result};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::parse_timestamp;

/// A durable, user-scoped fact or preference that outlives a single session.
/// Unique per (user_id, memory_type, memory_key); writes upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub user_id: String,
    pub memory_type: String,
    pub memory_key: String,
    pub payload: serde_json::Value,
    pub importance: f64,
    pub access_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_accessed_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Insert shape for new memory records before persistence assigns timestamps.
#[derive(Debug, Clone)]
pub struct NewMemoryEntry {
    pub user_id: String,
    pub memory_type: String,
    pub memory_key: String,
    pub payload: serde_json::Value,
    pub importance: f64,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Long-term memory tier: read-mostly on the hot path, written by the
/// post-turn consolidation pass, cleaned by a periodic sweep.
pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening memory store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open memory database: {e}")))?;

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
                "CREATE TABLE IF NOT EXISTS memory_entries (
                    user_id TEXT NOT NULL,
                    memory_type TEXT NOT NULL,
                    memory_key TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    importance REAL NOT NULL,
                    access_count INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    last_accessed_at TEXT NOT NULL,
                    expires_at TEXT,
                    PRIMARY KEY (user_id, memory_type, memory_key)
                );

                CREATE INDEX IF NOT EXISTS idx_memory_user
                    ON memory_entries(user_id);",
            )
            .map_err(|e| Error::Database(format!("memory migration failed: {e}")))?;
        Ok(())
    }

    /// Insert or update an entry. Updates keep the original created_at and
    /// access_count; payload, importance, and expiry are replaced.
    pub fn upsert(&self, entry: NewMemoryEntry) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO memory_entries
                    (user_id, memory_type, memory_key, payload, importance,
                     created_at, last_accessed_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)
                 ON CONFLICT(user_id, memory_type, memory_key) DO UPDATE SET
                   payload = excluded.payload,
                   importance = excluded.importance,
                   last_accessed_at = excluded.last_accessed_at,
                   expires_at = excluded.expires_at",
                params![
                    entry.user_id,
                    entry.memory_type,
                    entry.memory_key,
                    entry.payload.to_string(),
                    entry.importance.clamp(0.0, 1.0),
                    now,
                    entry.expires_at.map(|dt| dt.to_rfc3339()),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to upsert memory entry: {e}")))?;
        Ok(())
    }

    /// Best-effort relevance ranking for a query: keyword overlap weighted by
    /// importance and an exponential recency decay with the given half-life.
    /// Entries with no token overlap are excluded entirely.
    pub fn relevant(
        &self,
        user_id: &str,
        query_text: &str,
        limit: usize,
        half_life_hours: f64,
    ) -> Result<Vec<MemoryEntry>> {
        let query_tokens = tokenize(query_text);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.load_user_entries(user_id)?;
        let now = chrono::Utc::now();

        let mut scored: Vec<(f64, MemoryEntry)> = entries
            .into_iter()
            .filter_map(|entry| {
                let haystack = format!("{} {}", entry.memory_key, entry.payload);
                let overlap = query_tokens
                    .intersection(&tokenize(&haystack))
                    .count() as f64;
                if overlap == 0.0 {
                    return None;
                }
                let age_hours = (now - entry.last_accessed_at).num_seconds() as f64 / 3600.0;
                let decay = 0.5_f64.powf(age_hours.max(0.0) / half_life_hours);
                Some((overlap * entry.importance * decay, entry))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Bump access statistics for an entry that was served into context.
    pub fn touch(&self, user_id: &str, memory_type: &str, memory_key: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE memory_entries
                 SET access_count = access_count + 1,
                     last_accessed_at = ?4
                 WHERE user_id = ?1 AND memory_type = ?2 AND memory_key = ?3",
                params![
                    user_id,
                    memory_type,
                    memory_key,
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| Error::Database(format!("failed to touch memory entry: {e}")))?;
        Ok(())
    }

    /// Delete entries past expiry or below the retention floor.
    /// Returns the number of deleted rows. Runs on a timer, never inline
    /// with request handling.
    pub fn sweep(&self, retention_floor: f64) -> Result<usize> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM memory_entries
                 WHERE (expires_at IS NOT NULL AND expires_at < ?1)
                    OR importance < ?2",
                params![chrono::Utc::now().to_rfc3339(), retention_floor],
            )
            .map_err(|e| Error::Database(format!("memory sweep failed: {e}")))?;
        if deleted > 0 {
            debug!("memory sweep removed {deleted} entries");
        }
        Ok(deleted)
    }

    fn load_user_entries(&self, user_id: &str) -> Result<Vec<MemoryEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user_id, memory_type, memory_key, payload, importance,
                        access_count, created_at, last_accessed_at, expires_at
                 FROM memory_entries WHERE user_id = ?1",
            )
            .map_err(|e| Error::Database(format!("failed to prepare memory query: {e}")))?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                let payload_raw: String = row.get(3)?;
                let created_raw: String = row.get(6)?;
                let accessed_raw: String = row.get(7)?;
                let expires_raw: Option<String> = row.get(8)?;
                Ok(MemoryEntry {
                    user_id: row.get(0)?,
                    memory_type: row.get(1)?,
                    memory_key: row.get(2)?,
                    payload: serde_json::from_str(&payload_raw)
                        .unwrap_or(serde_json::Value::Null),
                    importance: row.get(4)?,
                    access_count: row.get(5)?,
                    created_at: parse_timestamp(&created_raw),
                    last_accessed_at: parse_timestamp(&accessed_raw),
                    expires_at: expires_raw.map(|raw| parse_timestamp(&raw)),
                })
            })
            .map_err(|e| Error::Database(format!("failed to load memory entries: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries
                .push(row.map_err(|e| Error::Database(format!("failed to read memory row: {e}")))?);
        }
        Ok(entries)
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|token| token.len() > 1)
        .collect()
}
