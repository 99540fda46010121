use adlens_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// A learned template mapping a trigger fingerprint to a preferred response
/// shape. Unique per (user_id, pattern_type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePattern {
    pub user_id: String,
    pub pattern_type: String,
    pub trigger_fingerprint: String,
    pub response_shape: serde_json::Value,
    pub usage_count: i64,
    pub success_count: i64,
}

impl ResponsePattern {
    pub fn success_rate(&self) -> f64 {
        if self.usage_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.usage_count as f64
    }
}

/// Storage for learned response patterns, updated after each turn.
pub struct PatternStore {
    conn: Connection,
}

impl PatternStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening pattern store at {}", db_path.display());
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
                "CREATE TABLE IF NOT EXISTS response_patterns (
                    user_id TEXT NOT NULL,
                    pattern_type TEXT NOT NULL,
                    trigger_fingerprint TEXT NOT NULL,
                    response_shape TEXT NOT NULL,
                    usage_count INTEGER NOT NULL DEFAULT 0,
                    success_count INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, pattern_type)
                );",
            )
            .map_err(|e| Error::Database(format!("pattern migration failed: {e}")))?;
        Ok(())
    }

    /// Register or refresh a pattern definition without touching its counters.
    pub fn upsert_pattern(
        &self,
        user_id: &str,
        pattern_type: &str,
        trigger_fingerprint: &str,
        response_shape: &serde_json::Value,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO response_patterns
                    (user_id, pattern_type, trigger_fingerprint, response_shape, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, pattern_type) DO UPDATE SET
                   trigger_fingerprint = excluded.trigger_fingerprint,
                   response_shape = excluded.response_shape,
                   updated_at = excluded.updated_at",
                params![
                    user_id,
                    pattern_type,
                    trigger_fingerprint,
                    response_shape.to_string(),
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| Error::Database(format!("failed to upsert pattern: {e}")))?;
        Ok(())
    }

    /// Record one use of a pattern and whether the outcome was successful.
    pub fn record_outcome(&self, user_id: &str, pattern_type: &str, success: bool) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE response_patterns
                 SET usage_count = usage_count + 1,
                     success_count = success_count + ?3,
                     updated_at = ?4
                 WHERE user_id = ?1 AND pattern_type = ?2",
                params![
                    user_id,
                    pattern_type,
                    i64::from(success),
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| Error::Database(format!("failed to record pattern outcome: {e}")))?;

        if rows == 0 {
            return Err(Error::Database(format!(
                "no pattern registered for user '{user_id}' type '{pattern_type}'"
            )));
        }
        Ok(())
    }

    pub fn load(&self, user_id: &str, pattern_type: &str) -> Result<Option<ResponsePattern>> {
        self.conn
            .query_row(
                "SELECT user_id, pattern_type, trigger_fingerprint, response_shape,
                        usage_count, success_count
                 FROM response_patterns
                 WHERE user_id = ?1 AND pattern_type = ?2",
                params![user_id, pattern_type],
                |row| {
                    let shape_raw: String = row.get(3)?;
                    Ok(ResponsePattern {
                        user_id: row.get(0)?,
                        pattern_type: row.get(1)?,
                        trigger_fingerprint: row.get(2)?,
                        response_shape: serde_json::from_str(&shape_raw)
                            .unwrap_or(serde_json::Value::Null),
                        usage_count: row.get(4)?,
                        success_count: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load pattern: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::PatternStore;

    #[test]
    fn upsert_keeps_one_row_per_user_and_type() {
        let store = PatternStore::in_memory().expect("in-memory store should open");
        let shape = serde_json::json!({ "blocks": ["table", "text"] });

        store.upsert_pattern("u1", "metrics_summary", "fetch+table", &shape).unwrap();
        store.upsert_pattern("u1", "metrics_summary", "fetch+table+chart", &shape).unwrap();

        let count: i64 = store
            .conn
            .query_row("SELECT count(*) FROM response_patterns", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);

        let pattern = store
            .load("u1", "metrics_summary")
            .unwrap()
            .expect("pattern exists");
        assert_eq!(pattern.trigger_fingerprint, "fetch+table+chart");
    }

    #[test]
    fn record_outcome_tracks_success_rate() {
        let store = PatternStore::in_memory().expect("in-memory store should open");
        let shape = serde_json::json!({ "blocks": ["chart"] });
        store.upsert_pattern("u1", "trend_report", "trend", &shape).unwrap();

        store.record_outcome("u1", "trend_report", true).unwrap();
        store.record_outcome("u1", "trend_report", true).unwrap();
        store.record_outcome("u1", "trend_report", false).unwrap();

        let pattern = store.load("u1", "trend_report").unwrap().expect("exists");
        assert_eq!(pattern.usage_count, 3);
        assert_eq!(pattern.success_count, 2);
        assert!((pattern.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn record_outcome_on_missing_pattern_errors() {
        let store = PatternStore::in_memory().expect("in-memory store should open");
        assert!(store.record_outcome("u1", "nonexistent", true).is_err());
    }
}
