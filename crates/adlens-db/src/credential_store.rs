use adlens_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::{info, warn};

use crate::parse_timestamp;

/// One upstream credential row. A refresh supersedes the active row rather
/// than mutating it, so the history of issued tokens is auditable.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: String,
    pub account_ids: Vec<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_count: i64,
    pub active: bool,
}

/// Durable tier of the credential cache: authoritative, no TTL.
pub struct CredentialStore {
    conn: Connection,
}

impl CredentialStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening credential store at {}", db_path.display());
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
                "CREATE TABLE IF NOT EXISTS credential_records (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    provider TEXT NOT NULL,
                    access_token TEXT NOT NULL,
                    refresh_token TEXT NOT NULL,
                    account_ids TEXT NOT NULL DEFAULT '[]',
                    expires_at TEXT,
                    error_count INTEGER NOT NULL DEFAULT 0,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_credentials_active
                    ON credential_records(user_id, provider) WHERE active = 1;",
            )
            .map_err(|e| Error::Database(format!("credential migration failed: {e}")))?;
        Ok(())
    }

    /// Load the single active record for (user, provider), if any.
    pub fn active_record(&self, user_id: &str, provider: &str) -> Result<Option<CredentialRecord>> {
        self.conn
            .query_row(
                "SELECT id, user_id, provider, access_token, refresh_token,
                        account_ids, expires_at, error_count, active
                 FROM credential_records
                 WHERE user_id = ?1 AND provider = ?2 AND active = 1",
                params![user_id, provider],
                |row| {
                    let ids_raw: String = row.get(5)?;
                    let expires_raw: Option<String> = row.get(6)?;
                    Ok(CredentialRecord {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        provider: row.get(2)?,
                        access_token: row.get(3)?,
                        refresh_token: row.get(4)?,
                        account_ids: serde_json::from_str(&ids_raw).unwrap_or_default(),
                        expires_at: expires_raw.map(|raw| parse_timestamp(&raw)),
                        error_count: row.get(7)?,
                        active: row.get::<_, i64>(8)? != 0,
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load credential: {e}")))
    }

    /// Store the first credential for (user, provider), replacing any
    /// previously active record.
    pub fn insert_credential(
        &self,
        user_id: &str,
        provider: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<String> {
        self.deactivate(user_id, provider)?;

        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO credential_records
                    (id, user_id, provider, access_token, refresh_token, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    user_id,
                    provider,
                    access_token,
                    refresh_token,
                    expires_at.map(|dt| dt.to_rfc3339())
                ],
            )
            .map_err(|e| Error::Database(format!("failed to insert credential: {e}")))?;
        Ok(id)
    }

    /// Replace the active record with a refreshed one, carrying forward the
    /// refresh token and known account ids. The old row is deactivated, not
    /// deleted.
    pub fn supersede(
        &self,
        user_id: &str,
        provider: &str,
        new_access_token: &str,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<CredentialRecord> {
        let current = self.active_record(user_id, provider)?.ok_or_else(|| {
            Error::Database(format!(
                "no active credential for user '{user_id}' provider '{provider}'"
            ))
        })?;

        self.deactivate(user_id, provider)?;

        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO credential_records
                    (id, user_id, provider, access_token, refresh_token,
                     account_ids, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    user_id,
                    provider,
                    new_access_token,
                    current.refresh_token,
                    serde_json::to_string(&current.account_ids).unwrap_or_else(|_| "[]".into()),
                    expires_at.map(|dt| dt.to_rfc3339())
                ],
            )
            .map_err(|e| Error::Database(format!("failed to supersede credential: {e}")))?;

        self.active_record(user_id, provider)?
            .ok_or_else(|| Error::Database("superseded credential vanished".to_string()))
    }

    /// Merge newly discovered account ids into the active record. Union
    /// semantics: a partial upstream response never regresses known ids.
    /// Returns the merged set.
    pub fn merge_account_ids(
        &self,
        user_id: &str,
        provider: &str,
        new_ids: &[String],
    ) -> Result<Vec<String>> {
        let current = self.active_record(user_id, provider)?.ok_or_else(|| {
            Error::Database(format!(
                "no active credential for user '{user_id}' provider '{provider}'"
            ))
        })?;

        let mut merged = current.account_ids;
        for id in new_ids {
            if !merged.contains(id) {
                merged.push(id.clone());
            }
        }

        self.conn
            .execute(
                "UPDATE credential_records SET account_ids = ?3
                 WHERE user_id = ?1 AND provider = ?2 AND active = 1",
                params![
                    user_id,
                    provider,
                    serde_json::to_string(&merged).unwrap_or_else(|_| "[]".into())
                ],
            )
            .map_err(|e| Error::Database(format!("failed to merge account ids: {e}")))?;
        Ok(merged)
    }

    /// Count a failure against the active record; deactivate it once the
    /// ceiling is reached. Returns true if the record was deactivated.
    pub fn record_failure(&self, user_id: &str, provider: &str, max_failures: i64) -> Result<bool> {
        self.conn
            .execute(
                "UPDATE credential_records SET error_count = error_count + 1
                 WHERE user_id = ?1 AND provider = ?2 AND active = 1",
                params![user_id, provider],
            )
            .map_err(|e| Error::Database(format!("failed to record credential failure: {e}")))?;

        let errors: Option<i64> = self
            .conn
            .query_row(
                "SELECT error_count FROM credential_records
                 WHERE user_id = ?1 AND provider = ?2 AND active = 1",
                params![user_id, provider],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to read error count: {e}")))?;

        match errors {
            Some(count) if count >= max_failures => {
                warn!(
                    "deactivating credential for user '{user_id}' after {count} failures"
                );
                self.deactivate(user_id, provider)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn deactivate(&self, user_id: &str, provider: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE credential_records SET active = 0
                 WHERE user_id = ?1 AND provider = ?2 AND active = 1",
                params![user_id, provider],
            )
            .map_err(|e| Error::Database(format!("failed to deactivate credential: {e}")))?;
        Ok(())
    }
}
