pub mod checkpoint_store;
pub mod credential_store;
pub mod memory_store;
pub mod pattern_store;
pub mod session_store;

pub use checkpoint_store::{Checkpoint, CheckpointStore};
pub use credential_store::{CredentialRecord, CredentialStore};
pub use memory_store::{MemoryEntry, MemoryStore, NewMemoryEntry};
pub use pattern_store::{PatternStore, ResponsePattern};
pub use session_store::{SessionRecord, SessionStore, StoredMessage};

pub(crate) fn parse_timestamp(value: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            tracing::warn!("failed to parse timestamp '{value}': {e}, falling back to now");
            chrono::Utc::now()
        })
}
