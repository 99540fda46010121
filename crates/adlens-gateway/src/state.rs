use std::sync::Arc;

use adlens_agents::{Orchestrator, ReasoningEngine};
use adlens_auth::KeyedLocks;
use adlens_config::AppConfig;
use adlens_db::{MemoryStore, SessionStore};
use tokio::sync::Mutex;

pub type SharedState = Arc<AppState>;

/// Everything the HTTP handlers need. Stores sit behind async mutexes since
/// the SQLite connections are not `Sync`.
pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub reasoner: Arc<dyn ReasoningEngine>,
    pub sessions: Arc<Mutex<SessionStore>>,
    pub memory: Arc<Mutex<MemoryStore>>,
    /// One lock per thread id: a new turn for a thread waits for the prior
    /// turn's final checkpoint save. Entries evict when the turn completes.
    pub turn_locks: KeyedLocks,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        orchestrator: Arc<Orchestrator>,
        reasoner: Arc<dyn ReasoningEngine>,
        sessions: Arc<Mutex<SessionStore>>,
        memory: Arc<Mutex<MemoryStore>>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            reasoner,
            sessions,
            memory,
            turn_locks: KeyedLocks::new(),
        }
    }
}
