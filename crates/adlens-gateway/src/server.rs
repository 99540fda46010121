use std::time::Duration;

use adlens_common::{Error, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::router::build_router;
use crate::state::SharedState;

/// Owns the listening socket and the background maintenance timer.
pub struct GatewayServer {
    state: SharedState,
}

impl GatewayServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    pub async fn run(self) -> Result<()> {
        spawn_maintenance(self.state.clone());

        let bind = self.state.config.gateway.bind.clone();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| Error::Config(format!("failed to bind '{bind}': {e}")))?;
        info!("gateway listening on {bind}");

        axum::serve(listener, build_router(self.state))
            .await
            .map_err(|e| Error::Agent(format!("server error: {e}")))
    }
}

/// Periodic maintenance: expired or below-floor long-term memory entries are
/// dropped and idle sessions archived. Runs off the request path; each store
/// lock is held only for its own pass.
fn spawn_maintenance(state: SharedState) {
    let interval = Duration::from_secs(state.config.memory.sweep_interval_secs);
    let floor = state.config.memory.retention_floor;
    let idle_hours = state.config.memory.session_idle_hours;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would sweep at startup for no reason
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let swept = {
                let memory = state.memory.lock().await;
                memory.sweep(floor)
            };
            match swept {
                Ok(0) => debug!("memory sweep: nothing to remove"),
                Ok(n) => info!("memory sweep removed {n} entries"),
                Err(e) => warn!("memory sweep failed: {e}"),
            }

            let archived = {
                let sessions = state.sessions.lock().await;
                sessions.archive_idle_sessions(idle_hours)
            };
            match archived {
                Ok(0) => debug!("session sweep: nothing idle"),
                Ok(n) => info!("archived {n} idle sessions"),
                Err(e) => warn!("session archiving failed: {e}"),
            }
        }
    });
}
