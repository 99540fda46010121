use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Workspace-wide error type. Components pass these as values across
/// boundaries; only the gateway converts them into user-facing blocks.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    /// Upstream rejected the current credential (HTTP 401/403 equivalent).
    /// The invocation layer recovers from this with one refresh-and-retry;
    /// every other variant propagates immediately.
    #[error("credential rejected by upstream: {0}")]
    AuthRejected(String),

    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),

    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
}

impl Error {
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Error::AuthRejected(_))
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
