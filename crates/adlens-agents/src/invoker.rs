use adlens_auth::CredentialService;
use adlens_common::{Error, ToolCall};
use std::sync::Arc;
use tracing::{info, warn};

use crate::tools::{ToolContext, ToolOutput, ToolRegistry};

/// Result of one tool invocation, always a value. Failures carry the typed
/// error instead of unwinding through the orchestrator.
#[derive(Debug)]
pub enum InvocationOutcome {
    Ok(ToolOutput),
    Failed(InvocationFailure),
}

#[derive(Debug)]
pub struct InvocationFailure {
    pub tool: String,
    pub error: Error,
    /// True when a refresh-and-retry was attempted before giving up.
    pub retried: bool,
}

impl InvocationFailure {
    /// Short description safe to feed back to the reasoning engine.
    pub fn summary(&self) -> String {
        format!("tool '{}' failed: {}", self.tool, self.error)
    }
}

/// Executes tool calls with auth recovery: a rejection triggers exactly one
/// single-flight credential refresh followed by exactly one retry. Every
/// other failure propagates as a typed outcome immediately.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    credentials: Arc<CredentialService>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, credentials: Arc<CredentialService>) -> Self {
        Self {
            registry,
            credentials,
        }
    }

    pub async fn invoke(&self, context: &ToolContext, call: &ToolCall) -> InvocationOutcome {
        let Some(tool) = self.registry.find(&call.name) else {
            return InvocationOutcome::Failed(InvocationFailure {
                tool: call.name.clone(),
                error: Error::tool(&call.name, "unknown tool"),
                retried: false,
            });
        };

        // Sampled before execution: if the call comes back with an auth
        // rejection, the refresh guard must compare against the credential
        // this call actually presented, not one refreshed concurrently while
        // the rejection was in flight.
        let presented = self.credentials.access_token(&context.user_id).await.ok();

        let first = tool.execute(context, call.arguments.clone()).await;
        let error = match first {
            Ok(output) => return InvocationOutcome::Ok(output),
            Err(e) if e.is_auth_rejection() => e,
            Err(e) => {
                return InvocationOutcome::Failed(InvocationFailure {
                    tool: call.name.clone(),
                    error: e,
                    retried: false,
                });
            }
        };

        info!(
            "tool '{}' hit an auth rejection, refreshing credential for retry",
            call.name
        );

        let Some(stale) = presented else {
            // No credential to refresh; surface the rejection as-is.
            return InvocationOutcome::Failed(InvocationFailure {
                tool: call.name.clone(),
                error,
                retried: false,
            });
        };

        if let Err(refresh_err) = self
            .credentials
            .refresh_access(&context.user_id, &stale)
            .await
        {
            warn!("credential refresh failed: {refresh_err}");
            return InvocationOutcome::Failed(InvocationFailure {
                tool: call.name.clone(),
                error: refresh_err,
                retried: false,
            });
        }

        // One retry, regardless of how it ends.
        match tool.execute(context, call.arguments.clone()).await {
            Ok(output) => InvocationOutcome::Ok(output),
            Err(e) => {
                warn!("tool '{}' failed again after refresh: {e}", call.name);
                InvocationOutcome::Failed(InvocationFailure {
                    tool: call.name.clone(),
                    error: if e.is_auth_rejection() { error } else { e },
                    retried: true,
                })
            }
        }
    }
}
