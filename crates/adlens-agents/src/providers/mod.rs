use adlens_common::{ChatMessage, Result, ToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod openai;
pub use openai::OpenAiReasoner;

/// Adapter trait for the reasoning model behind the orchestrator. The
/// orchestrator never speaks a vendor wire format directly; it hands over a
/// transcript and a tool catalog and gets back text plus requested calls.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn reason(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ReasoningOutput>;

    /// Check if the engine is reachable and configured.
    async fn health_check(&self) -> Result<bool>;
}

/// One reasoning round: free text and zero or more tool calls.
#[derive(Debug, Clone, Default)]
pub struct ReasoningOutput {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ReasoningOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Schema advertised to the reasoning engine for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}
