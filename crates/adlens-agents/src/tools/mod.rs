use adlens_common::{ResponseBlock, Result};
use async_trait::async_trait;
use tracing::info;

use crate::providers::ToolDefinition;

pub mod accounts;
pub mod image;
pub mod metrics;
pub mod render;

pub use accounts::ListAccounts;
pub use image::{GenerateImage, HttpImageGenerator, ImageGenerator};
pub use metrics::{AdsDataProvider, CampaignMetrics, FetchMetrics, HttpAdsDataProvider};
pub use render::{RenderChart, RenderTable};

/// Execution context injected by the orchestrator. The user id is used for
/// credential resolution only; it never appears in a tool's input schema, so
/// the reasoning engine cannot forge it.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub user_id: String,
}

/// What a tool hands back: `content` is fed to the reasoning engine as the
/// tool result, `blocks` accumulate into the final chat response.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub content: String,
    pub blocks: Vec<ResponseBlock>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            blocks: Vec::new(),
        }
    }

    pub fn with_block(content: impl Into<String>, block: ResponseBlock) -> Self {
        Self {
            content: content.into(),
            blocks: vec![block],
        }
    }
}

/// Trait implemented by every tool exposed to the reasoning engine.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema for the tool's arguments.
    fn input_schema(&self) -> serde_json::Value;

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput>;
}

/// Registry of the tools available to a deployment.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        info!("registered tool: {}", tool.name());
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }
}
