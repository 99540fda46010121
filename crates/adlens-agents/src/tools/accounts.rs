use adlens_auth::CredentialService;
use adlens_common::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::tools::{Tool, ToolContext, ToolOutput};

/// Lists the ad accounts the current user can query. Account resolution goes
/// through the tiered credential cache, so repeated calls within a turn are
/// cheap.
pub struct ListAccounts {
    credentials: Arc<CredentialService>,
}

impl ListAccounts {
    pub fn new(credentials: Arc<CredentialService>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Tool for ListAccounts {
    fn name(&self) -> &'static str {
        "list_accounts"
    }

    fn description(&self) -> &'static str {
        "List the advertising accounts the user has access to. Call this first \
         when you need an account id for other tools and the user has not \
         named one."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, context: &ToolContext, _args: serde_json::Value) -> Result<ToolOutput> {
        let accounts = self.credentials.resolve_accounts(&context.user_id).await?;
        Ok(ToolOutput::text(
            json!({ "accounts": accounts }).to_string(),
        ))
    }
}
