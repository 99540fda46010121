use adlens_auth::CredentialService;
use adlens_common::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::tools::{Tool, ToolContext, ToolOutput};

/// One campaign's performance over the requested window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub campaign_id: String,
    pub campaign_name: String,
    pub impressions: u64,
    pub clicks: u64,
    pub cost: f64,
    pub conversions: u64,
}

/// Capability trait for the upstream ads platform's reporting API.
#[async_trait]
pub trait AdsDataProvider: Send + Sync {
    async fn campaign_metrics(
        &self,
        access_token: &str,
        account_id: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<CampaignMetrics>>;
}

/// HTTP implementation against a vendor-agnostic base URL.
pub struct HttpAdsDataProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAdsDataProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[derive(Deserialize)]
struct MetricsResponse {
    campaigns: Vec<CampaignMetrics>,
}

#[async_trait]
impl AdsDataProvider for HttpAdsDataProvider {
    async fn campaign_metrics(
        &self,
        access_token: &str,
        account_id: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<CampaignMetrics>> {
        let url = format!("{}/accounts/{}/metrics", self.base_url, account_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("start_date", start_date), ("end_date", end_date)])
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: 0,
                message: format!("metrics request failed: {e}"),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::AuthRejected(format!(
                "metrics request rejected with {status}"
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: MetricsResponse = resp.json().await.map_err(|e| Error::Upstream {
            status: status.as_u16(),
            message: format!("failed to parse metrics response: {e}"),
        })?;

        Ok(parsed.campaigns)
    }
}

/// Fetches campaign performance for an account over a date window.
pub struct FetchMetrics {
    provider: Arc<dyn AdsDataProvider>,
    credentials: Arc<CredentialService>,
}

impl FetchMetrics {
    pub fn new(provider: Arc<dyn AdsDataProvider>, credentials: Arc<CredentialService>) -> Self {
        Self {
            provider,
            credentials,
        }
    }
}

#[async_trait]
impl Tool for FetchMetrics {
    fn name(&self) -> &'static str {
        "fetch_metrics"
    }

    fn description(&self) -> &'static str {
        "Fetch campaign performance metrics (impressions, clicks, cost, \
         conversions) for one advertising account over a date range."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "account_id": {
                    "type": "string",
                    "description": "Advertising account id to query."
                },
                "start_date": {
                    "type": "string",
                    "description": "Window start, YYYY-MM-DD."
                },
                "end_date": {
                    "type": "string",
                    "description": "Window end (inclusive), YYYY-MM-DD."
                }
            },
            "required": ["account_id", "start_date", "end_date"]
        })
    }

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let account_id = args["account_id"]
            .as_str()
            .ok_or_else(|| Error::tool(self.name(), "missing 'account_id' argument"))?;
        let start_date = args["start_date"]
            .as_str()
            .ok_or_else(|| Error::tool(self.name(), "missing 'start_date' argument"))?;
        let end_date = args["end_date"]
            .as_str()
            .ok_or_else(|| Error::tool(self.name(), "missing 'end_date' argument"))?;

        for date in [start_date, end_date] {
            chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|_| Error::tool(self.name(), format!("invalid date '{date}'")))?;
        }

        let token = self.credentials.access_token(&context.user_id).await?;
        let campaigns = self
            .provider
            .campaign_metrics(&token, account_id, start_date, end_date)
            .await?;

        Ok(ToolOutput::text(
            json!({ "account_id": account_id, "campaigns": campaigns }).to_string(),
        ))
    }
}
