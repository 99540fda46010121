use adlens_common::{Error, ResponseBlock, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::tools::{Tool, ToolContext, ToolOutput};

/// Capability trait for turning a prompt into a hosted image URL.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// HTTP implementation posting to an image-generation endpoint that returns
/// `{ "url": "..." }`.
pub struct HttpImageGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpImageGenerator {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[derive(Deserialize)]
struct ImageResponse {
    url: String,
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/images", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: 0,
                message: format!("image request failed: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: ImageResponse = resp.json().await.map_err(|e| Error::Upstream {
            status: status.as_u16(),
            message: format!("failed to parse image response: {e}"),
        })?;
        Ok(parsed.url)
    }
}

/// Generates an illustrative image for the final response.
pub struct GenerateImage {
    generator: Arc<dyn ImageGenerator>,
}

impl GenerateImage {
    pub fn new(generator: Arc<dyn ImageGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Tool for GenerateImage {
    fn name(&self) -> &'static str {
        "generate_image"
    }

    fn description(&self) -> &'static str {
        "Generate an illustrative image from a short text prompt and embed it \
         in the final answer."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "What the image should depict."
                }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let prompt = args["prompt"]
            .as_str()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::tool(self.name(), "missing 'prompt' argument"))?;

        let url = self.generator.generate(prompt).await?;
        let block = ResponseBlock::Image {
            url,
            alt: prompt.to_string(),
        };
        Ok(ToolOutput::with_block("image generated", block))
    }
}
