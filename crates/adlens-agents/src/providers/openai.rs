use adlens_common::{ChatMessage, ChatRole, Error, Result, ToolCall};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::{ReasoningEngine, ReasoningOutput, ToolDefinition};

/// Reasoning engine speaking the OpenAI-compatible chat-completions wire
/// format. Works against any endpoint that implements it.
pub struct OpenAiReasoner {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiReasoner {
    pub fn new(api_key: String, base_url: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model,
            max_tokens,
        }
    }

    fn convert_messages(&self, messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| match msg.role {
                ChatRole::System => json!({ "role": "system", "content": msg.content }),
                ChatRole::User => json!({ "role": "user", "content": msg.content }),
                ChatRole::Assistant => {
                    if msg.tool_calls.is_empty() {
                        json!({ "role": "assistant", "content": msg.content })
                    } else {
                        json!({
                            "role": "assistant",
                            "content": msg.content,
                            "tool_calls": msg.tool_calls.iter().map(|call| json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })).collect::<Vec<_>>(),
                        })
                    }
                }
                ChatRole::Tool => json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id,
                    "content": msg.content,
                }),
            })
            .collect()
    }

    fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
        let Some(calls) = message["tool_calls"].as_array() else {
            return Vec::new();
        };

        calls
            .iter()
            .filter_map(|call| {
                let id = call["id"].as_str()?.to_string();
                let name = call["function"]["name"].as_str()?.to_string();
                let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments =
                    serde_json::from_str(raw_args).unwrap_or_else(|_| json!({}));
                Some(ToolCall {
                    id,
                    name,
                    arguments,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ReasoningEngine for OpenAiReasoner {
    async fn reason(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ReasoningOutput> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": self.model,
            "messages": self.convert_messages(messages),
            "max_tokens": self.max_tokens,
        });

        if !tools.is_empty() {
            body["tools"] = json!(
                tools
                    .iter()
                    .map(|t| json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    }))
                    .collect::<Vec<_>>()
            );
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("reasoning request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "reasoning endpoint error ({status}): {error_text}"
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("failed to parse reasoning response: {e}")))?;

        let message = &raw["choices"][0]["message"];
        let content = message["content"].as_str().unwrap_or_default().to_string();
        let tool_calls = Self::parse_tool_calls(message);
        debug!(
            "reasoning round: {} chars, {} tool calls",
            content.len(),
            tool_calls.len()
        );

        Ok(ReasoningOutput {
            content,
            tool_calls,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}
