//! Remote model backend: HTTP calls to an Anthropic-compatible API.
//!
//! Lifted almost unchanged from the teacher's `ai.rs`
//! (`ExecutorMode::{Http,Sdk,Composite}`, `CM_EXECUTOR_MODE` dispatch,
//! `reqwest` POST to `/v1/messages`). `embed()` is new — same client,
//! `/v1/embeddings`.

use super::{empty_response_error, ChatMessage, GenerateRequest, GenerateResponse, ModelAdapter};
use crate::error::{MemError, Result};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    Http,
    Sdk,
    Composite,
}

impl ExecutorMode {
    pub fn from_env() -> Self {
        match std::env::var("CM_EXECUTOR_MODE").ok().as_deref() {
            Some("sdk") => Self::Sdk,
            Some("composite") => Self::Composite,
            _ => Self::Http,
        }
    }
}

fn get_api_key() -> Result<String> {
    std::env::var("ANTHROPIC_API_KEY")
        .or_else(|_| std::env::var("ANTHROPIC_AUTH_TOKEN"))
        .map_err(|_| MemError::model("ANTHROPIC_API_KEY or ANTHROPIC_AUTH_TOKEN not set"))
}

fn get_model() -> String {
    std::env::var("CLAUDE_MEM_GEN_MODEL")
        .unwrap_or_else(|_| "claude-sonnet-4-5-20250929".to_string())
}

fn get_embed_model() -> String {
    std::env::var("CLAUDE_MEM_EMBED_MODEL")
        .unwrap_or_else(|_| "voyage-3-lite".to_string())
}

fn get_api_url() -> String {
    std::env::var("ANTHROPIC_BASE_URL")
        .unwrap_or_else(|_| "https://api.anthropic.com".to_string())
}

pub struct RemoteAdapter {
    client: reqwest::Client,
}

impl RemoteAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for RemoteAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelAdapter for RemoteAdapter {
    async fn generate_with_tools(&self, req: GenerateRequest) -> Result<GenerateResponse> {
        match ExecutorMode::from_env() {
            ExecutorMode::Http => self.call_http(&req).await,
            #[cfg(feature = "sdk")]
            ExecutorMode::Sdk => self.call_sdk(&req).await,
            #[cfg(not(feature = "sdk"))]
            ExecutorMode::Sdk => {
                tracing::warn!("SDK mode requested but 'sdk' feature not enabled; falling back to HTTP");
                self.call_http(&req).await
            }
            #[cfg(feature = "sdk")]
            ExecutorMode::Composite => match self.call_sdk(&req).await {
                Ok(resp) => Ok(resp),
                Err(e) => {
                    tracing::warn!("SDK call failed, falling back to HTTP: {e}");
                    self.call_http(&req).await
                }
            },
            #[cfg(not(feature = "sdk"))]
            ExecutorMode::Composite => {
                tracing::warn!("Composite mode requested but 'sdk' feature not enabled; falling back to HTTP");
                self.call_http(&req).await
            }
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let api_key = get_api_key()?;
        let base_url = get_api_url();
        let body = serde_json::json!({
            "model": get_embed_model(),
            "input": [text],
        });

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", base_url.trim_end_matches('/')))
            .header("x-api-key", &api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MemError::model(format!("embedding request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MemError::model(format!("embedding API error {status}: {text}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MemError::model(format!("invalid embedding response: {e}")))?;

        let vec: Vec<f32> = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(empty_response_error)?
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();

        if vec.is_empty() {
            return Err(empty_response_error());
        }
        Ok(vec)
    }

    async fn dispose(&self) {}
}

impl RemoteAdapter {
    async fn call_http(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        let api_key = get_api_key()?;
        let model = get_model();
        let base_url = get_api_url();

        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m: &ChatMessage| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": req.max_tokens,
            "system": [{"type": "text", "text": req.system}],
            "messages": messages,
        });
        if !req.tools.is_empty() {
            body["tools"] = serde_json::to_value(&req.tools).unwrap_or_default();
        }

        let resp = self
            .client
            .post(format!("{}/v1/messages", base_url.trim_end_matches('/')))
            .header("x-api-key", &api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MemError::model(format!("generation request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MemError::model(format!("Anthropic API error {status}: {text}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MemError::model(format!("invalid generation response: {e}")))?;

        let blocks = data["content"].as_array().cloned().unwrap_or_default();
        let mut text = String::new();
        let mut tool_call = None;
        for block in &blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    tool_call = Some(serde_json::json!({
                        "name": block["name"],
                        "input": block["input"],
                    }));
                }
                _ => {}
            }
        }

        Ok(GenerateResponse { text, tool_call })
    }

    #[cfg(feature = "sdk")]
    async fn call_sdk(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        use anthropic_agent_sdk::types::options::ClaudeAgentOptions;
        use futures::StreamExt;

        let model = get_model();
        let timeout: u64 = std::env::var("CM_SDK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120)
            .clamp(5, 600);

        let mut opts = ClaudeAgentOptions::default();
        opts.model = Some(model);
        opts.system_prompt = Some(anthropic_agent_sdk::SystemPrompt::String(req.system.clone()));
        opts.max_turns = Some(1);
        opts.read_timeout_secs = Some(timeout);

        if let Ok(path) = std::env::var("CM_CLAUDE_CODE_PATH") {
            if !path.trim().is_empty() {
                opts.path_to_claude_code_executable = Some(std::path::PathBuf::from(path));
            }
        }

        let user_message = req
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");

        let stream = anthropic_agent_sdk::query::query(&user_message, Some(opts))
            .await
            .map_err(|e| MemError::model(format!("SDK query failed: {e}")))?;

        tokio::pin!(stream);

        let mut text_parts: Vec<String> = Vec::new();

        while let Some(result) = stream.next().await {
            let message = result.map_err(|e| MemError::model(format!("SDK stream error: {e}")))?;

            if let anthropic_agent_sdk::types::messages::Message::Assistant {
                message: content, ..
            } = message
            {
                for block in &content.content {
                    if let anthropic_agent_sdk::types::messages::ContentBlock::Text { text } = block {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            text_parts.push(trimmed.to_string());
                        }
                    }
                }
            }
        }

        let full_text = text_parts.join("\n");
        if full_text.is_empty() {
            return Err(empty_response_error());
        }

        Ok(GenerateResponse {
            text: full_text,
            tool_call: None,
        })
    }
}
