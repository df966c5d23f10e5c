//! Model Adapter (SPEC_FULL §4.2): one trait, two backends.
//!
//! The teacher only ever talks to a remote Anthropic endpoint
//! (`ai.rs::call_ai`). SPEC_FULL requires a local-model variant too, so
//! the HTTP/SDK dispatch the teacher already has becomes one
//! implementation of a shared trait rather than the only way to reach a
//! model.

pub mod local;
pub mod remote;

use crate::config::{Config, ModelBackend};
use crate::error::{MemError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: usize,
}

/// A generated response: either free text (legacy XML-tagged output) or
/// a tool call the caller's tolerant JSON parser should take over.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub tool_call: Option<serde_json::Value>,
}

#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn generate_with_tools(&self, req: GenerateRequest) -> Result<GenerateResponse>;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    /// Release any held resources (loaded weights, open connections).
    /// A no-op for the remote adapter; tears down the lazily-loaded
    /// local model for `LocalAdapter`.
    async fn dispose(&self);
}

pub fn build_adapter(config: &Config) -> Box<dyn ModelAdapter> {
    match config.backend {
        ModelBackend::Remote => Box::new(remote::RemoteAdapter::new()),
        ModelBackend::Local => Box::new(local::LocalAdapter::new(config.clone())),
    }
}

pub(crate) fn empty_response_error() -> MemError {
    MemError::model("model returned an empty response")
}
