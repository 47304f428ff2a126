//! Request/response types for the AI Gateway.

use serde::{Deserialize, Serialize};

/// Request priority. `Critical` bypasses budget limits entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRequest {
    #[serde(rename = "type")]
    pub request_type: String,
    pub prompt: String,
    #[serde(default)]
    pub context: serde_json::Value,
    pub priority: Priority,
    pub max_tokens: u32,
    #[serde(default)]
    pub screenshot: Option<Vec<u8>>,
}

impl AiRequest {
    pub fn new(request_type: impl Into<String>, prompt: impl Into<String>, priority: Priority, max_tokens: u32) -> Self {
        Self {
            request_type: request_type.into(),
            prompt: prompt.into(),
            context: serde_json::Value::Null,
            priority,
            max_tokens,
            screenshot: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub success: bool,
    pub content: String,
    pub tokens_used: u32,
    pub cached: bool,
    pub latency_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl AiResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            tokens_used: 0,
            cached: false,
            latency_ms: 0,
            error: Some(error.into()),
        }
    }

    pub fn cached_hit(content: String) -> Self {
        Self {
            success: true,
            content,
            tokens_used: 0,
            cached: true,
            latency_ms: 0,
            error: None,
        }
    }
}
