//! Text-generation provider adapter: an abstract
//! capability interface with at least two interchangeable
//! implementations, so the gateway never depends on one vendor's wire
//! format.

use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::time::Duration;

/// What a provider call returns on success.
pub struct ProviderOutput {
    pub content: String,
    pub tokens_used: u32,
}

/// `call(prompt, maxTokens, imageBytes?) -> {content, tokens} | error`.
#[async_trait]
pub trait TextGenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, prompt: &str, max_tokens: u32, image: Option<&[u8]>) -> Result<ProviderOutput>;

    /// Request timeout: 30s for remote providers, 60s for local ones.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Builds a `reqwest::Client` defensively: some sandboxed environments
/// panic inside proxy auto-detection, so fall back to an explicit
/// no-proxy client rather than letting provider construction fail.
fn build_http_client(timeout: Duration) -> reqwest::Client {
    let built = std::panic::catch_unwind(|| {
        reqwest::Client::builder().timeout(timeout).build()
    });
    match built {
        Ok(Ok(client)) => client,
        _ => reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .expect("no-proxy client builds unconditionally"),
    }
}

/// First-party hosted provider, reached over HTTPS.
pub struct HostedProvider {
    name: String,
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HostedProvider {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let timeout = Duration::from_secs(30);
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: build_http_client(timeout),
        }
    }
}

#[async_trait]
impl TextGenerationProvider for HostedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, prompt: &str, max_tokens: u32, image: Option<&[u8]>) -> Result<ProviderOutput> {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(bytes) = image {
            body["messages"][0]["image"] = serde_json::json!(BASE64.encode(bytes));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| Error::provider_error(&self.name, err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::provider_error(&self.name, format!("http {status}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|err| Error::provider_error(&self.name, err.to_string()))?;

        let content = payload["content"][0]["text"]
            .as_str()
            .or_else(|| payload["choices"][0]["message"]["content"].as_str())
            .unwrap_or_default()
            .to_string();
        let tokens_used = payload["usage"]["output_tokens"]
            .as_u64()
            .or_else(|| payload["usage"]["total_tokens"].as_u64())
            .unwrap_or(0) as u32;

        Ok(ProviderOutput { content, tokens_used })
    }
}

/// A locally hosted provider (e.g. an on-box inference server). Same
/// wire shape as [`HostedProvider`] but with a longer timeout since local
/// models are typically slower per-token.
pub struct LocalProvider {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl LocalProvider {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        let timeout = Duration::from_secs(60);
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            client: build_http_client(timeout),
        }
    }
}

#[async_trait]
impl TextGenerationProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn call(&self, prompt: &str, max_tokens: u32, _image: Option<&[u8]>) -> Result<ProviderOutput> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": max_tokens,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| Error::provider_error("local", err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::provider_error("local", format!("http {status}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|err| Error::provider_error("local", err.to_string()))?;

        let content = payload["completion"].as_str().unwrap_or_default().to_string();
        let tokens_used = payload["tokens_used"].as_u64().unwrap_or(0) as u32;
        Ok(ProviderOutput { content, tokens_used })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_provider_uses_a_60s_timeout() {
        let provider = LocalProvider::new("http://localhost:1234", "local-model");
        assert_eq!(provider.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn hosted_provider_uses_a_30s_timeout() {
        let provider = HostedProvider::new("hosted", "https://api.example.com", "key", "model-1");
        assert_eq!(provider.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn screenshot_bytes_encode_as_standard_base64() {
        assert_eq!(BASE64.encode(b"man"), "bWFu");
        assert_eq!(BASE64.encode(b"ab"), "YWI=");
    }
}
