//! AI Gateway: a controlled, budgeted escape hatch to an
//! external text-generation service. Most requests must be absorbed by
//! the cache or denied by budget; the gateway is provider-agnostic.

pub mod budget;
pub mod cache;
pub mod provider;
pub mod types;

pub use budget::{AiBudget, BudgetLimits};
pub use cache::AiCache;
pub use provider::TextGenerationProvider;
pub use types::{AiRequest, AiResponse, Priority};

use crate::error::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Gateway config: which providers are tried, in order, on a given
/// request. Providers are interchangeable; the first configured wins.
pub struct AiGateway {
    providers: Vec<Arc<dyn TextGenerationProvider>>,
    cache: AiCache,
    budget: AiBudget,
}

impl AiGateway {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        providers: Vec<Arc<dyn TextGenerationProvider>>,
        budget_limits: BudgetLimits,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        let cache = AiCache::new(&data_dir)?;
        let budget = AiBudget::new(&data_dir, budget_limits)?;
        Ok(Self { providers, cache, budget })
    }

    /// Runs the cache -> budget -> provider pipeline for a raw request.
    pub async fn request(&self, request: &AiRequest) -> AiResponse {
        let key = cache::cache_key(&request.request_type, &request.prompt, &request.context);

        if let Some(mut cached) = self.cache.get(&key) {
            cached.cached = true;
            cached.tokens_used = 0;
            return cached;
        }

        if !self.budget.check(request.priority, request.max_tokens) {
            return AiResponse::failure("Budget limit reached");
        }

        let Some(provider) = self.providers.first() else {
            return AiResponse::failure("no AI provider configured");
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            provider.timeout(),
            provider.call(&request.prompt, request.max_tokens, request.screenshot.as_deref()),
        )
        .await;

        let response = match outcome {
            Ok(Ok(output)) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                if let Err(err) = self.budget.deduct(output.tokens_used) {
                    tracing::warn!(error = %err, "failed to persist AI budget after a successful call");
                }
                AiResponse {
                    success: true,
                    content: output.content,
                    tokens_used: output.tokens_used,
                    cached: false,
                    latency_ms,
                    error: None,
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(provider = provider.name(), error = %err, "AI provider call failed");
                AiResponse::failure(err.to_string())
            }
            Err(_) => {
                tracing::warn!(provider = provider.name(), "AI provider call timed out");
                AiResponse::failure("provider timeout")
            }
        };

        if response.success {
            self.cache.put(&key, response.clone());
        }
        response
    }

    /// `FindElement(intent, pageContext, screenshot?)`: expects a bare
    /// CSS selector response.
    pub async fn find_element(&self, intent: &str, page_context: serde_json::Value, screenshot: Option<Vec<u8>>) -> AiResponse {
        let mut request = AiRequest::new(
            "find_element",
            format!("Return a single CSS selector that matches: {intent}. Respond with only the selector."),
            Priority::Normal,
            200,
        )
        .with_context(page_context);
        request.screenshot = screenshot;
        self.request(&request).await
    }

    /// `InterpretStep(stepText, pageContext)`: expects JSON `{action, target, value}`.
    pub async fn interpret_step(&self, step_text: &str, page_context: serde_json::Value) -> AiResponse {
        let request = AiRequest::new(
            "interpret_step",
            format!(
                "Interpret this test step as JSON {{\"action\":...,\"target\":...,\"value\":...}}: {step_text}"
            ),
            Priority::Normal,
            300,
        )
        .with_context(page_context);
        self.request(&request).await
    }

    /// `AnalyzeError(errorMessage, pageContext)`: expects JSON
    /// `{error_type, cause, recovery}`.
    pub async fn analyze_error(&self, error_message: &str, page_context: serde_json::Value) -> AiResponse {
        let request = AiRequest::new(
            "analyze_error",
            format!(
                "Analyze this error as JSON {{\"error_type\":...,\"cause\":...,\"recovery\":...}}: {error_message}"
            ),
            Priority::High,
            300,
        )
        .with_context(page_context);
        self.request(&request).await
    }

    pub fn reset_test_budget(&self) {
        self.budget.reset_test_counter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerationProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn call(&self, prompt: &str, _max_tokens: u32, _image: Option<&[u8]>) -> Result<provider::ProviderOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(provider::ProviderOutput {
                content: format!("echo: {prompt}"),
                tokens_used: 10,
            })
        }
    }

    fn gateway(dir: &std::path::Path, calls: Arc<StubProvider>) -> AiGateway {
        AiGateway::new(dir, vec![calls], BudgetLimits::default()).unwrap()
    }

    #[tokio::test]
    async fn request_caches_successful_responses() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubProvider { calls: AtomicUsize::new(0) });
        let gw = gateway(dir.path(), stub.clone());

        let req = AiRequest::new("find_element", "click submit", Priority::Normal, 100);
        let first = gw.request(&req).await;
        assert!(first.success);
        assert!(!first.cached);

        let second = gw.request(&req).await;
        assert!(second.cached);
        assert_eq!(second.tokens_used, 0);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_denied_when_budget_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubProvider { calls: AtomicUsize::new(0) });
        let limits = BudgetLimits {
            daily_tokens: 5,
            hourly_tokens: 5,
            per_test_tokens: 5,
        };
        let gw = AiGateway::new(dir.path(), vec![stub], limits).unwrap();

        let req = AiRequest::new("find_element", "click submit", Priority::Normal, 10);
        let response = gw.request(&req).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Budget limit reached"));
    }

    #[tokio::test]
    async fn critical_priority_bypasses_budget_denial() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubProvider { calls: AtomicUsize::new(0) });
        let limits = BudgetLimits {
            daily_tokens: 5,
            hourly_tokens: 5,
            per_test_tokens: 5,
        };
        let gw = AiGateway::new(dir.path(), vec![stub], limits).unwrap();

        let req = AiRequest::new("analyze_error", "investigate", Priority::Critical, 10);
        let response = gw.request(&req).await;
        assert!(response.success);
    }
}
