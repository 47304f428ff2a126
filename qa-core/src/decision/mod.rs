//! Decision Engine: a tiered resolver producing a
//! [`Decision`] from local data when possible, falling through to the AI
//! Gateway only when every local tier is below `min_confidence`.

pub mod heuristics;
pub mod types;

pub use types::{ConfidenceTier, Decision, DecisionSource, DecisionType};

use crate::ai::{AiGateway, Priority};
use crate::brain::PageMemory;
use crate::selectors::KnowledgeBase;
use std::sync::Arc;

/// Resolves decisions by consulting, in order: the Knowledge Base, Page
/// Memory, built-in heuristics, and (if allowed) the AI Gateway, each
/// gated by `min_confidence`.
pub struct DecisionEngine {
    kb: Arc<KnowledgeBase>,
    page_memory: Arc<PageMemory>,
    ai_gateway: Option<Arc<AiGateway>>,
    allow_ai: bool,
}

impl DecisionEngine {
    pub fn new(kb: Arc<KnowledgeBase>, page_memory: Arc<PageMemory>, ai_gateway: Option<Arc<AiGateway>>) -> Self {
        Self {
            kb,
            page_memory,
            ai_gateway,
            allow_ai: true,
        }
    }

    /// Execution mode gate: `Strict` mode disables the AI tier entirely.
    pub fn set_allow_ai(&mut self, allow: bool) {
        self.allow_ai = allow;
    }

    /// The Knowledge Base this engine consults first. Exposed so callers
    /// (the Unified Executor) can check whether a resolved selector was
    /// already on file before recording the outcome, without the engine
    /// needing its own "was this new" bookkeeping.
    pub fn kb(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    /// `FindElement(domain, page, intent, pageContext, screenshot?)`.
    pub async fn find_element(
        &self,
        domain: &str,
        page: &str,
        intent: &str,
        page_context: serde_json::Value,
        screenshot: Option<Vec<u8>>,
    ) -> Decision {
        if let Some(knowledge) = self.kb.lookup(domain, page, intent) {
            if let Some(best) = knowledge.best_selector() {
                let confidence = best.confidence();
                if confidence >= ConfidenceTier::MEDIUM {
                    return Decision::new(
                        DecisionType::FindElement,
                        DecisionSource::KnowledgeBase,
                        confidence,
                        serde_json::json!({ "selector": best.value, "strategy": best.strategy }),
                        "direct Lookup hit",
                    )
                    .with_memory_id(format!("{domain}:{page}:{intent}"));
                }
            }
        }

        let fuzzy = self.kb.find_by_intent(intent, Some(domain), Some(page), 1);
        if let Some(top) = fuzzy.into_iter().next() {
            if top.confidence >= ConfidenceTier::MEDIUM {
                return Decision::new(
                    DecisionType::FindElement,
                    DecisionSource::KnowledgeBase,
                    top.confidence,
                    serde_json::json!({ "selector": top.selector, "strategy": top.strategy }),
                    "fuzzy FindByIntent hit",
                )
                .with_memory_id(format!("{}:{}:{}", top.domain, top.page, top.element_key));
            }
        }

        if let Some(heuristic) = heuristics::find_element(intent) {
            if heuristic.confidence >= ConfidenceTier::MEDIUM {
                return heuristic;
            }
        }

        if self.allow_ai {
            if let Some(gateway) = &self.ai_gateway {
                let response = gateway.find_element(intent, page_context, screenshot).await;
                if response.success {
                    return Decision::new(
                        DecisionType::FindElement,
                        DecisionSource::AiGateway,
                        ConfidenceTier::MEDIUM,
                        serde_json::json!({ "selector": response.content.trim(), "strategy": "css" }),
                        "AI Gateway find_element",
                    );
                }
            }
        }

        Decision::default_for(DecisionType::FindElement)
    }

    /// `HandleError(message)`.
    pub async fn handle_error(&self, message: &str, page_context: serde_json::Value) -> Decision {
        let heuristic = heuristics::handle_error(message);
        if heuristic.confidence >= ConfidenceTier::MEDIUM {
            return heuristic;
        }
        if self.allow_ai {
            if let Some(gateway) = &self.ai_gateway {
                let response = gateway.analyze_error(message, page_context).await;
                if response.success {
                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&response.content) {
                        return Decision::new(
                            DecisionType::HandleError,
                            DecisionSource::AiGateway,
                            ConfidenceTier::MEDIUM,
                            parsed,
                            "AI Gateway analyze_error",
                        );
                    }
                }
            }
        }
        Decision::default_for(DecisionType::HandleError)
    }

    /// `PredictNext(currentPageType, lastAction)`.
    pub fn predict_next(&self, signature_digest: Option<&str>, current_page_type: &str, last_action: &str) -> Decision {
        if let Some(heuristic) = heuristics::predict_next(current_page_type, last_action) {
            return heuristic;
        }
        let _ = signature_digest;
        Decision::default_for(DecisionType::PredictNext)
    }

    /// `WaitTime(action)`.
    pub fn wait_time(&self, action: &str) -> Decision {
        heuristics::wait_time(action)
    }

    /// `PageType(url, title)`, consulting known page memory first.
    pub fn page_type(&self, signature: &crate::brain::PageSignature, url: &str, title: &str) -> Decision {
        if let Some(entry) = self.page_memory.get(signature) {
            if entry.confidence >= ConfidenceTier::MEDIUM {
                return Decision::new(
                    DecisionType::PageType,
                    DecisionSource::PageMemory,
                    entry.confidence,
                    serde_json::json!({ "page_type": signature.page_type }),
                    "previously observed page signature",
                );
            }
        }
        heuristics::page_type(url, title)
    }

    /// `ChooseAction(stepText)`.
    pub fn choose_action(&self, step_text: &str) -> Decision {
        heuristics::choose_action(step_text).unwrap_or_else(|| Decision::default_for(DecisionType::ChooseAction))
    }

    /// `RecordDecisionOutcome(decision, success)`: updates the
    /// underlying memory/KB entry referenced by `memory_id`.
    pub fn record_decision_outcome(&self, decision: &Decision, success: bool) {
        let Some(memory_id) = &decision.memory_id else { return };
        let Some((domain, page, element_key)) = split_memory_id(memory_id) else { return };
        let Some(selector) = decision.value.get("selector").and_then(|v| v.as_str()) else { return };
        let strategy = decision
            .value
            .get("strategy")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(crate::selectors::SelectorStrategy::Css);
        self.kb.add_learning(
            domain,
            page,
            element_key,
            selector,
            strategy,
            success,
            crate::selectors::LearnedFrom::Execution,
            None,
            None,
        );
    }
}

fn split_memory_id(memory_id: &str) -> Option<(&str, &str, &str)> {
    let mut parts = memory_id.splitn(3, ':');
    Some((parts.next()?, parts.next()?, parts.next()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors::{LearnedFrom, SelectorStrategy};
    use tempfile::tempdir;

    fn engine() -> DecisionEngine {
        let kb_dir = tempdir().unwrap();
        let pm_dir = tempdir().unwrap();
        let kb = Arc::new(KnowledgeBase::new(kb_dir.path()).unwrap());
        let pm = Arc::new(PageMemory::new(pm_dir.path()).unwrap());
        DecisionEngine::new(kb, pm, None)
    }

    #[tokio::test]
    async fn find_element_prefers_kb_over_heuristics() {
        let engine = engine();
        engine.kb.add_learning(
            "example.com", "/login", "login_submit", "#real-submit", SelectorStrategy::Css,
            true, LearnedFrom::Execution, None, None,
        );
        let decision = engine
            .find_element("example.com", "/login", "login_submit", serde_json::Value::Null, None)
            .await;
        assert_eq!(decision.source, DecisionSource::KnowledgeBase);
        assert_eq!(decision.value["selector"], "#real-submit");
    }

    #[tokio::test]
    async fn find_element_falls_back_to_heuristics_for_click_button_intent() {
        let engine = engine();
        let decision = engine
            .find_element("example.com", "/x", "click the continue button", serde_json::Value::Null, None)
            .await;
        assert_eq!(decision.source, DecisionSource::Heuristics);
    }

    #[tokio::test]
    async fn find_element_bottoms_out_at_default_with_no_data_and_no_ai() {
        let engine = engine();
        let decision = engine
            .find_element("example.com", "/x", "username", serde_json::Value::Null, None)
            .await;
        assert_eq!(decision.source, DecisionSource::Default);
        assert_eq!(decision.confidence, 0.3);
    }

    #[test]
    fn wait_time_delegates_to_heuristics() {
        let engine = engine();
        assert_eq!(engine.wait_time("navigate").value["wait_ms"], 2000);
    }

    #[tokio::test]
    async fn record_decision_outcome_writes_back_to_kb() {
        let engine = engine();
        let decision = Decision::new(
            DecisionType::FindElement,
            DecisionSource::Heuristics,
            0.6,
            serde_json::json!({ "selector": "#u", "strategy": "css" }),
            "test",
        )
        .with_memory_id("example.com:/login:username");
        engine.record_decision_outcome(&decision, true);
        let knowledge = engine.kb.lookup("example.com", "/login", "username").unwrap();
        assert_eq!(knowledge.best_selector().unwrap().value, "#u");
    }
}
