//! Unified Executor: accepts tests in either representation
//! and drives a single execution path through the Decision Engine and
//! Action Executor.

pub mod types;

pub use types::{
    ExecutionMode, StepResult, TestFormat, TestOutcome, UnifiedExecutionReport, UnifiedStep, UnifiedTestCase,
    UnifiedTestResult,
};

use crate::ai::AiGateway;
use crate::decision::DecisionEngine;
use crate::executor::{Action, ActionExecutor, ActionInput, ActionStatus};
use crate::learning::{LearningEngine, LearningEvent};
use crate::patterns::PatternStore;
use crate::selectors::SelectorStrategy;
use crate::util::registered_domain;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Converts a behavior-driven scenario's free-text step into a concrete
/// action, trying (in order): regex heuristics shared with the
/// Decision Engine, a pattern lookup, and (if the execution mode
/// allows it) the AI Gateway.
pub struct StepInterpreter {
    decision: Arc<DecisionEngine>,
    patterns: Arc<PatternStore>,
    ai_gateway: Option<Arc<AiGateway>>,
}

impl StepInterpreter {
    pub fn new(decision: Arc<DecisionEngine>, patterns: Arc<PatternStore>, ai_gateway: Option<Arc<AiGateway>>) -> Self {
        Self { decision, patterns, ai_gateway }
    }

    pub async fn interpret(&self, step: &UnifiedStep, mode: ExecutionMode) -> UnifiedStep {
        let Some(text) = &step.text else { return step.clone() };

        if let Some(decision) = crate::decision::heuristics::choose_action(text) {
            return apply_decision(step, &decision);
        }

        if let Some(pattern) = self.patterns.find_pattern(Some(text), None).into_iter().next() {
            if let Some(first) = pattern.steps.first() {
                let mut interpreted = step.clone();
                interpreted.action = first.action.clone();
                interpreted.target = Some(first.target_intent.clone());
                interpreted.selector = first.selectors.first().cloned();
                interpreted.selector_strategy = first.selector_strategy;
                interpreted.value = first.value.clone();
                return interpreted;
            }
        }

        if matches!(mode, ExecutionMode::Autonomous) {
            if let Some(gateway) = &self.ai_gateway {
                let response = gateway.interpret_step(text, serde_json::Value::Null).await;
                if response.success {
                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&response.content) {
                        let mut interpreted = step.clone();
                        if let Some(action) = parsed["action"].as_str() {
                            interpreted.action = action.to_string();
                        }
                        interpreted.target = parsed["target"].as_str().map(str::to_string);
                        interpreted.value = parsed["value"].as_str().map(str::to_string);
                        let _ = &self.decision;
                        return interpreted;
                    }
                }
            }
        }

        step.clone()
    }
}

fn apply_decision(step: &UnifiedStep, decision: &crate::decision::Decision) -> UnifiedStep {
    let mut interpreted = step.clone();
    if let Some(action) = decision.value["action"].as_str() {
        interpreted.action = action.to_string();
    }
    interpreted.target = decision.value["target"].as_str().map(str::to_string);
    if let Some(value) = decision.value["value"].as_str() {
        interpreted.value = Some(value.to_string());
    }
    interpreted
}

pub struct UnifiedExecutor {
    driver_executor: ActionExecutor,
    decision: Arc<DecisionEngine>,
    learning: Arc<LearningEngine>,
    interpreter: StepInterpreter,
    mode: ExecutionMode,
    stop_requested: Arc<AtomicBool>,
}

impl UnifiedExecutor {
    pub fn new(
        driver_executor: ActionExecutor,
        decision: Arc<DecisionEngine>,
        learning: Arc<LearningEngine>,
        patterns: Arc<PatternStore>,
        ai_gateway: Option<Arc<AiGateway>>,
        mode: ExecutionMode,
    ) -> Self {
        let interpreter = StepInterpreter::new(decision.clone(), patterns, ai_gateway);
        Self {
            driver_executor,
            decision,
            learning,
            interpreter,
            mode,
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A cloneable handle a caller can poll/flip to request a cooperative stop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_requested.clone()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// `forceStop()`: flips the cooperative flag and closes
    /// the driver outright, interrupting any blocking call the next
    /// `stopRequested` poll at a step boundary would otherwise wait out.
    pub async fn force_stop(&self) {
        self.request_stop();
        if let Err(err) = self.driver_executor.force_stop().await {
            tracing::warn!(error = %err, "force_stop: driver close failed");
        }
    }

    /// Convert a source test case into the uniform step list the
    /// executor drives, prepending any background steps.
    fn resolve_steps(case: &UnifiedTestCase) -> Vec<UnifiedStep> {
        let mut steps = case.background_steps.clone();
        match case.format {
            TestFormat::ActionBased => steps.extend(case.steps.clone()),
            TestFormat::BehaviorDriven => steps.extend(case.steps.iter().cloned().map(|mut s| {
                if s.action.is_empty() {
                    s.action = "behavior-step".to_string();
                }
                s.target = s.text.clone();
                s
            })),
        }
        steps
    }

    pub async fn run(&self, base_url: Option<&str>, case: &UnifiedTestCase) -> UnifiedTestResult {
        let started_at = Utc::now();
        let steps = Self::resolve_steps(case);

        if steps.is_empty() {
            return UnifiedTestResult {
                id: case.id.clone(),
                name: case.name.clone(),
                format: case.format,
                status: TestOutcome::Passed,
                total_steps: 0,
                passed_steps: 0,
                failed_steps: 0,
                recovered_steps: 0,
                duration_ms: 0,
                step_results: Vec::new(),
                started_at,
                completed_at: started_at,
                partial: false,
                stopped_by_user: false,
                ai_resolved_steps: 0,
                new_selectors_learned: 0,
            };
        }

        if let Some(url) = base_url {
            if let Err(err) = self.driver_executor.navigate_only(url).await {
                tracing::warn!(error = %err, "base url navigation failed");
            }
        }

        // Prewarm: the element keys this scenario actually used last time it
        // ran, so a known-good selector can skip straight past the Decision
        // Engine's tiers instead of re-resolving from scratch.
        let prewarm = self.decision.kb().get_scenario_cache(&case.id).unwrap_or_default();
        let mut scenario_entries = prewarm.clone();

        let domain = base_url.map(registered_domain).unwrap_or_default();
        let mut step_results = Vec::with_capacity(steps.len());
        let mut passed = 0usize;
        let mut failed = 0usize;
        let mut recovered = 0usize;
        let mut stopped = false;
        let mut ai_resolved = 0usize;
        let mut new_selectors = 0usize;

        for (index, step) in steps.iter().enumerate() {
            if self.stop_requested.load(Ordering::SeqCst) {
                stopped = true;
                step_results.push(StepResult { step_index: index, action_result: None, skipped: true });
                continue;
            }
            if stopped {
                step_results.push(StepResult { step_index: index, action_result: None, skipped: true });
                continue;
            }

            let interpreted = if step.action == "behavior-step" {
                self.interpreter.interpret(step, self.mode).await
            } else {
                step.clone()
            };

            let Some(action) = types::parse_action(&interpreted.action) else {
                step_results.push(StepResult { step_index: index, action_result: None, skipped: true });
                continue;
            };

            let page = self.driver_executor.current_page().await;
            let target_intent = interpreted.target.as_deref().unwrap_or("");
            let decision = if interpreted.selector.is_none() && prewarm.contains_key(target_intent) {
                crate::decision::Decision::new(
                    crate::decision::DecisionType::FindElement,
                    crate::decision::DecisionSource::KnowledgeBase,
                    crate::decision::ConfidenceTier::HIGH,
                    serde_json::json!({ "selector": prewarm[target_intent], "strategy": "css" }),
                    "scenario cache prewarm",
                )
                .with_memory_id(format!("{domain}:{page}:{target_intent}"))
            } else {
                self.decision
                    .find_element(&domain, &page, target_intent, serde_json::Value::Null, None)
                    .await
            };

            let selector = interpreted
                .selector
                .clone()
                .or_else(|| decision.value.get("selector").and_then(|v| v.as_str()).map(str::to_string))
                .unwrap_or_default();
            let strategy = interpreted.selector_strategy.unwrap_or(SelectorStrategy::Css);

            let mut input = ActionInput::new(action.clone(), &selector, strategy);
            if let Some(value) = &interpreted.value {
                input = input.with_value(value);
            }

            let result = self.driver_executor.execute(index, input).await;

            let success = result.is_success();
            let element_key = interpreted.target.clone().unwrap_or_default();
            let resolved_selector = result.resolved_selector.clone().unwrap_or_else(|| selector.clone());
            let is_new_selector = success
                && !self.decision.kb().has_selector(&domain, &page, &element_key, &resolved_selector);

            if success && !element_key.is_empty() {
                scenario_entries.insert(element_key.clone(), resolved_selector.clone());
            }

            if success {
                self.learning.record_event(LearningEvent::ActionSuccess {
                    domain: domain.clone(),
                    page: page.clone(),
                    element_key,
                    selector: resolved_selector,
                    strategy,
                });
            } else {
                self.learning.record_event(LearningEvent::ActionFailure {
                    domain: domain.clone(),
                    page,
                    element_key,
                    selector,
                    strategy,
                    message: result.error_message.clone(),
                });
            }
            self.decision.record_decision_outcome(&decision, success);

            if decision.source == crate::decision::DecisionSource::AiGateway {
                ai_resolved += 1;
            }
            if is_new_selector {
                new_selectors += 1;
            }

            match result.status {
                ActionStatus::Success => passed += 1,
                ActionStatus::Recovered => recovered += 1,
                _ => failed += 1,
            }
            step_results.push(StepResult { step_index: index, action_result: Some(result), skipped: false });
        }

        if !scenario_entries.is_empty() {
            if let Err(err) = self.decision.kb().save_scenario_cache(&case.id, &scenario_entries) {
                tracing::warn!(error = %err, scenario = %case.id, "failed to persist scenario prewarm cache");
            }
        }

        let completed_at = Utc::now();
        let status = if stopped {
            TestOutcome::Stopped
        } else if failed > 0 {
            TestOutcome::Failed
        } else {
            TestOutcome::Passed
        };

        UnifiedTestResult {
            id: case.id.clone(),
            name: case.name.clone(),
            format: case.format,
            status,
            total_steps: steps.len(),
            passed_steps: passed,
            failed_steps: failed,
            recovered_steps: recovered,
            duration_ms: (completed_at - started_at).num_milliseconds() as u64,
            step_results,
            started_at,
            completed_at,
            partial: stopped,
            stopped_by_user: stopped,
            ai_resolved_steps: ai_resolved,
            new_selectors_learned: new_selectors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::BrainMemories;
    use crate::executor::driver::mock::{MockDriver, MockElement};
    use crate::executor::ElementInfo;
    use crate::patterns::PatternStore;
    use crate::selectors::KnowledgeBase;
    use tempfile::tempdir;

    fn setup() -> (UnifiedExecutor, Arc<MockDriver>) {
        let driver = Arc::new(MockDriver::new());
        driver.with_element(MockElement {
            selector: "#submit".into(),
            strategy: SelectorStrategy::Css,
            visible: true,
            info: ElementInfo {
                tag: "button".into(), text: None, label: None, placeholder: None, role: None, test_id: None,
                css_path: "#submit".into(),
            },
        });

        let kb = Arc::new(KnowledgeBase::new(tempdir().unwrap().path()).unwrap());
        let pm = Arc::new(crate::brain::PageMemory::new(tempdir().unwrap().path()).unwrap());
        kb.add_learning("example.com", "/", "login_submit", "#submit", SelectorStrategy::Css, true, crate::selectors::LearnedFrom::Manual, None, None);

        let decision = Arc::new(DecisionEngine::new(kb.clone(), pm, None));
        let patterns = Arc::new(PatternStore::new(tempdir().unwrap().path()).unwrap());
        let memories = Arc::new(BrainMemories::new(tempdir().unwrap().path()).unwrap());
        let learning = Arc::new(LearningEngine::new(kb, patterns.clone(), memories));

        let action_executor = ActionExecutor::new(driver.clone());
        let unified = UnifiedExecutor::new(action_executor, decision, learning, patterns, None, ExecutionMode::Strict);
        (unified, driver)
    }

    #[tokio::test]
    async fn empty_step_list_passes_immediately() {
        let (unified, _driver) = setup();
        let case = UnifiedTestCase {
            id: "t1".into(), name: "empty".into(), format: TestFormat::ActionBased,
            steps: vec![], tags: vec![], feature_name: None, scenario_name: None, background_steps: vec![],
        };
        let result = unified.run(None, &case).await;
        assert_eq!(result.status, TestOutcome::Passed);
        assert_eq!(result.duration_ms, 0);
    }

    #[tokio::test]
    async fn action_based_test_runs_known_selector_to_completion() {
        let (unified, _driver) = setup();
        let case = UnifiedTestCase {
            id: "t2".into(), name: "login submit".into(), format: TestFormat::ActionBased,
            steps: vec![UnifiedStep {
                action: "click".into(), keyword: None, text: None,
                target: Some("login_submit".into()), selector: None, selector_strategy: None, value: None,
            }],
            tags: vec![], feature_name: None, scenario_name: None, background_steps: vec![],
        };
        let result = unified.run(Some("https://example.com"), &case).await;
        assert_eq!(result.status, TestOutcome::Passed);
        assert_eq!(result.passed_steps, 1);
    }

    #[tokio::test]
    async fn successful_run_persists_scenario_cache_for_prewarm_on_replay() {
        let (unified, _driver) = setup();
        let case = UnifiedTestCase {
            id: "scenario-1".into(), name: "login submit".into(), format: TestFormat::ActionBased,
            steps: vec![UnifiedStep {
                action: "click".into(), keyword: None, text: None,
                target: Some("login_submit".into()), selector: None, selector_strategy: None, value: None,
            }],
            tags: vec![], feature_name: None, scenario_name: None, background_steps: vec![],
        };
        unified.run(Some("https://example.com"), &case).await;
        let cached = unified.decision.kb().get_scenario_cache("scenario-1").expect("scenario cache persisted");
        assert_eq!(cached.get("login_submit"), Some(&"#submit".to_string()));
    }

    #[tokio::test]
    async fn scenario_cache_prewarm_resolves_a_selector_absent_from_the_kb() {
        let (unified, driver) = setup();
        driver.with_element(MockElement {
            selector: "#prewarmed".into(),
            strategy: SelectorStrategy::Css,
            visible: true,
            info: ElementInfo {
                tag: "button".into(), text: None, label: None, placeholder: None, role: None, test_id: None,
                css_path: "#prewarmed".into(),
            },
        });
        let mut entries = std::collections::HashMap::new();
        entries.insert("prewarm_target".to_string(), "#prewarmed".to_string());
        unified.decision.kb().save_scenario_cache("scenario-2", &entries).unwrap();

        let case = UnifiedTestCase {
            id: "scenario-2".into(), name: "prewarmed click".into(), format: TestFormat::ActionBased,
            steps: vec![UnifiedStep {
                action: "click".into(), keyword: None, text: None,
                target: Some("prewarm_target".into()), selector: None, selector_strategy: None, value: None,
            }],
            tags: vec![], feature_name: None, scenario_name: None, background_steps: vec![],
        };
        let result = unified.run(Some("https://example.com"), &case).await;
        assert_eq!(result.status, TestOutcome::Passed);
    }

    #[tokio::test]
    async fn stop_request_marks_remaining_steps_skipped() {
        let (unified, _driver) = setup();
        let steps = vec![
            UnifiedStep { action: "click".into(), keyword: None, text: None, target: Some("login_submit".into()), selector: None, selector_strategy: None, value: None },
            UnifiedStep { action: "click".into(), keyword: None, text: None, target: Some("login_submit".into()), selector: None, selector_strategy: None, value: None },
        ];
        let case = UnifiedTestCase {
            id: "t3".into(), name: "stoppable".into(), format: TestFormat::ActionBased,
            steps, tags: vec![], feature_name: None, scenario_name: None, background_steps: vec![],
        };
        unified.request_stop();
        let result = unified.run(Some("https://example.com"), &case).await;
        assert_eq!(result.status, TestOutcome::Stopped);
        assert!(result.step_results.iter().all(|s| s.skipped));
    }

    #[tokio::test]
    async fn force_stop_closes_the_driver_and_sets_the_cooperative_flag() {
        let (unified, driver) = setup();
        unified.force_stop().await;
        assert!(unified.stop_handle().load(Ordering::SeqCst));
        assert!(driver.is_closed());
    }
}
