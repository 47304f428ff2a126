//! Value types for the Unified Executor.

use crate::executor::{Action, ActionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFormat {
    ActionBased,
    BehaviorDriven,
}

/// Closed set of execution modes: how aggressively the AI Gateway may
/// be consulted while running a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Broadest AI fallback: both selector resolution and step
    /// interpretation may reach the AI Gateway.
    Autonomous,
    /// AI only for selectors, never for action interpretation.
    Guided,
    /// No AI at all; failure if local tiers cannot resolve.
    Strict,
}

/// One step as the Unified Executor sees it, regardless of source format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedStep {
    pub action: String,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub selector_strategy: Option<crate::selectors::SelectorStrategy>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedTestCase {
    pub id: String,
    pub name: String,
    pub format: TestFormat,
    pub steps: Vec<UnifiedStep>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub feature_name: Option<String>,
    #[serde(default)]
    pub scenario_name: Option<String>,
    #[serde(default)]
    pub background_steps: Vec<UnifiedStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed,
    Error,
    Skipped,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub action_result: Option<ActionResult>,
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedTestResult {
    pub id: String,
    pub name: String,
    pub format: TestFormat,
    pub status: TestOutcome,
    pub total_steps: usize,
    pub passed_steps: usize,
    pub failed_steps: usize,
    pub recovered_steps: usize,
    pub duration_ms: u64,
    pub step_results: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub stopped_by_user: bool,
    #[serde(default)]
    pub ai_resolved_steps: usize,
    #[serde(default)]
    pub new_selectors_learned: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UnifiedExecutionReport {
    pub results: Vec<UnifiedTestResult>,
    pub ai_resolved_steps: usize,
    pub total_steps: usize,
    pub new_selectors_learned: usize,
}

impl UnifiedExecutionReport {
    pub fn pass_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let passed = self.results.iter().filter(|r| r.status == TestOutcome::Passed).count();
        passed as f64 / self.results.len() as f64
    }

    pub fn ai_dependency_percent(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.ai_resolved_steps as f64 / self.total_steps as f64) * 100.0
    }
}

/// Free function, not a method, so `Action::from_str`-style parsing
/// stays colocated with the closed action set it targets.
pub fn parse_action(name: &str) -> Option<Action> {
    match name {
        "navigate" => Some(Action::Navigate),
        "click" => Some(Action::Click),
        "fill" => Some(Action::Fill),
        "type" => Some(Action::Type),
        "select" => Some(Action::Select),
        "check" => Some(Action::Check),
        "uncheck" => Some(Action::Uncheck),
        "hover" => Some(Action::Hover),
        "wait" => Some(Action::Wait),
        "press-key" => Some(Action::PressKey),
        "scroll" => Some(Action::Scroll),
        "screenshot" => Some(Action::Screenshot),
        "assert-visible" => Some(Action::AssertVisible),
        "assert-text" => Some(Action::AssertText),
        "assert-url" => Some(Action::AssertUrl),
        _ => None,
    }
}
