//! Value types for the Action Executor.

use crate::selectors::{Selector, SelectorStrategy};
use serde::{Deserialize, Serialize};

/// Closed set of browser actions an [`super::ActionExecutor`] can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Navigate,
    Click,
    Fill,
    Type,
    Select,
    Check,
    Uncheck,
    Hover,
    Wait,
    PressKey,
    Scroll,
    Screenshot,
    AssertVisible,
    AssertText,
    AssertUrl,
}

/// One call into the Action Executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInput {
    pub action: Action,
    pub selector: String,
    pub selector_strategy: SelectorStrategy,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub alternatives: Vec<Selector>,
}

impl ActionInput {
    pub fn new(action: Action, selector: impl Into<String>, strategy: SelectorStrategy) -> Self {
        Self {
            action,
            selector: selector.into(),
            selector_strategy: strategy,
            value: None,
            timeout_ms: None,
            alternatives: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<Selector>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms.unwrap_or(30_000))
    }
}

/// Closed set of outcome statuses for one [`ActionInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    ElementNotFound,
    ElementNotVisible,
    Timeout,
    Error,
    Recovered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub action: Action,
    pub selector: String,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub navigation_occurred: bool,
    #[serde(default)]
    pub screenshot_path: Option<String>,
    /// The selector that actually worked, when healing substituted one.
    #[serde(default)]
    pub resolved_selector: Option<String>,
    #[serde(default)]
    pub html_snapshot_path: Option<String>,
    #[serde(default)]
    pub dom_snapshot_path: Option<String>,
}

impl ActionResult {
    pub fn success(action: Action, selector: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            status: ActionStatus::Success,
            action,
            selector: selector.into(),
            execution_time_ms,
            error_message: None,
            navigation_occurred: false,
            screenshot_path: None,
            resolved_selector: None,
            html_snapshot_path: None,
            dom_snapshot_path: None,
        }
    }

    pub fn failed(status: ActionStatus, action: Action, selector: impl Into<String>, execution_time_ms: u64, error_message: impl Into<String>) -> Self {
        Self {
            status,
            action,
            selector: selector.into(),
            execution_time_ms,
            error_message: Some(error_message.into()),
            navigation_occurred: false,
            screenshot_path: None,
            resolved_selector: None,
            html_snapshot_path: None,
            dom_snapshot_path: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ActionStatus::Success | ActionStatus::Recovered)
    }
}

/// Inventory entry for one visible, interactive element, as returned by
/// the driver's page-evaluation capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub test_id: Option<String>,
    pub css_path: String,
}
