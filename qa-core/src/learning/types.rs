//! Event types for the Learning Engine.

use serde::{Deserialize, Serialize};

/// Closed set of events the Learning Engine absorbs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearningEvent {
    ActionSuccess {
        domain: String,
        page: String,
        element_key: String,
        selector: String,
        strategy: crate::selectors::SelectorStrategy,
    },
    ActionFailure {
        domain: String,
        page: String,
        element_key: String,
        selector: String,
        strategy: crate::selectors::SelectorStrategy,
        message: Option<String>,
    },
    ElementFound {
        domain: String,
        page: String,
        element_key: String,
        selector: String,
        strategy: crate::selectors::SelectorStrategy,
    },
    PageLoaded {
        signature: crate::brain::PageSignature,
        load_time_ms: f64,
    },
    ErrorOccurred {
        error_type: String,
        message: String,
        field_hint: Option<String>,
    },
    ErrorRecovered {
        error_type: String,
        message: String,
        recovery_action: String,
        worked: bool,
    },
    WorkflowCompleted {
        name: String,
        page_sequence: Vec<String>,
        action_sequence: Vec<String>,
        duration_ms: f64,
    },
    WorkflowFailed {
        name: String,
        page_sequence: Vec<String>,
        action_sequence: Vec<String>,
        duration_ms: f64,
        failure_step: usize,
    },
}
