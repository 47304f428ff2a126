//! Error types for qa-core.

use thiserror::Error;

/// Result type alias using qa-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the autonomous test-execution core.
///
/// Most variants are non-fatal: individual step failures never abort a
/// test, test failures never abort the orchestrator, and persistence
/// failures never abort execution. `ConfigError` is the exception and is
/// treated as fatal at startup.
#[derive(Error, Debug)]
pub enum Error {
    /// An element could not be found by any strategy. Recoverable by healing.
    #[error("element not found: {selector} ({strategy})")]
    ElementNotFound { selector: String, strategy: String },

    /// An element was located but is not visible/interactable.
    #[error("element not visible: {selector} ({strategy})")]
    ElementNotVisible { selector: String, strategy: String },

    /// An operation exceeded its deadline.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// An assertion step failed; the test fails with no further retry.
    #[error("assertion failed: {message}")]
    AssertionFailure { message: String },

    /// The browser driver returned no response to a navigation.
    #[error("navigation error: {message}")]
    NavigationError { message: String },

    /// The AI Gateway denied a request because a budget counter is exhausted.
    #[error("AI budget exceeded: {resource}")]
    BudgetExceeded { resource: String },

    /// The AI Gateway's provider adapter returned an error.
    #[error("AI provider error: {provider} - {message}")]
    ProviderError { provider: String, message: String },

    /// A knowledge base or memory store failed to persist to disk.
    /// The in-memory store remains authoritative until the next flush.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem I/O error underlying a persistence operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn element_not_found(selector: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self::ElementNotFound {
            selector: selector.into(),
            strategy: strategy.into(),
        }
    }

    pub fn element_not_visible(selector: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self::ElementNotVisible {
            selector: selector.into(),
            strategy: strategy.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn assertion_failure(message: impl Into<String>) -> Self {
        Self::AssertionFailure {
            message: message.into(),
        }
    }

    pub fn navigation_error(message: impl Into<String>) -> Self {
        Self::NavigationError {
            message: message.into(),
        }
    }

    pub fn budget_exceeded(resource: impl Into<String>) -> Self {
        Self::BudgetExceeded {
            resource: resource.into(),
        }
    }

    pub fn provider_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn persistence_error(message: impl Into<String>) -> Self {
        Self::PersistenceError(message.into())
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// True for errors the action executor's internal retry/healing loop
    /// may recover from without failing the step.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ElementNotFound { .. } | Self::ElementNotVisible { .. } | Self::Timeout { .. }
        )
    }
}
