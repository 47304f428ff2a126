//! Core value types for the selector knowledge base.

use serde::{Deserialize, Serialize};

/// Selector lookup strategy. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    Css,
    Xpath,
    Text,
    Placeholder,
    Label,
    Role,
    Aria,
    TestId,
}

impl std::fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Css => "css",
            Self::Xpath => "xpath",
            Self::Text => "text",
            Self::Placeholder => "placeholder",
            Self::Label => "label",
            Self::Role => "role",
            Self::Aria => "aria",
            Self::TestId => "test_id",
        };
        write!(f, "{s}")
    }
}

/// Provenance of a learned selector. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnedFrom {
    Recording,
    Exploration,
    Execution,
    Ai,
    Manual,
}

/// A single candidate selector for an element, with its empirical track record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selector {
    pub value: String,
    pub strategy: SelectorStrategy,
    pub successes: u32,
    pub failures: u32,
    pub last_used: chrono::DateTime<chrono::Utc>,
    pub learned_from: LearnedFrom,
}

impl Selector {
    pub fn new(value: impl Into<String>, strategy: SelectorStrategy, learned_from: LearnedFrom) -> Self {
        Self {
            value: value.into(),
            strategy,
            successes: 0,
            failures: 0,
            last_used: chrono::Utc::now(),
            learned_from,
        }
    }

    /// Empirical confidence `successes / (successes + failures)`, defaulting
    /// to 0.5 when no observations have been recorded yet.
    pub fn confidence(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.5
        } else {
            self.successes as f64 / total as f64
        }
    }

    pub fn record(&mut self, success: bool) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.last_used = chrono::Utc::now();
    }
}

/// Everything known about one `(domain, page, element-key)` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementKnowledge {
    pub domain: String,
    pub page: String,
    pub element_key: String,
    /// Sorted by confidence descending, ties broken by most recent `last_used`.
    pub selectors: Vec<Selector>,
    pub element_type: Option<String>,
    #[serde(default)]
    pub context: std::collections::HashMap<String, serde_json::Value>,
    pub last_success: Option<chrono::DateTime<chrono::Utc>>,
}

impl ElementKnowledge {
    pub fn new(domain: impl Into<String>, page: impl Into<String>, element_key: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            page: page.into(),
            element_key: element_key.into(),
            selectors: Vec::new(),
            element_type: None,
            context: std::collections::HashMap::new(),
            last_success: None,
        }
    }

    /// Re-sort `selectors` by confidence descending, ties broken by recency.
    pub fn resort(&mut self) {
        self.selectors.sort_by(|a, b| {
            b.confidence()
                .partial_cmp(&a.confidence())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.last_used.cmp(&a.last_used))
        });
    }

    /// The head of the sorted list, i.e. the current best selector.
    pub fn best_selector(&self) -> Option<&Selector> {
        self.selectors.first()
    }

    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.domain, self.page, self.element_key)
    }
}

/// A match produced by intent search, independent of a specific `ElementKnowledge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorMatch {
    pub selector: String,
    pub strategy: SelectorStrategy,
    pub confidence: f64,
    pub domain: String,
    pub page: String,
    pub element_key: String,
    pub tier: String,
}

/// Aggregate statistics exposed by `GetStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub total_domains: usize,
    pub total_elements: usize,
    pub total_lookups: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub bloom_filter_saves: u64,
}

impl KnowledgeStats {
    pub fn cache_hit_rate(&self) -> f64 {
        if self.total_lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_lookups as f64
        }
    }

    pub fn bloom_save_rate(&self) -> f64 {
        if self.total_lookups == 0 {
            0.0
        } else {
            self.bloom_filter_saves as f64 / self.total_lookups as f64
        }
    }
}
