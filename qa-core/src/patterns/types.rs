//! Value types for the Action Pattern Store.

use crate::selectors::SelectorStrategy;
use serde::{Deserialize, Serialize};

/// One step within an [`ActionPattern`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternStep {
    pub action: String,
    pub target_intent: String,
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub selector_strategy: Option<SelectorStrategy>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

impl PatternStep {
    pub fn new(action: impl Into<String>, target_intent: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target_intent: target_intent.into(),
            selectors: Vec::new(),
            selector_strategy: None,
            value: None,
            optional: false,
        }
    }

    pub fn with_selectors(mut self, selectors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.selectors = selectors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A named, reusable multi-step action recipe with success statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPattern {
    pub id: String,
    pub name: String,
    pub category: String,
    /// Keywords that make this pattern applicable to a given intent/URL.
    pub intent_keywords: Vec<String>,
    pub url_hints: Vec<String>,
    pub steps: Vec<PatternStep>,
    pub used: u64,
    pub succeeded: u64,
}

impl ActionPattern {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            intent_keywords: Vec::new(),
            url_hints: Vec::new(),
            steps: Vec::new(),
            used: 0,
            succeeded: 0,
        }
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.intent_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_url_hints(mut self, hints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.url_hints = hints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_steps(mut self, steps: Vec<PatternStep>) -> Self {
        self.steps = steps;
        self
    }

    /// `succeeded / used`, defaulting to 0.5 with no observations yet.
    pub fn confidence(&self) -> f64 {
        if self.used == 0 {
            0.5
        } else {
            self.succeeded as f64 / self.used as f64
        }
    }

    /// Whether the free-text intent/URL makes this pattern applicable.
    pub fn matches(&self, intent: Option<&str>, url: Option<&str>) -> bool {
        let intent_match = intent
            .map(|i| {
                let lower = i.to_lowercase();
                self.intent_keywords.iter().any(|k| lower.contains(k.as_str()))
            })
            .unwrap_or(true);
        let url_match = url
            .map(|u| {
                let lower = u.to_lowercase();
                self.url_hints.is_empty() || self.url_hints.iter().any(|h| lower.contains(h.as_str()))
            })
            .unwrap_or(true);
        intent_match && url_match
    }

    pub fn record_usage(&mut self, success: bool) {
        self.used += 1;
        if success {
            self.succeeded += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_defaults_to_half() {
        let p = ActionPattern::new("p1", "Login", "login");
        assert_eq!(p.confidence(), 0.5);
    }

    #[test]
    fn confidence_tracks_usage() {
        let mut p = ActionPattern::new("p1", "Login", "login");
        p.record_usage(true);
        p.record_usage(true);
        p.record_usage(false);
        assert!((p.confidence() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn matches_by_keyword_and_url_hint() {
        let p = ActionPattern::new("p1", "Login", "login")
            .with_keywords(["log in", "sign in"])
            .with_url_hints(["/login", "/signin"]);
        assert!(p.matches(Some("please log in now"), Some("https://e.com/login")));
        assert!(!p.matches(Some("search for items"), Some("https://e.com/search")));
    }
}
