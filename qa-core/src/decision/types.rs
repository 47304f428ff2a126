//! Value types for the Decision Engine.

use serde::{Deserialize, Serialize};

/// Closed set of decision kinds a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    FindElement,
    ChooseAction,
    HandleError,
    PredictNext,
    WaitTime,
    PageType,
    Recovery,
}

/// Which tier produced a [`Decision`], cheapest/most-trusted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    KnowledgeBase,
    PageMemory,
    Heuristics,
    AiGateway,
    Default,
}

/// Confidence tiers used to decide whether a tier's answer is good
/// enough to stop resolution, or whether to fall through to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub const HIGH: f64 = 0.8;
    pub const MEDIUM: f64 = 0.5;
    pub const LOW: f64 = 0.3;
}

/// The outcome of resolving a [`DecisionType`] request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub source: DecisionSource,
    pub confidence: f64,
    pub value: serde_json::Value,
    #[serde(default)]
    pub alternatives: Vec<serde_json::Value>,
    pub reasoning: String,
    #[serde(default)]
    pub memory_id: Option<String>,
}

impl Decision {
    pub fn new(
        decision_type: DecisionType,
        source: DecisionSource,
        confidence: f64,
        value: serde_json::Value,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            decision_type,
            source,
            confidence,
            value,
            alternatives: Vec::new(),
            reasoning: reasoning.into(),
            memory_id: None,
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<serde_json::Value>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn with_memory_id(mut self, memory_id: impl Into<String>) -> Self {
        self.memory_id = Some(memory_id.into());
        self
    }

    /// The default, empty-placeholder decision any tier chain bottoms out at.
    pub fn default_for(decision_type: DecisionType) -> Self {
        Self::new(
            decision_type,
            DecisionSource::Default,
            ConfidenceTier::LOW,
            serde_json::Value::Null,
            "no tier produced a confident answer",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_for_carries_low_confidence() {
        let d = Decision::default_for(DecisionType::PageType);
        assert_eq!(d.confidence, 0.3);
        assert_eq!(d.source, DecisionSource::Default);
        assert!(d.value.is_null());
    }
}
