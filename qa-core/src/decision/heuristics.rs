//! Built-in heuristic rules for the Decision Engine, reached
//! when the Knowledge Base and Page Memory tiers have nothing confident
//! to offer.

use super::types::{ConfidenceTier, Decision, DecisionSource, DecisionType};
use crate::brain::RecoveryTag;
use regex::Regex;
use std::sync::OnceLock;

/// `FindElement` for a "click X button"/"click X link" intent: emit a
/// text-matching CSS locator. Generic field/input intents deliberately
/// return `None` so AI fallback can observe and the learner can capture
/// a real selector.
pub fn find_element(intent: &str) -> Option<Decision> {
    let lower = intent.to_lowercase();
    let click_button = click_button_regex().captures(&lower)?;
    let text = click_button.get(1)?.as_str().trim();
    if text.is_empty() {
        return None;
    }
    let is_link = lower.contains("link");
    let selector = if is_link {
        format!("a:has-text(\"{text}\")")
    } else {
        format!("button:has-text(\"{text}\")")
    };
    Some(
        Decision::new(
            DecisionType::FindElement,
            DecisionSource::Heuristics,
            ConfidenceTier::MEDIUM,
            serde_json::json!({ "selector": selector, "strategy": "text" }),
            "text-matching locator from a click-X-button/link intent",
        ),
    )
}

fn click_button_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"click\s+(?:the\s+)?"?([\w\s]+?)"?\s+(?:button|link)"#).unwrap())
}

/// `HandleError`: recognise validation keywords and return a canonical
/// recovery action tag.
pub fn handle_error(message: &str) -> Decision {
    let tag = RecoveryTag::classify(message);
    let confidence = if matches!(tag, RecoveryTag::Unknown) {
        ConfidenceTier::LOW
    } else {
        ConfidenceTier::MEDIUM
    };
    Decision::new(
        DecisionType::HandleError,
        DecisionSource::Heuristics,
        confidence,
        serde_json::json!({ "recovery_action": tag }),
        "keyword match against the error message",
    )
}

/// `PredictNext`: a small built-in transition table, consulted before
/// falling back to [`crate::brain::WorkflowMemory::predict_next_page`].
pub fn predict_next(current_page_type: &str, last_action: &str) -> Option<Decision> {
    let next = match (current_page_type, last_action) {
        ("login", "submit") => "dashboard",
        ("search", "submit") => "search-results",
        ("cart", "submit") => "checkout",
        ("checkout", "submit") => "confirmation",
        _ => return None,
    };
    Some(Decision::new(
        DecisionType::PredictNext,
        DecisionSource::Heuristics,
        ConfidenceTier::MEDIUM,
        serde_json::json!({ "page_type": next }),
        "built-in (page_type, action) transition table",
    ))
}

/// `WaitTime`: action-typed defaults.
pub fn wait_time(action: &str) -> Decision {
    let ms = match action {
        "navigate" => 2000,
        "click" => 500,
        "type" => 200,
        "submit" => 3000,
        _ => 500,
    };
    Decision::new(
        DecisionType::WaitTime,
        DecisionSource::Heuristics,
        ConfidenceTier::HIGH,
        serde_json::json!({ "wait_ms": ms }),
        format!("default wait for action '{action}'"),
    )
}

/// `PageType`: keyword match against URL + title. Returns `"unknown"` at
/// 0.3 confidence when nothing matches.
pub fn page_type(url: &str, title: &str) -> Decision {
    let haystack = format!("{} {}", url.to_lowercase(), title.to_lowercase());
    const KEYWORDS: &[(&str, &[&str])] = &[
        ("login", &["login", "signin", "sign in", "log in"]),
        ("search", &["search", "find"]),
        ("cart", &["cart", "basket"]),
        ("checkout", &["checkout"]),
        ("confirmation", &["confirmation", "thank you", "success"]),
        ("dashboard", &["dashboard", "home", "overview"]),
        ("product", &["product", "item", "details"]),
        ("error", &["error", "not found", "404"]),
    ];
    for (kind, keywords) in KEYWORDS {
        if keywords.iter().any(|k| haystack.contains(k)) {
            return Decision::new(
                DecisionType::PageType,
                DecisionSource::Heuristics,
                ConfidenceTier::MEDIUM,
                serde_json::json!({ "page_type": kind }),
                "keyword match against URL and title",
            );
        }
    }
    Decision::new(
        DecisionType::PageType,
        DecisionSource::Default,
        ConfidenceTier::LOW,
        serde_json::json!({ "page_type": "unknown" }),
        "no keyword matched URL or title",
    )
}

/// `ChooseAction`: parse natural-language step text into `{action,
/// target, value}` via regex.
pub fn choose_action(text: &str) -> Option<Decision> {
    let lower = text.to_lowercase();

    if let Some(caps) = type_in_regex().captures(&lower) {
        let value = caps.get(1)?.as_str().trim().trim_matches('\'').trim_matches('"');
        let target = caps.get(2)?.as_str().trim();
        return Some(action_decision("type", target, Some(value)));
    }
    if let Some(caps) = click_regex().captures(&lower) {
        let target = caps.get(1)?.as_str().trim();
        return Some(action_decision("click", target, None));
    }
    if let Some(caps) = navigate_regex().captures(&lower) {
        let target = caps.get(1)?.as_str().trim();
        return Some(action_decision("navigate", target, None));
    }
    if let Some(caps) = select_regex().captures(&lower) {
        let value = caps.get(1)?.as_str().trim();
        let target = caps.get(2)?.as_str().trim();
        return Some(action_decision("select", target, Some(value)));
    }
    if let Some(caps) = checkbox_regex().captures(&lower) {
        let action = if lower.starts_with("uncheck") { "uncheck" } else { "check" };
        let target = caps.get(1)?.as_str().trim();
        return Some(action_decision(action, target, None));
    }
    if lower.starts_with("wait") {
        return Some(action_decision("wait", "", None));
    }
    if assert_regex().is_match(&lower) {
        return Some(action_decision("assert-text", lower.trim(), None));
    }
    None
}

fn action_decision(action: &str, target: &str, value: Option<&str>) -> Decision {
    Decision::new(
        DecisionType::ChooseAction,
        DecisionSource::Heuristics,
        ConfidenceTier::MEDIUM,
        serde_json::json!({ "action": action, "target": target, "value": value }),
        "regex parse of step text",
    )
}

fn type_in_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:type|enter|fill)\s+['"]?([^'"]+?)['"]?\s+(?:in|into)\s+(?:the\s+)?(.+)"#).unwrap()
    })
}

fn click_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:click|tap|press)\s+(?:on\s+)?(?:the\s+)?(.+)").unwrap())
}

fn navigate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:navigate\s+to|go\s+to|visit)\s+(.+)").unwrap())
}

fn select_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?:select|choose|pick)\s+['"]?([^'"]+?)['"]?\s+(?:from|in)\s+(?:the\s+)?(.+)"#).unwrap())
}

fn checkbox_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:check|uncheck)\s+(?:the\s+)?(.+)").unwrap())
}

fn assert_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:assert|verify|should)\b").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_element_handles_click_button_intent() {
        let d = find_element("click the Submit button").unwrap();
        assert_eq!(d.value["selector"], "button:has-text(\"submit\")");
    }

    #[test]
    fn find_element_returns_none_for_generic_field_intent() {
        assert!(find_element("username field").is_none());
    }

    #[test]
    fn handle_error_tags_known_validation_message() {
        let d = handle_error("Password too short, must be 8+ characters");
        assert_eq!(d.confidence, ConfidenceTier::MEDIUM);
    }

    #[test]
    fn predict_next_uses_transition_table() {
        let d = predict_next("login", "submit").unwrap();
        assert_eq!(d.value["page_type"], "dashboard");
        assert!(predict_next("login", "hover").is_none());
    }

    #[test]
    fn wait_time_has_action_typed_defaults() {
        assert_eq!(wait_time("navigate").value["wait_ms"], 2000);
        assert_eq!(wait_time("click").value["wait_ms"], 500);
        assert_eq!(wait_time("type").value["wait_ms"], 200);
        assert_eq!(wait_time("submit").value["wait_ms"], 3000);
    }

    #[test]
    fn page_type_falls_back_to_unknown() {
        let d = page_type("https://e.com/random-thing", "Nothing Special");
        assert_eq!(d.value["page_type"], "unknown");
        assert_eq!(d.confidence, ConfidenceTier::LOW);
    }

    #[test]
    fn page_type_matches_login_keywords() {
        let d = page_type("https://e.com/login", "Sign In");
        assert_eq!(d.value["page_type"], "login");
    }

    #[test]
    fn choose_action_parses_type_click_navigate() {
        let type_decision = choose_action("Type 'alice' in the username field").unwrap();
        assert_eq!(type_decision.value["action"], "type");
        assert_eq!(type_decision.value["value"], "alice");

        let click_decision = choose_action("click the submit button").unwrap();
        assert_eq!(click_decision.value["action"], "click");

        let nav_decision = choose_action("navigate to the login page").unwrap();
        assert_eq!(nav_decision.value["action"], "navigate");
    }
}
