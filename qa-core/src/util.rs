//! Small normalization helpers shared by the knowledge base, brain
//! memories, and decision engine.

use regex::Regex;
use std::sync::OnceLock;

/// Returns the registered domain of a URL (scheme and port stripped).
///
/// `https://app.example.com:8443/login?x=1` -> `app.example.com`.
pub fn registered_domain(url: &str) -> String {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);
    host.split(':').next().unwrap_or(host).to_lowercase()
}

/// Normalizes a page path: strips the query/fragment and collapses
/// numeric path segments (ids) to `:id` so `/orders/482` and `/orders/9`
/// are treated as the same page.
pub fn normalize_page(url_or_path: &str) -> String {
    let without_scheme = url_or_path
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url_or_path);
    let path = without_scheme
        .split_once('/')
        .map(|(_, rest)| rest)
        .unwrap_or("");
    let path = path.split(['?', '#']).next().unwrap_or("");

    let numeric_id = numeric_id_regex();
    let collapsed: Vec<&str> = path
        .split('/')
        .map(|segment| if numeric_id.is_match(segment) { ":id" } else { segment })
        .collect();
    let collapsed = collapsed.join("/");

    let normalized = format!("/{}", collapsed.trim_matches('/'));
    if normalized == "/" {
        normalized
    } else {
        normalized.trim_end_matches('/').to_string()
    }
}

fn numeric_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+$").unwrap())
}

/// Tokenizes free text into lowercase alphanumeric words, for fuzzy
/// matching of step text, error messages, and intents.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Jaccard-style overlap between two token sets, in `[0, 1]`.
pub fn token_overlap(a: &[String], b: &[String]) -> f64 {
    use std::collections::HashSet;
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_domain_strips_scheme_port_path() {
        assert_eq!(
            registered_domain("https://app.example.com:8443/login?x=1"),
            "app.example.com"
        );
        assert_eq!(registered_domain("example.com/foo"), "example.com");
    }

    #[test]
    fn normalize_page_strips_query_and_collapses_ids() {
        assert_eq!(normalize_page("https://e.com/orders/482?x=1"), "/orders/:id");
        assert_eq!(normalize_page("https://e.com/login"), "/login");
        assert_eq!(normalize_page("https://e.com/"), "/");
    }

    #[test]
    fn token_overlap_basic() {
        let a = tokenize("click the submit button");
        let b = tokenize("click submit");
        assert!(token_overlap(&a, &b) > 0.3);
        assert_eq!(token_overlap(&[], &b), 0.0);
    }
}
