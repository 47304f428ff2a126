//! Action Pattern Store: a small library of generalized
//! action recipes with usage statistics.

pub mod types;

pub use types::{ActionPattern, PatternStep};

use crate::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Catalog of action patterns, seeded with built-ins on first construction.
pub struct PatternStore {
    patterns: Mutex<HashMap<String, ActionPattern>>,
    data_dir: PathBuf,
}

impl PatternStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join("patterns"))?;
        let store = Self {
            patterns: Mutex::new(HashMap::new()),
            data_dir,
        };
        store.load_or_seed();
        Ok(store)
    }

    fn file_path(&self) -> PathBuf {
        self.data_dir.join("patterns").join("patterns.json")
    }

    fn load_or_seed(&self) {
        let mut guard = self.patterns.lock().expect("pattern store mutex poisoned");
        for pattern in builtin_patterns() {
            guard.insert(pattern.id.clone(), pattern);
        }
        if let Ok(content) = std::fs::read_to_string(self.file_path()) {
            match serde_json::from_str::<Vec<ActionPattern>>(&content) {
                Ok(patterns) => {
                    for pattern in patterns {
                        guard.insert(pattern.id.clone(), pattern);
                    }
                }
                Err(_) => {
                    tracing::warn!(path = %self.file_path().display(), "corrupt pattern file, keeping built-ins only");
                }
            }
        }
    }

    /// `FindPattern(intent?, category?) -> [ActionPattern]`, sorted by
    /// confidence descending.
    pub fn find_pattern(&self, intent: Option<&str>, category: Option<&str>) -> Vec<ActionPattern> {
        let guard = self.patterns.lock().expect("pattern store mutex poisoned");
        let mut matches: Vec<ActionPattern> = guard
            .values()
            .filter(|p| category.map(|c| p.category == c).unwrap_or(true))
            .filter(|p| p.matches(intent, None))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.confidence().partial_cmp(&a.confidence()).unwrap());
        matches
    }

    pub fn get_pattern(&self, id: &str) -> Option<ActionPattern> {
        self.patterns.lock().expect("pattern store mutex poisoned").get(id).cloned()
    }

    /// `AddPattern(pattern) -> id`, generating one if absent.
    pub fn add_pattern(&self, mut pattern: ActionPattern) -> Result<String> {
        if pattern.id.is_empty() {
            pattern.id = uuid::Uuid::new_v4().to_string();
        }
        let id = pattern.id.clone();
        self.patterns.lock().expect("pattern store mutex poisoned").insert(id.clone(), pattern);
        self.persist()?;
        Ok(id)
    }

    /// `UpdateStats(id, success)`.
    pub fn update_stats(&self, id: &str, success: bool) -> Result<()> {
        {
            let mut guard = self.patterns.lock().expect("pattern store mutex poisoned");
            if let Some(pattern) = guard.get_mut(id) {
                pattern.record_usage(success);
            }
        }
        self.persist()
    }

    pub fn get_stats(&self) -> HashMap<String, serde_json::Value> {
        let guard = self.patterns.lock().expect("pattern store mutex poisoned");
        let mut stats = HashMap::new();
        stats.insert("total_patterns".to_string(), serde_json::json!(guard.len()));
        let total_used: u64 = guard.values().map(|p| p.used).sum();
        stats.insert("total_used".to_string(), serde_json::json!(total_used));
        stats
    }

    fn persist(&self) -> Result<()> {
        let guard = self.patterns.lock().expect("pattern store mutex poisoned");
        let patterns: Vec<&ActionPattern> = guard.values().collect();
        let json = serde_json::to_string_pretty(&patterns)?;
        atomic_write(&self.file_path(), &json)
    }
}

fn atomic_write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Built-in patterns seeded on first construction: login, search, form-submit.
fn builtin_patterns() -> Vec<ActionPattern> {
    vec![
        ActionPattern::new("builtin_login", "Login", "login")
            .with_keywords(["log in", "sign in", "login"])
            .with_url_hints(["/login", "/signin", "/auth"])
            .with_steps(vec![
                PatternStep::new("fill", "username")
                    .with_selectors(["#username", "[name=\"username\"]", "[name=\"email\"]"]),
                PatternStep::new("fill", "password")
                    .with_selectors(["#password", "[name=\"password\"]"]),
                PatternStep::new("click", "login_submit")
                    .with_selectors(["button[type=\"submit\"]", "#login-button"]),
            ]),
        ActionPattern::new("builtin_search", "Search", "search")
            .with_keywords(["search", "find", "look for"])
            .with_url_hints([])
            .with_steps(vec![
                PatternStep::new("fill", "search_input")
                    .with_selectors(["[type=\"search\"]", "#search", "[name=\"q\"]"]),
                PatternStep::new("press-key", "search_input").with_value("Enter"),
            ]),
        ActionPattern::new("builtin_form_submit", "Submit Form", "form-submit")
            .with_keywords(["submit", "save", "continue", "next"])
            .with_url_hints([])
            .with_steps(vec![PatternStep::new("click", "form_submit")
                .with_selectors(["button[type=\"submit\"]", "input[type=\"submit\"]"])]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_builtins_on_first_construction() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatternStore::new(dir.path()).unwrap();
        assert!(store.get_pattern("builtin_login").is_some());
        assert!(store.get_pattern("builtin_search").is_some());
        assert!(store.get_pattern("builtin_form_submit").is_some());
    }

    #[test]
    fn find_pattern_sorts_by_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatternStore::new(dir.path()).unwrap();
        store.update_stats("builtin_login", true).unwrap();
        store.update_stats("builtin_login", true).unwrap();
        store.update_stats("builtin_search", false).unwrap();
        store.update_stats("builtin_search", true).unwrap();

        let matches = store.find_pattern(None, None);
        let login_idx = matches.iter().position(|p| p.id == "builtin_login").unwrap();
        let search_idx = matches.iter().position(|p| p.id == "builtin_search").unwrap();
        assert!(login_idx < search_idx);
    }

    #[test]
    fn add_pattern_generates_id_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = PatternStore::new(dir.path()).unwrap();
        let pattern = ActionPattern::new("", "Custom", "custom");
        let id = store.add_pattern(pattern).unwrap();
        assert!(!id.is_empty());
        assert!(store.get_pattern(&id).is_some());
    }

    #[test]
    fn persists_custom_patterns_and_builtin_stat_updates_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = PatternStore::new(dir.path()).unwrap();
            store.add_pattern(ActionPattern::new("custom1", "Custom", "custom")).unwrap();
            store.update_stats("builtin_login", true).unwrap();
        }
        let reloaded = PatternStore::new(dir.path()).unwrap();
        assert!(reloaded.get_pattern("custom1").is_some());
        assert_eq!(reloaded.get_pattern("builtin_login").unwrap().used, 1);
    }
}
