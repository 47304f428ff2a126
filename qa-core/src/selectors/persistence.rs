//! Atomic on-disk persistence for the selector knowledge base.
//!
//! One JSON file per domain at `<data>/selectors/<domain>/element_cache.json`.
//! Writes go to a `.tmp` sibling and are renamed into place, so a crash
//! mid-write never corrupts the previous snapshot.

use crate::error::{Error, Result};
use crate::selectors::types::ElementKnowledge;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub fn domain_dir(data_dir: &Path, domain: &str) -> PathBuf {
    data_dir.join("selectors").join(sanitize(domain))
}

pub fn domain_file(data_dir: &Path, domain: &str) -> PathBuf {
    domain_dir(data_dir, domain).join("element_cache.json")
}

fn sanitize(domain: &str) -> String {
    domain
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Load a domain's element cache. Missing file is not an error (empty map).
/// A corrupt file is logged and skipped, per spec failure semantics.
pub fn load_domain(data_dir: &Path, domain: &str) -> HashMap<String, HashMap<String, ElementKnowledge>> {
    let path = domain_file(data_dir, domain);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return HashMap::new(),
    };
    match serde_json::from_str(&content) {
        Ok(map) => map,
        Err(err) => {
            tracing::warn!(domain, path = %path.display(), error = %err, "corrupt domain selector file, skipping");
            HashMap::new()
        }
    }
}

/// Atomically persist a domain's element cache: write to `.tmp`, then rename.
pub fn save_domain(
    data_dir: &Path,
    domain: &str,
    pages: &HashMap<String, HashMap<String, ElementKnowledge>>,
) -> Result<()> {
    let dir = domain_dir(data_dir, domain);
    std::fs::create_dir_all(&dir)?;
    let final_path = domain_file(data_dir, domain);
    let tmp_path = final_path.with_extension("tmp");

    let json = serde_json::to_string_pretty(pages)
        .map_err(|e| Error::persistence_error(format!("encode {domain}: {e}")))?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

pub fn scenario_cache_path(data_dir: &Path, scenario_id: &str) -> PathBuf {
    data_dir.join("scenario_cache").join(format!("{}.json", sanitize(scenario_id)))
}

pub fn load_scenario_cache(data_dir: &Path, scenario_id: &str) -> Option<HashMap<String, String>> {
    let content = std::fs::read_to_string(scenario_cache_path(data_dir, scenario_id)).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn save_scenario_cache(
    data_dir: &Path,
    scenario_id: &str,
    entries: &HashMap<String, String>,
) -> Result<()> {
    let path = scenario_cache_path(data_dir, scenario_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(entries)?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors::types::{ElementKnowledge, LearnedFrom, Selector, SelectorStrategy};

    #[test]
    fn round_trips_a_domain_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut pages: HashMap<String, HashMap<String, ElementKnowledge>> = HashMap::new();
        let mut knowledge = ElementKnowledge::new("example.com", "/login", "username");
        knowledge
            .selectors
            .push(Selector::new("#u", SelectorStrategy::Css, LearnedFrom::Execution));
        pages.entry("/login".to_string()).or_default().insert("username".to_string(), knowledge);

        save_domain(dir.path(), "example.com", &pages).unwrap();
        let reloaded = load_domain(dir.path(), "example.com");
        assert_eq!(reloaded["/login"]["username"].selectors.len(), 1);
    }

    #[test]
    fn missing_file_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_domain(dir.path(), "never-seen.com");
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = domain_dir(dir.path(), "bad.com");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("element_cache.json"), "{not json").unwrap();
        let loaded = load_domain(dir.path(), "bad.com");
        assert!(loaded.is_empty());
    }
}
