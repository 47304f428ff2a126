//! AI response cache: in-memory plus a per-entry disk file, keyed by a
//! hash of the request's type, prompt, and canonicalized context
//!.

use super::types::AiResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

const MAX_ENTRIES: usize = 1000;

pub fn cache_key(request_type: &str, prompt: &str, context: &serde_json::Value) -> String {
    let canonical_context = canonicalize(context);
    let mut hasher = Sha256::new();
    hasher.update(request_type.as_bytes());
    hasher.update(b"|");
    hasher.update(prompt.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_context.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical serialization of a context value: `serde_json::Value`'s
/// `Map` is a `BTreeMap` internally, so `to_string` is already key-order
/// stable.
fn canonicalize(context: &serde_json::Value) -> String {
    serde_json::to_string(context).unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    response: AiResponse,
    inserted_at: DateTime<Utc>,
}

pub struct AiCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    data_dir: PathBuf,
}

impl AiCache {
    pub fn new(data_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join("ai_cache"))?;
        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            data_dir,
        })
    }

    fn disk_path(&self, key: &str) -> PathBuf {
        self.data_dir.join("ai_cache").join(format!("{key}.json"))
    }

    /// In-memory lookup, then disk.
    pub fn get(&self, key: &str) -> Option<AiResponse> {
        if let Some(entry) = self.entries.lock().expect("ai cache mutex poisoned").get(key) {
            return Some(entry.response.clone());
        }
        let content = std::fs::read_to_string(self.disk_path(key)).ok()?;
        let entry: CacheEntry = serde_json::from_str(&content).ok()?;
        let response = entry.response.clone();
        self.entries.lock().expect("ai cache mutex poisoned").insert(key.to_string(), entry);
        Some(response)
    }

    pub fn put(&self, key: &str, response: AiResponse) {
        let entry = CacheEntry {
            response,
            inserted_at: Utc::now(),
        };
        {
            let mut guard = self.entries.lock().expect("ai cache mutex poisoned");
            guard.insert(key.to_string(), entry.clone());
            if guard.len() > MAX_ENTRIES {
                Self::evict_oldest_quarter(&mut guard);
            }
        }
        if let Ok(json) = serde_json::to_string_pretty(&entry) {
            let _ = std::fs::write(self.disk_path(key), json);
        }
    }

    /// Drop the oldest quarter of entries once the bound is exceeded.
    fn evict_oldest_quarter(entries: &mut HashMap<String, CacheEntry>) {
        let mut by_age: Vec<(String, DateTime<Utc>)> =
            entries.iter().map(|(k, v)| (k.clone(), v.inserted_at)).collect();
        by_age.sort_by_key(|(_, inserted_at)| *inserted_at);
        let drop_count = by_age.len() / 4;
        for (key, _) in by_age.into_iter().take(drop_count) {
            entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_under_context_key_reordering() {
        let a = cache_key("find_element", "p", &serde_json::json!({ "x": 1, "y": 2 }));
        let b = cache_key("find_element", "p", &serde_json::json!({ "y": 2, "x": 1 }));
        assert_eq!(a, b);
    }

    #[test]
    fn put_then_get_round_trips_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AiCache::new(dir.path()).unwrap();
        cache.put("k1", AiResponse::cached_hit("hello".into()));
        assert_eq!(cache.get("k1").unwrap().content, "hello");
    }

    #[test]
    fn get_falls_back_to_disk_when_not_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = AiCache::new(dir.path()).unwrap();
            cache.put("k1", AiResponse::cached_hit("hello".into()));
        }
        let reloaded = AiCache::new(dir.path()).unwrap();
        assert_eq!(reloaded.get("k1").unwrap().content, "hello");
    }

    #[test]
    fn overflow_evicts_oldest_quarter() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AiCache::new(dir.path()).unwrap();
        for i in 0..(MAX_ENTRIES + 10) {
            cache.put(&format!("k{i}"), AiResponse::cached_hit(format!("v{i}")));
        }
        let remaining = cache.entries.lock().unwrap().len();
        assert!(remaining <= MAX_ENTRIES);
    }
}
