//! Page memory: keyed by [`PageSignature`], tracks observation counts,
//! typical load time, and the element-intent -> selector map learned on
//! that page.

use super::signature::PageSignature;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMemoryEntry {
    pub signature: PageSignature,
    pub observation_count: u64,
    pub last_observed: DateTime<Utc>,
    pub elements: HashMap<String, String>,
    pub typical_load_time_ms: f64,
    pub confidence: f64,
}

impl PageMemoryEntry {
    fn new(signature: PageSignature) -> Self {
        Self {
            signature,
            observation_count: 0,
            last_observed: Utc::now(),
            elements: HashMap::new(),
            typical_load_time_ms: 0.0,
            confidence: 0.5,
        }
    }
}

pub struct PageMemory {
    entries: Mutex<HashMap<String, PageMemoryEntry>>,
    data_dir: PathBuf,
}

impl PageMemory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join("brain").join("memory"))?;
        let memory = Self {
            entries: Mutex::new(HashMap::new()),
            data_dir,
        };
        memory.load();
        Ok(memory)
    }

    fn file_path(&self) -> PathBuf {
        self.data_dir.join("brain").join("memory").join("page_memory.json")
    }

    fn load(&self) {
        let Ok(content) = std::fs::read_to_string(self.file_path()) else { return };
        match serde_json::from_str::<HashMap<String, PageMemoryEntry>>(&content) {
            Ok(entries) => *self.entries.lock().expect("page memory mutex poisoned") = entries,
            Err(err) => tracing::warn!(error = %err, "corrupt page memory file, starting empty"),
        }
    }

    /// `createSignature(page)`: compute the signature from raw browser
    /// observations. See [`PageSignature::compute`].
    pub fn create_signature(
        &self,
        url: &str,
        title: &str,
        element_keys: &[String],
        page_type: &str,
    ) -> PageSignature {
        PageSignature::compute(url, title, element_keys, page_type)
    }

    /// `rememberPage(signature, loadTimeMs?, elements?)`: upsert.
    pub fn remember_page(
        &self,
        signature: PageSignature,
        load_time_ms: Option<f64>,
        elements: Option<HashMap<String, String>>,
    ) {
        let digest = signature.digest();
        let mut guard = self.entries.lock().expect("page memory mutex poisoned");
        let entry = guard.entry(digest).or_insert_with(|| PageMemoryEntry::new(signature));
        entry.observation_count += 1;
        entry.last_observed = Utc::now();
        if let Some(load_time) = load_time_ms {
            let n = entry.observation_count as f64;
            entry.typical_load_time_ms = ((entry.typical_load_time_ms * (n - 1.0)) + load_time) / n;
        }
        if let Some(elements) = elements {
            entry.elements.extend(elements);
        }
        entry.confidence = (entry.confidence + 0.05 * entry.observation_count as f64).min(1.0);
    }

    pub fn get(&self, signature: &PageSignature) -> Option<PageMemoryEntry> {
        self.entries
            .lock()
            .expect("page memory mutex poisoned")
            .get(&signature.digest())
            .cloned()
    }

    /// Known selector for an element intent on a previously observed page.
    pub fn element_selector(&self, signature: &PageSignature, element_key: &str) -> Option<String> {
        self.get(signature).and_then(|e| e.elements.get(element_key).cloned())
    }

    /// `decay(max-age-days)`: drop entries older than the threshold.
    pub fn decay(&self, max_age_days: i64) {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let mut guard = self.entries.lock().expect("page memory mutex poisoned");
        guard.retain(|_, entry| entry.last_observed >= cutoff);
    }

    pub fn flush(&self) -> Result<()> {
        let guard = self.entries.lock().expect("page memory mutex poisoned");
        let json = serde_json::to_string_pretty(&*guard)?;
        crate::brain::atomic_write(&self.file_path(), &json)
    }

    pub fn get_stats(&self) -> HashMap<String, serde_json::Value> {
        let guard = self.entries.lock().expect("page memory mutex poisoned");
        let mut stats = HashMap::new();
        stats.insert("total_pages".to_string(), serde_json::json!(guard.len()));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_page_accumulates_observations_and_load_time() {
        let dir = tempfile::tempdir().unwrap();
        let memory = PageMemory::new(dir.path()).unwrap();
        let sig = PageSignature::compute("https://e.com/login", "Login", &[], "login");

        memory.remember_page(sig.clone(), Some(1000.0), None);
        memory.remember_page(sig.clone(), Some(2000.0), None);

        let entry = memory.get(&sig).unwrap();
        assert_eq!(entry.observation_count, 2);
        assert_eq!(entry.typical_load_time_ms, 1500.0);
    }

    #[test]
    fn element_selector_reads_back_remembered_elements() {
        let dir = tempfile::tempdir().unwrap();
        let memory = PageMemory::new(dir.path()).unwrap();
        let sig = PageSignature::compute("https://e.com/login", "Login", &[], "login");
        let mut elements = HashMap::new();
        elements.insert("username".to_string(), "#u".to_string());
        memory.remember_page(sig.clone(), None, Some(elements));
        assert_eq!(memory.element_selector(&sig, "username"), Some("#u".to_string()));
    }

    #[test]
    fn decay_drops_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let memory = PageMemory::new(dir.path()).unwrap();
        let sig = PageSignature::compute("https://e.com/login", "Login", &[], "login");
        memory.remember_page(sig.clone(), None, None);
        {
            let mut guard = memory.entries.lock().unwrap();
            guard.get_mut(&sig.digest()).unwrap().last_observed = Utc::now() - chrono::Duration::days(40);
        }
        memory.decay(30);
        assert!(memory.get(&sig).is_none());
    }

    #[test]
    fn flush_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let sig = PageSignature::compute("https://e.com/login", "Login", &[], "login");
        {
            let memory = PageMemory::new(dir.path()).unwrap();
            memory.remember_page(sig.clone(), Some(500.0), None);
            memory.flush().unwrap();
        }
        let reloaded = PageMemory::new(dir.path()).unwrap();
        assert_eq!(reloaded.get(&sig).unwrap().typical_load_time_ms, 500.0);
    }
}
