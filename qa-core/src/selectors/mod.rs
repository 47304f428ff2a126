//! Selector Knowledge Base (spec §4.1): an indexed, persistent store
//! mapping `(domain, page, element-intent) -> ranked selectors`.
//!
//! Five cooperating indexes, as specified: a primary `domain -> page ->
//! element-key -> ElementKnowledge` map, an intent-hash map for O(1)
//! cross-domain intent search, a reverse selector-string map, a Bloom
//! filter for fast negative lookups, and a trie for fuzzy/prefix intent
//! search, plus a bounded LRU for hot results.

pub mod bloom;
pub mod persistence;
pub mod trie;
pub mod types;

pub use bloom::BloomFilter;
pub use trie::Trie;
pub use types::{ElementKnowledge, KnowledgeStats, LearnedFrom, Selector, SelectorMatch, SelectorStrategy};

use crate::error::Result;
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

const LRU_CAPACITY: usize = 1000;
const BLOOM_CAPACITY: usize = 100_000;
const BLOOM_ERROR_RATE: f64 = 0.01;
const FUZZY_CONFIDENCE_PENALTY: f64 = 0.8;
const PERSISTENCE_INTERVAL: Duration = Duration::from_secs(30);
/// Below this confidence, a stale entry is decay-eligible (spec §4.6
/// "DecayOldKnowledge"). Mirrors `ConfidenceTier::MEDIUM` in `decision/types.rs`;
/// duplicated rather than imported so `selectors` has no dependency on `decision`.
const DECAY_CONFIDENCE_THRESHOLD: f64 = 0.5;

struct Inner {
    /// domain -> page -> element_key -> knowledge
    primary: HashMap<String, HashMap<String, HashMap<String, ElementKnowledge>>>,
    /// hash(normalized element-key) -> matches across domains/pages
    intent_hash: HashMap<u64, Vec<SelectorMatch>>,
    /// selector string -> owning (domain, page, element_key)
    reverse: HashMap<String, (String, String, String)>,
    loaded_domains: HashSet<String>,
    stats: KnowledgeStats,
}

/// The Selector Knowledge Base.
pub struct KnowledgeBase {
    inner: Mutex<Inner>,
    bloom: BloomFilter,
    trie: Trie,
    lru: Mutex<LruCache<String, ElementKnowledge>>,
    persistence_queue: Mutex<HashSet<String>>,
    data_dir: PathBuf,
}

fn composite_key(domain: &str, page: &str, element_key: &str) -> String {
    format!("{domain}:{page}:{element_key}")
}

fn normalized_key_hash(element_key: &str) -> u64 {
    let normalized: String = element_key
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

impl KnowledgeBase {
    /// Create a knowledge base rooted at `data_dir`, importing any
    /// exploration-produced element lists found under
    /// `<data_dir>/explorations/*.json`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let kb = Self {
            inner: Mutex::new(Inner {
                primary: HashMap::new(),
                intent_hash: HashMap::new(),
                reverse: HashMap::new(),
                loaded_domains: HashSet::new(),
                stats: KnowledgeStats::default(),
            }),
            bloom: BloomFilter::new(BLOOM_CAPACITY, BLOOM_ERROR_RATE),
            trie: Trie::new(),
            lru: Mutex::new(LruCache::new(NonZeroUsize::new(LRU_CAPACITY).unwrap())),
            persistence_queue: Mutex::new(HashSet::new()),
            data_dir,
        };
        kb.import_explorations();
        Ok(kb)
    }

    fn ensure_domain_loaded(&self, domain: &str) {
        let mut inner = self.inner.lock().expect("kb mutex poisoned");
        if inner.loaded_domains.contains(domain) {
            return;
        }
        let pages = persistence::load_domain(&self.data_dir, domain);
        for (page, elements) in &pages {
            for (key, knowledge) in elements {
                Self::index_locked(&mut inner, &self.bloom, &self.trie, domain, page, key, knowledge);
            }
        }
        inner.primary.insert(domain.to_string(), pages);
        inner.loaded_domains.insert(domain.to_string());
    }

    fn index_locked(
        inner: &mut Inner,
        bloom: &BloomFilter,
        trie: &Trie,
        domain: &str,
        page: &str,
        key: &str,
        knowledge: &ElementKnowledge,
    ) {
        bloom.add(&composite_key(domain, page, key));
        trie.insert(key);
        let hash = normalized_key_hash(key);
        let entry = inner.intent_hash.entry(hash).or_default();
        entry.retain(|m| !(m.domain == domain && m.page == page && m.element_key == key));
        if let Some(best) = knowledge.best_selector() {
            entry.push(SelectorMatch {
                selector: best.value.clone(),
                strategy: best.strategy,
                confidence: best.confidence(),
                domain: domain.to_string(),
                page: page.to_string(),
                element_key: key.to_string(),
                tier: "knowledge_base".to_string(),
            });
        }
        for selector in &knowledge.selectors {
            inner.reverse.insert(
                selector.value.clone(),
                (domain.to_string(), page.to_string(), key.to_string()),
            );
        }
    }

    /// `Lookup(domain, page, key) -> ElementKnowledge?`
    ///
    /// LRU -> Bloom (negative fast-path) -> lazy domain load -> primary map.
    pub fn lookup(&self, domain: &str, page: &str, element_key: &str) -> Option<ElementKnowledge> {
        let cache_key = composite_key(domain, page, element_key);

        {
            let mut lru = self.lru.lock().expect("lru mutex poisoned");
            if let Some(hit) = lru.get(&cache_key) {
                let mut inner = self.inner.lock().expect("kb mutex poisoned");
                inner.stats.total_lookups += 1;
                inner.stats.cache_hits += 1;
                return Some(hit.clone());
            }
        }

        {
            let mut inner = self.inner.lock().expect("kb mutex poisoned");
            inner.stats.total_lookups += 1;
            if !self.bloom.might_contain(&cache_key) {
                inner.stats.bloom_filter_saves += 1;
                inner.stats.cache_misses += 1;
                return None;
            }
        }

        self.ensure_domain_loaded(domain);

        let mut inner = self.inner.lock().expect("kb mutex poisoned");
        let found = inner
            .primary
            .get(domain)
            .and_then(|pages| pages.get(page))
            .and_then(|elements| elements.get(element_key))
            .cloned();

        if found.is_none() {
            inner.stats.cache_misses += 1;
        }
        drop(inner);

        if let Some(knowledge) = &found {
            let mut lru = self.lru.lock().expect("lru mutex poisoned");
            lru.put(cache_key, knowledge.clone());
        }
        found
    }

    /// `FindByIntent(intent, domain?, page?, limit) -> [SelectorMatch]`
    ///
    /// Exact hash first; on miss, trie-based similar-key search with a
    /// 0.8x confidence penalty applied to fuzzy matches (read-time only,
    /// see SPEC_FULL.md §2.1).
    pub fn find_by_intent(
        &self,
        intent: &str,
        domain: Option<&str>,
        page: Option<&str>,
        limit: usize,
    ) -> Vec<SelectorMatch> {
        let hash = normalized_key_hash(intent);
        let inner = self.inner.lock().expect("kb mutex poisoned");

        let filter = |m: &&SelectorMatch| {
            domain.map(|d| m.domain == d).unwrap_or(true) && page.map(|p| m.page == p).unwrap_or(true)
        };

        if let Some(matches) = inner.intent_hash.get(&hash) {
            let mut exact: Vec<SelectorMatch> = matches.iter().filter(filter).cloned().collect();
            if !exact.is_empty() {
                exact.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
                exact.truncate(limit);
                return exact;
            }
        }

        let similar_keys = self.trie.find_similar(intent, limit.max(5));
        let mut fuzzy = Vec::new();
        for key in similar_keys {
            let key_hash = normalized_key_hash(&key);
            if let Some(matches) = inner.intent_hash.get(&key_hash) {
                for m in matches.iter().filter(filter) {
                    let mut penalized = m.clone();
                    penalized.confidence *= FUZZY_CONFIDENCE_PENALTY;
                    penalized.tier = "fuzzy".to_string();
                    fuzzy.push(penalized);
                }
            }
        }
        fuzzy.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        fuzzy.truncate(limit);
        fuzzy
    }

    /// `AddLearning(domain, page, key, selector, strategy, success, ...)`
    ///
    /// Upserts a selector into `ElementKnowledge`, recomputes confidence,
    /// re-sorts, refreshes the side indexes, and queues the triple for
    /// persistence.
    #[allow(clippy::too_many_arguments)]
    pub fn add_learning(
        &self,
        domain: &str,
        page: &str,
        element_key: &str,
        selector_value: &str,
        strategy: SelectorStrategy,
        success: bool,
        learned_from: LearnedFrom,
        element_type: Option<String>,
        context: Option<HashMap<String, serde_json::Value>>,
    ) {
        self.ensure_domain_loaded(domain);
        let mut inner = self.inner.lock().expect("kb mutex poisoned");

        let pages = inner.primary.entry(domain.to_string()).or_default();
        let elements = pages.entry(page.to_string()).or_default();
        let knowledge = elements
            .entry(element_key.to_string())
            .or_insert_with(|| ElementKnowledge::new(domain, page, element_key));

        if let Some(existing) = knowledge
            .selectors
            .iter_mut()
            .find(|s| s.value == selector_value && s.strategy == strategy)
        {
            existing.record(success);
            existing.learned_from = learned_from;
        } else {
            let mut selector = Selector::new(selector_value, strategy, learned_from);
            selector.record(success);
            knowledge.selectors.push(selector);
        }
        knowledge.resort();
        if success {
            knowledge.last_success = Some(chrono::Utc::now());
        }
        if let Some(t) = element_type {
            knowledge.element_type = Some(t);
        }
        if let Some(c) = context {
            knowledge.context.extend(c);
        }

        let knowledge_snapshot = knowledge.clone();
        Self::index_locked(
            &mut inner,
            &self.bloom,
            &self.trie,
            domain,
            page,
            element_key,
            &knowledge_snapshot,
        );
        drop(inner);

        {
            let mut lru = self.lru.lock().expect("lru mutex poisoned");
            lru.put(composite_key(domain, page, element_key), knowledge_snapshot);
        }
        self.mark_dirty(domain);
    }

    fn mark_dirty(&self, domain: &str) {
        let mut queue = self.persistence_queue.lock().expect("persistence queue mutex poisoned");
        queue.insert(domain.to_string());
    }

    /// `GetStats() -> {counts, cache-hit-rate, bloom-save-rate, ...}`
    pub fn get_stats(&self) -> KnowledgeStats {
        let inner = self.inner.lock().expect("kb mutex poisoned");
        let mut stats = inner.stats.clone();
        stats.total_domains = inner.primary.len();
        stats.total_elements = inner
            .primary
            .values()
            .flat_map(|pages| pages.values())
            .map(|elements| elements.len())
            .sum();
        stats
    }

    /// Flush all dirty domains to disk immediately.
    pub fn force_save(&self) -> Result<()> {
        let dirty: Vec<String> = {
            let mut queue = self.persistence_queue.lock().expect("persistence queue mutex poisoned");
            queue.drain().collect()
        };
        for domain in dirty {
            self.persist_domain(&domain)?;
        }
        Ok(())
    }

    fn persist_domain(&self, domain: &str) -> Result<()> {
        let inner = self.inner.lock().expect("kb mutex poisoned");
        if let Some(pages) = inner.primary.get(domain) {
            persistence::save_domain(&self.data_dir, domain, pages)?;
        }
        Ok(())
    }

    /// Spawn the background persistence task: flushes all pending save
    /// requests every 30 seconds. Returns the task handle so callers can
    /// abort it on shutdown.
    pub fn spawn_persistence_task(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let kb = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PERSISTENCE_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(err) = kb.force_save() {
                    tracing::warn!(error = %err, "knowledge base persistence flush failed");
                }
            }
        })
    }

    /// `DecayOldKnowledge(maxAgeDays)` (spec §4.6): drops `ElementKnowledge`
    /// entries whose best selector's `last_used` is older than the
    /// threshold and whose confidence is below medium. Only touches
    /// already-loaded domains, matching the lazy-load contract elsewhere
    /// in this store; a domain nobody has looked up yet has nothing to decay.
    pub fn decay(&self, max_age_days: i64) {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(max_age_days);
        let mut removed: Vec<(String, String, String)> = Vec::new();
        let mut dirty_domains: Vec<String> = Vec::new();

        {
            let mut inner = self.inner.lock().expect("kb mutex poisoned");
            let domains: Vec<String> = inner.primary.keys().cloned().collect();
            for domain in domains {
                let mut touched = false;
                if let Some(pages) = inner.primary.get_mut(&domain) {
                    for (page, elements) in pages.iter_mut() {
                        let stale: Vec<String> = elements
                            .iter()
                            .filter(|(_, knowledge)| match knowledge.best_selector() {
                                Some(best) => best.last_used < cutoff && best.confidence() < DECAY_CONFIDENCE_THRESHOLD,
                                None => false,
                            })
                            .map(|(key, _)| key.clone())
                            .collect();
                        for key in stale {
                            elements.remove(&key);
                            removed.push((domain.clone(), page.clone(), key));
                            touched = true;
                        }
                    }
                }
                if touched {
                    dirty_domains.push(domain);
                }
            }

            for (domain, page, key) in &removed {
                let hash = normalized_key_hash(key);
                if let Some(matches) = inner.intent_hash.get_mut(&hash) {
                    matches.retain(|m| !(&m.domain == domain && &m.page == page && &m.element_key == key));
                }
            }
            inner
                .reverse
                .retain(|_, (d, p, k)| !removed.iter().any(|(rd, rp, rk)| rd == d && rp == p && rk == k));
        }

        if !removed.is_empty() {
            let mut lru = self.lru.lock().expect("lru mutex poisoned");
            for (domain, page, key) in &removed {
                lru.pop(&composite_key(domain, page, key));
            }
        }

        for domain in dirty_domains {
            self.mark_dirty(&domain);
        }
    }

    /// Test-only hook: backdate every selector on a triple's
    /// `ElementKnowledge` so decay tests don't have to wait out real time.
    #[cfg(test)]
    pub fn backdate_for_test(&self, domain: &str, page: &str, element_key: &str, age_days: i64) {
        self.ensure_domain_loaded(domain);
        let mut inner = self.inner.lock().expect("kb mutex poisoned");
        if let Some(knowledge) = inner
            .primary
            .get_mut(domain)
            .and_then(|pages| pages.get_mut(page))
            .and_then(|elements| elements.get_mut(element_key))
        {
            let backdated = chrono::Utc::now() - chrono::Duration::days(age_days);
            for selector in &mut knowledge.selectors {
                selector.last_used = backdated;
            }
        }
    }

    /// Whether `selector_value` is already a known candidate for this
    /// triple. Used to tell a genuinely new learned selector apart from
    /// a repeated observation of one already on file.
    pub fn has_selector(&self, domain: &str, page: &str, element_key: &str, selector_value: &str) -> bool {
        self.lookup(domain, page, element_key)
            .map(|k| k.selectors.iter().any(|s| s.value == selector_value))
            .unwrap_or(false)
    }

    pub fn get_scenario_cache(&self, scenario_id: &str) -> Option<HashMap<String, String>> {
        persistence::load_scenario_cache(&self.data_dir, scenario_id)
    }

    pub fn save_scenario_cache(&self, scenario_id: &str, entries: &HashMap<String, String>) -> Result<()> {
        persistence::save_scenario_cache(&self.data_dir, scenario_id, entries)
    }

    fn import_explorations(&self) {
        let pattern = self.data_dir.join("explorations").join("*.json");
        let Some(pattern) = pattern.to_str() else { return };
        let Ok(paths) = glob::glob(pattern) else { return };
        for path in paths.flatten() {
            let Ok(content) = std::fs::read_to_string(&path) else { continue };
            let Ok(entries) = serde_json::from_str::<Vec<ExplorationEntry>>(&content) else {
                tracing::warn!(path = %path.display(), "skipping unparsable exploration file");
                continue;
            };
            for entry in entries {
                if entry.confidence < 0.5 {
                    continue;
                }
                let existing_confidence = self
                    .lookup(&entry.domain, &entry.page, &entry.element_key)
                    .and_then(|k| k.best_selector().map(|s| s.confidence()));
                if existing_confidence.map(|c| c >= entry.confidence).unwrap_or(false) {
                    continue;
                }
                self.add_learning(
                    &entry.domain,
                    &entry.page,
                    &entry.element_key,
                    &entry.selector,
                    entry.strategy,
                    true,
                    LearnedFrom::Exploration,
                    None,
                    None,
                );
            }
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ExplorationEntry {
    domain: String,
    page: String,
    element_key: String,
    selector: String,
    strategy: SelectorStrategy,
    confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb() -> KnowledgeBase {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        std::mem::forget(dir);
        KnowledgeBase::new(path).unwrap()
    }

    #[test]
    fn lookup_miss_then_hit_after_add_learning() {
        let kb = kb();
        assert!(kb.lookup("example.com", "/login", "username").is_none());
        kb.add_learning(
            "example.com",
            "/login",
            "username",
            "#u",
            SelectorStrategy::Css,
            true,
            LearnedFrom::Execution,
            None,
            None,
        );
        let knowledge = kb.lookup("example.com", "/login", "username").unwrap();
        assert_eq!(knowledge.best_selector().unwrap().value, "#u");
        assert_eq!(knowledge.best_selector().unwrap().confidence(), 1.0);
    }

    #[test]
    fn repeated_failures_drop_confidence_below_a_healthier_selector() {
        let kb = kb();
        kb.add_learning(
            "example.com", "/login", "username", "#old-id", SelectorStrategy::Css,
            true, LearnedFrom::Manual, None, None,
        );
        kb.add_learning(
            "example.com", "/login", "username", "#old-id", SelectorStrategy::Css,
            false, LearnedFrom::Execution, None, None,
        );
        kb.add_learning(
            "example.com", "/login", "username", "[name=\"username\"]", SelectorStrategy::Css,
            true, LearnedFrom::Execution, None, None,
        );
        let knowledge = kb.lookup("example.com", "/login", "username").unwrap();
        assert_eq!(knowledge.best_selector().unwrap().value, "[name=\"username\"]");
    }

    #[test]
    fn find_by_intent_exact_then_fuzzy() {
        let kb = kb();
        kb.add_learning(
            "example.com", "/login", "login_submit", "#submit", SelectorStrategy::Css,
            true, LearnedFrom::Execution, None, None,
        );
        let exact = kb.find_by_intent("login_submit", None, None, 5);
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].tier, "knowledge_base");

        let fuzzy = kb.find_by_intent("login_subm", None, None, 5);
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].tier, "fuzzy");
        assert!((fuzzy[0].confidence - exact[0].confidence * FUZZY_CONFIDENCE_PENALTY).abs() < 1e-9);
    }

    #[test]
    fn force_save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let kb = KnowledgeBase::new(dir.path()).unwrap();
        kb.add_learning(
            "example.com", "/login", "username", "#u", SelectorStrategy::Css,
            true, LearnedFrom::Execution, None, None,
        );
        kb.force_save().unwrap();

        let reloaded = KnowledgeBase::new(dir.path()).unwrap();
        let knowledge = reloaded.lookup("example.com", "/login", "username").unwrap();
        assert_eq!(knowledge.best_selector().unwrap().value, "#u");
    }

    #[test]
    fn get_stats_tracks_lookups_and_bloom_saves() {
        let kb = kb();
        kb.lookup("never.com", "/x", "y");
        let stats = kb.get_stats();
        assert_eq!(stats.total_lookups, 1);
        assert_eq!(stats.bloom_filter_saves, 1);
    }

    #[test]
    fn decay_drops_stale_low_confidence_entries_but_keeps_fresh_and_confident_ones() {
        let kb = kb();
        kb.add_learning(
            "example.com", "/login", "stale_low_conf", "#gone", SelectorStrategy::Css,
            false, LearnedFrom::Execution, None, None,
        );
        kb.backdate_for_test("example.com", "/login", "stale_low_conf", 90);

        kb.add_learning(
            "example.com", "/login", "stale_high_conf", "#stays", SelectorStrategy::Css,
            true, LearnedFrom::Execution, None, None,
        );
        kb.backdate_for_test("example.com", "/login", "stale_high_conf", 90);

        kb.add_learning(
            "example.com", "/login", "fresh_low_conf", "#recent", SelectorStrategy::Css,
            false, LearnedFrom::Execution, None, None,
        );

        kb.decay(30);

        assert!(kb.lookup("example.com", "/login", "stale_low_conf").is_none());
        assert!(kb.lookup("example.com", "/login", "stale_high_conf").is_some());
        assert!(kb.lookup("example.com", "/login", "fresh_low_conf").is_some());
    }
}
