//! Trie of normalized element-keys for fuzzy/prefix intent search.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Node {
    children: HashMap<char, Node>,
    /// Original (non-normalized) key stored at a terminal node.
    original: Option<String>,
}

/// Thread-safe prefix trie over normalized element-keys.
pub struct Trie {
    root: Mutex<Node>,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl Trie {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Node::default()),
        }
    }

    fn normalize(word: &str) -> String {
        word.to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect()
    }

    pub fn insert(&self, word: &str) {
        let normalized = Self::normalize(word);
        let mut root = self.root.lock().expect("trie mutex poisoned");
        let mut node = &mut *root;
        for c in normalized.chars() {
            node = node.children.entry(c).or_default();
        }
        node.original = Some(word.to_string());
    }

    pub fn find_exact(&self, word: &str) -> Option<String> {
        let normalized = Self::normalize(word);
        let root = self.root.lock().expect("trie mutex poisoned");
        let mut node = &*root;
        for c in normalized.chars() {
            node = node.children.get(&c)?;
        }
        node.original.clone()
    }

    pub fn find_prefix(&self, prefix: &str, limit: usize) -> Vec<String> {
        let normalized = Self::normalize(prefix);
        let root = self.root.lock().expect("trie mutex poisoned");
        let mut node = &*root;
        for c in normalized.chars() {
            match node.children.get(&c) {
                Some(n) => node = n,
                None => return Vec::new(),
            }
        }
        let mut results = Vec::new();
        Self::collect(node, &mut results, limit);
        results
    }

    fn collect(node: &Node, results: &mut Vec<String>, limit: usize) {
        if results.len() >= limit {
            return;
        }
        if let Some(original) = &node.original {
            results.push(original.clone());
        }
        for child in node.children.values() {
            if results.len() >= limit {
                return;
            }
            Self::collect(child, results, limit);
        }
    }

    /// Fuzzy search: probes shrinking prefixes of `query` until matches appear.
    pub fn find_similar(&self, query: &str, limit: usize) -> Vec<String> {
        let normalized = Self::normalize(query);
        if normalized.is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = normalized.chars().collect();
        for len in (1..=chars.len()).rev() {
            let prefix: String = chars[..len].iter().collect();
            let matches = self.find_prefix(&prefix, limit);
            if !matches.is_empty() {
                return matches;
            }
        }
        Vec::new()
    }
}
