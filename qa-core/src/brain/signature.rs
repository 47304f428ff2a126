//! Page signature: a fingerprint of a rendered page, used to recognise
//! the same page across visits (spec §3 PageSignature, §9 Open Question
//! on the hash algorithm).
//!
//! Pinned per SPEC_FULL.md §2.3: SHA-256 over a canonical JSON
//! serialization of a plain struct (field order is the derive order,
//! which is stable, so this is already canonical without extra work).

use crate::util::normalize_page;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fingerprint of a page: normalized URL pattern, title hash, element
/// hash (hash of visible interactive elements' keys), and inferred type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSignature {
    pub normalized_url_pattern: String,
    pub title_hash: String,
    pub element_hash: String,
    pub page_type: String,
}

impl PageSignature {
    /// Compute a signature from the raw observations a browser driver
    /// would supply: the current URL, the page title, the set of
    /// semantic element keys visible on the page, and an inferred page
    /// type (see `decision::heuristics::classify_page_type`).
    pub fn compute(url: &str, title: &str, element_keys: &[String], page_type: &str) -> Self {
        let normalized_url_pattern = normalize_page(url);
        let title_hash = short_hash(title);

        let mut sorted_keys = element_keys.to_vec();
        sorted_keys.sort();
        let element_hash = short_hash(&sorted_keys.join(","));

        Self {
            normalized_url_pattern,
            title_hash,
            element_hash,
            page_type: page_type.to_string(),
        }
    }

    /// The signature's identity: SHA-256 hex digest over its canonical
    /// JSON serialization.
    pub fn digest(&self) -> String {
        let json = serde_json::to_string(self).expect("PageSignature serializes infallibly");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}
