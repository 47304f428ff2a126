//! Fixed-capacity Bloom filter used to fast-reject knowledge-base misses.

use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// A simple bit-array Bloom filter sized for `capacity` items at the given
/// target false-positive rate.
pub struct BloomFilter {
    bits: Mutex<Vec<bool>>,
    size: usize,
    hash_count: u32,
}

impl BloomFilter {
    pub fn new(capacity: usize, error_rate: f64) -> Self {
        let capacity = capacity.max(1);
        let size = (-(capacity as f64) * error_rate.ln() / (std::f64::consts::LN_2.powi(2))).ceil() as usize;
        let size = size.max(8);
        let hash_count = ((size as f64 / capacity as f64) * std::f64::consts::LN_2).round() as u32;
        let hash_count = hash_count.max(1);
        Self {
            bits: Mutex::new(vec![false; size]),
            size,
            hash_count,
        }
    }

    fn hashes(&self, item: &str) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.hash_count as usize);
        for i in 0..self.hash_count {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            i.hash(&mut hasher);
            item.hash(&mut hasher);
            out.push((hasher.finish() as usize) % self.size);
        }
        out
    }

    pub fn add(&self, item: &str) {
        let idxs = self.hashes(item);
        let mut bits = self.bits.lock().expect("bloom filter mutex poisoned");
        for idx in idxs {
            bits[idx] = true;
        }
    }

    /// Never false negative; may be a false positive at roughly the configured rate.
    pub fn might_contain(&self, item: &str) -> bool {
        let idxs = self.hashes(item);
        let bits = self.bits.lock().expect("bloom filter mutex poisoned");
        idxs.iter().all(|&idx| bits[idx])
    }

    pub fn clear(&self) {
        let mut bits = self.bits.lock().expect("bloom filter mutex poisoned");
        bits.iter_mut().for_each(|b| *b = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_false_negative() {
        let bloom = BloomFilter::new(1000, 0.01);
        for i in 0..200 {
            bloom.add(&format!("example.com:/login:field-{i}"));
        }
        for i in 0..200 {
            assert!(bloom.might_contain(&format!("example.com:/login:field-{i}")));
        }
    }

    #[test]
    fn absent_item_usually_rejected() {
        let bloom = BloomFilter::new(1000, 0.01);
        bloom.add("example.com:/login:username");
        assert!(!bloom.might_contain("unrelated.com:/signup:password"));
    }
}
