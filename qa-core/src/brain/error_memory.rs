//! Error memory: recognises previously seen errors by message similarity
//! and tracks which recovery actions worked.

use crate::error::Result;
use crate::util::{token_overlap, tokenize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Minimum token-overlap score for two error messages to be considered
/// the same kind of error.
const SIMILARITY_THRESHOLD: f64 = 0.5;

/// Coarse recovery-action tags, recognised by keyword in the error
/// message when no explicit recovery action was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTag {
    RequiredField,
    InvalidFormat,
    DuplicateValue,
    TimeoutRetry,
    AuthFailure,
    Unknown,
}

impl RecoveryTag {
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("required") || lower.contains("must not be empty") || lower.contains("cannot be blank") {
            Self::RequiredField
        } else if lower.contains("format") || lower.contains("invalid") {
            Self::InvalidFormat
        } else if lower.contains("already exists") || lower.contains("duplicate") || lower.contains("taken") {
            Self::DuplicateValue
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::TimeoutRetry
        } else if lower.contains("unauthorized") || lower.contains("forbidden") || lower.contains("auth") {
            Self::AuthFailure
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMemoryEntry {
    pub error_type: String,
    pub message: String,
    pub tokens: Vec<String>,
    pub field_hint: Option<String>,
    pub recovery_action: Option<String>,
    pub recovery_tag: RecoveryTag,
    pub seen_count: u64,
    pub recovery_attempts: u64,
    pub recovery_successes: u64,
    pub last_seen: DateTime<Utc>,
}

impl ErrorMemoryEntry {
    /// `successes / attempts`, defaulting to 0.5 with no recovery attempts yet.
    pub fn recovery_confidence(&self) -> f64 {
        if self.recovery_attempts == 0 {
            0.5
        } else {
            self.recovery_successes as f64 / self.recovery_attempts as f64
        }
    }
}

pub struct ErrorMemory {
    entries: Mutex<Vec<ErrorMemoryEntry>>,
    data_dir: PathBuf,
}

impl ErrorMemory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join("brain").join("memory"))?;
        let memory = Self {
            entries: Mutex::new(Vec::new()),
            data_dir,
        };
        memory.load();
        Ok(memory)
    }

    fn file_path(&self) -> PathBuf {
        self.data_dir.join("brain").join("memory").join("error_memory.json")
    }

    fn load(&self) {
        let Ok(content) = std::fs::read_to_string(self.file_path()) else { return };
        match serde_json::from_str::<Vec<ErrorMemoryEntry>>(&content) {
            Ok(entries) => *self.entries.lock().expect("error memory mutex poisoned") = entries,
            Err(err) => tracing::warn!(error = %err, "corrupt error memory file, starting empty"),
        }
    }

    /// `rememberError(type, message, fieldHint?, recoveryAction?, recoveryWorked?)`.
    pub fn remember_error(
        &self,
        error_type: &str,
        message: &str,
        field_hint: Option<String>,
        recovery_action: Option<String>,
        recovery_worked: Option<bool>,
    ) {
        let tag = RecoveryTag::classify(message);
        let tokens = tokenize(message);
        let mut guard = self.entries.lock().expect("error memory mutex poisoned");

        let existing = guard
            .iter_mut()
            .find(|e| e.error_type == error_type && token_overlap(&e.tokens, &tokens) >= SIMILARITY_THRESHOLD);

        match existing {
            Some(entry) => {
                entry.seen_count += 1;
                entry.last_seen = Utc::now();
                if field_hint.is_some() {
                    entry.field_hint = field_hint;
                }
                if let Some(worked) = recovery_worked {
                    entry.recovery_attempts += 1;
                    if worked {
                        entry.recovery_successes += 1;
                    }
                    entry.recovery_action = recovery_action;
                }
            }
            None => {
                let (recovery_attempts, recovery_successes) = match recovery_worked {
                    Some(true) => (1, 1),
                    Some(false) => (1, 0),
                    None => (0, 0),
                };
                guard.push(ErrorMemoryEntry {
                    error_type: error_type.to_string(),
                    message: message.to_string(),
                    tokens,
                    field_hint,
                    recovery_action,
                    recovery_tag: tag,
                    seen_count: 1,
                    recovery_attempts,
                    recovery_successes,
                    last_seen: Utc::now(),
                });
            }
        }
    }

    /// `findMatchingError(message) -> ErrorMemoryEntry?`: best token-overlap match.
    pub fn find_matching_error(&self, message: &str) -> Option<ErrorMemoryEntry> {
        let tokens = tokenize(message);
        let guard = self.entries.lock().expect("error memory mutex poisoned");
        guard
            .iter()
            .map(|e| (token_overlap(&e.tokens, &tokens), e))
            .filter(|(score, _)| *score >= SIMILARITY_THRESHOLD)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
            .map(|(_, e)| e.clone())
    }

    pub fn decay(&self, max_age_days: i64) {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let mut guard = self.entries.lock().expect("error memory mutex poisoned");
        guard.retain(|e| e.last_seen >= cutoff);
    }

    pub fn flush(&self) -> Result<()> {
        let guard = self.entries.lock().expect("error memory mutex poisoned");
        let json = serde_json::to_string_pretty(&*guard)?;
        crate::brain::atomic_write(&self.file_path(), &json)
    }

    pub fn get_stats(&self) -> HashMap<String, serde_json::Value> {
        let guard = self.entries.lock().expect("error memory mutex poisoned");
        let mut stats = HashMap::new();
        stats.insert("total_errors".to_string(), serde_json::json!(guard.len()));
        let total_seen: u64 = guard.iter().map(|e| e.seen_count).sum();
        stats.insert("total_seen".to_string(), serde_json::json!(total_seen));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_recovery_tags_by_keyword() {
        assert_eq!(RecoveryTag::classify("Email is required"), RecoveryTag::RequiredField);
        assert_eq!(RecoveryTag::classify("Invalid email format"), RecoveryTag::InvalidFormat);
        assert_eq!(RecoveryTag::classify("Username already exists"), RecoveryTag::DuplicateValue);
        assert_eq!(RecoveryTag::classify("Request timed out"), RecoveryTag::TimeoutRetry);
        assert_eq!(RecoveryTag::classify("401 unauthorized"), RecoveryTag::AuthFailure);
        assert_eq!(RecoveryTag::classify("Something broke"), RecoveryTag::Unknown);
    }

    #[test]
    fn remember_error_merges_similar_messages() {
        let dir = tempfile::tempdir().unwrap();
        let memory = ErrorMemory::new(dir.path()).unwrap();
        memory.remember_error("validation", "Email field is required", None, None, None);
        memory.remember_error("validation", "Email field is required now", None, None, Some(true));

        let found = memory.find_matching_error("Email field is required").unwrap();
        assert_eq!(found.seen_count, 2);
        assert_eq!(found.recovery_attempts, 1);
        assert_eq!(found.recovery_successes, 1);
    }

    #[test]
    fn find_matching_error_ignores_dissimilar_messages() {
        let dir = tempfile::tempdir().unwrap();
        let memory = ErrorMemory::new(dir.path()).unwrap();
        memory.remember_error("validation", "Email field is required", None, None, None);
        assert!(memory.find_matching_error("Server returned 500").is_none());
    }

    #[test]
    fn flush_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        {
            let memory = ErrorMemory::new(dir.path()).unwrap();
            memory.remember_error("validation", "Username already exists", None, None, None);
            memory.flush().unwrap();
        }
        let reloaded = ErrorMemory::new(dir.path()).unwrap();
        assert!(reloaded.find_matching_error("Username already exists").is_some());
    }
}
