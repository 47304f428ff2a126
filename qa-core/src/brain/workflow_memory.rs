//! Workflow memory: remembers multi-page action sequences and predicts
//! the likely next page from a (page type, last action) pair.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub name: String,
    pub page_sequence: Vec<String>,
    pub action_sequence: Vec<String>,
    pub duration_ms: f64,
    pub completed: bool,
    pub failure_step: Option<usize>,
    pub runs: u64,
    pub completions: u64,
    pub last_run: DateTime<Utc>,
}

pub struct WorkflowMemory {
    /// Keyed by workflow name.
    records: Mutex<HashMap<String, WorkflowRecord>>,
    /// (page_type, last_action) -> counts of observed next page_type.
    transitions: Mutex<HashMap<(String, String), HashMap<String, u64>>>,
    data_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct PersistedState {
    records: HashMap<String, WorkflowRecord>,
    transitions: Vec<TransitionEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TransitionEntry {
    page_type: String,
    last_action: String,
    next_counts: HashMap<String, u64>,
}

impl WorkflowMemory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join("brain").join("memory"))?;
        let memory = Self {
            records: Mutex::new(HashMap::new()),
            transitions: Mutex::new(HashMap::new()),
            data_dir,
        };
        memory.load();
        Ok(memory)
    }

    fn file_path(&self) -> PathBuf {
        self.data_dir.join("brain").join("memory").join("workflow_memory.json")
    }

    fn load(&self) {
        let Ok(content) = std::fs::read_to_string(self.file_path()) else { return };
        match serde_json::from_str::<PersistedState>(&content) {
            Ok(state) => {
                *self.records.lock().expect("workflow memory mutex poisoned") = state.records;
                let mut transitions = self.transitions.lock().expect("workflow memory mutex poisoned");
                for entry in state.transitions {
                    transitions.insert((entry.page_type, entry.last_action), entry.next_counts);
                }
            }
            Err(err) => tracing::warn!(error = %err, "corrupt workflow memory file, starting empty"),
        }
    }

    /// `rememberWorkflow(name, pageSequence, actionSequence, durationMs, completed, failureStep?)`.
    pub fn remember_workflow(
        &self,
        name: &str,
        page_sequence: Vec<String>,
        action_sequence: Vec<String>,
        duration_ms: f64,
        completed: bool,
        failure_step: Option<usize>,
    ) {
        {
            let mut transitions = self.transitions.lock().expect("workflow memory mutex poisoned");
            for window in page_sequence.windows(2).zip(action_sequence.iter()) {
                let ([from, to], action) = window else { continue };
                transitions
                    .entry((from.clone(), action.clone()))
                    .or_default()
                    .entry(to.clone())
                    .and_modify(|c| *c += 1)
                    .or_insert(1);
            }
        }

        let mut guard = self.records.lock().expect("workflow memory mutex poisoned");
        let record = guard.entry(name.to_string()).or_insert_with(|| WorkflowRecord {
            name: name.to_string(),
            page_sequence: Vec::new(),
            action_sequence: Vec::new(),
            duration_ms: 0.0,
            completed: false,
            failure_step: None,
            runs: 0,
            completions: 0,
            last_run: Utc::now(),
        });
        record.page_sequence = page_sequence;
        record.action_sequence = action_sequence;
        record.duration_ms = duration_ms;
        record.completed = completed;
        record.failure_step = failure_step;
        record.runs += 1;
        if completed {
            record.completions += 1;
        }
        record.last_run = Utc::now();
    }

    /// `predictNextPage(currentPageType, lastAction) -> pageType?`: the
    /// most frequently observed successor, or `None` with no history.
    pub fn predict_next_page(&self, current_page_type: &str, last_action: &str) -> Option<String> {
        let transitions = self.transitions.lock().expect("workflow memory mutex poisoned");
        let counts = transitions.get(&(current_page_type.to_string(), last_action.to_string()))?;
        counts.iter().max_by_key(|(_, count)| **count).map(|(page, _)| page.clone())
    }

    pub fn get(&self, name: &str) -> Option<WorkflowRecord> {
        self.records.lock().expect("workflow memory mutex poisoned").get(name).cloned()
    }

    pub fn decay(&self, max_age_days: i64) {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let mut guard = self.records.lock().expect("workflow memory mutex poisoned");
        guard.retain(|_, record| record.last_run >= cutoff);
    }

    pub fn flush(&self) -> Result<()> {
        let records = self.records.lock().expect("workflow memory mutex poisoned").clone();
        let transitions = self
            .transitions
            .lock()
            .expect("workflow memory mutex poisoned")
            .iter()
            .map(|((page_type, last_action), next_counts)| TransitionEntry {
                page_type: page_type.clone(),
                last_action: last_action.clone(),
                next_counts: next_counts.clone(),
            })
            .collect();
        let state = PersistedState { records, transitions };
        let json = serde_json::to_string_pretty(&state)?;
        crate::brain::atomic_write(&self.file_path(), &json)
    }

    pub fn get_stats(&self) -> HashMap<String, serde_json::Value> {
        let records = self.records.lock().expect("workflow memory mutex poisoned");
        let mut stats = HashMap::new();
        stats.insert("total_workflows".to_string(), serde_json::json!(records.len()));
        let total_runs: u64 = records.values().map(|r| r.runs).sum();
        stats.insert("total_runs".to_string(), serde_json::json!(total_runs));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_workflow_tracks_runs_and_completions() {
        let dir = tempfile::tempdir().unwrap();
        let memory = WorkflowMemory::new(dir.path()).unwrap();
        memory.remember_workflow(
            "login-flow",
            vec!["login".into(), "dashboard".into()],
            vec!["submit".into()],
            1200.0,
            true,
            None,
        );
        memory.remember_workflow(
            "login-flow",
            vec!["login".into(), "login".into()],
            vec!["submit".into()],
            500.0,
            false,
            Some(0),
        );
        let record = memory.get("login-flow").unwrap();
        assert_eq!(record.runs, 2);
        assert_eq!(record.completions, 1);
    }

    #[test]
    fn predict_next_page_returns_the_most_common_successor() {
        let dir = tempfile::tempdir().unwrap();
        let memory = WorkflowMemory::new(dir.path()).unwrap();
        memory.remember_workflow(
            "login-flow",
            vec!["login".into(), "dashboard".into()],
            vec!["submit".into()],
            1000.0,
            true,
            None,
        );
        memory.remember_workflow(
            "login-flow",
            vec!["login".into(), "dashboard".into()],
            vec!["submit".into()],
            1000.0,
            true,
            None,
        );
        memory.remember_workflow(
            "login-flow",
            vec!["login".into(), "error".into()],
            vec!["submit".into()],
            1000.0,
            false,
            Some(0),
        );
        assert_eq!(memory.predict_next_page("login", "submit"), Some("dashboard".to_string()));
    }

    #[test]
    fn predict_next_page_is_none_without_history() {
        let dir = tempfile::tempdir().unwrap();
        let memory = WorkflowMemory::new(dir.path()).unwrap();
        assert_eq!(memory.predict_next_page("login", "submit"), None);
    }

    #[test]
    fn flush_and_reload_round_trips_transitions() {
        let dir = tempfile::tempdir().unwrap();
        {
            let memory = WorkflowMemory::new(dir.path()).unwrap();
            memory.remember_workflow(
                "login-flow",
                vec!["login".into(), "dashboard".into()],
                vec!["submit".into()],
                1000.0,
                true,
                None,
            );
            memory.flush().unwrap();
        }
        let reloaded = WorkflowMemory::new(dir.path()).unwrap();
        assert_eq!(reloaded.predict_next_page("login", "submit"), Some("dashboard".to_string()));
        assert!(reloaded.get("login-flow").is_some());
    }
}
