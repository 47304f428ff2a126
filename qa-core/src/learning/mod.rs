//! Learning Engine: absorbs execution events and writes them
//! back into the Knowledge Base, Action Pattern Store, and Brain
//! Memories; brackets a test run with session start/end.
//!
//! This is the one component in the system allowed to hold references
//! to every other store: the KB has no
//! back-references, the memories have no back-references, and the
//! Learning Engine alone wires them together, keeping the ownership
//! graph acyclic.

pub mod types;

pub use types::LearningEvent;

use crate::brain::BrainMemories;
use crate::error::Result;
use crate::patterns::PatternStore;
use crate::selectors::{KnowledgeBase, LearnedFrom};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const MAX_QUEUED_EVENTS: usize = 1000;

struct Session {
    id: String,
    page_sequence: Vec<String>,
    action_sequence: Vec<String>,
    errors: Vec<String>,
    started_at: DateTime<Utc>,
}

pub struct LearningEngine {
    kb: Arc<KnowledgeBase>,
    patterns: Arc<PatternStore>,
    memories: Arc<BrainMemories>,
    queue: Mutex<VecDeque<LearningEvent>>,
    session: Mutex<Option<Session>>,
}

impl LearningEngine {
    pub fn new(kb: Arc<KnowledgeBase>, patterns: Arc<PatternStore>, memories: Arc<BrainMemories>) -> Self {
        Self {
            kb,
            patterns,
            memories,
            queue: Mutex::new(VecDeque::new()),
            session: Mutex::new(None),
        }
    }

    /// `StartSession(id)`.
    pub fn start_session(&self, id: impl Into<String>) {
        let mut session = self.session.lock().expect("learning session mutex poisoned");
        *session = Some(Session {
            id: id.into(),
            page_sequence: Vec::new(),
            action_sequence: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
        });
    }

    /// `RecordEvent(event)`: enqueues (bounded, dropping the event with a
    /// warning on overflow) then dispatches synchronously.
    pub fn record_event(&self, event: LearningEvent) {
        {
            let mut queue = self.queue.lock().expect("learning queue mutex poisoned");
            if queue.len() >= MAX_QUEUED_EVENTS {
                tracing::warn!("learning event queue full, dropping event");
                return;
            }
            queue.push_back(event.clone());
        }
        self.dispatch(&event);
        self.queue.lock().expect("learning queue mutex poisoned").pop_front();
    }

    fn dispatch(&self, event: &LearningEvent) {
        match event {
            LearningEvent::ActionSuccess { domain, page, element_key, selector, strategy } => {
                self.kb.add_learning(domain, page, element_key, selector, *strategy, true, LearnedFrom::Execution, None, None);
                self.track_action(page, "success");
            }
            LearningEvent::ActionFailure { domain, page, element_key, selector, strategy, message } => {
                self.kb.add_learning(domain, page, element_key, selector, *strategy, false, LearnedFrom::Execution, None, None);
                if let Some(message) = message {
                    self.memories.error.remember_error("action_failure", message, None, None, None);
                    self.track_error(message);
                }
                self.track_action(page, "failure");
            }
            LearningEvent::ElementFound { domain, page, element_key, selector, strategy } => {
                self.kb.add_learning(domain, page, element_key, selector, *strategy, true, LearnedFrom::Exploration, None, None);
            }
            LearningEvent::PageLoaded { signature, load_time_ms } => {
                self.memories.page.remember_page(signature.clone(), Some(*load_time_ms), None);
                self.track_page(&signature.normalized_url_pattern);
            }
            LearningEvent::ErrorOccurred { error_type, message, field_hint } => {
                self.memories.error.remember_error(error_type, message, field_hint.clone(), None, None);
                self.track_error(message);
            }
            LearningEvent::ErrorRecovered { error_type, message, recovery_action, worked } => {
                self.memories.error.remember_error(error_type, message, None, Some(recovery_action.clone()), Some(*worked));
            }
            LearningEvent::WorkflowCompleted { name, page_sequence, action_sequence, duration_ms } => {
                self.memories.workflow.remember_workflow(name, page_sequence.clone(), action_sequence.clone(), *duration_ms, true, None);
            }
            LearningEvent::WorkflowFailed { name, page_sequence, action_sequence, duration_ms, failure_step } => {
                self.memories.workflow.remember_workflow(name, page_sequence.clone(), action_sequence.clone(), *duration_ms, false, Some(*failure_step));
            }
        }
    }

    fn track_page(&self, page: &str) {
        if let Some(session) = self.session.lock().expect("learning session mutex poisoned").as_mut() {
            session.page_sequence.push(page.to_string());
        }
    }

    fn track_action(&self, page: &str, outcome: &str) {
        if let Some(session) = self.session.lock().expect("learning session mutex poisoned").as_mut() {
            session.action_sequence.push(format!("{page}:{outcome}"));
        }
    }

    fn track_error(&self, message: &str) {
        if let Some(session) = self.session.lock().expect("learning session mutex poisoned").as_mut() {
            session.errors.push(message.to_string());
        }
    }

    /// `EndSession(success)`: persists a workflow pattern if at least two
    /// pages were observed, and flushes all stores.
    pub fn end_session(&self, success: bool) -> Result<()> {
        let session = self.session.lock().expect("learning session mutex poisoned").take();
        if let Some(session) = session {
            if session.page_sequence.len() >= 2 {
                let duration_ms = (Utc::now() - session.started_at).num_milliseconds() as f64;
                self.memories.workflow.remember_workflow(
                    &session.id,
                    session.page_sequence,
                    session.action_sequence,
                    duration_ms,
                    success,
                    None,
                );
            }
        }
        self.consolidate()
    }

    /// `DecayOldKnowledge(maxAgeDays)`: drops knowledge-base selectors and
    /// memory entries alike once they're both older than the threshold and
    /// below medium confidence.
    pub fn decay_old_knowledge(&self, max_age_days: i64) {
        self.kb.decay(max_age_days);
        self.memories.decay(max_age_days);
    }

    /// `Consolidate()`: force-flushes every store.
    pub fn consolidate(&self) -> Result<()> {
        self.kb.force_save()?;
        self.memories.flush()?;
        Ok(())
    }

    pub fn patterns(&self) -> &Arc<PatternStore> {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors::SelectorStrategy;
    use tempfile::tempdir;

    fn engine() -> LearningEngine {
        let kb_dir = tempdir().unwrap();
        let pattern_dir = tempdir().unwrap();
        let memory_dir = tempdir().unwrap();
        let kb = Arc::new(KnowledgeBase::new(kb_dir.path()).unwrap());
        let patterns = Arc::new(PatternStore::new(pattern_dir.path()).unwrap());
        let memories = Arc::new(BrainMemories::new(memory_dir.path()).unwrap());
        LearningEngine::new(kb, patterns, memories)
    }

    #[test]
    fn action_success_writes_back_to_kb() {
        let engine = engine();
        engine.record_event(LearningEvent::ActionSuccess {
            domain: "example.com".into(),
            page: "/login".into(),
            element_key: "username".into(),
            selector: "#u".into(),
            strategy: SelectorStrategy::Css,
        });
        let knowledge = engine.kb.lookup("example.com", "/login", "username").unwrap();
        assert_eq!(knowledge.best_selector().unwrap().value, "#u");
    }

    #[test]
    fn action_failure_decrements_confidence_and_remembers_error() {
        let engine = engine();
        engine.record_event(LearningEvent::ActionSuccess {
            domain: "example.com".into(), page: "/login".into(), element_key: "username".into(),
            selector: "#u".into(), strategy: SelectorStrategy::Css,
        });
        engine.record_event(LearningEvent::ActionFailure {
            domain: "example.com".into(), page: "/login".into(), element_key: "username".into(),
            selector: "#u".into(), strategy: SelectorStrategy::Css,
            message: Some("Element not visible".into()),
        });
        let knowledge = engine.kb.lookup("example.com", "/login", "username").unwrap();
        assert_eq!(knowledge.best_selector().unwrap().confidence(), 0.5);
        assert!(engine.memories.error.find_matching_error("Element not visible").is_some());
    }

    #[test]
    fn session_with_two_pages_persists_a_workflow_on_end() {
        let engine = engine();
        engine.start_session("wf-1");
        engine.record_event(LearningEvent::PageLoaded {
            signature: crate::brain::PageSignature::compute("https://e.com/login", "Login", &[], "login"),
            load_time_ms: 500.0,
        });
        engine.record_event(LearningEvent::PageLoaded {
            signature: crate::brain::PageSignature::compute("https://e.com/dashboard", "Dashboard", &[], "dashboard"),
            load_time_ms: 300.0,
        });
        engine.end_session(true).unwrap();
        assert!(engine.memories.workflow.get("wf-1").is_some());
    }

    #[test]
    fn session_with_one_page_does_not_persist_a_workflow() {
        let engine = engine();
        engine.start_session("wf-solo");
        engine.record_event(LearningEvent::PageLoaded {
            signature: crate::brain::PageSignature::compute("https://e.com/login", "Login", &[], "login"),
            load_time_ms: 500.0,
        });
        engine.end_session(true).unwrap();
        assert!(engine.memories.workflow.get("wf-solo").is_none());
    }

    #[test]
    fn decay_old_knowledge_drops_stale_low_confidence_kb_entries() {
        let engine = engine();
        engine.record_event(LearningEvent::ActionFailure {
            domain: "example.com".into(), page: "/login".into(), element_key: "dead_field".into(),
            selector: "#dead".into(), strategy: SelectorStrategy::Css,
            message: None,
        });
        engine.kb.backdate_for_test("example.com", "/login", "dead_field", 400);
        engine.decay_old_knowledge(90);
        assert!(engine.kb.lookup("example.com", "/login", "dead_field").is_none());
    }

    #[test]
    fn record_event_drops_events_past_the_queue_bound() {
        let engine = engine();
        for _ in 0..(MAX_QUEUED_EVENTS + 5) {
            engine.record_event(LearningEvent::ActionSuccess {
                domain: "example.com".into(), page: "/login".into(), element_key: "username".into(),
                selector: "#u".into(), strategy: SelectorStrategy::Css,
            });
        }
        assert!(engine.queue.lock().unwrap().len() <= MAX_QUEUED_EVENTS);
    }
}
