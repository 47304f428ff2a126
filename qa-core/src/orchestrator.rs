//! Autonomous Orchestrator (spec §4.9): a long-running service that pulls
//! queued tests off a five-level priority queue and drives them through
//! the Unified Executor, forever — discovering new work, retrying failed
//! tests on a cooldown, and sweeping full regressions on a cadence.
//!
//! The two cooperating loops (execution, discovery) each run on a
//! dedicated OS thread, matching the teacher's subprocess-management
//! style of `std::thread` + polling rather than `tokio::spawn` for
//! long-lived workers. Each thread builds its own current-thread Tokio
//! runtime to drive the async component APIs (`DecisionEngine`,
//! `AiGateway`, `UnifiedExecutor`) it needs; the two threads never share
//! mutable state except through the `Mutex`-guarded queue and history
//! below, so nothing crosses a thread boundary mid-await.
//!
//! This module is a composition root, not a factory: it takes an
//! already-wired `Arc<DecisionEngine>` / `Arc<LearningEngine>` / etc. A
//! caller who wants Strict-mode AI suppression configures that on the
//! `DecisionEngine` before handing it here, since the engine's AI gate
//! is set once at construction and the Orchestrator only ever sees it
//! behind an `Arc`.

use crate::ai::AiGateway;
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::executor::{ActionExecutor, BrowserDriver};
use crate::decision::DecisionEngine;
use crate::learning::LearningEngine;
use crate::patterns::PatternStore;
use crate::unified::{ExecutionMode, TestFormat, TestOutcome, UnifiedExecutionReport, UnifiedExecutor, UnifiedTestCase};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Ordinal priority of a queued test. Declaration order is the ordering
/// the derived `Ord` uses, and matches the ordinal column in spec §3:
/// Critical(1) < High(2) < Normal(3) < Low(4) < Background(5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl Priority {
    fn slot(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
            Priority::Background => 4,
        }
    }
}

/// Lifecycle of a [`QueuedTest`]. `Stopped` is not part of the data
/// model's closed status set in spec §3, but spec §5 requires in-flight
/// tests to carry it through a graceful `stop()`, so it's added here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
    Skipped,
    Stopped,
}

/// One unit of work for the Orchestrator. Mirrors the data model in
/// spec §3; `error_message` is a supplemented convenience (also present
/// on the original `QueuedTest` dataclass this was distilled from) so a
/// caller doesn't have to dig through `result` to show a one-line cause.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct QueuedTest {
    pub id: String,
    pub project_id: String,
    pub project_name: String,
    pub base_url: String,
    pub kind: TestFormat,
    pub feature_id: Option<String>,
    pub feature_name: Option<String>,
    pub scenario_filter: Option<Vec<String>>,
    pub test_case_ids: Option<Vec<String>>,
    pub priority: Priority,
    pub status: TestStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub credentials: HashMap<String, String>,
    pub error_message: Option<String>,
    pub result: Option<UnifiedExecutionReport>,
}

impl QueuedTest {
    fn new(
        project: &ProjectSummary,
        kind: TestFormat,
        feature_id: Option<String>,
        feature_name: Option<String>,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project.project_id.clone(),
            project_name: project.project_name.clone(),
            base_url: project.base_url.clone(),
            kind,
            feature_id,
            feature_name,
            scenario_filter: None,
            test_case_ids: if kind == TestFormat::ActionBased {
                Some(project.test_case_ids.clone())
            } else {
                None
            },
            priority,
            status: TestStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            credentials: project.credentials.clone(),
            error_message: None,
            result: None,
        }
    }

    fn for_feature(project: &ProjectSummary, feature: &FeatureSummary, priority: Priority, max_retries: u32) -> Self {
        Self::new(
            project,
            TestFormat::BehaviorDriven,
            Some(feature.feature_id.clone()),
            Some(feature.feature_name.clone()),
            priority,
            max_retries,
        )
    }

    fn for_traditional(project: &ProjectSummary, priority: Priority, max_retries: u32) -> Self {
        Self::new(project, TestFormat::ActionBased, None, None, priority, max_retries)
    }
}

/// A project and the work discoverable within it, as surfaced by
/// whatever storage layer owns projects/folders/organizations — out of
/// scope for this crate and specified here only at its interface, the
/// same way [`BrowserDriver`] specifies a browser at its interface.
#[derive(Debug, Clone)]
pub struct ProjectSummary {
    pub project_id: String,
    pub project_name: String,
    pub base_url: String,
    pub credentials: HashMap<String, String>,
    pub features: Vec<FeatureSummary>,
    pub test_case_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FeatureSummary {
    pub feature_id: String,
    pub feature_name: String,
}

/// Capability the discovery loop depends on: enumerate projects and
/// their features, and resolve a queued test back into the concrete
/// [`UnifiedTestCase`]s it should run. Gherkin parsing, CSV ingestion,
/// and project storage are all out of scope (spec §1) — this trait is
/// the seam a real backend plugs into.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>>;
    async fn load_test_cases(&self, test: &QueuedTest) -> Result<Vec<UnifiedTestCase>>;
}

/// Five-deque priority queue (spec §4.9). At capacity, the newest item
/// in the lowest-priority non-empty deque is dropped to make room,
/// regardless of the incoming item's own priority — which is also what
/// guarantees a `Critical` push never fails: there is always some
/// non-empty deque to evict from once the queue is full.
struct PriorityQueue {
    deques: [VecDeque<QueuedTest>; 5],
    max_size: usize,
}

impl PriorityQueue {
    fn new(max_size: usize) -> Self {
        Self {
            deques: Default::default(),
            max_size,
        }
    }

    fn len(&self) -> usize {
        self.deques.iter().map(|d| d.len()).sum()
    }

    fn push(&mut self, test: QueuedTest) {
        if self.len() >= self.max_size {
            for deque in self.deques.iter_mut().rev() {
                if deque.pop_back().is_some() {
                    tracing::warn!("orchestrator queue at capacity, dropped lowest-priority test");
                    break;
                }
            }
        }
        self.deques[test.priority.slot()].push_back(test);
    }

    fn pop_next(&mut self) -> Option<QueuedTest> {
        self.deques.iter_mut().find_map(|d| d.pop_front())
    }

    fn status(&self) -> QueueStatus {
        let mut by_priority = BTreeMap::new();
        for (priority, deque) in [
            (Priority::Critical, &self.deques[0]),
            (Priority::High, &self.deques[1]),
            (Priority::Normal, &self.deques[2]),
            (Priority::Low, &self.deques[3]),
            (Priority::Background, &self.deques[4]),
        ] {
            by_priority.insert(priority, deque.len());
        }
        QueueStatus {
            total: self.len(),
            by_priority,
            current_execution: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub total: usize,
    pub by_priority: BTreeMap<Priority, usize>,
    pub current_execution: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStats {
    pub total_queued: u64,
    pub total_executed: u64,
    pub total_passed: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub started_at: Option<DateTime<Utc>>,
}

impl OrchestratorStats {
    pub fn uptime_seconds(&self) -> i64 {
        self.started_at.map(|s| (Utc::now() - s).num_seconds()).unwrap_or(0)
    }
}

struct Shared {
    config: Mutex<OrchestratorConfig>,
    queue: Mutex<PriorityQueue>,
    history: Mutex<VecDeque<QueuedTest>>,
    known_work: Mutex<HashSet<String>>,
    stats: Mutex<OrchestratorStats>,
    last_discovery_at: Mutex<Option<DateTime<Utc>>>,
    last_regression_at: Mutex<Option<DateTime<Utc>>>,
    last_project_run: Mutex<HashMap<String, DateTime<Utc>>>,
    running: AtomicBool,
    paused: AtomicBool,
    current_execution: Mutex<Option<String>>,
    current_stop_handle: Mutex<Option<Arc<AtomicBool>>>,
}

impl Shared {
    fn new(config: OrchestratorConfig) -> Self {
        let max_queue_size = config.max_queue_size;
        Self {
            config: Mutex::new(config),
            queue: Mutex::new(PriorityQueue::new(max_queue_size)),
            history: Mutex::new(VecDeque::new()),
            known_work: Mutex::new(HashSet::new()),
            stats: Mutex::new(OrchestratorStats::default()),
            last_discovery_at: Mutex::new(None),
            last_regression_at: Mutex::new(None),
            last_project_run: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            current_execution: Mutex::new(None),
            current_stop_handle: Mutex::new(None),
        }
    }

    fn enqueue(&self, test: QueuedTest) -> String {
        let id = test.id.clone();
        self.queue.lock().expect("orchestrator queue mutex poisoned").push(test);
        self.stats.lock().expect("orchestrator stats mutex poisoned").total_queued += 1;
        id
    }

    /// Time elapsed since a test for `project_id` last started executing,
    /// or `None` if none has run yet this process.
    fn since_last_project_run(&self, project_id: &str) -> Option<chrono::Duration> {
        let last_run = self.last_project_run.lock().expect("last project run mutex poisoned");
        last_run.get(project_id).map(|at| Utc::now() - *at)
    }

    fn record_project_run(&self, project_id: &str) {
        self.last_project_run
            .lock()
            .expect("last project run mutex poisoned")
            .insert(project_id.to_string(), Utc::now());
    }

    fn record_history(&self, test: QueuedTest) {
        let limit = self.config.lock().expect("orchestrator config mutex poisoned").history_limit;
        let mut history = self.history.lock().expect("orchestrator history mutex poisoned");
        history.push_back(test);
        while history.len() > limit {
            history.pop_front();
        }
    }
}

/// Bundle of already-constructed collaborators the two worker loops
/// need. Built once at [`Orchestrator::new`] and shared read-only
/// (everything here is an `Arc`) across both threads.
struct RuntimeDeps {
    driver: Arc<dyn BrowserDriver>,
    decision: Arc<DecisionEngine>,
    learning: Arc<LearningEngine>,
    patterns: Arc<PatternStore>,
    ai_gateway: Option<Arc<AiGateway>>,
    project_source: Arc<dyn ProjectSource>,
    execution_mode: ExecutionMode,
}

/// The Autonomous Orchestrator (spec §4.9).
pub struct Orchestrator {
    shared: Arc<Shared>,
    deps: Arc<RuntimeDeps>,
    handles: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        driver: Arc<dyn BrowserDriver>,
        decision: Arc<DecisionEngine>,
        learning: Arc<LearningEngine>,
        patterns: Arc<PatternStore>,
        ai_gateway: Option<Arc<AiGateway>>,
        project_source: Arc<dyn ProjectSource>,
    ) -> Self {
        let execution_mode = config.execution_mode;
        Self {
            shared: Arc::new(Shared::new(config)),
            deps: Arc::new(RuntimeDeps {
                driver,
                decision,
                learning,
                patterns,
                ai_gateway,
                project_source,
                execution_mode,
            }),
            handles: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Starts the execution and discovery loops, each on its own thread.
    /// Fatal if the orchestrator is already running (spec §7 "singleton
    /// double-start").
    pub fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(Error::config_error("orchestrator is already running"));
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.stats.lock().expect("orchestrator stats mutex poisoned").started_at = Some(Utc::now());
        tracing::info!("orchestrator starting");

        let exec_shared = self.shared.clone();
        let exec_deps = self.deps.clone();
        let execution = std::thread::Builder::new()
            .name("qa-core-execution-loop".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build execution loop runtime");
                runtime.block_on(execution_loop(exec_shared, exec_deps));
            })
            .expect("failed to spawn execution loop thread");

        let disc_shared = self.shared.clone();
        let disc_deps = self.deps.clone();
        let discovery = std::thread::Builder::new()
            .name("qa-core-discovery-loop".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build discovery loop runtime");
                runtime.block_on(discovery_loop(disc_shared, disc_deps));
            })
            .expect("failed to spawn discovery loop thread");

        *self.handles.lock().expect("orchestrator handles mutex poisoned") = Some((execution, discovery));
        Ok(())
    }

    /// Requests a graceful stop: flips the in-flight test's cooperative
    /// stop flag, then waits up to 30s for the execution thread and 10s
    /// for the discovery thread before giving up on the join (spec §5).
    /// If the execution thread is still blocked inside a driver call past
    /// its grace period, falls back to `forceStop` and closes the driver
    /// outright to unblock it.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("orchestrator stopping");
        if let Some(handle) = self.shared.current_stop_handle.lock().expect("stop handle mutex poisoned").as_ref() {
            handle.store(true, Ordering::SeqCst);
        }
        if let Some((execution, discovery)) = self.handles.lock().expect("orchestrator handles mutex poisoned").take() {
            if !join_with_timeout(execution, Duration::from_secs(30)) {
                tracing::warn!("execution loop did not stop within its grace period, forcing driver close");
                futures::executor::block_on(self.deps.driver.close()).ok();
            }
            if !join_with_timeout(discovery, Duration::from_secs(10)) {
                tracing::warn!("discovery loop did not stop within its grace period");
            }
        }
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    /// `queueFeature(projectId, featureId, priority)`: looks the project
    /// and feature up via the configured [`ProjectSource`] and enqueues
    /// a behavior-driven `QueuedTest`. Below `Critical`, rejects a second
    /// run of the same project inside `minTimeBetweenRuns` (spec §4.9).
    pub async fn queue_feature(&self, project_id: &str, feature_id: &str, priority: Priority) -> Result<String> {
        self.check_project_cooldown(project_id, priority)?;
        let projects = self.deps.project_source.list_projects().await?;
        let project = projects
            .into_iter()
            .find(|p| p.project_id == project_id)
            .ok_or_else(|| Error::config_error(format!("unknown project '{project_id}'")))?;
        let feature = project
            .features
            .iter()
            .find(|f| f.feature_id == feature_id)
            .cloned()
            .unwrap_or_else(|| FeatureSummary {
                feature_id: feature_id.to_string(),
                feature_name: feature_id.to_string(),
            });
        let max_retries = self.shared.config.lock().expect("orchestrator config mutex poisoned").max_retries;
        let test = QueuedTest::for_feature(&project, &feature, priority, max_retries);
        Ok(self.shared.enqueue(test))
    }

    /// `queueProjectTests(projectId, priority)`: enqueues every
    /// traditional (action-based) test case belonging to the project.
    /// Below `Critical`, rejects a second run of the same project inside
    /// `minTimeBetweenRuns` (spec §4.9).
    pub async fn queue_project_tests(&self, project_id: &str, priority: Priority) -> Result<String> {
        self.check_project_cooldown(project_id, priority)?;
        let projects = self.deps.project_source.list_projects().await?;
        let project = projects
            .into_iter()
            .find(|p| p.project_id == project_id)
            .ok_or_else(|| Error::config_error(format!("unknown project '{project_id}'")))?;
        let max_retries = self.shared.config.lock().expect("orchestrator config mutex poisoned").max_retries;
        let test = QueuedTest::for_traditional(&project, priority, max_retries);
        Ok(self.shared.enqueue(test))
    }

    /// Enforces `minTimeBetweenRuns`: a project whose last execution
    /// started less than the configured interval ago refuses a new
    /// non-critical enqueue outright rather than silently queuing it,
    /// mirroring the AI gateway's own bypass-for-`Critical` convention.
    fn check_project_cooldown(&self, project_id: &str, priority: Priority) -> Result<()> {
        if priority == Priority::Critical {
            return Ok(());
        }
        let min_gap = self.shared.config.lock().expect("orchestrator config mutex poisoned").min_time_between_runs;
        if let Some(elapsed) = self.shared.since_last_project_run(project_id) {
            let min_gap = chrono::Duration::from_std(min_gap).unwrap_or(chrono::Duration::zero());
            if elapsed < min_gap {
                return Err(Error::config_error(format!(
                    "project '{project_id}' ran {}ms ago, below the configured minimum of {}ms between runs",
                    elapsed.num_milliseconds(),
                    min_gap.num_milliseconds()
                )));
            }
        }
        Ok(())
    }

    pub fn get_statistics(&self) -> OrchestratorStats {
        self.shared.stats.lock().expect("orchestrator stats mutex poisoned").clone()
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        let mut status = self.shared.queue.lock().expect("orchestrator queue mutex poisoned").status();
        status.current_execution = self.shared.current_execution.lock().expect("current execution mutex poisoned").clone();
        status
    }

    /// `getExecutionHistory(limit)`: most-recent-first, defaulting to
    /// the configured history bound (50).
    pub fn get_execution_history(&self, limit: Option<usize>) -> Vec<QueuedTest> {
        let history = self.shared.history.lock().expect("orchestrator history mutex poisoned");
        let limit = limit.unwrap_or(history.len()).min(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Never idles: pop the next test by priority, or fall through to
/// regression scheduling, then overdue-retry scheduling, then a bounded
/// sleep.
async fn execution_loop(shared: Arc<Shared>, deps: Arc<RuntimeDeps>) {
    tracing::info!("execution loop started");
    while shared.running.load(Ordering::SeqCst) {
        if shared.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(250)).await;
            continue;
        }

        let next = shared.queue.lock().expect("orchestrator queue mutex poisoned").pop_next();
        match next {
            Some(test) => {
                *shared.current_execution.lock().expect("current execution mutex poisoned") = Some(test.id.clone());
                let finished = execute_test(&shared, &deps, test).await;
                *shared.current_execution.lock().expect("current execution mutex poisoned") = None;
                shared.record_history(finished);
            }
            None => idle(&shared, &deps).await,
        }
    }
    tracing::info!("execution loop terminated");
}

async fn idle(shared: &Shared, deps: &RuntimeDeps) {
    let now = Utc::now();
    let config = shared.config.lock().expect("orchestrator config mutex poisoned").clone();

    if config.continuous_regression_enabled {
        let due = {
            let last = *shared.last_regression_at.lock().expect("last regression mutex poisoned");
            last.map(|t| now - t >= chrono::Duration::from_std(config.regression_interval).unwrap())
                .unwrap_or(true)
        };
        if due {
            tracing::info!("scheduling a full regression sweep");
            schedule_regression(shared, deps).await;
            *shared.last_regression_at.lock().expect("last regression mutex poisoned") = Some(now);
            return;
        }
    }

    let retryable_ids: Vec<String> = {
        let history = shared.history.lock().expect("orchestrator history mutex poisoned");
        history
            .iter()
            .filter(|t| {
                t.status == TestStatus::Failed
                    && t.retry_count < t.max_retries
                    && t.completed_at
                        .map(|c| now - c >= chrono::Duration::from_std(config.retry_cooldown).unwrap())
                        .unwrap_or(false)
            })
            .map(|t| t.id.clone())
            .collect()
    };

    if !retryable_ids.is_empty() {
        let mut history = shared.history.lock().expect("orchestrator history mutex poisoned");
        for id in retryable_ids {
            if let Some(pos) = history.iter().position(|t| t.id == id) {
                let mut test = history.remove(pos).expect("position just located");
                test.status = TestStatus::Retrying;
                test.retry_count += 1;
                shared.stats.lock().expect("orchestrator stats mutex poisoned").total_retried += 1;
                drop(history);
                shared.queue.lock().expect("orchestrator queue mutex poisoned").push(test);
                history = shared.history.lock().expect("orchestrator history mutex poisoned");
            }
        }
        return;
    }

    tokio::time::sleep(config.poll_interval).await;
}

async fn execute_test(shared: &Shared, deps: &RuntimeDeps, mut test: QueuedTest) -> QueuedTest {
    tracing::info!(id = %test.id, project = %test.project_name, "executing queued test");
    test.status = TestStatus::Running;
    test.started_at = Some(Utc::now());
    shared.record_project_run(&test.project_id);
    if let Some(ai_gateway) = &deps.ai_gateway {
        ai_gateway.reset_test_budget();
    }

    let cases = match deps.project_source.load_test_cases(&test).await {
        Ok(cases) => cases,
        Err(err) => {
            test.status = TestStatus::Failed;
            test.error_message = Some(err.to_string());
            test.completed_at = Some(Utc::now());
            let mut stats = shared.stats.lock().expect("orchestrator stats mutex poisoned");
            stats.total_executed += 1;
            stats.total_failed += 1;
            return test;
        }
    };

    let unified = UnifiedExecutor::new(
        ActionExecutor::new(deps.driver.clone()),
        deps.decision.clone(),
        deps.learning.clone(),
        deps.patterns.clone(),
        deps.ai_gateway.clone(),
        deps.execution_mode,
    );
    *shared.current_stop_handle.lock().expect("stop handle mutex poisoned") = Some(unified.stop_handle());

    deps.learning.start_session(test.id.clone());
    let mut report = UnifiedExecutionReport::default();
    for case in &cases {
        let result = unified.run(Some(&test.base_url), case).await;
        report.total_steps += result.total_steps;
        report.ai_resolved_steps += result.ai_resolved_steps;
        report.new_selectors_learned += result.new_selectors_learned;
        let stopped = result.status == TestOutcome::Stopped;
        report.results.push(result);
        if stopped || !shared.running.load(Ordering::SeqCst) {
            break;
        }
    }
    let any_stopped = report.results.iter().any(|r| r.status == TestOutcome::Stopped);
    let all_passed = report.results.iter().all(|r| r.status == TestOutcome::Passed);
    let _ = deps.learning.end_session(all_passed);
    *shared.current_stop_handle.lock().expect("stop handle mutex poisoned") = None;

    test.completed_at = Some(Utc::now());
    test.status = if any_stopped {
        TestStatus::Stopped
    } else if all_passed {
        TestStatus::Completed
    } else {
        TestStatus::Failed
    };
    if !all_passed && !any_stopped {
        test.error_message = report
            .results
            .iter()
            .find(|r| r.status != TestOutcome::Passed)
            .map(|r| format!("scenario '{}' did not pass", r.name));
    }
    test.result = Some(report);

    let mut stats = shared.stats.lock().expect("orchestrator stats mutex poisoned");
    stats.total_executed += 1;
    if all_passed {
        stats.total_passed += 1;
    } else if !any_stopped {
        stats.total_failed += 1;
    }
    drop(stats);
    test
}

async fn discovery_loop(shared: Arc<Shared>, deps: Arc<RuntimeDeps>) {
    tracing::info!("discovery loop started");
    while shared.running.load(Ordering::SeqCst) {
        let config = shared.config.lock().expect("orchestrator config mutex poisoned").clone();
        if !shared.paused.load(Ordering::SeqCst) && config.auto_discover_new_features {
            discover_and_queue(&shared, &deps).await;
            *shared.last_discovery_at.lock().expect("last discovery mutex poisoned") = Some(Utc::now());
            tokio::time::sleep(config.discovery_interval).await;
        } else {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    tracing::info!("discovery loop terminated");
}

async fn discover_and_queue(shared: &Shared, deps: &RuntimeDeps) {
    let projects = match deps.project_source.list_projects().await {
        Ok(projects) => projects,
        Err(err) => {
            tracing::warn!(error = %err, "discovery failed to list projects");
            return;
        }
    };
    let max_retries = shared.config.lock().expect("orchestrator config mutex poisoned").max_retries;

    for project in &projects {
        for feature in &project.features {
            let key = format!("feature:{}:{}", project.project_id, feature.feature_id);
            if !shared.known_work.lock().expect("known work mutex poisoned").insert(key) {
                continue;
            }
            shared.enqueue(QueuedTest::for_feature(project, feature, Priority::Normal, max_retries));
        }
        if !project.test_case_ids.is_empty() {
            let key = format!("traditional:{}", project.project_id);
            if !shared.known_work.lock().expect("known work mutex poisoned").insert(key) {
                continue;
            }
            shared.enqueue(QueuedTest::for_traditional(project, Priority::Normal, max_retries));
        }
    }
}

async fn schedule_regression(shared: &Shared, deps: &RuntimeDeps) {
    let projects = match deps.project_source.list_projects().await {
        Ok(projects) => projects,
        Err(err) => {
            tracing::warn!(error = %err, "regression sweep failed to list projects");
            return;
        }
    };
    let max_retries = shared.config.lock().expect("orchestrator config mutex poisoned").max_retries;

    for project in &projects {
        for feature in &project.features {
            shared.enqueue(QueuedTest::for_feature(project, feature, Priority::Background, max_retries));
        }
        if !project.test_case_ids.is_empty() {
            shared.enqueue(QueuedTest::for_traditional(project, Priority::Background, max_retries));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::BrainMemories;
    use crate::decision::DecisionEngine;
    use crate::executor::driver::mock::MockDriver;
    use crate::selectors::KnowledgeBase;
    use crate::unified::{TestFormat, UnifiedStep};
    use tempfile::tempdir;

    struct FixedProjectSource {
        projects: Vec<ProjectSummary>,
    }

    #[async_trait]
    impl ProjectSource for FixedProjectSource {
        async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
            Ok(self.projects.clone())
        }

        async fn load_test_cases(&self, _test: &QueuedTest) -> Result<Vec<UnifiedTestCase>> {
            Ok(vec![UnifiedTestCase {
                id: "case-1".into(),
                name: "noop scenario".into(),
                format: TestFormat::ActionBased,
                steps: vec![UnifiedStep {
                    action: "wait".into(),
                    keyword: None,
                    text: None,
                    target: None,
                    selector: None,
                    selector_strategy: None,
                    value: Some("1".into()),
                }],
                tags: Vec::new(),
                feature_name: None,
                scenario_name: None,
                background_steps: Vec::new(),
            }])
        }
    }

    fn test_orchestrator(config: OrchestratorConfig, project_source: Arc<dyn ProjectSource>) -> Orchestrator {
        let kb = Arc::new(KnowledgeBase::new(tempdir().unwrap().path()).unwrap());
        let page_memory = Arc::new(crate::brain::PageMemory::new(tempdir().unwrap().path()).unwrap());
        let decision = Arc::new(DecisionEngine::new(kb.clone(), page_memory, None));
        let patterns = Arc::new(PatternStore::new(tempdir().unwrap().path()).unwrap());
        let memories = Arc::new(BrainMemories::new(tempdir().unwrap().path()).unwrap());
        let learning = Arc::new(LearningEngine::new(kb, patterns.clone(), memories));
        let driver: Arc<dyn BrowserDriver> = Arc::new(MockDriver::new());
        Orchestrator::new(config, driver, decision, learning, patterns, None, project_source)
    }

    fn sample_project() -> ProjectSummary {
        ProjectSummary {
            project_id: "proj-1".into(),
            project_name: "Demo".into(),
            base_url: "https://e.com".into(),
            credentials: HashMap::new(),
            features: vec![FeatureSummary {
                feature_id: "feat-1".into(),
                feature_name: "Checkout".into(),
            }],
            test_case_ids: vec!["tc-1".into()],
        }
    }

    #[test]
    fn priority_queue_respects_ordering() {
        let mut queue = PriorityQueue::new(10);
        let project = sample_project();
        queue.push(QueuedTest::for_traditional(&project, Priority::Low, 2));
        queue.push(QueuedTest::for_traditional(&project, Priority::Critical, 2));
        queue.push(QueuedTest::for_traditional(&project, Priority::Normal, 2));
        assert_eq!(queue.pop_next().unwrap().priority, Priority::Critical);
        assert_eq!(queue.pop_next().unwrap().priority, Priority::Normal);
        assert_eq!(queue.pop_next().unwrap().priority, Priority::Low);
    }

    #[test]
    fn priority_queue_drops_lowest_priority_on_overflow() {
        let mut queue = PriorityQueue::new(2);
        let project = sample_project();
        queue.push(QueuedTest::for_traditional(&project, Priority::Background, 2));
        queue.push(QueuedTest::for_traditional(&project, Priority::Normal, 2));
        queue.push(QueuedTest::for_traditional(&project, Priority::Critical, 2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_next().unwrap().priority, Priority::Critical);
        assert_eq!(queue.pop_next().unwrap().priority, Priority::Normal);
    }

    #[test]
    fn critical_push_never_fails_even_when_queue_is_full_of_critical() {
        let mut queue = PriorityQueue::new(1);
        let project = sample_project();
        queue.push(QueuedTest::for_traditional(&project, Priority::Critical, 2));
        queue.push(QueuedTest::for_traditional(&project, Priority::Critical, 2));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn start_runs_a_queued_test_to_completion_then_stop_is_graceful() {
        let config = OrchestratorConfig {
            auto_discover_new_features: false,
            continuous_regression_enabled: false,
            poll_interval: Duration::from_millis(20),
            ..OrchestratorConfig::default()
        };

        let source = Arc::new(FixedProjectSource {
            projects: vec![sample_project()],
        });
        let orchestrator = test_orchestrator(config, source);
        orchestrator.queue_project_tests("proj-1", Priority::High).await.unwrap();
        orchestrator.start().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if orchestrator.get_statistics().total_executed >= 1 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "test never executed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        orchestrator.stop();
        assert!(!orchestrator.is_running());
        let history = orchestrator.get_execution_history(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TestStatus::Completed);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let source = Arc::new(FixedProjectSource { projects: vec![] });
        let config = OrchestratorConfig {
            auto_discover_new_features: false,
            continuous_regression_enabled: false,
            ..OrchestratorConfig::default()
        };
        let orchestrator = test_orchestrator(config, source);
        orchestrator.start().unwrap();
        assert!(orchestrator.start().is_err());
        orchestrator.stop();
    }

    #[tokio::test]
    async fn queue_project_tests_rejects_a_second_run_within_the_cooldown_but_critical_bypasses_it() {
        let config = OrchestratorConfig {
            auto_discover_new_features: false,
            continuous_regression_enabled: false,
            poll_interval: Duration::from_millis(20),
            min_time_between_runs: Duration::from_secs(3600),
            ..OrchestratorConfig::default()
        };
        let source = Arc::new(FixedProjectSource {
            projects: vec![sample_project()],
        });
        let orchestrator = test_orchestrator(config, source);
        orchestrator.queue_project_tests("proj-1", Priority::High).await.unwrap();
        orchestrator.start().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if orchestrator.get_statistics().total_executed >= 1 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "test never executed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        orchestrator.stop();

        assert!(orchestrator.queue_project_tests("proj-1", Priority::Normal).await.is_err());
        assert!(orchestrator.queue_project_tests("proj-1", Priority::Critical).await.is_ok());
    }

    #[tokio::test]
    async fn queue_feature_resolves_project_and_feature_name() {
        let source = Arc::new(FixedProjectSource {
            projects: vec![sample_project()],
        });
        let config = OrchestratorConfig::default();
        let orchestrator = test_orchestrator(config, source);
        let id = orchestrator.queue_feature("proj-1", "feat-1", Priority::Critical).await.unwrap();
        assert!(!id.is_empty());
        let status = orchestrator.get_queue_status();
        assert_eq!(status.total, 1);
        assert_eq!(status.by_priority[&Priority::Critical], 1);
    }
}
