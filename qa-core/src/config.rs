//! Ambient configuration: the on-disk data directory (spec §6) and the
//! numeric knobs for the Orchestrator (spec §4.9) and AI Gateway budget
//! (spec §4.5), with `Default` impls mirroring the values spec.md pins.

use crate::ai::budget::BudgetLimits;
use crate::error::{Error, Result};
use crate::unified::ExecutionMode;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolves the root of the on-disk layout in spec §6. Each store (KB,
/// patterns, brain memories, AI gateway, reports...) still names its own
/// files beneath the directory it's handed; this type exists so a caller
/// configures one root instead of wiring five paths by hand.
#[derive(Debug, Clone)]
pub struct DataDirLayout {
    root: PathBuf,
}

impl DataDirLayout {
    /// Creates the root data directory if it doesn't exist. Missing data
    /// directories are a `ConfigError`, fatal at startup per spec §7.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::config_error(format!("cannot create data directory {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn report_path(&self, report_id: &str) -> PathBuf {
        self.reports_dir().join(format!("{report_id}.json"))
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.root.join("recordings")
    }

    pub fn recording_path(&self, session_id: &str) -> PathBuf {
        self.recordings_dir().join(format!("{session_id}.json"))
    }
}

/// Token budget limits for the AI Gateway. Provider selection/ordering is
/// a constructor argument (`Vec<Arc<dyn TextGenerationProvider>>`), not
/// config, per the "dynamic dispatch over providers" design note in
/// spec §9 — only the numeric knobs belong here.
pub type AiGatewayConfig = BudgetLimits;

/// Configuration for the Orchestrator (spec §4.9). Numeric defaults match
/// spec.md's pinned values (30s poll, 300s discovery, 1000 queue cap,
/// 60s min-time-between-runs, 24h regression, 2 retries, 5 min retry
/// cooldown, 50-entry bounded history).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub discovery_interval: Duration,
    pub min_time_between_runs: Duration,
    pub regression_interval: Duration,
    pub max_queue_size: usize,
    pub headless: bool,
    pub execution_mode: ExecutionMode,
    pub auto_discover_new_features: bool,
    pub continuous_regression_enabled: bool,
    pub max_retries: u32,
    pub retry_cooldown: Duration,
    pub history_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(30),
            discovery_interval: Duration::from_secs(300),
            min_time_between_runs: Duration::from_secs(60),
            regression_interval: Duration::from_secs(24 * 3600),
            max_queue_size: 1000,
            headless: true,
            execution_mode: ExecutionMode::Autonomous,
            auto_discover_new_features: true,
            continuous_regression_enabled: true,
            max_retries: 2,
            retry_cooldown: Duration::from_secs(5 * 60),
            history_limit: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_pinned_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.discovery_interval, Duration::from_secs(300));
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn data_dir_layout_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("data");
        let layout = DataDirLayout::new(&nested).unwrap();
        assert!(layout.root().exists());
    }
}
