//! Token budget: three rolling counters (day/hour/test) reset by
//! wall-clock comparison, persisted to disk so a restart does not reset
//! the day/hour counters early.

use crate::error::Result;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct BudgetLimits {
    pub daily_tokens: u32,
    pub hourly_tokens: u32,
    pub per_test_tokens: u32,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            daily_tokens: 100_000,
            hourly_tokens: 20_000,
            per_test_tokens: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BudgetState {
    used_today: u32,
    used_this_hour: u32,
    used_this_test: u32,
    day_started: DateTime<Utc>,
    hour_started: DateTime<Utc>,
}

impl Default for BudgetState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            used_today: 0,
            used_this_hour: 0,
            used_this_test: 0,
            day_started: now,
            hour_started: now,
        }
    }
}

pub struct AiBudget {
    state: Mutex<BudgetState>,
    limits: BudgetLimits,
    data_dir: PathBuf,
}

impl AiBudget {
    pub fn new(data_dir: impl Into<PathBuf>, limits: BudgetLimits) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join("brain"))?;
        let budget = Self {
            state: Mutex::new(BudgetState::default()),
            limits,
            data_dir,
        };
        budget.load();
        Ok(budget)
    }

    fn file_path(&self) -> PathBuf {
        self.data_dir.join("brain").join("ai_budget.json")
    }

    fn load(&self) {
        let Ok(content) = std::fs::read_to_string(self.file_path()) else { return };
        match serde_json::from_str::<BudgetState>(&content) {
            Ok(state) => *self.state.lock().expect("budget mutex poisoned") = state,
            Err(err) => tracing::warn!(error = %err, "corrupt AI budget file, resetting counters"),
        }
    }

    fn rollover(state: &mut BudgetState) {
        let now = Utc::now();
        if now.date_naive() != state.day_started.date_naive() {
            state.used_today = 0;
            state.day_started = now;
        }
        if now.hour() != state.hour_started.hour() || now.date_naive() != state.hour_started.date_naive() {
            state.used_this_hour = 0;
            state.hour_started = now;
        }
    }

    /// `True` if a request of this priority and token size would be
    /// allowed to proceed (`Critical` always bypasses the limits).
    pub fn check(&self, priority: super::types::Priority, tokens: u32) -> bool {
        use super::types::Priority;
        if priority == Priority::Critical {
            return true;
        }
        let mut state = self.state.lock().expect("budget mutex poisoned");
        Self::rollover(&mut state);
        state.used_today + tokens <= self.limits.daily_tokens
            && state.used_this_hour + tokens <= self.limits.hourly_tokens
            && state.used_this_test + tokens <= self.limits.per_test_tokens
    }

    /// Deduct tokens after a successful provider call and persist.
    pub fn deduct(&self, tokens: u32) -> Result<()> {
        {
            let mut state = self.state.lock().expect("budget mutex poisoned");
            Self::rollover(&mut state);
            state.used_today += tokens;
            state.used_this_hour += tokens;
            state.used_this_test += tokens;
        }
        self.persist()
    }

    /// Reset the per-test counter; called at the start of each queued test.
    pub fn reset_test_counter(&self) {
        self.state.lock().expect("budget mutex poisoned").used_this_test = 0;
    }

    pub fn used_today(&self) -> u32 {
        self.state.lock().expect("budget mutex poisoned").used_today
    }

    fn persist(&self) -> Result<()> {
        let state = self.state.lock().expect("budget mutex poisoned").clone();
        let json = serde_json::to_string_pretty(&state)?;
        crate::brain::atomic_write(&self.file_path(), &json)
    }
}
