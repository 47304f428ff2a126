//! Action Executor: runs one atomic browser step against a
//! [`BrowserDriver`], with retry, multi-strategy element-finding, and
//! self-healing recovery.

pub mod driver;
pub mod types;

pub use driver::BrowserDriver;
pub use types::{Action, ActionInput, ActionResult, ActionStatus, ElementInfo};

use crate::selectors::SelectorStrategy;
use crate::util::{token_overlap, tokenize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const MAX_ATTEMPTS: u32 = 3;
const KEYSTROKE_DELAY_MS: u64 = 50;

type BeforeHook = Box<dyn Fn(&ActionInput) + Send + Sync>;
type AfterHook = Box<dyn Fn(&ActionInput, &ActionResult) + Send + Sync>;

pub struct ActionExecutor {
    driver: Arc<dyn BrowserDriver>,
    report_dir: Option<PathBuf>,
    before_action: Option<BeforeHook>,
    after_action: Option<AfterHook>,
}

impl ActionExecutor {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            report_dir: None,
            before_action: None,
            after_action: None,
        }
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn set_before_action(&mut self, hook: BeforeHook) {
        self.before_action = Some(hook);
    }

    pub fn set_after_action(&mut self, hook: AfterHook) {
        self.after_action = Some(hook);
    }

    /// Navigates the underlying driver directly, bypassing the
    /// attempt/healing loop — used to land on a test's base URL before
    /// its first step runs.
    pub async fn navigate_only(&self, url: &str) -> crate::error::Result<()> {
        self.driver.navigate(url).await
    }

    /// Closes the underlying driver outright. Used by `forceStop` (spec
    /// §4.9) to unblock a step that is hung inside a driver call the
    /// cooperative `stopRequested` check can't interrupt.
    pub async fn force_stop(&self) -> crate::error::Result<()> {
        self.driver.close().await
    }

    /// The current page, normalized (query stripped, numeric ids
    /// collapsed) — the second coordinate of every learned fact (spec
    /// §3). Falls back to the empty page when the driver has no
    /// current URL yet (no navigation has happened).
    pub async fn current_page(&self) -> String {
        self.driver
            .current_url()
            .await
            .map(|url| crate::util::normalize_page(&url))
            .unwrap_or_default()
    }

    /// Runs one step, with up to [`MAX_ATTEMPTS`] attempts of retry and
    /// healing. Never returns `Err`: every outcome, including a fatal
    /// driver error, is reported as an [`ActionResult`].
    pub async fn execute(&self, step_index: usize, input: ActionInput) -> ActionResult {
        if let Some(hook) = &self.before_action {
            hook(&input);
        }

        let started = Instant::now();
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt == 2 {
                // Refresh DOM snapshot, short settle delay, before retrying.
                let _ = self.driver.element_inventory().await;
                tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            }

            let selector_candidates = if attempt < 3 {
                self.candidate_selectors(&input)
            } else {
                self.fuzzy_candidate_selectors(&input).await
            };

            for (strategy, selector) in selector_candidates {
                match self.run_once(&input.action, strategy, &selector, input.value.as_deref()).await {
                    Ok(()) => {
                        let execution_time_ms = started.elapsed().as_millis() as u64;
                        let mut result = ActionResult::success(input.action.clone(), &input.selector, execution_time_ms);
                        if attempt > 1 || selector != input.selector {
                            result.status = ActionStatus::Recovered;
                            result.resolved_selector = Some(selector);
                        }
                        if let Some(hook) = &self.after_action {
                            hook(&input, &result);
                        }
                        return result;
                    }
                    Err(err) => last_error = Some(err),
                }
            }
        }

        let execution_time_ms = started.elapsed().as_millis() as u64;
        let status = match &last_error {
            Some(crate::error::Error::ElementNotVisible { .. }) => ActionStatus::ElementNotVisible,
            Some(crate::error::Error::Timeout { .. }) => ActionStatus::Timeout,
            _ => ActionStatus::ElementNotFound,
        };
        let message = last_error.map(|e| e.to_string()).unwrap_or_else(|| "element not found".to_string());
        let mut result = ActionResult::failed(status, input.action.clone(), &input.selector, execution_time_ms, message);
        if let Some(dir) = &self.report_dir {
            let png_path = dir.join(format!("step_{step_index}_failure.png"));
            if self.driver.screenshot(&png_path.to_string_lossy()).await.is_ok() {
                result.screenshot_path = Some(png_path.to_string_lossy().to_string());
            }
            if let Ok(html) = self.driver.page_html().await {
                let html_path = dir.join(format!("step_{step_index}_failure.html"));
                if std::fs::write(&html_path, html).is_ok() {
                    result.html_snapshot_path = Some(html_path.to_string_lossy().to_string());
                }
            }
            if let Ok(inventory) = self.driver.element_inventory().await {
                if let Ok(json) = serde_json::to_string_pretty(&inventory) {
                    let dom_path = dir.join(format!("step_{step_index}_failure_dom.json"));
                    if std::fs::write(&dom_path, json).is_ok() {
                        result.dom_snapshot_path = Some(dom_path.to_string_lossy().to_string());
                    }
                }
            }
        }
        if let Some(hook) = &self.after_action {
            hook(&input, &result);
        }
        result
    }

    /// Ordered: given selector, then caller-supplied alternatives (already ranked).
    fn candidate_selectors(&self, input: &ActionInput) -> Vec<(SelectorStrategy, String)> {
        let mut candidates = vec![(input.selector_strategy, input.selector.clone())];
        candidates.extend(input.alternatives.iter().map(|s| (s.strategy, s.value.clone())));
        candidates
    }

    /// Attempt 3: fuzzy-match the selector text as an intent against the
    /// live DOM inventory to produce an alternative selector, trying
    /// semantic locators (label/placeholder/role/text) and then a loose
    /// text-proximity match, ahead of the plain candidates.
    async fn fuzzy_candidate_selectors(&self, input: &ActionInput) -> Vec<(SelectorStrategy, String)> {
        let mut candidates = self.candidate_selectors(input);
        let Ok(inventory) = self.driver.element_inventory().await else { return candidates };

        let intent_tokens = tokenize(&input.selector);
        let mut semantic: Vec<(f64, SelectorStrategy, String)> = Vec::new();
        for element in &inventory {
            if let Some(label) = &element.label {
                semantic.push((token_overlap(&intent_tokens, &tokenize(label)), SelectorStrategy::Label, label.clone()));
            }
            if let Some(placeholder) = &element.placeholder {
                semantic.push((token_overlap(&intent_tokens, &tokenize(placeholder)), SelectorStrategy::Placeholder, placeholder.clone()));
            }
            if let Some(role) = &element.role {
                semantic.push((token_overlap(&intent_tokens, &tokenize(role)), SelectorStrategy::Role, role.clone()));
            }
            if let Some(text) = &element.text {
                semantic.push((token_overlap(&intent_tokens, &tokenize(text)), SelectorStrategy::Text, text.clone()));
            }
        }
        semantic.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        candidates.extend(
            semantic
                .into_iter()
                .filter(|(score, _, _)| *score > 0.0)
                .take(3)
                .map(|(_, strategy, value)| (strategy, value)),
        );
        candidates
    }

    async fn run_once(&self, action: &Action, strategy: SelectorStrategy, selector: &str, value: Option<&str>) -> crate::error::Result<()> {
        match action {
            Action::Navigate => self.driver.navigate(selector).await,
            Action::Click => self.driver.click(strategy, selector).await,
            Action::Fill => {
                let value = value.unwrap_or_default();
                self.driver.fill(strategy, selector, value).await
            }
            Action::Type => {
                // Per-keystroke typing, simulated by the driver; the delay
                // matters to frameworks that re-render on input events.
                let value = value.unwrap_or_default();
                self.driver.type_text(strategy, selector, value, KEYSTROKE_DELAY_MS).await
            }
            Action::Select => self.driver.select(strategy, selector, value.unwrap_or_default()).await,
            Action::Check => self.driver.check(strategy, selector, true).await,
            Action::Uncheck => self.driver.check(strategy, selector, false).await,
            Action::Hover => self.driver.hover(strategy, selector).await,
            Action::PressKey => self.driver.press_key(strategy, selector, value.unwrap_or("Enter")).await,
            Action::Wait => {
                let duration_ms: u64 = value.and_then(|v| v.parse().ok()).unwrap_or(1000);
                tokio::time::sleep(std::time::Duration::from_millis(duration_ms)).await;
                Ok(())
            }
            Action::Scroll => self.driver.query(strategy, selector).await.map(|_| ()),
            Action::Screenshot => self.driver.screenshot(value.unwrap_or("screenshot.png")).await,
            Action::AssertVisible => self
                .driver
                .query(strategy, selector)
                .await?
                .map(|_| ())
                .ok_or_else(|| crate::error::Error::element_not_found(selector, strategy.to_string())),
            Action::AssertText => {
                let expected = value.unwrap_or_default();
                let inventory = self.driver.element_inventory().await?;
                let found = inventory.iter().any(|e| e.text.as_deref() == Some(expected));
                if found {
                    Ok(())
                } else {
                    Err(crate::error::Error::assertion_failure(format!("no element with text '{expected}'")))
                }
            }
            Action::AssertUrl => {
                let expected = value.unwrap_or_default();
                let current = self.driver.current_url().await?;
                if current == expected {
                    Ok(())
                } else {
                    Err(crate::error::Error::assertion_failure(format!(
                        "expected url '{expected}', got '{current}'"
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::driver::mock::{MockDriver, MockElement};
    use crate::selectors::SelectorStrategy;

    fn element(selector: &str, strategy: SelectorStrategy, visible: bool) -> MockElement {
        MockElement {
            selector: selector.to_string(),
            strategy,
            visible,
            info: ElementInfo {
                tag: "input".into(),
                text: None,
                label: None,
                placeholder: None,
                role: None,
                test_id: None,
                css_path: selector.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn fill_succeeds_on_first_attempt_with_direct_selector() {
        let driver = Arc::new(MockDriver::new());
        driver.with_element(element("#username", SelectorStrategy::Css, true));
        let executor = ActionExecutor::new(driver.clone());

        let input = ActionInput::new(Action::Fill, "#username", SelectorStrategy::Css).with_value("alice");
        let result = executor.execute(0, input).await;

        assert!(result.is_success());
        assert_eq!(result.status, ActionStatus::Success);
        assert_eq!(driver.value_of("#username").as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn click_heals_via_caller_supplied_alternative() {
        let driver = Arc::new(MockDriver::new());
        driver.with_element(element("#new-submit", SelectorStrategy::Css, true));
        let executor = ActionExecutor::new(driver);

        let alternative = crate::selectors::Selector::new("#new-submit", SelectorStrategy::Css, crate::selectors::LearnedFrom::Execution);
        let input = ActionInput::new(Action::Click, "#old-submit", SelectorStrategy::Css).with_alternatives(vec![alternative]);
        let result = executor.execute(0, input).await;

        assert_eq!(result.status, ActionStatus::Recovered);
        assert_eq!(result.resolved_selector.as_deref(), Some("#new-submit"));
    }

    #[tokio::test]
    async fn click_heals_via_semantic_label_match_on_third_attempt() {
        let driver = Arc::new(MockDriver::new());
        let mut labeled = element("username", SelectorStrategy::Label, true);
        labeled.info.label = Some("username".to_string());
        driver.with_element(labeled);
        let executor = ActionExecutor::new(driver);

        let input = ActionInput::new(Action::Click, "username", SelectorStrategy::Css);
        let result = executor.execute(0, input).await;

        assert_eq!(result.status, ActionStatus::Recovered);
    }

    #[tokio::test]
    async fn exhausted_healing_reports_element_not_found() {
        let driver = Arc::new(MockDriver::new());
        let executor = ActionExecutor::new(driver);

        let input = ActionInput::new(Action::Click, "#missing", SelectorStrategy::Css);
        let result = executor.execute(0, input).await;

        assert_eq!(result.status, ActionStatus::ElementNotFound);
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn failed_step_captures_html_and_dom_snapshots_alongside_screenshot() {
        let driver = Arc::new(MockDriver::new());
        driver.set_page("https://e.com/login", "Login");
        let report_dir = tempfile::tempdir().unwrap();
        let executor = ActionExecutor::new(driver).with_report_dir(report_dir.path());

        let input = ActionInput::new(Action::Click, "#missing", SelectorStrategy::Css);
        let result = executor.execute(0, input).await;

        assert!(!result.is_success());
        assert!(result.screenshot_path.is_some());
        let html_path = result.html_snapshot_path.expect("html snapshot recorded");
        assert!(std::fs::read_to_string(&html_path).unwrap().contains("Login"));
        let dom_path = result.dom_snapshot_path.expect("dom snapshot recorded");
        assert!(std::fs::read_to_string(&dom_path).unwrap().starts_with('['));
    }

    #[tokio::test]
    async fn assert_url_compares_current_url() {
        let driver = Arc::new(MockDriver::new());
        driver.navigate("https://e.com/dashboard").await.unwrap();
        let executor = ActionExecutor::new(driver);

        let input = ActionInput::new(Action::AssertUrl, "", SelectorStrategy::Css).with_value("https://e.com/dashboard");
        let result = executor.execute(0, input).await;
        assert!(result.is_success());
    }
}
