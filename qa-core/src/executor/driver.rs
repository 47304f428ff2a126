//! Browser driver capability interface and its two concrete
//! implementations: an always-available in-memory driver used by tests
//! and the default build, and an optional Playwright-backed driver
//! behind the `playwright-driver` feature.

use crate::error::Result;
use crate::executor::types::ElementInfo;
use crate::selectors::SelectorStrategy;
use async_trait::async_trait;

/// Abstract capability set a browser automation backend must provide.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn current_title(&self) -> Result<String>;

    /// Resolve a selector under a strategy to a single element handle,
    /// represented here by its resolved CSS path (good enough for the
    /// mock driver; a real driver would return an opaque handle type).
    async fn query(&self, strategy: SelectorStrategy, selector: &str) -> Result<Option<String>>;

    async fn click(&self, strategy: SelectorStrategy, selector: &str) -> Result<()>;
    async fn fill(&self, strategy: SelectorStrategy, selector: &str, value: &str) -> Result<()>;

    /// Per-keystroke typing: focus, select existing content, press each
    /// character with `keystroke_delay_ms` between presses, tab out.
    /// `fill` sets the value atomically instead; frameworks that
    /// re-render on input events need this slower path to observe them.
    async fn type_text(&self, strategy: SelectorStrategy, selector: &str, value: &str, keystroke_delay_ms: u64) -> Result<()>;
    async fn select(&self, strategy: SelectorStrategy, selector: &str, value: &str) -> Result<()>;
    async fn check(&self, strategy: SelectorStrategy, selector: &str, checked: bool) -> Result<()>;
    async fn hover(&self, strategy: SelectorStrategy, selector: &str) -> Result<()>;
    async fn press_key(&self, strategy: SelectorStrategy, selector: &str, key: &str) -> Result<()>;

    async fn screenshot(&self, path: &str) -> Result<()>;

    /// Evaluate a script that returns the visible-element inventory, for
    /// page-signature computation and semantic/proximity element-finding.
    async fn element_inventory(&self) -> Result<Vec<ElementInfo>>;

    /// The current page's serialized HTML, captured alongside a failure
    /// screenshot for offline debugging.
    async fn page_html(&self) -> Result<String>;

    async fn close(&self) -> Result<()>;
}

/// In-memory driver: a scriptable fixture standing in for a real
/// browser. Always available, regardless of feature flags, so unit and
/// integration tests never need a real browser.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct MockElement {
        pub selector: String,
        pub strategy: SelectorStrategy,
        pub visible: bool,
        pub info: ElementInfo,
    }

    #[derive(Default)]
    struct State {
        url: String,
        title: String,
        elements: Vec<MockElement>,
        values: HashMap<String, String>,
        checked: HashMap<String, bool>,
        closed: bool,
    }

    /// A fully scriptable in-memory browser: the test installs a set of
    /// elements, and the driver resolves/mutates against that fixture.
    pub struct MockDriver {
        state: Mutex<State>,
    }

    impl Default for MockDriver {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockDriver {
        pub fn new() -> Self {
            Self { state: Mutex::new(State::default()) }
        }

        pub fn with_element(&self, element: MockElement) {
            self.state.lock().expect("mock driver mutex poisoned").elements.push(element);
        }

        pub fn set_page(&self, url: &str, title: &str) {
            let mut state = self.state.lock().expect("mock driver mutex poisoned");
            state.url = url.to_string();
            state.title = title.to_string();
        }

        pub fn value_of(&self, selector: &str) -> Option<String> {
            self.state.lock().expect("mock driver mutex poisoned").values.get(selector).cloned()
        }

        pub fn is_checked(&self, selector: &str) -> Option<bool> {
            self.state.lock().expect("mock driver mutex poisoned").checked.get(selector).copied()
        }

        pub fn is_closed(&self) -> bool {
            self.state.lock().expect("mock driver mutex poisoned").closed
        }

        fn find(&self, strategy: SelectorStrategy, selector: &str) -> Option<MockElement> {
            self.state
                .lock()
                .expect("mock driver mutex poisoned")
                .elements
                .iter()
                .find(|e| e.strategy == strategy && e.selector == selector)
                .cloned()
        }
    }

    #[async_trait]
    impl BrowserDriver for MockDriver {
        async fn navigate(&self, url: &str) -> Result<()> {
            self.state.lock().expect("mock driver mutex poisoned").url = url.to_string();
            Ok(())
        }

        async fn current_url(&self) -> Result<String> {
            Ok(self.state.lock().expect("mock driver mutex poisoned").url.clone())
        }

        async fn current_title(&self) -> Result<String> {
            Ok(self.state.lock().expect("mock driver mutex poisoned").title.clone())
        }

        async fn query(&self, strategy: SelectorStrategy, selector: &str) -> Result<Option<String>> {
            Ok(self.find(strategy, selector).map(|e| e.info.css_path))
        }

        async fn click(&self, strategy: SelectorStrategy, selector: &str) -> Result<()> {
            let element = self
                .find(strategy, selector)
                .ok_or_else(|| crate::error::Error::element_not_found(selector, strategy.to_string()))?;
            if !element.visible {
                return Err(crate::error::Error::element_not_visible(selector, strategy.to_string()));
            }
            Ok(())
        }

        async fn fill(&self, strategy: SelectorStrategy, selector: &str, value: &str) -> Result<()> {
            self.find(strategy, selector)
                .ok_or_else(|| crate::error::Error::element_not_found(selector, strategy.to_string()))?;
            self.state
                .lock()
                .expect("mock driver mutex poisoned")
                .values
                .insert(selector.to_string(), value.to_string());
            Ok(())
        }

        async fn type_text(&self, strategy: SelectorStrategy, selector: &str, value: &str, _keystroke_delay_ms: u64) -> Result<()> {
            self.fill(strategy, selector, value).await
        }

        async fn select(&self, strategy: SelectorStrategy, selector: &str, value: &str) -> Result<()> {
            self.fill(strategy, selector, value).await
        }

        async fn check(&self, strategy: SelectorStrategy, selector: &str, checked: bool) -> Result<()> {
            self.find(strategy, selector)
                .ok_or_else(|| crate::error::Error::element_not_found(selector, strategy.to_string()))?;
            self.state
                .lock()
                .expect("mock driver mutex poisoned")
                .checked
                .insert(selector.to_string(), checked);
            Ok(())
        }

        async fn hover(&self, strategy: SelectorStrategy, selector: &str) -> Result<()> {
            self.find(strategy, selector)
                .ok_or_else(|| crate::error::Error::element_not_found(selector, strategy.to_string()))?;
            Ok(())
        }

        async fn press_key(&self, strategy: SelectorStrategy, selector: &str, _key: &str) -> Result<()> {
            self.find(strategy, selector)
                .ok_or_else(|| crate::error::Error::element_not_found(selector, strategy.to_string()))?;
            Ok(())
        }

        async fn screenshot(&self, _path: &str) -> Result<()> {
            Ok(())
        }

        async fn element_inventory(&self) -> Result<Vec<ElementInfo>> {
            Ok(self
                .state
                .lock()
                .expect("mock driver mutex poisoned")
                .elements
                .iter()
                .filter(|e| e.visible)
                .map(|e| e.info.clone())
                .collect())
        }

        async fn page_html(&self) -> Result<String> {
            let state = self.state.lock().expect("mock driver mutex poisoned");
            let body: String = state
                .elements
                .iter()
                .map(|e| format!("<{0} data-css=\"{1}\"></{0}>", e.info.tag, e.info.css_path))
                .collect();
            Ok(format!("<html><head><title>{}</title></head><body>{}</body></html>", state.title, body))
        }

        async fn close(&self) -> Result<()> {
            self.state.lock().expect("mock driver mutex poisoned").closed = true;
            Ok(())
        }
    }
}

#[cfg(feature = "playwright-driver")]
pub mod playwright_driver {
    //! Real browser automation backed by the `playwright` crate. This
    //! module only compiles with the `playwright-driver` feature; the
    //! mock driver above always remains available so tests never need a
    //! real browser binary.

    use super::*;

    /// Thin adapter translating the capability interface onto a
    /// Playwright page handle. Connection/launch is the caller's
    /// responsibility; this driver takes an already-open page.
    pub struct PlaywrightDriver {
        page: playwright::api::Page,
    }

    impl PlaywrightDriver {
        pub fn new(page: playwright::api::Page) -> Self {
            Self { page }
        }

        fn css(strategy: SelectorStrategy, selector: &str) -> String {
            match strategy {
                SelectorStrategy::Css => selector.to_string(),
                SelectorStrategy::Xpath => format!("xpath={selector}"),
                SelectorStrategy::Text => format!("text={selector}"),
                SelectorStrategy::Placeholder => format!("[placeholder=\"{selector}\"]"),
                SelectorStrategy::Label => format!("label:has-text(\"{selector}\")"),
                SelectorStrategy::Role => format!("[role=\"{selector}\"]"),
                SelectorStrategy::Aria => format!("[aria-label=\"{selector}\"]"),
                SelectorStrategy::TestId => format!("[data-testid=\"{selector}\"]"),
            }
        }
    }

    #[async_trait]
    impl BrowserDriver for PlaywrightDriver {
        async fn navigate(&self, url: &str) -> Result<()> {
            self.page
                .goto_builder(url)
                .goto()
                .await
                .map_err(|err| crate::error::Error::navigation_error(err.to_string()))?;
            Ok(())
        }

        async fn current_url(&self) -> Result<String> {
            self.page.url().map_err(|err| crate::error::Error::Internal(err.to_string()))
        }

        async fn current_title(&self) -> Result<String> {
            self.page
                .title()
                .await
                .map_err(|err| crate::error::Error::Internal(err.to_string()))
        }

        async fn query(&self, strategy: SelectorStrategy, selector: &str) -> Result<Option<String>> {
            let css = Self::css(strategy, selector);
            let found = self
                .page
                .query_selector(&css)
                .await
                .map_err(|err| crate::error::Error::Internal(err.to_string()))?;
            Ok(found.map(|_| css))
        }

        async fn click(&self, strategy: SelectorStrategy, selector: &str) -> Result<()> {
            let css = Self::css(strategy, selector);
            self.page
                .click_builder(&css)
                .click()
                .await
                .map_err(|_| crate::error::Error::element_not_found(selector, strategy.to_string()))
        }

        async fn fill(&self, strategy: SelectorStrategy, selector: &str, value: &str) -> Result<()> {
            let css = Self::css(strategy, selector);
            self.page
                .fill_builder(&css, value)
                .fill()
                .await
                .map_err(|_| crate::error::Error::element_not_found(selector, strategy.to_string()))
        }

        async fn type_text(&self, strategy: SelectorStrategy, selector: &str, value: &str, keystroke_delay_ms: u64) -> Result<()> {
            let css = Self::css(strategy, selector);
            self.page
                .type_builder(&css, value)
                .type_(std::time::Duration::from_millis(keystroke_delay_ms))
                .await
                .map_err(|_| crate::error::Error::element_not_found(selector, strategy.to_string()))
        }

        async fn select(&self, strategy: SelectorStrategy, selector: &str, value: &str) -> Result<()> {
            let css = Self::css(strategy, selector);
            self.page
                .select_option_builder_str(&css, value)
                .select_option()
                .await
                .map_err(|_| crate::error::Error::element_not_found(selector, strategy.to_string()))?;
            Ok(())
        }

        async fn check(&self, strategy: SelectorStrategy, selector: &str, checked: bool) -> Result<()> {
            let css = Self::css(strategy, selector);
            let result = if checked {
                self.page.check_builder(&css).check().await
            } else {
                self.page.uncheck_builder(&css).uncheck().await
            };
            result.map_err(|_| crate::error::Error::element_not_found(selector, strategy.to_string()))
        }

        async fn hover(&self, strategy: SelectorStrategy, selector: &str) -> Result<()> {
            let css = Self::css(strategy, selector);
            self.page
                .hover_builder(&css)
                .hover()
                .await
                .map_err(|_| crate::error::Error::element_not_found(selector, strategy.to_string()))
        }

        async fn press_key(&self, strategy: SelectorStrategy, selector: &str, key: &str) -> Result<()> {
            let css = Self::css(strategy, selector);
            self.page
                .press_builder(&css, key)
                .press()
                .await
                .map_err(|_| crate::error::Error::element_not_found(selector, strategy.to_string()))
        }

        async fn screenshot(&self, path: &str) -> Result<()> {
            self.page
                .screenshot_builder()
                .path(std::path::PathBuf::from(path))
                .screenshot()
                .await
                .map_err(|err| crate::error::Error::Internal(err.to_string()))?;
            Ok(())
        }

        async fn element_inventory(&self) -> Result<Vec<ElementInfo>> {
            let script = include_str!("element_inventory.js");
            let value: serde_json::Value = self
                .page
                .eval(script)
                .await
                .map_err(|err| crate::error::Error::Internal(err.to_string()))?;
            serde_json::from_value(value).map_err(crate::error::Error::from)
        }

        async fn page_html(&self) -> Result<String> {
            self.page
                .content()
                .await
                .map_err(|err| crate::error::Error::Internal(err.to_string()))
        }

        async fn close(&self) -> Result<()> {
            self.page
                .close(None)
                .await
                .map_err(|err| crate::error::Error::Internal(err.to_string()))
        }
    }
}
