use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::DOM;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{BrowserSettings, Credentials};
use crate::dom::{INTERACTIVE_TAGS, NOISE_TAGS};
use crate::types::{AGENT_ID_ATTR, Target};

const LOGIN_URL: &str = "https://www.linkedin.com/login";
const LOGGED_IN_MARKER: &str = "#global-nav-search";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowserError {
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("browser driver error: {0}")]
    Driver(String),
}

fn driver(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Driver(format!("{e:#}"))
}

/// The live page as the agent sees and touches it.
#[async_trait]
pub trait LiveView: Send + Sync {
    /// Raw markup of the region this view is scoped to.
    async fn markup(&self) -> Result<String, BrowserError>;
    async fn count_matching(&self, selector: &str) -> Result<usize, BrowserError>;
    /// Whether `target` resolves to an element right now.
    async fn locate(&self, target: &Target) -> Result<bool, BrowserError>;
    async fn scroll_to_bottom(&self) -> Result<(), BrowserError>;
    async fn click(&self, target: &Target) -> Result<(), BrowserError>;
    /// Clears the field, then types `text` into it.
    async fn type_text(&self, target: &Target, text: &str) -> Result<(), BrowserError>;
    async fn select_option(&self, target: &Target, visible_text: &str) -> Result<(), BrowserError>;
    async fn set_file(&self, target: &Target, path: &str) -> Result<(), BrowserError>;
}

fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn evaluate(tab: &Tab, js: &str) -> Result<Value, BrowserError> {
    let result = tab.evaluate(js, false).map_err(driver)?;
    Ok(result.value.unwrap_or(Value::Null))
}

/// Replays the snapshot traversal in the page and writes agent ids onto the
/// live elements, then reports whether `wanted` exists.
fn stamp_agent_ids_js(scope: Option<&str>, wanted: &str) -> String {
    let skip = serde_json::to_string(&NOISE_TAGS).unwrap_or_default();
    let interactive = serde_json::to_string(&INTERACTIVE_TAGS).unwrap_or_default();
    let scope = scope.map(js_str).unwrap_or_else(|| "null".to_string());
    let attr = js_str(AGENT_ID_ATTR);
    let wanted = js_str(wanted);
    format!(
        r#"((scope, wanted) => {{
  const SKIP = new Set({skip});
  const INTERACTIVE = new Set({interactive});
  const ATTR = {attr};
  const root = scope === null ? document.documentElement : document.querySelector(scope);
  if (!root) return false;
  for (const el of document.querySelectorAll('[' + ATTR + ']')) el.removeAttribute(ATTR);
  let next = 0;
  const stack = [root];
  while (stack.length) {{
    const el = stack.pop();
    if (SKIP.has(el.localName)) continue;
    if (INTERACTIVE.has(el.localName)) el.setAttribute(ATTR, 'agent-' + next++);
    for (let i = el.children.length - 1; i >= 0; i--) stack.push(el.children[i]);
  }}
  return document.querySelector('[' + ATTR + '="' + wanted + '"]') !== null;
}})({scope}, {wanted})"#
    )
}

fn dom_click_js(css: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
        js_str(css)
    )
}

fn resolve(tab: &Tab, scope: Option<&str>, target: &Target) -> Result<bool, BrowserError> {
    let js = match target {
        Target::Agent(id) => stamp_agent_ids_js(scope, &id.to_string()),
        Target::Selector(selector) => format!(
            "(() => {{ try {{ return document.querySelector({}) !== null; }} catch (e) {{ return false; }} }})()",
            js_str(selector)
        ),
    };
    Ok(evaluate(tab, &js)?.as_bool().unwrap_or(false))
}

fn element<'a>(tab: &'a Tab, scope: Option<&str>, target: &Target) -> Result<Element<'a>, BrowserError> {
    if !resolve(tab, scope, target)? {
        return Err(BrowserError::NotFound(target.to_string()));
    }
    tab.find_element(&target.css())
        .map_err(|_| BrowserError::NotFound(target.to_string()))
}

/// A [`LiveView`] over one Chrome tab, optionally scoped to the first
/// element matching a selector (e.g. the Easy Apply modal).
#[derive(Clone)]
pub struct ChromeView {
    tab: Arc<Tab>,
    scope: Option<String>,
    wait: Duration,
}

impl ChromeView {
    pub fn new(tab: Arc<Tab>, scope: Option<String>, wait: Duration) -> Self {
        Self { tab, scope, wait }
    }

    /// Runs blocking tab work off the async runtime.
    async fn with_tab<T, F>(&self, f: F) -> Result<T, BrowserError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab, Option<&str>) -> Result<T, BrowserError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        let scope = self.scope.clone();
        tokio::task::spawn_blocking(move || f(&tab, scope.as_deref()))
            .await
            .map_err(|e| BrowserError::Driver(format!("browser task panicked: {e}")))?
    }
}

#[async_trait]
impl LiveView for ChromeView {
    async fn markup(&self) -> Result<String, BrowserError> {
        let wait = self.wait;
        self.with_tab(move |tab, scope| match scope {
            Some(selector) => {
                tab.wait_for_element_with_custom_timeout(selector, wait)
                    .map_err(driver)?;
                let js = format!(
                    "(document.querySelector({}) || {{}}).outerHTML || ''",
                    js_str(selector)
                );
                Ok(evaluate(tab, &js)?.as_str().unwrap_or_default().to_string())
            }
            None => tab.get_content().map_err(driver),
        })
        .await
    }

    async fn count_matching(&self, selector: &str) -> Result<usize, BrowserError> {
        let js = format!("document.querySelectorAll({}).length", js_str(selector));
        self.with_tab(move |tab, _| Ok(evaluate(tab, &js)?.as_u64().unwrap_or(0) as usize))
            .await
    }

    async fn locate(&self, target: &Target) -> Result<bool, BrowserError> {
        let target = target.clone();
        self.with_tab(move |tab, scope| resolve(tab, scope, &target))
            .await
    }

    async fn scroll_to_bottom(&self) -> Result<(), BrowserError> {
        self.with_tab(|tab, _| {
            evaluate(tab, "window.scrollTo(0, document.body.scrollHeight);").map(|_| ())
        })
        .await
    }

    async fn click(&self, target: &Target) -> Result<(), BrowserError> {
        let target = target.clone();
        self.with_tab(move |tab, scope| match &target {
            // A DOM click lands on the element even under a sticky overlay,
            // where a mouse event at its coordinates would not.
            Target::Agent(_) => {
                if !resolve(tab, scope, &target)? {
                    return Err(BrowserError::NotFound(target.to_string()));
                }
                match evaluate(tab, &dom_click_js(&target.css()))?.as_bool() {
                    Some(true) => Ok(()),
                    _ => Err(BrowserError::NotFound(target.to_string())),
                }
            }
            Target::Selector(_) => {
                element(tab, scope, &target)?.click().map_err(driver)?;
                Ok(())
            }
        })
        .await
    }

    async fn type_text(&self, target: &Target, text: &str) -> Result<(), BrowserError> {
        let target = target.clone();
        let text = text.to_string();
        self.with_tab(move |tab, scope| {
            element(tab, scope, &target)?.click().map_err(driver)?;
            let clear = format!(
                "document.querySelector({}).value = ''",
                js_str(&target.css())
            );
            evaluate(tab, &clear)?;
            tab.type_str(&text).map_err(driver)?;
            Ok(())
        })
        .await
    }

    async fn select_option(&self, target: &Target, visible_text: &str) -> Result<(), BrowserError> {
        let target = target.clone();
        let visible_text = visible_text.to_string();
        self.with_tab(move |tab, scope| {
            if !resolve(tab, scope, &target)? {
                return Err(BrowserError::NotFound(target.to_string()));
            }
            let js = format!(
                r#"((css, text) => {{
  const el = document.querySelector(css);
  if (!el) return 'missing';
  const opt = [...(el.options || [])].find(o => o.text.trim() === text.trim());
  if (!opt) return 'no-option';
  el.value = opt.value;
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return 'ok';
}})({}, {})"#,
                js_str(&target.css()),
                js_str(&visible_text)
            );
            match evaluate(tab, &js)?.as_str() {
                Some("ok") => Ok(()),
                Some("missing") => Err(BrowserError::NotFound(target.to_string())),
                _ => Err(BrowserError::Driver(format!(
                    "no option '{visible_text}' in {target}"
                ))),
            }
        })
        .await
    }

    async fn set_file(&self, target: &Target, path: &str) -> Result<(), BrowserError> {
        let target = target.clone();
        let path = path.to_string();
        self.with_tab(move |tab, scope| {
            let input = element(tab, scope, &target)?;
            tab.call_method(DOM::SetFileInputFiles {
                files: vec![path],
                node_id: None,
                backend_node_id: None,
                object_id: Some(input.remote_object_id.clone()),
            })
            .map_err(driver)?;
            Ok(())
        })
        .await
    }
}

/// One Chrome instance owned by the task that launched it. Dropping the
/// session closes the browser.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
    element_wait: Duration,
}

impl BrowserSession {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let settings = settings.clone();
        tokio::task::spawn_blocking(move || Self::launch_blocking(&settings))
            .await
            .map_err(|e| anyhow!("Browser launch panicked: {e}"))?
    }

    fn launch_blocking(settings: &BrowserSettings) -> Result<Self> {
        let profile = settings.profile_dir();
        if !profile.exists() {
            info!(profile = %profile.display(), "creating browser profile");
            std::fs::create_dir_all(&profile)?;
        }

        let options = LaunchOptions {
            headless: settings.headless,
            path: settings.chrome_path.clone(),
            user_data_dir: Some(profile),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                // Anti-bot flags
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };

        info!(headless = settings.headless, "starting Chrome");
        let browser = Browser::new(options).context("Browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
            element_wait: Duration::from_millis(settings.element_wait_ms),
        })
    }

    async fn on_tab<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| anyhow!("browser task panicked: {e}"))?
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        info!("logging in");
        let credentials = credentials.clone();
        self.on_tab(move |tab| {
            tab.navigate_to(LOGIN_URL)?;
            tab.wait_for_element_with_custom_timeout("#username", Duration::from_secs(10))?
                .click()?;
            tab.type_str(&credentials.linkedin_email)?;
            tab.find_element("#password")?.click()?;
            tab.type_str(&credentials.linkedin_password)?;
            tab.press_key("Enter")?;
            tab.wait_for_element_with_custom_timeout(LOGGED_IN_MARKER, Duration::from_secs(20))
                .context("login did not complete")?;
            Ok(())
        })
        .await?;
        info!("login successful");
        Ok(())
    }

    pub async fn open(&self, url: &str) -> Result<()> {
        debug!(%url, "navigating");
        let url = url.to_string();
        self.on_tab(move |tab| {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    pub async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        let selector = selector.to_string();
        self.on_tab(move |tab| {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .with_context(|| format!("timed out waiting for {selector}"))?;
            Ok(())
        })
        .await
    }

    pub async fn evaluate(&self, js: String) -> Result<Value> {
        self.on_tab(move |tab| evaluate(tab, &js).map_err(anyhow::Error::from))
            .await
    }

    /// A live view over the whole page or the element matching `scope`.
    pub fn view(&self, scope: Option<&str>) -> ChromeView {
        ChromeView::new(
            Arc::clone(&self.tab),
            scope.map(str::to_string),
            self.element_wait,
        )
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        info!("closing browser");
    }
}
