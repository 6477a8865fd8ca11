//! Chromium driver: launch, context setup and step primitives
//!
//! Everything that touches chromiumoxide lives here; the engine above it
//! only sequences steps. The browser launches with automation flags
//! disabled, a realistic User-Agent and a viewport drawn from a small
//! whitelist.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{ClearBrowserCookiesParams, CookieParam};
use futures_util::StreamExt;
use rand::Rng;

use thoth_core::error::DiscoveryError;

use crate::session::{SavedCookie, SavedSession};

/// One extracted result row: field name -> value.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Viewports real desktop browsers commonly report.
pub const VIEWPORT_WHITELIST: &[(u32, u32)] = &[
    (1920, 1080),
    (1680, 1050),
    (1536, 864),
    (1440, 900),
    (1366, 768),
];

const REALISTIC_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Poll interval while waiting for a selector to appear.
const WAIT_POLL: Duration = Duration::from_millis(250);

fn transient(e: impl std::fmt::Display) -> DiscoveryError {
    DiscoveryError::TransientRemote {
        status: None,
        message: e.to_string(),
    }
}

fn parse_err(e: impl std::fmt::Display) -> DiscoveryError {
    DiscoveryError::Parse(e.to_string())
}

/// A launched headless browser plus its CDP event pump.
pub struct BrowserHandle {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
}

impl BrowserHandle {
    /// Launch a headless browser with anti-automation configuration.
    pub async fn launch() -> Result<Self, DiscoveryError> {
        let (width, height) =
            VIEWPORT_WHITELIST[rand::thread_rng().gen_range(0..VIEWPORT_WHITELIST.len())];
        let config = BrowserConfig::builder()
            .window_size(width, height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={REALISTIC_USER_AGENT}"))
            .build()
            .map_err(|e| DiscoveryError::Config(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(transient)?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        log::info!("launched headless browser ({width}x{height})");
        Ok(Self {
            browser,
            handler_task,
        })
    }

    /// Open a fresh context with cookies cleared.
    pub async fn new_context(&self) -> Result<Page, DiscoveryError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(transient)?;
        page.execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(transient)?;
        Ok(page)
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            log::debug!("browser close: {e}");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

/// Load `url` and wait for the navigation to settle.
pub async fn navigate(page: &Page, url: &str) -> Result<(), DiscoveryError> {
    page.goto(url).await.map_err(transient)?;
    page.wait_for_navigation().await.map_err(transient)?;
    Ok(())
}

pub async fn type_text(page: &Page, selector: &str, text: &str) -> Result<(), DiscoveryError> {
    let element = page.find_element(selector).await.map_err(transient)?;
    element.click().await.map_err(transient)?;
    element.type_str(text).await.map_err(transient)?;
    Ok(())
}

pub async fn click(page: &Page, selector: &str) -> Result<(), DiscoveryError> {
    let element = page.find_element(selector).await.map_err(transient)?;
    element.click().await.map_err(transient)?;
    Ok(())
}

/// Poll until `selector` appears or `timeout` elapses.
pub async fn wait_for_selector(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<(), DiscoveryError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if page.find_element(selector).await.is_ok() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(transient(format!("selector {selector:?} never appeared")));
        }
        tokio::time::sleep(WAIT_POLL).await;
    }
}

/// Drop any localStorage the target origin had from earlier contexts.
pub async fn clear_local_storage(page: &Page) -> Result<(), DiscoveryError> {
    page.evaluate("window.localStorage.clear()")
        .await
        .map_err(transient)?;
    Ok(())
}

/// Pull one record per `selector` match, one value per field.
///
/// A field selector is a CSS selector relative to the record element;
/// append `@attr` to read an attribute instead of the text content.
pub async fn extract(
    page: &Page,
    selector: &str,
    fields: &BTreeMap<String, String>,
) -> Result<Vec<RawRecord>, DiscoveryError> {
    let script = build_extract_script(selector, fields);
    let result = page.evaluate(script).await.map_err(transient)?;
    let json: String = result.into_value().map_err(parse_err)?;
    serde_json::from_str(&json).map_err(parse_err)
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Build the in-page extraction expression. Pure; unit-tested.
pub fn build_extract_script(selector: &str, fields: &BTreeMap<String, String>) -> String {
    let mut props = String::new();
    for (field, field_selector) in fields {
        let (css, attr) = match field_selector.split_once('@') {
            Some((css, attr)) => (css, Some(attr)),
            None => (field_selector.as_str(), None),
        };
        let value_expr = match attr {
            Some(attr) => format!(
                "(c => c ? (c.getAttribute({}) || '') : '')(el.querySelector({}))",
                js_string(attr),
                js_string(css)
            ),
            None => format!(
                "(c => c ? c.textContent.trim() : '')(el.querySelector({}))",
                js_string(css)
            ),
        };
        let _ = write!(props, "{}: {value_expr},", js_string(field));
    }
    format!(
        "JSON.stringify(Array.from(document.querySelectorAll({})).map(el => ({{{props}}})))",
        js_string(selector)
    )
}

/// Random human-ish pause before an action (0.5 - 3 s).
pub fn action_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(500..=3000))
}

/// Snapshot the context's cookies and localStorage.
pub async fn capture_session(page: &Page) -> Result<SavedSession, DiscoveryError> {
    let cookies = page
        .get_cookies()
        .await
        .map_err(transient)?
        .into_iter()
        .map(|c| SavedCookie {
            name: c.name,
            value: c.value,
            domain: c.domain,
            path: c.path,
            secure: c.secure,
            http_only: c.http_only,
        })
        .collect();

    let ls_json: String = page
        .evaluate("JSON.stringify(Object.entries(window.localStorage))")
        .await
        .map_err(transient)?
        .into_value()
        .map_err(parse_err)?;
    let local_storage = serde_json::from_str(&ls_json).map_err(parse_err)?;

    Ok(SavedSession::new(cookies, local_storage))
}

/// Restore a saved session into a fresh context.
pub async fn restore_session(page: &Page, session: &SavedSession) -> Result<(), DiscoveryError> {
    let params: Vec<CookieParam> = session
        .cookies
        .iter()
        .map(|c| {
            CookieParam::builder()
                .name(c.name.clone())
                .value(c.value.clone())
                .domain(c.domain.clone())
                .path(c.path.clone())
                .secure(c.secure)
                .http_only(c.http_only)
                .build()
        })
        .collect::<Result<Vec<_>, String>>()
        .map_err(|e| DiscoveryError::Config(format!("bad saved cookie: {e}")))?;
    if !params.is_empty() {
        page.set_cookies(params).await.map_err(transient)?;
    }

    if !session.local_storage.is_empty() {
        let mut script = String::from("(() => {");
        for (key, value) in &session.local_storage {
            let _ = write!(
                script,
                "window.localStorage.setItem({}, {});",
                js_string(key),
                js_string(value)
            );
        }
        script.push_str("})()");
        page.evaluate(script).await.map_err(transient)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_script_reads_text_content() {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), ".title".to_string());
        let script = build_extract_script(".result", &fields);
        assert!(script.contains("document.querySelectorAll(\".result\")"));
        assert!(script.contains("\"title\":"));
        assert!(script.contains("textContent"));
    }

    #[test]
    fn extract_script_reads_attributes() {
        let mut fields = BTreeMap::new();
        fields.insert("url".to_string(), "a.link@href".to_string());
        let script = build_extract_script(".result", &fields);
        assert!(script.contains("getAttribute(\"href\")"));
        assert!(script.contains("querySelector(\"a.link\")"));
    }

    #[test]
    fn extract_script_escapes_quotes() {
        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), "div[data-kind=\"a\"]".to_string());
        let script = build_extract_script(".r", &fields);
        assert!(script.contains("div[data-kind=\\\"a\\\"]"));
    }

    #[test]
    fn action_delay_within_contract() {
        for _ in 0..32 {
            let d = action_delay();
            assert!(d >= Duration::from_millis(500));
            assert!(d <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn viewport_whitelist_is_plausible() {
        for (w, h) in VIEWPORT_WHITELIST {
            assert!(*w >= 1280 && *h >= 720);
        }
    }
}
