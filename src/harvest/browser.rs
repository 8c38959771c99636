//! Headless Chromium backend for rendered fetches
//!
//! One browser process is shared by every rendered fetch of a run. It is
//! launched on first use and every fetch gets its own page, which is closed
//! before the fetch returns.

use crate::config::Config;
use crate::harvest::fetcher::{extract_title, FetchError, FetchResult, PageRenderer};
use crate::proxy::browser_proxy_arg;
use crate::HarvestError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType,
};
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const INTERACTION_PAUSE: Duration = Duration::from_secs(2);

/// Lazily launched shared Chromium instance
pub struct ChromiumRenderer {
    browser: Mutex<Option<Arc<Browser>>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    proxy: Option<String>,
    executable: Option<PathBuf>,
    headless: bool,
    user_agent: String,
    navigation_timeout: Duration,
}

impl ChromiumRenderer {
    pub fn new(config: &Config) -> Self {
        Self {
            browser: Mutex::new(None),
            handler: Mutex::new(None),
            proxy: config.proxy.address.clone(),
            executable: config.browser.executable.clone(),
            headless: config.browser.headless,
            user_agent: config.harvest.user_agent.clone(),
            navigation_timeout: config.browser.navigation_timeout(),
        }
    }

    async fn get_or_launch(&self) -> Result<Arc<Browser>, HarvestError> {
        let mut guard = self.browser.lock().await;
        if let Some(browser) = guard.as_ref() {
            return Ok(Arc::clone(browser));
        }

        let mut builder = ChromeConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--ignore-certificate-errors")
            .arg(format!("--user-agent={}", self.user_agent));

        if let Some(proxy) = &self.proxy {
            builder = builder.arg(format!("--proxy-server={}", browser_proxy_arg(proxy)));
        }
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }
        if !self.headless {
            builder = builder.with_head();
        }

        let browser_config = builder
            .build()
            .map_err(|e| HarvestError::Browser(format!("Browser config error: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| HarvestError::Browser(format!("Browser launch failed: {}", e)))?;

        let task = tokio::spawn(async move { while handler.next().await.is_some() {} });
        *self.handler.lock().await = Some(task);

        tracing::info!("Browser launched");
        let shared = Arc::new(browser);
        *guard = Some(Arc::clone(&shared));
        Ok(shared)
    }

    async fn drive(&self, page: &Page, url: &str, settle: Duration) -> FetchResult {
        if let Err(e) = page
            .execute(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await
        {
            tracing::debug!("User agent override failed: {}", e);
        }

        let headers = Headers::new(serde_json::json!({
            "Accept-Language": "en-US,en;q=0.9",
            "Cache-Control": "no-cache",
        }));
        if let Err(e) = page.execute(SetExtraHttpHeadersParams::new(headers)).await {
            tracing::debug!("Extra headers failed: {}", e);
        }

        match tokio::time::timeout(self.navigation_timeout, page.goto(url)).await {
            Err(_) => {
                return FetchResult::Failed(FetchError::timeout(format!(
                    "navigation exceeded {}s",
                    self.navigation_timeout.as_secs()
                )))
            }
            Ok(Err(e)) => return FetchResult::Failed(cdp_error(e)),
            Ok(Ok(_)) => {}
        }

        interact(page).await;
        tokio::time::sleep(settle).await;

        let content = match page.content().await {
            Ok(content) => content,
            Err(e) => return FetchResult::Failed(cdp_error(e)),
        };

        let title = match page.get_title().await {
            Ok(Some(title)) if !title.trim().is_empty() => title.trim().to_string(),
            _ => extract_title(&content),
        };

        FetchResult::Fetched { content, title }
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn prepare(&self) -> Result<(), HarvestError> {
        self.get_or_launch().await.map(|_| ())
    }

    async fn render(&self, url: &str, settle: Duration) -> FetchResult {
        let browser = match self.get_or_launch().await {
            Ok(browser) => browser,
            Err(e) => return FetchResult::Failed(FetchError::fatal(e.to_string())),
        };

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                return FetchResult::Failed(FetchError::transport(format!(
                    "Failed to open page: {}",
                    e
                )))
            }
        };

        let result = self.drive(&page, url, settle).await;

        if let Err(e) = page.close().await {
            tracing::debug!("Page close error for {}: {}", url, e);
        }

        result
    }

    async fn shutdown(&self) {
        if let Some(browser) = self.browser.lock().await.take() {
            match Arc::try_unwrap(browser) {
                Ok(mut browser) => {
                    if let Err(e) = browser.close().await {
                        tracing::warn!("Browser close error: {}", e);
                    }
                    let _ = browser.wait().await;
                }
                Err(_) => tracing::warn!("Browser still in use at shutdown"),
            }
        }

        if let Some(task) = self.handler.lock().await.take() {
            task.abort();
        }
    }
}

/// Mouse movement and scrolling some gates require before they clear
async fn interact(page: &Page) {
    mouse_move(page, 500.0, 400.0).await;
    scroll(page, 500.0, 400.0, 2000.0).await;
    tokio::time::sleep(INTERACTION_PAUSE).await;
    mouse_move(page, 300.0, 200.0).await;
    scroll(page, 300.0, 200.0, 1000.0).await;
}

async fn mouse_move(page: &Page, x: f64, y: f64) {
    let params = DispatchMouseEventParams::new(DispatchMouseEventType::MouseMoved, x, y);
    if let Err(e) = page.execute(params).await {
        tracing::trace!("Mouse move failed: {}", e);
    }
}

async fn scroll(page: &Page, x: f64, y: f64, delta_y: f64) {
    let params = DispatchMouseEventParams::builder()
        .r#type(DispatchMouseEventType::MouseWheel)
        .x(x)
        .y(y)
        .delta_x(0.0)
        .delta_y(delta_y)
        .build();

    match params {
        Ok(params) => {
            if let Err(e) = page.execute(params).await {
                tracing::trace!("Scroll failed: {}", e);
            }
        }
        Err(e) => tracing::trace!("Scroll params invalid: {}", e),
    }
}

fn cdp_error(err: CdpError) -> FetchError {
    match err {
        CdpError::Timeout => FetchError::timeout("browser request timed out"),
        other => FetchError::transport(other.to_string()),
    }
}
