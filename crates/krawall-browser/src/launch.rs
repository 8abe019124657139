//! Headless Chrome/Chromium launch configuration.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::handler::viewport::Viewport;
use krawall_core::{KrawallError, KrawallResult};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

/// Launch parameters a discovery run can override per call (spec.md §4.9).
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub headless: bool,
    pub navigation_timeout: Duration,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            navigation_timeout: Duration::from_secs(30),
            viewport_width: 1280,
            viewport_height: 800,
        }
    }
}

/// Launches a sandboxed headless browser and spawns the task that drains
/// its CDP event handler loop, mirroring the teacher's pattern of running
/// the handler to completion in the background rather than blocking on it.
pub async fn launch(config: &LaunchConfig) -> KrawallResult<Browser> {
    let mut builder = CdpBrowserConfig::builder();
    if !config.headless {
        builder = builder.with_head();
    }
    builder = builder
        .viewport(Viewport {
            width: config.viewport_width,
            height: config.viewport_height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .request_timeout(config.navigation_timeout)
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox");

    let cdp_config = builder
        .build()
        .map_err(|e| KrawallError::config(format!("failed to build browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(cdp_config)
        .await
        .map_err(|e| KrawallError::DiscoveryFailed {
            stage: "launch".into(),
            context: e.to_string(),
        })?;

    tokio::spawn(async move {
        use futures::StreamExt;
        while let Some(event) = handler.next().await {
            debug!(?event, "browser CDP event");
        }
    });

    Ok(browser)
}

static SHARED_BROWSER: OnceCell<Mutex<Option<Arc<Browser>>>> = OnceCell::const_new();

/// Returns the process-wide browser instance, launching it on first use
/// (spec.md §4.9: "a single shared mutex-serialized browser process reused
/// across discoveries"; contexts/pages are still per-discovery).
pub async fn shared_browser(config: &LaunchConfig) -> KrawallResult<Arc<Browser>> {
    let cell = SHARED_BROWSER.get_or_init(|| async { Mutex::new(None) }).await;
    let mut guard = cell.lock().await;
    if let Some(browser) = guard.as_ref() {
        return Ok(browser.clone());
    }
    let browser = Arc::new(launch(config).await?);
    *guard = Some(browser.clone());
    Ok(browser)
}
