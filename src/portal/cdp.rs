//! CDP-backed implementation of the portal traits.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetEmulatedMediaParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{PortalBrowser, PortalTab};
use crate::browser::BrowserManager;

/// A real browser tab driven over the Chrome DevTools Protocol.
pub struct CdpTab {
    page: Page,
}

impl CdpTab {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl PortalTab for CdpTab {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("navigation to {} failed: {}", url, e))
    }

    async fn wait_for_quiescence(&self, quiet: Duration, timeout: Duration) -> Result<()> {
        wait_until_stable(&self.page, quiet, timeout).await
    }

    async fn eval(&self, script: &str) -> Result<Value> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| anyhow!("script evaluation failed: {}", e))?
            .into_value::<Value>()
            .map_err(|e| anyhow!("script result was not JSON: {}", e))
    }

    async fn capture_element(&self, selector: &str) -> Result<Vec<u8>> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| anyhow!("element {} not found: {}", selector, e))?;
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| anyhow!("element screenshot failed: {}", e))
    }

    async fn capture_full_page(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .map_err(|e| anyhow!("full-page screenshot failed: {}", e))
    }

    async fn emulate_print(&self, width: u32, height: u32, scale: f64) -> Result<()> {
        self.page
            .execute(SetEmulatedMediaParams::builder().media("print").build())
            .await
            .map_err(|e| anyhow!("print media emulation failed: {}", e))?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(width as i64)
            .height(height as i64)
            .device_scale_factor(scale)
            .mobile(false)
            .build()
            .map_err(|e| anyhow!("invalid device metrics: {}", e))?;
        self.page
            .execute(metrics)
            .await
            .map_err(|e| anyhow!("viewport override failed: {}", e))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        self.page
            .url()
            .await
            .map_err(|e| anyhow!("url query failed: {}", e))
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| anyhow!("tab close failed: {}", e))
    }
}

/// Production portal: every tab operation runs on the shared managed browser.
pub struct CdpPortal {
    manager: Arc<BrowserManager>,
}

impl CdpPortal {
    pub fn new(manager: Arc<BrowserManager>) -> Arc<Self> {
        Arc::new(Self { manager })
    }
}

#[async_trait]
impl PortalBrowser for CdpPortal {
    async fn open_tab(&self) -> Result<Arc<dyn PortalTab>> {
        let page = self.manager.open_tab().await?;
        Ok(Arc::new(CdpTab::new(page)))
    }

    async fn tabs(&self) -> Result<Vec<Arc<dyn PortalTab>>> {
        let pages = self.manager.tabs().await?;
        Ok(pages
            .into_iter()
            .map(|p| Arc::new(CdpTab::new(p)) as Arc<dyn PortalTab>)
            .collect())
    }

    async fn disconnect(&self) {
        self.manager.disconnect().await;
    }
}

/// Wait until the page network goes idle (no new resource entries for
/// `quiet` consecutive time) or until `timeout` has elapsed.
///
/// Polls `performance.getEntriesByType("resource").length` every 250 ms —
/// a Playwright-style networkidle heuristic that works without CDP Network
/// events.
pub async fn wait_until_stable(page: &Page, quiet: Duration, timeout: Duration) -> Result<()> {
    let poll_ms = 250u64;
    let start = std::time::Instant::now();
    let mut last_count: u64 = 0;
    let mut stable_since = std::time::Instant::now();

    loop {
        if start.elapsed() >= timeout {
            info!("wait_until_stable: timeout after {:?}", timeout);
            break;
        }

        let count: u64 = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|v| v.into_value::<Value>().ok())
            .and_then(|j| j.as_u64())
            .unwrap_or(0);

        let ready_complete: bool = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<Value>().ok())
            .and_then(|j| j.as_str().map(|s| s == "complete"))
            .unwrap_or(false);

        if !ready_complete {
            // DOM not fully loaded; keep waiting and do not allow "idle" to trigger.
            stable_since = std::time::Instant::now();
            last_count = count;
        } else if count != last_count {
            last_count = count;
            stable_since = std::time::Instant::now();
        } else if stable_since.elapsed() >= quiet {
            info!(
                "wait_until_stable: idle after {}ms ({} resources)",
                start.elapsed().as_millis(),
                count
            );
            break;
        }

        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }
    Ok(())
}
