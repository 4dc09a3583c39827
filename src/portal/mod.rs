//! The portal seam: what the verification pipeline needs from a browser tab.
//!
//! Stages never touch `chromiumoxide` directly — they drive these traits.
//! [`cdp::CdpPortal`] is the production implementation on top of the shared
//! [`crate::browser::BrowserManager`]; tests drive the same stages with
//! scripted in-memory implementations. This is also the point where a
//! stricter deployment would add locking or an attempt-keyed browser pool.

pub mod cdp;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One browsing context on the shared browser.
#[async_trait]
pub trait PortalTab: Send + Sync {
    /// Navigate this tab to `url`.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Block until the page's network activity has been quiet for `quiet`,
    /// or `timeout` elapses. Never fails on slow pages — the caller's next
    /// DOM probe decides whether the page is actually usable.
    async fn wait_for_quiescence(&self, quiet: Duration, timeout: Duration) -> Result<()>;

    /// Evaluate a JS expression that yields a JSON-serializable value.
    async fn eval(&self, script: &str) -> Result<Value>;

    /// Screenshot a single element as PNG.
    async fn capture_element(&self, selector: &str) -> Result<Vec<u8>>;

    /// Screenshot the full page (beyond the viewport) as PNG.
    async fn capture_full_page(&self) -> Result<Vec<u8>>;

    /// Switch to print media emulation with an enlarged viewport.
    async fn emulate_print(&self, width: u32, height: u32, scale: f64) -> Result<()>;

    /// The tab's current URL, when it has one.
    async fn current_url(&self) -> Result<Option<String>>;

    /// Close the tab. The browser stays up.
    async fn close(&self) -> Result<()>;
}

/// The shared browser, as the pipeline sees it.
#[async_trait]
pub trait PortalBrowser: Send + Sync {
    /// Open a fresh tab.
    async fn open_tab(&self) -> Result<Arc<dyn PortalTab>>;

    /// All open tabs, oldest first.
    async fn tabs(&self) -> Result<Vec<Arc<dyn PortalTab>>>;

    /// Drop the connection without tearing the browser down; the next use
    /// re-attaches.
    async fn disconnect(&self);
}
