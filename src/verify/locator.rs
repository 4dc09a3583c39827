//! Heuristic tab re-location.
//!
//! Nothing binds a `VERIFY` call to the exact tab its matching captcha
//! fetch opened — the browser connection is shared process-wide. Location
//! is therefore heuristic: prefer a tab already on the portal's domain,
//! otherwise take the most recently opened tab that isn't a blank or
//! internal page. Under concurrent attempts the recency fallback can pick
//! the wrong tab; the service assumes single-flight use.

use std::sync::Arc;
use tracing::{info, warn};

use super::error::VerifyError;
use crate::core::config::PortalConfig;
use crate::portal::{PortalBrowser, PortalTab};

/// Blank and browser-internal pages are never verification tabs.
fn is_plausible(url: &str) -> bool {
    let u = url.trim();
    !(u.is_empty()
        || u == "about:blank"
        || u.starts_with("about:")
        || u.starts_with("chrome://")
        || u.starts_with("chrome-extension://")
        || u.starts_with("devtools://"))
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// Find the tab a prior captcha fetch left on the portal.
pub async fn locate(
    browser: &dyn PortalBrowser,
    cfg: &PortalConfig,
) -> Result<Arc<dyn PortalTab>, VerifyError> {
    let tabs = browser.tabs().await?;
    let portal_host = cfg.portal_host();

    // First preference: a tab already on the portal's domain.
    if let Some(portal_host) = &portal_host {
        for tab in &tabs {
            let url = match tab.current_url().await {
                Ok(Some(u)) => u,
                _ => continue,
            };
            if host_of(&url).as_deref() == Some(portal_host.as_str()) {
                info!("locator: matched portal tab by host ({})", url);
                return Ok(tab.clone());
            }
        }
    }

    // Fallback: newest first, skipping blank/internal pages.
    for tab in tabs.iter().rev() {
        let url = match tab.current_url().await {
            Ok(Some(u)) => u,
            _ => continue,
        };
        if is_plausible(&url) {
            info!("locator: fell back to most recent non-blank tab ({})", url);
            return Ok(tab.clone());
        }
    }

    warn!("locator: no plausible tab among {} open", tabs.len());
    Err(VerifyError::SessionExpired)
}
