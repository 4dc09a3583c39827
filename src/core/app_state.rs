use std::sync::Arc;

use crate::browser::BrowserManager;
use crate::core::config::{load_config, CertsnapConfig};
use crate::orders::{HttpOrderDirectory, NullOrderDirectory, OrderDirectory};
use crate::portal::cdp::CdpPortal;
use crate::verify::Verifier;

#[derive(Clone)]
pub struct AppState {
    pub http_client: reqwest::Client,
    /// Absent when no Chromium-family browser is installed on this host;
    /// verification requests then fail fast with a clear message.
    pub verifier: Option<Arc<Verifier>>,
    /// Kept alongside the verifier for graceful shutdown.
    pub browser: Option<Arc<BrowserManager>>,
    pub config: Arc<CertsnapConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("browser_available", &self.browser.is_some())
            .field(
                "order_service_configured",
                &self.config.resolve_order_service_url().is_some(),
            )
            .finish()
    }
}

impl AppState {
    pub fn new(http_client: reqwest::Client) -> Self {
        let config = Arc::new(load_config());

        let orders: Arc<dyn OrderDirectory> = match config.resolve_order_service_url() {
            Some(url) => HttpOrderDirectory::new(http_client.clone(), url),
            None => Arc::new(NullOrderDirectory),
        };

        let browser = BrowserManager::new_auto();
        let verifier = browser.as_ref().map(|manager| {
            Verifier::new(
                CdpPortal::new(manager.clone()),
                orders.clone(),
                config.portal.clone(),
            )
        });

        Self {
            http_client,
            verifier,
            browser,
            config,
        }
    }
}
