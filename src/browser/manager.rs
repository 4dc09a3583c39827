//! Native browser management using `chromiumoxide`.
//!
//! This module is the single source of truth for:
//! * Finding a usable browser executable (Brave → Chrome → Chromium, cross-platform).
//! * `BrowserManager` — the one shared browser connection the verification
//!   pipeline runs on: attach-or-launch, liveness probing, disconnect and
//!   invalidation.
//! * Launching a headless browser session with stealth defaults.
//!
//! The manager persists the live connection's WebSocket endpoint through
//! [`super::handle_store`] so independent requests — and restarted service
//! processes — re-attach to the same browser rather than paying a launch
//! per request.

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use rand::seq::IndexedRandom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::handle_store;

// ── Realistic User-Agent pool ────────────────────────────────────────────────

const DESKTOP_USER_AGENTS: &[&str] = &[
    // Chrome 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 132 – macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 131 – Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Edge 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
];

/// Returns a randomly-chosen realistic desktop User-Agent string.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan – finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    // 1. Explicit env override
    if let Ok(p) = std::env::var(crate::core::config::ENV_CHROME_EXECUTABLE) {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    // 2. PATH scan (Linux / macOS / Windows package managers)
    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "brave-browser",
            "brave",
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    // 3. Platform-specific well-known paths
    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/brave-browser",
            "/usr/bin/brave",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Returns `true` when a usable browser binary is present on this machine.
pub fn native_browser_available() -> bool {
    find_chrome_executable().is_some()
}

// ── Headless browser config builder ──────────────────────────────────────────

/// Build a `BrowserConfig` for headless operation with stealth defaults.
///
/// Flags chosen for:
/// * Compatibility with CI / restricted environments (`--no-sandbox`, `--disable-dev-shm-usage`).
/// * Stealth — `--disable-blink-features=AutomationControlled` hides the
///   `navigator.webdriver` flag; UA is randomly drawn from `DESKTOP_USER_AGENTS`.
pub fn build_headless_config(exe: &str, width: u32, height: u32) -> Result<BrowserConfig> {
    let ua = random_user_agent();

    BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .arg("--disable-gpu")
        .arg("--no-sandbox") // often required in CI / restricted environments
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage") // avoids /dev/shm OOM in constrained environments
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--disable-crash-reporter")
        .arg("--disable-breakpad")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        // Stealth: suppress CDP automation fingerprint
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", ua))
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

// ── Shared browser connection ────────────────────────────────────────────────

/// Deadline for the liveness probe. A connection that cannot open a blank
/// tab inside this window is treated as dead and replaced.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The one shared, long-lived browser connection.
///
/// Each `FETCH_CAPTCHA` / `VERIFY` request is independent, but they all run
/// against the same Chromium process. `ensure_connected` resolves a usable
/// connection in order: in-memory (probed) → persisted endpoint
/// (re-attached and probed) → fresh launch (endpoint persisted before the
/// connection is handed out). Every connection returned to a caller passed
/// the probe during that same call.
///
/// Store `Arc<BrowserManager>` in `AppState` so all handlers share one
/// instance.
pub struct BrowserManager {
    exe: String,
    inner: Mutex<Option<Browser>>,
}

impl BrowserManager {
    /// Create a manager for the given executable. Browser is lazy-started.
    pub fn new(exe: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            exe: exe.into(),
            inner: Mutex::new(None),
        })
    }

    /// Create a manager using the auto-discovered executable.
    /// Returns `None` if no browser is installed on this machine.
    pub fn new_auto() -> Option<Arc<Self>> {
        find_chrome_executable().map(Self::new)
    }

    /// Liveness probe: open and close a blank tab, bounded by `PROBE_TIMEOUT`.
    async fn probe(browser: &mut Browser) -> bool {
        match tokio::time::timeout(PROBE_TIMEOUT, browser.new_page("about:blank")).await {
            Ok(Ok(page)) => {
                let _ = page.close().await;
                true
            }
            Ok(Err(e)) => {
                warn!("browser probe failed: {}", e);
                false
            }
            Err(_) => {
                warn!("browser probe timed out after {:?}", PROBE_TIMEOUT);
                false
            }
        }
    }

    fn spawn_handler_loop(mut handler: chromiumoxide::Handler) {
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
        });
    }

    /// Resolve a live, probed connection into `guard`.
    async fn ensure_connected<'a>(
        &self,
        guard: &'a mut Option<Browser>,
    ) -> Result<&'a mut Browser> {
        // 1. In-memory connection, if it still answers.
        if guard.is_some() {
            let alive = Self::probe(guard.as_mut().expect("checked above")).await;
            if !alive {
                warn!("browser: in-memory connection dead, discarding");
                if let Some(mut old) = guard.take() {
                    let _ = old.close().await;
                }
                // The persisted endpoint points at the same dead process.
                handle_store::invalidate();
            }
        }

        // 2. Persisted endpoint from a previous request or process.
        if guard.is_none() {
            if let Some(stored) = handle_store::load() {
                match Browser::connect(stored.ws_endpoint.as_str()).await {
                    Ok((mut browser, handler)) => {
                        Self::spawn_handler_loop(handler);
                        // Pick up tabs that were already open on this browser.
                        let _ = browser.fetch_targets().await;
                        if Self::probe(&mut browser).await {
                            info!("browser: re-attached to {}", stored.ws_endpoint);
                            *guard = Some(browser);
                        } else {
                            warn!("browser: stored endpoint failed probe, relaunching");
                            let _ = browser.close().await;
                            handle_store::invalidate();
                        }
                    }
                    Err(e) => {
                        warn!("browser: re-attach to stored endpoint failed: {}", e);
                        handle_store::invalidate();
                    }
                }
            }
        }

        // 3. Fresh launch. Fatal for the calling request if this fails.
        if guard.is_none() {
            info!("browser: launching new instance ({})", self.exe);
            let config = build_headless_config(&self.exe, 1366, 900)?;
            let (browser, handler) = Browser::launch(config)
                .await
                .map_err(|e| anyhow!("failed to launch browser ({}): {}", self.exe, e))?;
            Self::spawn_handler_loop(handler);
            handle_store::save(browser.websocket_address());
            *guard = Some(browser);
        }

        Ok(guard.as_mut().expect("connection present after init"))
    }

    /// Open a fresh tab on the shared connection.
    pub async fn open_tab(&self) -> Result<Page> {
        let mut guard = self.inner.lock().await;
        let browser = self.ensure_connected(&mut guard).await?;
        browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("failed to open tab: {}", e))
    }

    /// Enumerate all open tabs, oldest first.
    pub async fn tabs(&self) -> Result<Vec<Page>> {
        let mut guard = self.inner.lock().await;
        let browser = self.ensure_connected(&mut guard).await?;
        let _ = browser.fetch_targets().await;
        browser
            .pages()
            .await
            .map_err(|e| anyhow!("failed to enumerate tabs: {}", e))
    }

    /// Drop the in-memory connection but keep the persisted endpoint, so
    /// the next request re-attaches instead of relaunching. Used on stage
    /// failures, where the browser process itself is still healthy.
    pub async fn disconnect(&self) {
        let mut guard = self.inner.lock().await;
        if guard.take().is_some() {
            info!("browser: disconnected (endpoint retained for re-attach)");
        }
    }

    /// Tear the connection down completely: close the browser and delete
    /// the persisted endpoint.
    pub async fn invalidate(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut browser) = guard.take() {
            let _ = browser.close().await;
        }
        handle_store::invalidate();
        info!("browser: invalidated");
    }

    /// Gracefully close the shared browser on service shutdown.
    pub async fn shutdown(&self) {
        self.invalidate().await;
        info!("browser: shut down");
    }
}

impl Drop for BrowserManager {
    fn drop(&mut self) {
        // Best-effort cleanup. Drop cannot await; if we're inside a tokio
        // runtime, spawn a task to close the browser to avoid zombie
        // Chromium processes.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        if let Ok(mut guard) = self.inner.try_lock() {
            if let Some(mut browser) = guard.take() {
                handle.spawn(async move {
                    let _ = browser.close().await;
                });
            }
        }
    }
}
