//! CAPTCHA acquisition.
//!
//! The portal's CAPTCHA widget attaches to the DOM before its image asset
//! has actually rendered, so waiting on existence alone produces blank
//! captures. The capture is gated on the element reporting non-zero
//! dimensions, with a bounded retry around the whole attach-settle-measure
//! sequence.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use tracing::{info, warn};

use super::error::VerifyError;
use crate::browser::wait::{poll_until, retry, RetryOutcome};
use crate::core::config::PortalConfig;
use crate::portal::PortalTab;

#[derive(Debug, Deserialize)]
struct ElementProbe {
    attached: bool,
    visible: bool,
    width: f64,
    height: f64,
}

fn probe_script(selector: &str) -> String {
    let sel = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) return {{ attached: false, visible: false, width: 0, height: 0 }};
    const r = el.getBoundingClientRect();
    const s = window.getComputedStyle(el);
    const visible = s.display !== 'none' && s.visibility !== 'hidden';
    return {{ attached: true, visible: visible, width: r.width, height: r.height }};
}})()"#
    )
}

async fn probe_element(tab: &dyn PortalTab, script: &str) -> Option<ElementProbe> {
    let value = tab.eval(script).await.ok()?;
    serde_json::from_value(value).ok()
}

/// One capture attempt: wait for attach+visible, settle, re-measure, shoot.
async fn try_capture(
    tab: &dyn PortalTab,
    cfg: &PortalConfig,
    attempt: u32,
) -> Result<Vec<u8>> {
    let timing = &cfg.timing;
    let script = probe_script(&cfg.selectors.captcha_image);

    let attached = poll_until(timing.captcha_poll(), timing.captcha_attach_timeout(), || {
        let script = script.clone();
        async move {
            let probe = probe_element(tab, &script).await?;
            (probe.attached && probe.visible).then_some(())
        }
    })
    .await;
    if attached.is_none() {
        return Err(anyhow!(
            "captcha element never became visible (attempt {attempt})"
        ));
    }

    // The image asset often lags the element itself; give it a beat.
    tokio::time::sleep(timing.captcha_settle()).await;

    let probe = probe_element(tab, &script)
        .await
        .ok_or_else(|| anyhow!("captcha element probe failed after settle"))?;
    if probe.width <= 0.0 || probe.height <= 0.0 {
        return Err(anyhow!(
            "captcha element has no rendered size ({}x{}, attempt {attempt})",
            probe.width,
            probe.height
        ));
    }

    let bytes = tab.capture_element(&cfg.selectors.captcha_image).await?;
    if bytes.is_empty() {
        return Err(anyhow!("captcha capture produced zero bytes"));
    }
    Ok(bytes)
}

/// Navigate the fresh tab to the portal and return the CAPTCHA challenge as
/// a `data:image/png;base64,…` URI for the human solver.
pub async fn acquire(tab: &dyn PortalTab, cfg: &PortalConfig) -> Result<String, VerifyError> {
    let timing = &cfg.timing;

    tab.navigate(&cfg.base_url).await?;
    tab.wait_for_quiescence(
        std::time::Duration::from_millis(timing.quiescence_quiet_ms),
        std::time::Duration::from_millis(timing.quiescence_timeout_ms),
    )
    .await?;

    let outcome = retry(timing.captcha_attempts, timing.captcha_backoff(), |attempt| {
        async move { try_capture(tab, cfg, attempt).await }
    })
    .await;

    match outcome {
        RetryOutcome::Completed(bytes) => {
            info!("captcha: captured {} bytes", bytes.len());
            Ok(format!("data:image/png;base64,{}", BASE64.encode(&bytes)))
        }
        RetryOutcome::Exhausted(e) => {
            warn!(
                "captcha: gave up after {} attempts: {}",
                timing.captcha_attempts, e
            );
            Err(VerifyError::CaptchaUnavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::VerifyTiming;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn fast_cfg() -> PortalConfig {
        PortalConfig {
            timing: VerifyTiming {
                captcha_attempts: 3,
                captcha_backoff_ms: 1,
                captcha_settle_ms: 0,
                captcha_attach_timeout_ms: 5,
                captcha_poll_ms: 1,
                quiescence_quiet_ms: 0,
                quiescence_timeout_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Tab whose dimension probes replay a script; the last response
    /// repeats once the queue drains.
    struct ScriptedTab {
        probes: Mutex<VecDeque<Value>>,
        captures: AtomicUsize,
    }

    impl ScriptedTab {
        fn new(probes: Vec<Value>) -> Self {
            Self {
                probes: Mutex::new(probes.into()),
                captures: AtomicUsize::new(0),
            }
        }
        fn next_probe(&self) -> Value {
            let mut q = self.probes.lock().unwrap();
            if q.len() > 1 {
                q.pop_front().unwrap()
            } else {
                q.front().cloned().unwrap_or_else(|| {
                    json!({"attached": false, "visible": false, "width": 0, "height": 0})
                })
            }
        }
    }

    #[async_trait]
    impl PortalTab for ScriptedTab {
        async fn navigate(&self, _url: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn wait_for_quiescence(&self, _q: Duration, _t: Duration) -> anyhow::Result<()> {
            Ok(())
        }
        async fn eval(&self, _script: &str) -> anyhow::Result<Value> {
            Ok(self.next_probe())
        }
        async fn capture_element(&self, _selector: &str) -> anyhow::Result<Vec<u8>> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0x89, 0x50, 0x4e, 0x47])
        }
        async fn capture_full_page(&self) -> anyhow::Result<Vec<u8>> {
            unreachable!("not used by the captcha stage")
        }
        async fn emulate_print(&self, _w: u32, _h: u32, _s: f64) -> anyhow::Result<()> {
            Ok(())
        }
        async fn current_url(&self) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn zero_size() -> Value {
        json!({"attached": true, "visible": true, "width": 0.0, "height": 0.0})
    }

    fn rendered() -> Value {
        json!({"attached": true, "visible": true, "width": 180.0, "height": 60.0})
    }

    #[tokio::test]
    async fn capture_waits_for_nonzero_dimensions() {
        // Attempts 1 and 2 see a zero-size element (poll + post-settle
        // probe each); attempt 3 sees a rendered one. The screenshot must
        // happen exactly once, after the dimension check finally passes.
        let tab = ScriptedTab::new(vec![
            zero_size(),
            zero_size(),
            zero_size(),
            zero_size(),
            rendered(),
        ]);
        let cfg = fast_cfg();

        let image = acquire(&tab, &cfg).await.expect("third attempt succeeds");
        assert!(image.starts_with("data:image/png;base64,"));
        assert_eq!(tab.captures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_as_captcha_unavailable() {
        let tab = ScriptedTab::new(vec![zero_size()]);
        let cfg = fast_cfg();

        let err = acquire(&tab, &cfg).await.unwrap_err();
        assert!(matches!(err, VerifyError::CaptchaUnavailable));
        assert_eq!(tab.captures.load(Ordering::SeqCst), 0, "never captured");
    }

    #[tokio::test]
    async fn detached_element_never_captures() {
        let tab = ScriptedTab::new(vec![
            json!({"attached": false, "visible": false, "width": 0, "height": 0}),
        ]);
        let cfg = fast_cfg();

        let err = acquire(&tab, &cfg).await.unwrap_err();
        assert!(matches!(err, VerifyError::CaptchaUnavailable));
        assert_eq!(tab.captures.load(Ordering::SeqCst), 0);
    }
}
