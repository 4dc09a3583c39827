//! Form submission.
//!
//! Field values are assigned programmatically and each assignment is
//! followed by bubbling `input` and `change` events — the portal's own
//! client-side validation listens for these rather than polling values, so
//! a bare `.value =` write would submit an apparently empty form.

use serde::Deserialize;
use tracing::info;

use super::error::VerifyError;
use crate::core::config::PortalConfig;
use crate::core::types::RecordTarget;
use crate::portal::PortalTab;

#[derive(Debug, Deserialize)]
struct FillReport {
    missing: Vec<String>,
    clicked: bool,
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn fill_script(target: &RecordTarget, answer: &str, cfg: &PortalConfig) -> String {
    let sel = &cfg.selectors;
    format!(
        r#"(() => {{
    const missing = [];
    const setValue = (sel, value) => {{
        const el = document.querySelector(sel);
        if (!el) {{ missing.push(sel); return; }}
        el.value = value;
        el.dispatchEvent(new Event('input', {{ bubbles: true, cancelable: true }}));
        el.dispatchEvent(new Event('change', {{ bubbles: true, cancelable: true }}));
    }};
    setValue({rn_sel}, {rn});
    setValue({dob_sel}, {dob});
    setValue({ans_sel}, {ans});
    const button = document.querySelector({btn_sel});
    if (!button) missing.push({btn_sel});
    if (missing.length > 0) return {{ missing: missing, clicked: false }};
    button.click();
    return {{ missing: [], clicked: true }};
}})()"#,
        rn_sel = quote(&sel.record_number),
        rn = quote(&target.record_number),
        dob_sel = quote(&sel.date_of_birth),
        dob = quote(&target.dob_field_value()),
        ans_sel = quote(&sel.captcha_answer),
        ans = quote(answer),
        btn_sel = quote(&sel.search_button),
    )
}

/// Fill the verification form and invoke the search control.
pub async fn submit(
    tab: &dyn PortalTab,
    target: &RecordTarget,
    answer: &str,
    cfg: &PortalConfig,
) -> Result<(), VerifyError> {
    let script = fill_script(target, answer, cfg);
    let value = tab.eval(&script).await?;
    let report: FillReport = serde_json::from_value(value)
        .map_err(|e| anyhow::anyhow!("form fill report was malformed: {}", e))?;

    if !report.missing.is_empty() || !report.clicked {
        tracing::warn!("form: inputs missing from portal page: {:?}", report.missing);
        return Err(VerifyError::FormFieldsMissing);
    }

    info!("form: submitted record {}", target.record_number);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingTab {
        scripts: Mutex<Vec<String>>,
        response: Value,
    }

    impl RecordingTab {
        fn replying(response: Value) -> Self {
            Self {
                scripts: Mutex::new(vec![]),
                response,
            }
        }
    }

    #[async_trait]
    impl PortalTab for RecordingTab {
        async fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }
        async fn wait_for_quiescence(&self, _q: Duration, _t: Duration) -> Result<()> {
            Ok(())
        }
        async fn eval(&self, script: &str) -> Result<Value> {
            self.scripts.lock().unwrap().push(script.to_string());
            Ok(self.response.clone())
        }
        async fn capture_element(&self, _selector: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn capture_full_page(&self) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn emulate_print(&self, _w: u32, _h: u32, _s: f64) -> Result<()> {
            Ok(())
        }
        async fn current_url(&self) -> Result<Option<String>> {
            Ok(None)
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn target() -> RecordTarget {
        RecordTarget::parse("19862547819017123", "1986-05-14").unwrap()
    }

    #[tokio::test]
    async fn submit_dispatches_notification_events() {
        let tab = RecordingTab::replying(json!({"missing": [], "clicked": true}));
        submit(&tab, &target(), "x7k2", &PortalConfig::default())
            .await
            .unwrap();

        let scripts = tab.scripts.lock().unwrap();
        assert_eq!(scripts.len(), 1);
        let js = &scripts[0];
        // Values land in the script verbatim, and both listener events fire.
        assert!(js.contains("19862547819017123"));
        assert!(js.contains("1986-05-14"));
        assert!(js.contains("x7k2"));
        assert!(js.contains("new Event('input'"));
        assert!(js.contains("new Event('change'"));
        assert!(js.contains("button.click()"));
    }

    #[tokio::test]
    async fn missing_inputs_fail_the_stage() {
        let tab = RecordingTab::replying(json!({"missing": ["#ubrn"], "clicked": false}));
        let err = submit(&tab, &target(), "x7k2", &PortalConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::FormFieldsMissing));
    }

    #[tokio::test]
    async fn unclicked_search_control_fails_the_stage() {
        let tab = RecordingTab::replying(json!({"missing": [], "clicked": false}));
        let err = submit(&tab, &target(), "x7k2", &PortalConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::FormFieldsMissing));
    }

    #[tokio::test]
    async fn answer_with_quotes_is_json_escaped() {
        let tab = RecordingTab::replying(json!({"missing": [], "clicked": true}));
        submit(&tab, &target(), r#"a"b"#, &PortalConfig::default())
            .await
            .unwrap();
        let scripts = tab.scripts.lock().unwrap();
        assert!(scripts[0].contains(r#""a\"b""#));
    }
}
