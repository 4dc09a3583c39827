//! Outcome classification.
//!
//! The portal renders every outcome — wrong CAPTCHA, no record, a found
//! record — into the same page with the same HTTP status. Classification is
//! therefore text-pattern based: each poll scans the rendered text for all
//! markers in a single Aho-Corasick pass, so whichever outcome appears
//! first wins without a fixed checking order deciding the race. When
//! several markers coexist on one page the most specific category takes
//! priority.

use aho_corasick::AhoCorasick;
use anyhow::Context;
use tracing::info;

use super::error::VerifyError;
use crate::browser::wait::poll_until;
use crate::core::config::{OutcomeMarkers, PortalConfig};
use crate::portal::PortalTab;

const BODY_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

/// What the portal's response page says happened. A `SuccessCandidate` is
/// not yet a success — the readiness guard still has to approve the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeCategory {
    SuccessCandidate,
    WrongCaptcha,
    NoRecord,
    Unrecognized,
}

impl OutcomeCategory {
    /// Priority on simultaneous hits: a wrong-CAPTCHA notice invalidates
    /// the whole response, a no-record notice invalidates the record, and
    /// only then does a success heading count.
    fn rank(self) -> u8 {
        match self {
            OutcomeCategory::WrongCaptcha => 0,
            OutcomeCategory::NoRecord => 1,
            OutcomeCategory::SuccessCandidate => 2,
            OutcomeCategory::Unrecognized => 3,
        }
    }
}

/// Compiled marker set: one automaton over every configured marker, with a
/// parallel category table indexed by pattern id.
pub struct MarkerScan {
    ac: AhoCorasick,
    categories: Vec<OutcomeCategory>,
}

impl MarkerScan {
    pub fn new(markers: &OutcomeMarkers) -> anyhow::Result<Self> {
        let mut patterns: Vec<&str> = Vec::new();
        let mut categories = Vec::new();
        for m in &markers.wrong_captcha {
            patterns.push(m);
            categories.push(OutcomeCategory::WrongCaptcha);
        }
        for m in &markers.no_record {
            patterns.push(m);
            categories.push(OutcomeCategory::NoRecord);
        }
        for m in &markers.success {
            patterns.push(m);
            categories.push(OutcomeCategory::SuccessCandidate);
        }
        let ac = AhoCorasick::new(&patterns).context("invalid outcome markers")?;
        Ok(Self { ac, categories })
    }

    /// Scan `text` for all markers at once; `None` when nothing matched.
    pub fn classify(&self, text: &str) -> Option<OutcomeCategory> {
        let mut best: Option<OutcomeCategory> = None;
        for hit in self.ac.find_iter(text) {
            let cat = self.categories[hit.pattern().as_usize()];
            best = Some(match best {
                Some(prev) if prev.rank() <= cat.rank() => prev,
                _ => cat,
            });
        }
        best
    }
}

/// Poll the page until one of the outcome markers appears or the deadline
/// passes. Expiry yields `Unrecognized`; the orchestrator decides what an
/// unrecognized page means for the attempt.
pub async fn classify(
    tab: &dyn PortalTab,
    cfg: &PortalConfig,
) -> Result<OutcomeCategory, VerifyError> {
    let scan = MarkerScan::new(&cfg.markers)?;
    let timing = &cfg.timing;

    let outcome = poll_until(timing.classify_poll(), timing.classify_timeout(), || {
        let scan = &scan;
        async move {
            // Transient evaluation failures keep polling; the deadline is
            // the only thing that gives up.
            let text = tab.eval(BODY_TEXT_JS).await.ok()?;
            scan.classify(text.as_str()?)
        }
    })
    .await;

    let category = outcome.unwrap_or(OutcomeCategory::Unrecognized);
    info!("classifier: outcome {:?}", category);
    Ok(category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::VerifyTiming;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    fn fast_cfg() -> PortalConfig {
        PortalConfig {
            timing: VerifyTiming {
                classify_timeout_secs: 0,
                classify_poll_ms: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    struct TextTab {
        texts: Mutex<VecDeque<String>>,
    }

    impl TextTab {
        fn showing(texts: &[&str]) -> Self {
            Self {
                texts: Mutex::new(texts.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl PortalTab for TextTab {
        async fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }
        async fn wait_for_quiescence(&self, _q: Duration, _t: Duration) -> Result<()> {
            Ok(())
        }
        async fn eval(&self, _script: &str) -> Result<Value> {
            let mut q = self.texts.lock().unwrap();
            let text = if q.len() > 1 {
                q.pop_front().unwrap()
            } else {
                q.front().cloned().unwrap_or_default()
            };
            Ok(json!(text))
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

    #[tokio::test]
    async fn no_record_wins_over_unrelated_page_text() {
        let tab = TextTab::showing(&[
            "Civil Registration Portal\nSearch results\nNo Record Found\nContact the registrar office",
        ]);
        let got = classify(&tab, &fast_cfg()).await.unwrap();
        assert_eq!(got, OutcomeCategory::NoRecord);
    }

    #[tokio::test]
    async fn wrong_captcha_takes_priority_over_success_heading() {
        // A stale result table can still be on the page when the portal
        // rejects the answer; the rejection notice must win.
        let tab = TextTab::showing(&[
            "Name of Registered Person\nCaptcha was not matched\nPlease retry",
        ]);
        let got = classify(&tab, &fast_cfg()).await.unwrap();
        assert_eq!(got, OutcomeCategory::WrongCaptcha);
    }

    #[tokio::test]
    async fn success_heading_classifies_as_candidate_only() {
        let tab = TextTab::showing(&["Verification Result\nName of Registered Person\n..."]);
        let got = classify(&tab, &fast_cfg()).await.unwrap();
        assert_eq!(got, OutcomeCategory::SuccessCandidate);
    }

    #[tokio::test]
    async fn marker_appearing_on_a_later_poll_is_caught() {
        let mut cfg = fast_cfg();
        cfg.timing.classify_timeout_secs = 2;
        let tab = TextTab::showing(&["Loading...", "Loading...", "No Record Found"]);
        let got = classify(&tab, &cfg).await.unwrap();
        assert_eq!(got, OutcomeCategory::NoRecord);
    }

    #[tokio::test]
    async fn deadline_without_markers_is_unrecognized() {
        let tab = TextTab::showing(&["spinner spinner spinner"]);
        let got = classify(&tab, &fast_cfg()).await.unwrap();
        assert_eq!(got, OutcomeCategory::Unrecognized);
    }
}
