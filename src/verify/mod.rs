//! The verification pipeline.
//!
//! Two externally-visible actions drive a multi-step workflow against the
//! registry portal: a captcha fetch opens a fresh portal tab and hands the
//! challenge image to a human; the verify step re-finds that tab, submits
//! the form, classifies the portal's answer, waits out the portal's
//! asynchronous data load, and renders the result as a PDF. The browser
//! connection survives across attempts; tabs do not survive failures.

pub mod captcha;
pub mod classify;
pub mod error;
pub mod form;
pub mod locator;
pub mod readiness;
pub mod render;

pub use classify::OutcomeCategory;
pub use error::{VerifyError, NO_RECORD_PHRASE};

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::PortalConfig;
use crate::core::types::RecordTarget;
use crate::orders::OrderDirectory;
use crate::portal::{PortalBrowser, PortalTab};

/// Where an attempt stands. `Succeeded` and `Failed` are terminal for the
/// attempt but not for the shared browser, which persists for the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    Fetching,
    AwaitingAnswer,
    Verifying,
    Succeeded,
    Failed,
}

/// One verification attempt. Lives in process memory only — the two HTTP
/// steps each construct their own view of the attempt, stitched together by
/// the shared browser tab rather than by persisted state.
///
/// The artifact is present exactly when the attempt succeeded: it is only
/// ever set by [`succeed`](Self::succeed) and cleared by
/// [`fail`](Self::fail).
#[derive(Debug)]
pub struct VerificationAttempt {
    id: Uuid,
    target: RecordTarget,
    captcha_answer: Option<String>,
    stage: AttemptStage,
    artifact: Option<Vec<u8>>,
}

impl VerificationAttempt {
    /// Start the first step: fetching a captcha for `target`.
    pub fn begin_fetch(target: RecordTarget) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            captcha_answer: None,
            stage: AttemptStage::Fetching,
            artifact: None,
        }
    }

    /// Rebuild the attempt at the second step, after a human has seen the
    /// challenge from an earlier captcha fetch.
    pub fn resume(target: RecordTarget) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            captcha_answer: None,
            stage: AttemptStage::AwaitingAnswer,
            artifact: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> AttemptStage {
        self.stage
    }

    pub fn target(&self) -> &RecordTarget {
        &self.target
    }

    pub fn captcha_answer(&self) -> Option<&str> {
        self.captcha_answer.as_deref()
    }

    /// The challenge went out; wait for the human.
    pub fn await_answer(&mut self) {
        self.stage = AttemptStage::AwaitingAnswer;
    }

    /// A non-empty answer is the only way out of `AwaitingAnswer`.
    pub fn supply_answer(&mut self, answer: &str) -> Result<(), VerifyError> {
        if self.stage != AttemptStage::AwaitingAnswer {
            return Err(VerifyError::Internal(anyhow::anyhow!(
                "answer supplied in stage {:?}",
                self.stage
            )));
        }
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(VerifyError::Internal(anyhow::anyhow!(
                "empty captcha answer"
            )));
        }
        self.captcha_answer = Some(answer.to_string());
        self.stage = AttemptStage::Verifying;
        Ok(())
    }

    pub fn succeed(&mut self, pdf: Vec<u8>) {
        debug_assert!(!pdf.is_empty());
        self.stage = AttemptStage::Succeeded;
        self.artifact = Some(pdf);
    }

    pub fn fail(&mut self) {
        self.stage = AttemptStage::Failed;
        self.artifact = None;
    }

    /// Present exactly when `stage == Succeeded`.
    pub fn artifact(&self) -> Option<&[u8]> {
        self.artifact.as_deref()
    }

    pub fn into_artifact(self) -> Option<Vec<u8>> {
        self.artifact
    }
}

/// Sequences the pipeline stages and maps their outcomes onto the error
/// taxonomy and the order side effect.
pub struct Verifier {
    browser: Arc<dyn PortalBrowser>,
    orders: Arc<dyn OrderDirectory>,
    cfg: PortalConfig,
}

impl Verifier {
    pub fn new(
        browser: Arc<dyn PortalBrowser>,
        orders: Arc<dyn OrderDirectory>,
        cfg: PortalConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            browser,
            orders,
            cfg,
        })
    }

    /// First action: open a fresh portal tab and return the CAPTCHA
    /// challenge for human solving. The tab is deliberately left open — the
    /// matching verify call re-locates it.
    pub async fn fetch_captcha(&self, target: &RecordTarget) -> Result<String, VerifyError> {
        let mut attempt = VerificationAttempt::begin_fetch(target.clone());
        info!(
            attempt = %attempt.id(),
            record = %target.record_number,
            "captcha fetch started"
        );

        let tab = self.browser.open_tab().await?;
        match captcha::acquire(tab.as_ref(), &self.cfg).await {
            Ok(image) => {
                attempt.await_answer();
                info!(attempt = %attempt.id(), "captcha handed to solver");
                Ok(image)
            }
            Err(e) => {
                self.abandon_tab(tab.as_ref()).await;
                attempt.fail();
                Err(e)
            }
        }
    }

    /// Second action: drive the located tab through submission,
    /// classification, readiness, and rendering. Returns the completed
    /// attempt; its artifact is present iff it succeeded.
    pub async fn verify(
        &self,
        target: &RecordTarget,
        answer: &str,
        order_id: Option<&str>,
    ) -> Result<VerificationAttempt, VerifyError> {
        let mut attempt = VerificationAttempt::resume(target.clone());
        attempt.supply_answer(answer)?;
        info!(
            attempt = %attempt.id(),
            record = %target.record_number,
            "verification started"
        );

        let tab = locator::locate(self.browser.as_ref(), &self.cfg).await?;

        match self.drive(tab.as_ref(), target, answer).await {
            Ok(pdf) => {
                // The tab stays open on success: re-running a verification
                // is cheap until the browser itself is relaunched.
                attempt.succeed(pdf);
                info!(attempt = %attempt.id(), "verification succeeded");
                Ok(attempt)
            }
            Err(e) => {
                self.abandon_tab(tab.as_ref()).await;
                if matches!(e, VerifyError::NoRecordFound) {
                    self.auto_cancel(order_id).await;
                }
                attempt.fail();
                warn!(attempt = %attempt.id(), "verification failed: {}", e);
                Err(e)
            }
        }
    }

    /// The in-tab stage sequence: submit → classify → readiness → render.
    async fn drive(
        &self,
        tab: &dyn PortalTab,
        target: &RecordTarget,
        answer: &str,
    ) -> Result<Vec<u8>, VerifyError> {
        form::submit(tab, target, answer, &self.cfg).await?;

        match classify::classify(tab, &self.cfg).await? {
            OutcomeCategory::WrongCaptcha => Err(VerifyError::WrongCaptcha),
            OutcomeCategory::NoRecord => Err(VerifyError::NoRecordFound),
            OutcomeCategory::Unrecognized => Err(VerifyError::ClassificationTimeout),
            OutcomeCategory::SuccessCandidate => {
                // A candidate is not a result until the data is real.
                readiness::await_real_data(tab, &self.cfg).await?;
                render::render(tab, &self.cfg).await
            }
        }
    }

    /// Failure-path cleanup: the tab is closed and the connection dropped
    /// (the persisted endpoint survives, so the next request re-attaches).
    async fn abandon_tab(&self, tab: &dyn PortalTab) {
        if let Err(e) = tab.close().await {
            warn!("tab close on failure path: {}", e);
        }
        self.browser.disconnect().await;
    }

    async fn auto_cancel(&self, order_id: Option<&str>) {
        let Some(order_id) = order_id else {
            return;
        };
        if let Err(e) = self.orders.cancel_with_refund(order_id, NO_RECORD_PHRASE).await {
            // The verification outcome stands; the stuck order needs an
            // operator.
            warn!("order auto-cancel for {} failed: {}", order_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> RecordTarget {
        RecordTarget::parse("19862547819017123", "1986-05-14").unwrap()
    }

    #[test]
    fn artifact_present_iff_succeeded() {
        let mut attempt = VerificationAttempt::resume(target());
        assert!(attempt.artifact().is_none());

        attempt.supply_answer("x7k2").unwrap();
        assert_eq!(attempt.stage(), AttemptStage::Verifying);
        assert!(attempt.artifact().is_none());

        attempt.succeed(vec![1, 2, 3]);
        assert_eq!(attempt.stage(), AttemptStage::Succeeded);
        assert_eq!(attempt.artifact(), Some(&[1u8, 2, 3][..]));

        attempt.fail();
        assert_eq!(attempt.stage(), AttemptStage::Failed);
        assert!(attempt.artifact().is_none());
    }

    #[test]
    fn answer_is_required_to_leave_awaiting() {
        let mut attempt = VerificationAttempt::resume(target());
        assert!(attempt.supply_answer("   ").is_err());
        assert_eq!(attempt.stage(), AttemptStage::AwaitingAnswer);
        assert!(attempt.captcha_answer().is_none());

        attempt.supply_answer("x7k2").unwrap();
        assert_eq!(attempt.stage(), AttemptStage::Verifying);
        assert_eq!(attempt.captcha_answer(), Some("x7k2"));
    }

    #[test]
    fn answer_rejected_outside_awaiting_stage() {
        let mut attempt = VerificationAttempt::begin_fetch(target());
        assert_eq!(attempt.stage(), AttemptStage::Fetching);
        assert!(attempt.supply_answer("x7k2").is_err());

        attempt.await_answer();
        assert!(attempt.supply_answer("x7k2").is_ok());
        // Already verifying; a second answer has nowhere to go.
        assert!(attempt.supply_answer("again").is_err());
    }

    #[test]
    fn fresh_attempts_get_distinct_ids() {
        let a = VerificationAttempt::begin_fetch(target());
        let b = VerificationAttempt::begin_fetch(target());
        assert_ne!(a.id(), b.id());
    }
}
