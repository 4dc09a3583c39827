use thiserror::Error;

/// Exact no-record message. The dashboard caller pattern-matches this
/// string to decide whether to auto-cancel the originating order — change
/// it and refunds stop firing.
pub const NO_RECORD_PHRASE: &str = "No Record Found";

/// Everything that can go wrong between a caller's request and a finished
/// PDF. Display strings are the wire-level `error` messages.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The portal never rendered a usable CAPTCHA image. Retryable by
    /// re-issuing the captcha request.
    #[error("Captcha image did not load. Please request a new captcha.")]
    CaptchaUnavailable,

    /// No plausible portal tab survives from the captcha step. The caller
    /// must restart from the beginning.
    #[error("Session expired. Please request a new captcha.")]
    SessionExpired,

    /// The human-supplied answer was rejected by the portal.
    #[error("Captcha answer was not correct")]
    WrongCaptcha,

    /// Definitive negative from the registry. Terminal; triggers the
    /// order auto-cancel side effect. Must stay equal to
    /// [`NO_RECORD_PHRASE`].
    #[error("No Record Found")]
    NoRecordFound,

    /// Expected form inputs are absent from the portal page.
    #[error("Verification form not found on the portal page")]
    FormFieldsMissing,

    /// No outcome marker appeared before the deadline. The portal is slow,
    /// not wrong — advise retrying later.
    #[error("The portal did not return a result in time. Please try again later.")]
    ClassificationTimeout,

    /// The record was found but its data never finished loading. Never
    /// downgraded to a partial success.
    #[error("Record data did not finish loading. Please try again later.")]
    DataLoadTimeout,

    /// The rendered page could not be converted into a non-empty PDF.
    #[error("Failed to render the verification document")]
    RenderFailure,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl VerifyError {
    /// Whether the caller can meaningfully retry without operator help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VerifyError::CaptchaUnavailable
                | VerifyError::SessionExpired
                | VerifyError::WrongCaptcha
                | VerifyError::ClassificationTimeout
                | VerifyError::DataLoadTimeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_record_message_is_the_exact_contract_phrase() {
        assert_eq!(VerifyError::NoRecordFound.to_string(), NO_RECORD_PHRASE);
        assert_eq!(NO_RECORD_PHRASE, "No Record Found");
    }

    #[test]
    fn retryability_split() {
        assert!(VerifyError::WrongCaptcha.is_retryable());
        assert!(VerifyError::CaptchaUnavailable.is_retryable());
        assert!(!VerifyError::NoRecordFound.is_retryable());
        assert!(!VerifyError::RenderFailure.is_retryable());
    }
}
