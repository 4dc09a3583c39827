use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// `FETCH_CAPTCHA` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchCaptchaRequest {
    pub record_number: String,
    pub date_of_birth: String,
}

/// `FETCH_CAPTCHA` success body. `captchaImage` is a `data:image/png;base64,…` URI.
#[derive(Debug, Serialize, Deserialize)]
pub struct FetchCaptchaResponse {
    pub success: bool,
    #[serde(rename = "captchaImage")]
    pub captcha_image: String,
}

/// `VERIFY` request body. Field names are part of the wire contract
/// consumed by the existing dashboard caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub record_number: String,
    pub date_of_birth: String,
    #[serde(rename = "captchaAnswer")]
    pub captcha_answer: String,
    /// Originating order, when the caller wants the no-record auto-cancel
    /// side effect wired through.
    #[serde(default)]
    pub order_id: Option<String>,
}

/// `VERIFY` success body.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(rename = "pdfBase64")]
    pub pdf_base64: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// The record the caller wants verified. Supplied once and reused across
/// both steps of the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTarget {
    pub record_number: String,
    pub date_of_birth: NaiveDate,
}

fn record_number_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    // Registry numbers are 9–17 digits (17 for birth registrations, shorter
    // legacy national-id formats remain in circulation).
    RE.get_or_init(|| regex::Regex::new(r"^[0-9]{9,17}$").expect("valid record number pattern"))
}

impl RecordTarget {
    /// Validate raw caller input into a well-formed target.
    ///
    /// Rejections here are caller errors (HTTP 400) — no browser work has
    /// started yet.
    pub fn parse(record_number: &str, date_of_birth: &str) -> Result<Self, String> {
        let record_number = record_number.trim();
        if !record_number_re().is_match(record_number) {
            return Err("record_number must be 9-17 digits".to_string());
        }
        let dob = NaiveDate::parse_from_str(date_of_birth.trim(), "%Y-%m-%d")
            .map_err(|_| "date_of_birth must be YYYY-MM-DD".to_string())?;
        if dob > chrono::Utc::now().date_naive() {
            return Err("date_of_birth lies in the future".to_string());
        }
        Ok(Self {
            record_number: record_number.to_string(),
            date_of_birth: dob,
        })
    }

    /// Date formatted the way the portal's date field expects it.
    pub fn dob_field_value(&self) -> String {
        self.date_of_birth.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_accepts_registry_number_shapes() {
        assert!(RecordTarget::parse("19862547819017123", "1986-05-14").is_ok());
        assert!(RecordTarget::parse("1234567890", "2001-01-31").is_ok());
        // Surrounding whitespace is tolerated.
        assert!(RecordTarget::parse(" 1234567890 ", " 2001-01-31 ").is_ok());
    }

    #[test]
    fn target_rejects_malformed_input() {
        assert!(RecordTarget::parse("12345678", "1986-05-14").is_err()); // too short
        assert!(RecordTarget::parse("123456789012345678", "1986-05-14").is_err()); // too long
        assert!(RecordTarget::parse("12345abc90", "1986-05-14").is_err());
        assert!(RecordTarget::parse("1234567890", "14-05-1986").is_err());
        assert!(RecordTarget::parse("1234567890", "2999-01-01").is_err()); // future
    }

    #[test]
    fn wire_field_names_match_the_caller_contract() {
        let req: VerifyRequest = serde_json::from_str(
            r#"{"record_number":"1234567890","date_of_birth":"2001-01-31","captchaAnswer":"x7k2"}"#,
        )
        .unwrap();
        assert_eq!(req.captcha_answer, "x7k2");
        assert!(req.order_id.is_none());

        let out = serde_json::to_value(VerifyResponse {
            success: true,
            pdf_base64: "QUJD".to_string(),
        })
        .unwrap();
        assert_eq!(out["pdfBase64"], "QUJD");

        let out = serde_json::to_value(FetchCaptchaResponse {
            success: true,
            captcha_image: "data:image/png;base64,QUJD".to_string(),
        })
        .unwrap();
        assert!(out["captchaImage"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }
}
