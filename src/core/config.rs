use std::time::Duration;

// ---------------------------------------------------------------------------
// CertsnapConfig — file-based config loader (certsnap.json) with env-var fallback
// ---------------------------------------------------------------------------

/// CSS selectors for the portal's verification form.
///
/// The registry portal is a third party and occasionally reshuffles its
/// markup; every anchor the pipeline depends on is therefore configurable,
/// with defaults matching the portal as currently deployed.
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PortalSelectors {
    /// The CAPTCHA challenge image.
    pub captcha_image: String,
    /// Record-number (birth registration / national id) input field.
    pub record_number: String,
    /// Date-of-birth input field.
    pub date_of_birth: String,
    /// CAPTCHA answer input field.
    pub captcha_answer: String,
    /// The search/submit control.
    pub search_button: String,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            captcha_image: "#CaptchaImage".to_string(),
            record_number: "#ubrn".to_string(),
            date_of_birth: "#BirthDate".to_string(),
            captcha_answer: "#CaptchaInputText".to_string(),
            search_button: "input[type='submit']".to_string(),
        }
    }
}

/// Textual markers the portal renders for each outcome.
///
/// All outcomes land on the same page with a 200 status, so classification
/// is text-pattern based. Matching is case-sensitive substring search.
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct OutcomeMarkers {
    /// Wrong-CAPTCHA notice(s).
    pub wrong_captcha: Vec<String>,
    /// Record-not-found or record/DOB mismatch notice(s).
    pub no_record: Vec<String>,
    /// Heading shown above a found record.
    pub success: Vec<String>,
}

impl Default for OutcomeMarkers {
    fn default() -> Self {
        Self {
            wrong_captcha: vec!["Captcha was not matched".to_string()],
            no_record: vec![
                "No Record Found".to_string(),
                "Record Does not Match".to_string(),
            ],
            success: vec!["Name of Registered Person".to_string()],
        }
    }
}

/// Label-cell texts used to positionally locate the record's value cells.
/// The portal's result table carries no stable ids; the cell adjacent to
/// each label cell is the only reliable anchor.
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ReadinessLabels {
    pub person_name: String,
    pub father_name: String,
}

impl Default for ReadinessLabels {
    fn default() -> Self {
        Self {
            person_name: "Name".to_string(),
            father_name: "Father Name".to_string(),
        }
    }
}

/// All pipeline intervals and deadlines.
///
/// Tests compress these to near-zero; production defaults match the
/// portal's observed latency envelope.
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct VerifyTiming {
    /// CAPTCHA capture attempts before giving up.
    pub captcha_attempts: u32,
    /// Pause between CAPTCHA capture attempts (ms).
    pub captcha_backoff_ms: u64,
    /// Settle delay after the CAPTCHA element becomes visible (ms).
    pub captcha_settle_ms: u64,
    /// Per-attempt deadline for the element to attach and become visible (ms).
    pub captcha_attach_timeout_ms: u64,
    /// Poll interval while waiting for the CAPTCHA element (ms).
    pub captcha_poll_ms: u64,
    /// Network-quiescence window after navigation (ms).
    pub quiescence_quiet_ms: u64,
    /// Hard cap on the quiescence wait (ms).
    pub quiescence_timeout_ms: u64,
    /// Outcome classification deadline (s).
    pub classify_timeout_secs: u64,
    /// Poll interval while classifying (ms).
    pub classify_poll_ms: u64,
    /// Data-readiness deadline (s).
    pub readiness_timeout_secs: u64,
    /// Poll interval while awaiting real data (ms).
    pub readiness_poll_ms: u64,
}

impl Default for VerifyTiming {
    fn default() -> Self {
        Self {
            captcha_attempts: 3,
            captcha_backoff_ms: 2_000,
            captcha_settle_ms: 800,
            captcha_attach_timeout_ms: 10_000,
            captcha_poll_ms: 250,
            quiescence_quiet_ms: 1_500,
            quiescence_timeout_ms: 15_000,
            classify_timeout_secs: 60,
            classify_poll_ms: 500,
            readiness_timeout_secs: 40,
            readiness_poll_ms: 500,
        }
    }
}

impl VerifyTiming {
    pub fn captcha_backoff(&self) -> Duration {
        Duration::from_millis(self.captcha_backoff_ms)
    }
    pub fn captcha_settle(&self) -> Duration {
        Duration::from_millis(self.captcha_settle_ms)
    }
    pub fn captcha_attach_timeout(&self) -> Duration {
        Duration::from_millis(self.captcha_attach_timeout_ms)
    }
    pub fn captcha_poll(&self) -> Duration {
        Duration::from_millis(self.captcha_poll_ms)
    }
    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs)
    }
    pub fn classify_poll(&self) -> Duration {
        Duration::from_millis(self.classify_poll_ms)
    }
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }
    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms)
    }
}

/// Print-capture geometry for the PDF render stage.
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PrintLayout {
    /// Viewport width during capture (px). A4-proportioned.
    pub viewport_width: u32,
    /// Viewport height during capture (px).
    pub viewport_height: u32,
    /// Device scale factor — 2.0 doubles raster fidelity.
    pub device_scale_factor: f64,
    /// JPEG quality for the embedded raster (1–100).
    pub jpeg_quality: u8,
}

impl Default for PrintLayout {
    fn default() -> Self {
        Self {
            viewport_width: 1240,
            viewport_height: 1754,
            device_scale_factor: 2.0,
            jpeg_quality: 85,
        }
    }
}

/// Everything the verification pipeline needs to know about the portal.
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PortalConfig {
    /// Entry URL of the registry portal's verification page.
    pub base_url: String,
    pub selectors: PortalSelectors,
    pub markers: OutcomeMarkers,
    pub labels: ReadinessLabels,
    /// Transient filler value the portal shows before real data streams in.
    pub placeholder: String,
    /// Minimum believable length for a name value cell.
    pub min_plausible_len: usize,
    pub timing: VerifyTiming,
    pub print: PrintLayout,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://everify.bdris.gov.bd/".to_string(),
            selectors: PortalSelectors::default(),
            markers: OutcomeMarkers::default(),
            labels: ReadinessLabels::default(),
            placeholder: "WE".to_string(),
            min_plausible_len: 3,
            timing: VerifyTiming::default(),
            print: PrintLayout::default(),
        }
    }
}

impl PortalConfig {
    /// Host component of `base_url`, used for tab matching.
    pub fn portal_host(&self) -> Option<String> {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }
}

/// Top-level config loaded from `certsnap.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
#[serde(default)]
pub struct CertsnapConfig {
    pub portal: PortalConfig,
    /// Order-management collaborator base URL. Absent → auto-cancel disabled.
    pub order_service_url: Option<String>,
    pub port: Option<u16>,
}

impl CertsnapConfig {
    /// Portal entry URL: `CERTSNAP_PORTAL_URL` env var → JSON field → built-in default.
    pub fn resolve_portal_url(&self) -> String {
        std::env::var(ENV_PORTAL_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.portal.base_url.clone())
    }

    /// Order service: `CERTSNAP_ORDER_SERVICE_URL` env var → JSON field → None.
    pub fn resolve_order_service_url(&self) -> Option<String> {
        std::env::var(ENV_ORDER_SERVICE_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.order_service_url.clone())
    }
}

/// Load `certsnap.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `CERTSNAP_CONFIG` env var path
/// 2. `./certsnap.json` (process cwd)
/// 3. `../certsnap.json` (one level up, when running from a subdirectory)
///
/// Missing file → `CertsnapConfig::default()` (silent, env-var fallbacks apply).
/// Parse error → log a warning, return `CertsnapConfig::default()`.
pub fn load_config() -> CertsnapConfig {
    let candidates: Vec<std::path::PathBuf> = {
        let mut v = vec![
            std::path::PathBuf::from("certsnap.json"),
            std::path::PathBuf::from("../certsnap.json"),
        ];
        if let Ok(env_path) = std::env::var(ENV_CONFIG) {
            v.insert(0, std::path::PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<CertsnapConfig>(&contents) {
                Ok(mut cfg) => {
                    tracing::info!("certsnap.json loaded from {}", path.display());
                    cfg.portal.base_url = cfg.resolve_portal_url();
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "certsnap.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return CertsnapConfig::default();
                }
            },
            Err(_) => continue, // file not found at this path — try next
        }
    }

    let mut cfg = CertsnapConfig::default();
    cfg.portal.base_url = cfg.resolve_portal_url();
    cfg
}

// ---------------------------------------------------------------------------

pub const ENV_CONFIG: &str = "CERTSNAP_CONFIG";
pub const ENV_PORTAL_URL: &str = "CERTSNAP_PORTAL_URL";
pub const ENV_ORDER_SERVICE_URL: &str = "CERTSNAP_ORDER_SERVICE_URL";
pub const ENV_STATE_DIR: &str = "CERTSNAP_STATE_DIR";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

/// Directory for persisted runtime state (the browser session handle).
///
/// `CERTSNAP_STATE_DIR` override → `~/.certsnap`.
pub fn state_dir() -> Option<std::path::PathBuf> {
    if let Ok(v) = std::env::var(ENV_STATE_DIR) {
        let v = v.trim();
        if !v.is_empty() {
            return Some(std::path::PathBuf::from(v));
        }
    }
    dirs::home_dir().map(|h| h.join(".certsnap"))
}
