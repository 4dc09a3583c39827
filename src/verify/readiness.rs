//! Data readiness gate.
//!
//! Right after a record is found the portal still shows a transient filler
//! value in the person-name and father's-name cells while the real values
//! stream in asynchronously. Rendering at that moment produces a document
//! with garbage content, so this gate blocks until both cells hold
//! plausible real data. A timeout here is a terminal failure for the
//! attempt — never a success with partial data.
//!
//! The result table has no stable ids; each value cell is located as the
//! sibling of its label cell.

use serde::Deserialize;
use tracing::{info, warn};

use super::error::VerifyError;
use crate::browser::wait::poll_until;
use crate::core::config::PortalConfig;
use crate::portal::PortalTab;

#[derive(Debug, Deserialize)]
struct NameCells {
    person: Option<String>,
    father: Option<String>,
}

fn cells_script(cfg: &PortalConfig) -> String {
    let quote = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => {{
    const valueFor = (label) => {{
        const cells = Array.from(document.querySelectorAll('td, th'));
        const hit = cells.find(c => c.innerText.trim() === label);
        if (!hit || !hit.nextElementSibling) return null;
        return hit.nextElementSibling.innerText.trim();
    }};
    return {{ person: valueFor({person}), father: valueFor({father}) }};
}})()"#,
        person = quote(&cfg.labels.person_name),
        father = quote(&cfg.labels.father_name),
    )
}

/// A cell value counts as real data when it is present, long enough to be
/// a name, and not the portal's filler sentinel.
fn is_real(value: Option<&str>, cfg: &PortalConfig) -> bool {
    match value {
        Some(v) => {
            let v = v.trim();
            v.chars().count() >= cfg.min_plausible_len && v != cfg.placeholder
        }
        None => false,
    }
}

/// Block until both name cells hold real values, or fail the attempt with
/// `DataLoadTimeout`.
pub async fn await_real_data(tab: &dyn PortalTab, cfg: &PortalConfig) -> Result<(), VerifyError> {
    let script = cells_script(cfg);
    let timing = &cfg.timing;

    let ready = poll_until(timing.readiness_poll(), timing.readiness_timeout(), || {
        let script = script.clone();
        async move {
            let value = tab.eval(&script).await.ok()?;
            let cells: NameCells = serde_json::from_value(value).ok()?;
            (is_real(cells.person.as_deref(), cfg) && is_real(cells.father.as_deref(), cfg))
                .then_some(())
        }
    })
    .await;

    match ready {
        Some(()) => {
            info!("readiness: record data loaded");
            Ok(())
        }
        None => {
            warn!(
                "readiness: data still not real after {:?}",
                timing.readiness_timeout()
            );
            Err(VerifyError::DataLoadTimeout)
        }
    }
}
