//! Persisted browser-connection handle.
//!
//! The service handles `FETCH_CAPTCHA` and `VERIFY` as independent,
//! short-lived requests, but the Chromium process they share is long-lived
//! and expensive. After a launch the browser's WebSocket debugger URL is
//! written to `{state_dir}/browser_session.json` so a later request — or a
//! restarted service process — can re-attach to the same browser instead of
//! launching a new one. The stored copy is deleted the moment a liveness
//! probe fails.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::config;

const HANDLE_FILE: &str = "browser_session.json";

/// On-disk form of the connection handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredHandle {
    /// WebSocket debugger URL of the live browser process.
    pub ws_endpoint: String,
    /// When this handle was persisted (RFC 3339). Informational only —
    /// staleness is decided by the liveness probe, never by age.
    pub saved_at: String,
}

fn handle_path() -> Option<std::path::PathBuf> {
    config::state_dir().map(|d| d.join(HANDLE_FILE))
}

/// Load the persisted handle, if any.
///
/// A missing, unreadable, or corrupt file all behave as "no handle" — the
/// caller falls through to a fresh launch.
pub fn load() -> Option<StoredHandle> {
    let path = handle_path()?;
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<StoredHandle>(&content) {
        Ok(handle) => {
            info!(
                "handle_store: loaded browser handle from {} (saved {})",
                path.display(),
                handle.saved_at
            );
            Some(handle)
        }
        Err(e) => {
            warn!(
                "handle_store: corrupt handle file {} ({}) — ignoring",
                path.display(),
                e
            );
            None
        }
    }
}

/// Persist `ws_endpoint` as the current live handle.
///
/// Called immediately after a successful launch, before the connection is
/// handed to any caller, so a crash mid-request never strands an
/// unrecorded browser process.
pub fn save(ws_endpoint: &str) {
    let Some(path) = handle_path() else {
        warn!("handle_store: no state directory available — handle not persisted");
        return;
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(
                "handle_store: cannot create {}: {} — handle not persisted",
                parent.display(),
                e
            );
            return;
        }
    }
    let handle = StoredHandle {
        ws_endpoint: ws_endpoint.to_string(),
        saved_at: Utc::now().to_rfc3339(),
    };
    match serde_json::to_string_pretty(&handle)
        .map_err(anyhow::Error::from)
        .and_then(|json| std::fs::write(&path, json).map_err(anyhow::Error::from))
    {
        Ok(()) => info!("handle_store: persisted browser handle to {}", path.display()),
        Err(e) => warn!("handle_store: failed to persist handle: {}", e),
    }
}

/// Delete the persisted handle. Called when a probe fails so a dead
/// endpoint is never offered to the next request.
pub fn invalidate() {
    let Some(path) = handle_path() else {
        return;
    };
    if path.exists() {
        match std::fs::remove_file(&path) {
            Ok(()) => info!("handle_store: removed stale handle {}", path.display()),
            Err(e) => warn!(
                "handle_store: failed to remove stale handle {}: {}",
                path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The store reads its directory from the environment at every call, so
    // one sequential test exercises the full lifecycle without races on the
    // process-global env var.
    #[test]
    fn handle_lifecycle_roundtrip() {
        let dir = std::env::temp_dir().join(format!("certsnap-test-{}", std::process::id()));
        std::env::set_var(config::ENV_STATE_DIR, &dir);

        // Nothing stored yet.
        invalidate();
        assert!(load().is_none());

        save("ws://127.0.0.1:9222/devtools/browser/abc");
        let handle = load().expect("handle should round-trip");
        assert_eq!(handle.ws_endpoint, "ws://127.0.0.1:9222/devtools/browser/abc");
        assert!(!handle.saved_at.is_empty());

        // Corrupt file behaves as absent.
        std::fs::write(dir.join(super::HANDLE_FILE), "{not json").unwrap();
        assert!(load().is_none());

        save("ws://127.0.0.1:9222/devtools/browser/def");
        invalidate();
        assert!(load().is_none());

        let _ = std::fs::remove_dir_all(&dir);
        std::env::remove_var(config::ENV_STATE_DIR);
    }
}
