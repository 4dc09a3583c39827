use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::env;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use certsnap::browser::manager::native_browser_available;
use certsnap::types::{
    ErrorResponse, FetchCaptchaRequest, FetchCaptchaResponse, RecordTarget, VerifyRequest,
    VerifyResponse,
};
use certsnap::{AppState, VerifyError};

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

fn port_from_env() -> Option<u16> {
    for k in ["CERTSNAP_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting certsnap");

    if !native_browser_available() {
        tracing::warn!(
            "No Chromium-family browser found. Install Brave, Chrome, or Chromium \
             (or set CHROME_EXECUTABLE); verification requests will fail until then."
        );
    }

    // Create HTTP client for the order-management collaborator.
    let http_timeout = env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(30);
    let connect_timeout = env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(10);
    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(http_timeout))
        .connect_timeout(std::time::Duration::from_secs(connect_timeout))
        .build()?;

    let state = Arc::new(AppState::new(http_client));

    // Build router
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/api/captcha", post(fetch_captcha_handler))
        .route("/api/verify", post(verify_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Start server
    let port: u16 = parse_port_from_args()
        .or_else(port_from_env)
        .or(state.config.port)
        .unwrap_or(5100);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT/CERTSNAP_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("certsnap listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
            _ = async {
                if let Some(ref mut s) = sigint {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    if let Some(browser) = state.browser.as_ref() {
        browser.shutdown().await;
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "certsnap",
        "version": env!("CARGO_PKG_VERSION"),
        "browser_available": native_browser_available(),
    }))
}

/// Wire-level message for an error. Internal details never leave the
/// process — the full error is logged instead.
fn public_message(e: &VerifyError) -> String {
    match e {
        VerifyError::Internal(_) => "Internal server error".to_string(),
        other => other.to_string(),
    }
}

fn error_status(e: &VerifyError) -> StatusCode {
    match e {
        VerifyError::CaptchaUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        VerifyError::SessionExpired => StatusCode::GONE,
        VerifyError::WrongCaptcha => StatusCode::UNPROCESSABLE_ENTITY,
        VerifyError::NoRecordFound => StatusCode::NOT_FOUND,
        VerifyError::ClassificationTimeout | VerifyError::DataLoadTimeout => {
            StatusCode::GATEWAY_TIMEOUT
        }
        VerifyError::FormFieldsMissing => StatusCode::BAD_GATEWAY,
        VerifyError::RenderFailure | VerifyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn bad_request(msg: String) -> HandlerError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: msg }))
}

fn require_verifier(state: &AppState) -> Result<&Arc<certsnap::Verifier>, HandlerError> {
    state.verifier.as_ref().ok_or_else(|| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "No Chromium-family browser is available on this host".to_string(),
            }),
        )
    })
}

async fn fetch_captcha_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FetchCaptchaRequest>,
) -> Result<Json<FetchCaptchaResponse>, HandlerError> {
    let target =
        RecordTarget::parse(&request.record_number, &request.date_of_birth).map_err(bad_request)?;
    let verifier = require_verifier(&state)?;

    match verifier.fetch_captcha(&target).await {
        Ok(image) => Ok(Json(FetchCaptchaResponse {
            success: true,
            captcha_image: image,
        })),
        Err(e) => {
            error!("captcha fetch error: {}", e);
            Err((
                error_status(&e),
                Json(ErrorResponse {
                    error: public_message(&e),
                }),
            ))
        }
    }
}

async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, HandlerError> {
    let target =
        RecordTarget::parse(&request.record_number, &request.date_of_birth).map_err(bad_request)?;
    if request.captcha_answer.trim().is_empty() {
        return Err(bad_request("captchaAnswer is required".to_string()));
    }
    let verifier = require_verifier(&state)?;

    match verifier
        .verify(
            &target,
            &request.captcha_answer,
            request.order_id.as_deref(),
        )
        .await
    {
        Ok(attempt) => {
            let pdf = attempt.into_artifact().ok_or_else(|| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: "Internal server error".to_string(),
                    }),
                )
            })?;
            Ok(Json(VerifyResponse {
                success: true,
                pdf_base64: BASE64.encode(&pdf),
            }))
        }
        Err(e) => {
            error!("verification error: {}", e);
            Err((
                error_status(&e),
                Json(ErrorResponse {
                    error: public_message(&e),
                }),
            ))
        }
    }
}
