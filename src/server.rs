//! HTTP surface: `/health` and `/tts`.
//!
//! Every response, errors and preflights included, carries the CORS headers
//! for the configured origin.

use crate::backends::{SpeechBackend, SynthesisError};
use crate::config_loader::BridgeConfig;
use crate::wav;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Semaphore;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, error, info, warn};

pub const ALLOW_METHODS: &str = "GET,POST,OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type";

/// Shared, read-only request state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    pub backend: Arc<dyn SpeechBackend>,
    synth_permits: Option<Arc<Semaphore>>,
}

impl AppState {
    pub fn new(config: BridgeConfig, backend: Arc<dyn SpeechBackend>) -> Self {
        let synth_permits = match config.max_concurrent_synth {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        Self {
            config: Arc::new(config),
            backend,
            synth_permits,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Whether the voice model file exists.
    pub ok: bool,
    pub model: String,
    pub rate: u32,
    pub bin: String,
}

/// Request failures and the status each maps to.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing text")]
    MissingText,

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("synthesis worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Failure details stay in the server log.
        let (status, message) = match &self {
            ApiError::MissingText => (StatusCode::BAD_REQUEST, "missing text"),
            ApiError::Synthesis(SynthesisError::TimedOut(after)) => {
                warn!(timeout = ?after, "Synthesis timed out, process killed");
                (StatusCode::GATEWAY_TIMEOUT, "synthesis timed out")
            }
            ApiError::Synthesis(SynthesisError::Failed { code, stderr }) => {
                error!(code = ?code, stderr = %stderr, "Synthesizer exited with failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "synthesis failed")
            }
            ApiError::Synthesis(e) => {
                error!(error = %e, "Synthesis failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "synthesis failed")
            }
            ApiError::Worker(e) => {
                error!(error = %e, "Synthesis worker did not complete");
                (StatusCode::INTERNAL_SERVER_ERROR, "synthesis failed")
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Build the router with CORS headers on every response.
pub fn router(state: AppState) -> Router {
    let origin = HeaderValue::from_str(&state.config.allow_origin).unwrap_or_else(|_| {
        warn!(origin = %state.config.allow_origin, "Allowed origin is not a valid header value");
        HeaderValue::from_static("null")
    });

    Router::new()
        .route("/health", get(health))
        .route("/tts", get(tts_get).post(tts_post).options(tts_preflight))
        .fallback(not_found)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            origin,
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = &state.config;
    Json(HealthResponse {
        ok: config.model_exists(),
        model: config.model_path.to_string_lossy().into_owned(),
        rate: config.sample_rate,
        bin: config.piper_bin.clone(),
    })
}

async fn tts_preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn tts_get(
    State(state): State<AppState>,
    query: Option<Query<Vec<(String, String)>>>,
) -> Result<Response, ApiError> {
    let text = query.and_then(|Query(pairs)| first_text(pairs));
    synthesize_speech(&state, "GET", text).await
}

/// The first `text` pair wins when the parameter is repeated.
fn first_text(pairs: Vec<(String, String)>) -> Option<String> {
    pairs
        .into_iter()
        .find(|(key, _)| key == "text")
        .map(|(_, value)| value)
}

/// The body is parsed as JSON whatever its content type; anything unusable
/// counts as missing text.
async fn tts_post(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    synthesize_speech(&state, "POST", text_from_json(&body)).await
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn text_from_json(body: &[u8]) -> Option<String> {
    let json: Value = serde_json::from_slice(body).ok()?;
    json.get("text")?.as_str().map(str::to_owned)
}

/// Trims the text; `None` when nothing is left.
pub fn validate_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

async fn synthesize_speech(
    state: &AppState,
    method: &'static str,
    text: Option<String>,
) -> Result<Response, ApiError> {
    let Some(text) = validate_text(text.as_deref()) else {
        debug!(method, "Rejecting request without text");
        return Err(ApiError::MissingText);
    };

    let pcm = run_backend(state, method, text).await?;
    let wav = wav::frame(&pcm, state.config.sample_rate);

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        wav,
    )
        .into_response())
}

/// Runs the blocking backend off the async workers.
async fn run_backend(state: &AppState, method: &'static str, text: String) -> Result<Vec<u8>, ApiError> {
    // The semaphore is never closed, so acquiring only waits.
    let _permit = match &state.synth_permits {
        Some(permits) => permits.acquire().await.ok(),
        None => None,
    };

    let chars = text.chars().count();
    let backend = Arc::clone(&state.backend);
    let started = Instant::now();

    let pcm = tokio::task::spawn_blocking(move || backend.synthesize(&text)).await??;

    info!(
        method,
        chars,
        backend = state.backend.id(),
        pcm_bytes = pcm.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Synthesis complete"
    );
    Ok(pcm)
}

/// Serve `state` on an already bound listener until `shutdown` resolves.
pub async fn serve_on(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Wait for shutdown signal (SIGINT or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
