//! Control-plane HTTP server
//!
//! Everything lives under /api/poisson — a prefix distinct from the host
//! platform's own API path so dashboard service workers never intercept
//! it. One public health probe; every other endpoint requires the minted
//! API key (extension endpoints also accept the host bearer token).

use crate::auth::GatewayAuth;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use poisson_core::{EngineKind, FingerprintBundle, Intensity};
use poisson_engine::SchedulerHandle;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub struct AppState {
    pub auth: GatewayAuth,
    pub scheduler: SchedulerHandle,
}

pub struct GatewayConfig {
    pub port: u16,
    pub bind_loopback: bool,
    pub ext_bearer: Option<String>,
    pub no_auth: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8099,
            bind_loopback: false,
            ext_bearer: None,
            no_auth: false,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/poisson/health", get(health_handler))
        .route("/api/poisson/status", get(status_handler))
        .route("/api/poisson/stats", get(stats_handler))
        .route("/api/poisson/activity", get(activity_handler))
        .route("/api/poisson/activity/chart", get(chart_handler))
        .route("/api/poisson/engines", get(engines_handler))
        .route("/api/poisson/engines/:name/toggle", post(toggle_handler))
        .route("/api/poisson/intensity", post(intensity_handler))
        .route("/api/poisson/fingerprint", post(fingerprint_handler))
        .route("/api/poisson/presence", post(presence_handler))
        .route("/api/poisson/obsession/clear", post(obsession_clear_handler))
        .route("/api/poisson/ext/register", post(ext_register_handler))
        .route("/api/poisson/ext/heartbeat", post(ext_heartbeat_handler))
        .route("/api/poisson/ext/next-task", get(ext_next_task_handler))
        .route("/api/poisson/ext/fingerprint", post(ext_fingerprint_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

/// Serve until the token is cancelled, then drain in-flight requests.
pub async fn start_gateway(
    config: GatewayConfig,
    scheduler: SchedulerHandle,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let auth = if config.no_auth {
        GatewayAuth::disabled()
    } else {
        GatewayAuth::mint(config.ext_bearer.clone())
    };
    if !config.no_auth {
        info!("control-plane api key: {}", auth.api_key());
    }

    let state = Arc::new(AppState { auth, scheduler });
    let app = router(state);

    let bind_addr: SocketAddr = format!(
        "{}:{}",
        if config.bind_loopback {
            "127.0.0.1"
        } else {
            "0.0.0.0"
        },
        config.port
    )
    .parse()
    .expect("invalid bind address");

    info!("control plane listening on {bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    state
        .auth
        .verify(bearer(headers))
        .map_err(|_| StatusCode::UNAUTHORIZED)
}

fn authorize_ext(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    state
        .auth
        .verify_ext(bearer(headers))
        .map_err(|_| StatusCode::UNAUTHORIZED)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    let s = &state.scheduler;
    let status = if s.is_stopped() {
        "stopped"
    } else if !s.gate_open() {
        "paused"
    } else {
        "active"
    };
    Ok(Json(serde_json::json!({
        "status": status,
        "uptime_seconds": s.uptime_secs(),
        "current_persona": s.current_persona(),
        "intensity": s.intensity().as_str(),
        "fingerprint_matched": s.personas.fingerprint_matched(),
        "tor_status": s.tor_status(),
        "presence_home": s.presence_home(),
        "obsession": s.obsession(),
    })))
}

async fn stats_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    let s = &state.scheduler;
    let day = s.stats.snapshot();
    Ok(Json(serde_json::json!({
        "sessions_today": day.sessions,
        "requests_today": day.requests,
        "bandwidth_today_mb": day.bytes as f64 / 1_000_000.0,
        "active_sessions": s.sessions.active(),
        "errors_today": day.errors,
        "next_session_in": s.next_session_in_secs(),
    })))
}

#[derive(Deserialize)]
struct ActivityParams {
    count: Option<usize>,
}

async fn activity_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ActivityParams>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    let count = params.count.unwrap_or(50);
    Ok(Json(serde_json::json!({
        "entries": state.scheduler.ring.tail(count),
    })))
}

async fn chart_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    Ok(Json(state.scheduler.ring.chart()))
}

async fn engines_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    Ok(Json(serde_json::json!({
        "engines": state.scheduler.engines.snapshot(),
    })))
}

async fn toggle_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(name): AxumPath<String>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    let kind = EngineKind::parse(&name).ok_or(StatusCode::NOT_FOUND)?;
    let enabled = state.scheduler.engines.toggle(kind);
    Ok(Json(serde_json::json!({
        "engine": kind.as_str(),
        "enabled": enabled,
    })))
}

#[derive(Deserialize)]
struct IntensityBody {
    intensity: String,
}

async fn intensity_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IntensityBody>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    let level = Intensity::parse(&body.intensity).ok_or(StatusCode::BAD_REQUEST)?;
    state.scheduler.set_intensity(level);
    Ok(Json(serde_json::json!({ "intensity": level.as_str() })))
}

async fn fingerprint_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(bundle): Json<FingerprintBundle>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    let matched = state.scheduler.personas.apply_fingerprint(bundle);
    Ok(Json(serde_json::json!({ "fingerprint_matched": matched })))
}

#[derive(Deserialize)]
struct PresenceBody {
    home: bool,
}

async fn presence_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PresenceBody>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    state.scheduler.set_presence(body.home);
    Ok(Json(serde_json::json!({
        "presence_home": body.home,
        "gate_open": state.scheduler.gate_open(),
    })))
}

async fn obsession_clear_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    state.scheduler.topics.clear_obsession();
    Ok(Json(serde_json::json!({ "obsession": null })))
}

#[derive(Deserialize)]
struct ExtRegisterBody {
    id: Option<String>,
}

async fn ext_register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ExtRegisterBody>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize_ext(&state, &headers)?;
    let id = body
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let client = state.scheduler.ext.register(id);
    Ok(Json(serde_json::json!({ "client": client })))
}

#[derive(Deserialize)]
struct ExtHeartbeatBody {
    #[serde(default)]
    requests: u64,
    #[serde(default)]
    bytes: u64,
}

async fn ext_heartbeat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ExtHeartbeatBody>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize_ext(&state, &headers)?;
    state.scheduler.ext.heartbeat(body.requests, body.bytes);
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn ext_next_task_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize_ext(&state, &headers)?;
    Ok(Json(serde_json::json!({
        "task": state.scheduler.ext.next_task(),
    })))
}

async fn ext_fingerprint_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(bundle): Json<FingerprintBundle>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize_ext(&state, &headers)?;
    let matched = state.scheduler.personas.apply_fingerprint(bundle);
    Ok(Json(serde_json::json!({ "fingerprint_matched": matched })))
}
