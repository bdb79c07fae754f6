//! Local bridge served by the background context.
//! The foreground writes liveness and session data through it and listens
//! for signals on `/ws`; the background keeps sole ownership of the store.

pub mod client;
pub mod events;
pub mod websocket;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::liveness::{CredentialStore, LivenessRegistry};
use crate::storage::StorageError;
use crate::types::AppState;
use events::AlertLog;
use websocket::{ws_handler, SignalBroadcaster};

/// Shared bridge state
#[derive(Clone)]
pub struct BridgeState {
    pub registry: LivenessRegistry,
    pub credentials: CredentialStore,
    pub signals: SignalBroadcaster,
    pub alerts: AlertLog,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
}

impl ApiResponse<()> {
    pub fn err(msg: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(msg.into()) }
    }
}

/// UI lifecycle transitions reported by the foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Visible,
    Stopped,
    Destroyed,
}

/// Body of `PUT /liveness`; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LivenessUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_channel_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state: Option<AppState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    limit: Option<usize>,
}

/// Create the bridge router
pub fn create_router(state: BridgeState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/liveness", put(update_liveness))
        .route("/session", put(save_session).delete(clear_session))
        .route("/location", put(update_location))
        .route("/alerts", get(recent_alerts))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn store_failure(e: StorageError) -> Response {
    warn!("Bridge write failed: {}", e);
    (StatusCode::SERVICE_UNAVAILABLE, Json(ApiResponse::<()>::err(e.to_string()))).into_response()
}

async fn health_check(State(state): State<BridgeState>) -> impl IntoResponse {
    #[derive(Serialize)]
    struct Health {
        status: &'static str,
        listeners: usize,
    }

    Json(ApiResponse::ok(Health { status: "monitoring", listeners: state.signals.subscriber_count() }))
}

async fn update_liveness(
    State(state): State<BridgeState>,
    Json(update): Json<LivenessUpdate>,
) -> Response {
    let registry = &state.registry;
    let result = apply_liveness(registry, &update);
    match result {
        Ok(()) => Json(ApiResponse::ok(registry.snapshot())).into_response(),
        Err(e) => store_failure(e),
    }
}

fn apply_liveness(registry: &LivenessRegistry, update: &LivenessUpdate) -> Result<(), StorageError> {
    match update.lifecycle {
        Some(Lifecycle::Visible) => registry.on_ui_visible()?,
        Some(Lifecycle::Stopped) => registry.on_ui_stopped()?,
        Some(Lifecycle::Destroyed) => registry.on_ui_destroyed()?,
        None => {}
    }
    if let Some(active) = update.live_channel_active {
        registry.set_live_channel(active)?;
    }
    if let Some(app_state) = update.app_state {
        registry.set_app_state(app_state)?;
    }
    Ok(())
}

async fn save_session(
    State(state): State<BridgeState>,
    Json(session): Json<SessionUpdate>,
) -> Response {
    if session.token.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::err("Token must not be empty")))
            .into_response();
    }
    let result = state.credentials.save(&session.token).and_then(|_| match &session.base_url {
        Some(url) => state.registry.set_base_url(url),
        None => Ok(()),
    });
    match result {
        Ok(()) => {
            info!("🔑 Session credential updated");
            Json(ApiResponse::ok("Session saved")).into_response()
        }
        Err(e) => store_failure(e),
    }
}

async fn clear_session(State(state): State<BridgeState>) -> Response {
    match state.credentials.invalidate() {
        Ok(()) => Json(ApiResponse::ok("Session cleared")).into_response(),
        Err(e) => store_failure(e),
    }
}

async fn update_location(
    State(state): State<BridgeState>,
    Json(location): Json<LocationUpdate>,
) -> Response {
    if !(location.lat.is_finite() && location.lng.is_finite()) {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::err("Invalid coordinates")))
            .into_response();
    }
    match state.registry.set_location(location.lat, location.lng) {
        Ok(()) => Json(ApiResponse::ok(location)).into_response(),
        Err(e) => store_failure(e),
    }
}

async fn recent_alerts(
    State(state): State<BridgeState>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50);
    Json(ApiResponse::ok(state.alerts.latest(limit).await))
}

/// Serve the bridge on an already-bound listener
pub async fn serve(state: BridgeState, listener: TcpListener) -> anyhow::Result<()> {
    let router = create_router(state);
    info!("🌐 Bridge listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
