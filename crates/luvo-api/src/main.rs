//! Luvo API - HTTP control server for a Luke Roberts lamp

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use luvo_core::{Direction, Hsb, LampError, LampSession, Rgb, Uplight};
use luvo_protocol::ProtocolError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod ble;
mod config;

use ble::BleLamp;
use config::ServerConfig;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<LampSession<BleLamp>>,
}

/// API response wrapper using serde_json::Value for flexibility
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// HTTP status for a failed lamp operation
fn error_status(err: &LampError) -> StatusCode {
    match err {
        LampError::Caller(_) => StatusCode::BAD_REQUEST,
        LampError::Protocol(ProtocolError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        LampError::Protocol(_) => StatusCode::BAD_GATEWAY,
        LampError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn respond<T: Serialize>(result: Result<T, LampError>) -> (StatusCode, Json<ApiResponse>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            tracing::warn!("Lamp request failed: {}", e);
            (error_status(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// Scene step direction
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StepDirection {
    Brighter,
    Dimmer,
}

impl From<StepDirection> for Direction {
    fn from(direction: StepDirection) -> Self {
        match direction {
            StepDirection::Brighter => Direction::Brighter,
            StepDirection::Dimmer => Direction::Dimmer,
        }
    }
}

/// Scene step request
#[derive(Deserialize)]
struct StepRequest {
    direction: StepDirection,
    /// Let the lamp pick the scene instead of stepping through the cache
    #[serde(default)]
    on_device: bool,
}

/// Select scene by name request
#[derive(Deserialize)]
struct SelectByNameRequest {
    name: String,
}

/// Absolute brightness request
#[derive(Deserialize)]
struct BrightnessRequest {
    percent: u8,
}

/// Relative brightness request
#[derive(Deserialize)]
struct RelativeBrightnessRequest {
    delta: i16,
}

/// Uplight color, either RGB or HSB
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UplightParam {
    Rgb { r: u8, g: u8, b: u8 },
    Hsb { h: f32, s: f32, b: f32 },
}

impl From<UplightParam> for Uplight {
    fn from(param: UplightParam) -> Self {
        match param {
            UplightParam::Rgb { r, g, b } => Uplight::Rgb(Rgb::new(r, g, b)),
            UplightParam::Hsb { h, s, b } => Uplight::Hsb(Hsb::new(h, s, b)),
        }
    }
}

/// Immediate light request
#[derive(Deserialize)]
struct ImmediateLightRequest {
    uplight: UplightParam,
    downlight_temp_k: u16,
    downlight_brightness: u8,
}

/// Ping result
#[derive(Serialize)]
struct PingInfo {
    api_version: String,
    round_trip_ms: u128,
}

/// Get lamp status
async fn lamp_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.session.status().await;
    let is_on = state.session.is_on().await;
    Json(ApiResponse::success(serde_json::json!({
        "status": status,
        "is_on": is_on,
    })))
}

/// Ping the lamp
async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    respond(
        state
            .session
            .ping()
            .await
            .map(|((major, minor), round_trip)| PingInfo {
                api_version: format!("{major}.{minor}"),
                round_trip_ms: round_trip.as_millis(),
            }),
    )
}

/// Turn the lamp on
async fn lamp_on(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.session.turn_on().await.map(|()| serde_json::json!({ "action": "on" })))
}

/// Turn the lamp off
async fn lamp_off(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.session.turn_off().await.map(|()| serde_json::json!({ "action": "off" })))
}

/// List cached scenes
async fn list_scenes(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.session.cached_scenes().await))
}

/// Re-read the full scene list from the lamp
async fn refresh_scenes(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.session.refresh_scenes().await)
}

/// Query a single scene
async fn get_scene(State(state): State<AppState>, Path(id): Path<u8>) -> impl IntoResponse {
    respond(state.session.query_scene(id).await)
}

/// Select a scene by id
async fn select_scene(State(state): State<AppState>, Path(id): Path<u8>) -> impl IntoResponse {
    respond(
        state
            .session
            .select_scene(id)
            .await
            .map(|()| serde_json::json!({ "scene_id": id })),
    )
}

/// Select a cached scene by name
async fn select_scene_by_name(
    State(state): State<AppState>,
    Json(req): Json<SelectByNameRequest>,
) -> impl IntoResponse {
    respond(
        state
            .session
            .select_scene_by_name(&req.name)
            .await
            .map(|id| serde_json::json!({ "scene_id": id })),
    )
}

/// Step to the next brighter or dimmer scene
async fn step_scene(
    State(state): State<AppState>,
    Json(req): Json<StepRequest>,
) -> impl IntoResponse {
    let direction = Direction::from(req.direction);
    if req.on_device {
        respond(
            state
                .session
                .device_next_scene(direction)
                .await
                .map(|id| serde_json::json!({ "scene_id": id })),
        )
    } else {
        respond(state.session.step_scene(direction).await)
    }
}

/// Set absolute brightness
async fn set_brightness(
    State(state): State<AppState>,
    Json(req): Json<BrightnessRequest>,
) -> impl IntoResponse {
    respond(
        state
            .session
            .set_brightness(req.percent)
            .await
            .map(|()| serde_json::json!({ "percent": req.percent })),
    )
}

/// Adjust brightness relative to the current level
async fn adjust_brightness(
    State(state): State<AppState>,
    Json(req): Json<RelativeBrightnessRequest>,
) -> impl IntoResponse {
    respond(
        state
            .session
            .adjust_brightness(req.delta)
            .await
            .map(|()| serde_json::json!({ "delta": req.delta })),
    )
}

/// Set light color immediately
async fn immediate_light(
    State(state): State<AppState>,
    Json(req): Json<ImmediateLightRequest>,
) -> impl IntoResponse {
    let rgb = Uplight::from(req.uplight).to_rgb();
    respond(
        state
            .session
            .set_light(rgb, req.downlight_temp_k, req.downlight_brightness)
            .await
            .map(|()| serde_json::json!({ "uplight": { "r": rgb.r, "g": rgb.g, "b": rgb.b } })),
    )
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/lamp/status", get(lamp_status))
        .route("/api/v1/lamp/ping", post(ping))
        .route("/api/v1/lamp/on", post(lamp_on))
        .route("/api/v1/lamp/off", post(lamp_off))
        .route("/api/v1/scenes", get(list_scenes))
        .route("/api/v1/scenes/refresh", post(refresh_scenes))
        .route("/api/v1/scenes/step", post(step_scene))
        .route("/api/v1/scenes/select", post(select_scene_by_name))
        .route("/api/v1/scenes/:id", get(get_scene))
        .route("/api/v1/scenes/:id/select", post(select_scene))
        .route("/api/v1/light/brightness", post(set_brightness))
        .route("/api/v1/light/brightness/relative", post(adjust_brightness))
        .route("/api/v1/light/immediate", post(immediate_light))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "luvo_api=debug,luvo_core=debug,luvo_protocol=debug,info".into()
            }),
        )
        .init();

    tracing::info!("Starting Luvo API server");

    let config = ServerConfig::from_env()?;
    let session = Arc::new(LampSession::new(config.session));

    // Connect in the background; requests fail with 503 until the lamp is up
    tokio::spawn(ble::supervise(session.clone(), config.clone()));

    let app = router(AppState { session });

    tracing::info!("Listening on http://{}", config.listen);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
