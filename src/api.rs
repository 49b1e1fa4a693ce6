use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::life::{LifeManager, inject};
use crate::scheduler::DailyTimer;

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub life: Arc<LifeManager>,
    pub timer: Arc<DailyTimer>,
    pub name: String,
    pub api_key: Option<String>,
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub text: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_user")]
    pub user: String,
}

fn default_source() -> String {
    "cli:default".into()
}

fn default_user() -> String {
    "local".into()
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub text: String,
}

#[derive(Serialize)]
pub struct LifeResponse {
    pub date: String,
    pub outfit: String,
    pub schedule: String,
    pub day_progress: String,
}

#[derive(Deserialize)]
pub struct RegenerateRequest {
    #[serde(default)]
    pub supplement: Option<String>,
}

#[derive(Deserialize)]
pub struct TimeRequest {
    pub time: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/message", post(handle_message))
        .route("/health", get(handle_health))
        .route("/life", get(handle_life_show))
        .route("/life/regenerate", post(handle_life_regenerate))
        .route("/life/time", post(handle_life_time))
        .with_state(state)
}

fn authorized(headers: &HeaderMap, api_key: &Option<String>) -> bool {
    match api_key {
        None => true,
        Some(key) => headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == key),
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "unauthorized"})),
    )
        .into_response()
}

async fn handle_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MessageRequest>,
) -> Response {
    if !authorized(&headers, &state.api_key) {
        return unauthorized();
    }
    match state
        .agent
        .handle_message(&req.text, &req.source, &req.user)
        .await
    {
        Ok(text) => (StatusCode::OK, Json(MessageResponse { text })).into_response(),
        Err(e) => {
            tracing::error!("Agent error: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageResponse {
                    text: format!("Error: {e}"),
                }),
            )
                .into_response()
        }
    }
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "name": state.name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_life_show(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&headers, &state.api_key) {
        return unauthorized();
    }
    match state.life.ensure_fresh().await {
        Ok(s) => (StatusCode::OK, Json(life_response(&s))).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn handle_life_regenerate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegenerateRequest>,
) -> Response {
    if !authorized(&headers, &state.api_key) {
        return unauthorized();
    }
    match state.life.regenerate(req.supplement.as_deref()).await {
        Ok(s) => (StatusCode::OK, Json(life_response(&s))).into_response(),
        Err(e) => {
            tracing::error!("Manual regeneration failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn handle_life_time(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TimeRequest>,
) -> Response {
    if !authorized(&headers, &state.api_key) {
        return unauthorized();
    }
    match state.life.set_schedule_time(&req.time).await {
        Ok((hour, minute)) => {
            if let Err(e) = state.timer.reschedule(hour, minute).await {
                tracing::error!("Failed to reschedule daily timer: {e}");
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "schedule_time": format!("{hour:02}:{minute:02}"),
                })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

fn life_response(state: &crate::life::store::DailyState) -> LifeResponse {
    LifeResponse {
        date: state.date.to_string(),
        outfit: state.outfit.clone(),
        schedule: state.schedule.clone(),
        day_progress: inject::time_band(Local::now().time()).to_string(),
    }
}
