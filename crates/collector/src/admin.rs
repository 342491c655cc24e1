//! Admin HTTP surface for a running collector.
//!
//! `GET /health` reports liveness; `PUT /verbosity` forwards a level change
//! to the supervisor, which applies it between ticks.

use archivist_core::Verbosity;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::supervisor::SupervisorCommand;

#[derive(Clone)]
pub struct AdminState {
    pub commands: mpsc::Sender<SupervisorCommand>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct VerbosityRequest {
    pub level: u8,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/verbosity", put(set_verbosity))
        .with_state(state)
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn set_verbosity(
    State(state): State<AdminState>,
    Json(req): Json<VerbosityRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let level = Verbosity::try_from(req.level)
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))))?;

    state
        .commands
        .send(SupervisorCommand::SetVerbosity(level))
        .await
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "supervisor is not running" })),
            )
        })?;

    tracing::info!(level = %level, "Verbosity change requested");
    Ok(Json(json!({ "level": u8::from(level) })))
}
