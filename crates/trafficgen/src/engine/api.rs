//! HTTP control surface.
//!
//! Thin translation layer: each route parses its input and calls one
//! controller operation. Malformed bodies are rejected by the extractors;
//! out-of-range values are rejected by the controller itself and mapped to
//! 400 responses here. The controller state never changes on a rejected
//! request.

use crate::engine::controller::{RateController, Snapshot};
use crate::engine::error::Error;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared handles the route handlers close over.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RateController>,
    pub workers_online: Arc<AtomicUsize>,
}

/// Body of `GET /api/config`: the controller snapshot plus pool
/// observability.
#[derive(Debug, Serialize)]
struct ConfigResponse {
    #[serde(flatten)]
    snapshot: Snapshot,
    workers_online: usize,
}

#[derive(Debug, Deserialize)]
struct SetRateRequest {
    rate_ms: u64,
}

#[derive(Debug, Deserialize)]
struct BurstRequest {
    rate: u64,
    duration: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/config", get(get_config))
        .route("/api/set-rate", post(set_rate))
        .route("/api/start-burst", post(start_burst))
        .route("/api/stop", post(stop))
        .with_state(state)
}

impl AppState {
    fn config_response(&self) -> ConfigResponse {
        ConfigResponse {
            snapshot: self.controller.snapshot(),
            workers_online: self.workers_online.load(Ordering::Relaxed),
        }
    }
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(state.config_response())
}

async fn set_rate(
    State(state): State<AppState>,
    Json(req): Json<SetRateRequest>,
) -> Result<Json<ConfigResponse>, Error> {
    state.controller.set_rate(req.rate_ms)?;
    Ok(Json(state.config_response()))
}

async fn start_burst(
    State(state): State<AppState>,
    Form(req): Form<BurstRequest>,
) -> Result<StatusCode, Error> {
    state.controller.start_burst(req.rate, req.duration)?;
    Ok(StatusCode::OK)
}

async fn stop(State(state): State<AppState>) -> StatusCode {
    state.controller.stop();
    StatusCode::OK
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
