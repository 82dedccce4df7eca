use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::response::ApiResponse;
use crate::service::{ActiveSessions, RelayService, StopOutcome};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RelayService>,
}

/// Body of every `/stream/*` request.
#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
struct PathData {
    path: String,
}

#[derive(Debug, Serialize)]
struct HealthData {
    #[serde(flatten)]
    sessions: ActiveSessions,
    shutting_down: bool,
}

pub fn build_router(service: Arc<RelayService>) -> Router {
    Router::new()
        .route("/stream/play", post(play))
        .route("/stream/save", post(save))
        .route("/stream/stop", post(stop))
        .route("/healthz", get(healthz))
        .with_state(AppState { service })
}

/// Pull a non-empty `url` out of the request body.
fn source_url(body: Result<Json<StreamRequest>, JsonRejection>) -> Result<String, Response> {
    let Json(request) = body.map_err(|rejection| {
        warn!(error = %rejection, "Rejected stream request body");
        ApiResponse::error(StatusCode::BAD_REQUEST, rejection.body_text()).into_response()
    })?;

    let url = request.url.trim();
    if url.is_empty() {
        return Err(ApiResponse::error(StatusCode::BAD_REQUEST, "url is required").into_response());
    }
    Ok(url.to_string())
}

/// `POST /stream/play` - start or keep alive a live preview.
async fn play(
    State(state): State<AppState>,
    body: Result<Json<StreamRequest>, JsonRejection>,
) -> Response {
    let url = match source_url(body) {
        Ok(url) => url,
        Err(resp) => return resp,
    };
    match state.service.play(&url).await {
        Ok(path) => ApiResponse::ok(PathData { path }, "ok").into_response(),
        Err(e) => {
            warn!(url = %url, error = %e, "Play request failed");
            ApiResponse::from(e).into_response()
        }
    }
}

/// `POST /stream/save` - start or keep alive a recording.
async fn save(
    State(state): State<AppState>,
    body: Result<Json<StreamRequest>, JsonRejection>,
) -> Response {
    let url = match source_url(body) {
        Ok(url) => url,
        Err(resp) => return resp,
    };
    match state.service.record(&url).await {
        Ok(path) => ApiResponse::ok(PathData { path }, "ok").into_response(),
        Err(e) => {
            warn!(url = %url, error = %e, "Record request failed");
            ApiResponse::from(e).into_response()
        }
    }
}

/// `POST /stream/stop` - ask a recording to stop.
async fn stop(
    State(state): State<AppState>,
    body: Result<Json<StreamRequest>, JsonRejection>,
) -> Response {
    let url = match source_url(body) {
        Ok(url) => url,
        Err(resp) => return resp,
    };
    match state.service.stop_recording(&url).await {
        Ok(outcome) => {
            let (status, msg) = match outcome {
                StopOutcome::Ack => (StatusCode::OK, "stop signal delivered"),
                StopOutcome::Dropped => (
                    StatusCode::ACCEPTED,
                    "stop signal dropped, recording ends on idle timeout",
                ),
                StopOutcome::NotFound => (StatusCode::NOT_FOUND, "no active recording"),
            };
            ApiResponse::with_status(status, Some(outcome), msg).into_response()
        }
        Err(e) => ApiResponse::from(e).into_response(),
    }
}

/// `GET /healthz`
async fn healthz(State(state): State<AppState>) -> Response {
    let data = HealthData {
        sessions: state.service.active_sessions().await,
        shutting_down: state.service.is_shutting_down(),
    };
    ApiResponse::ok(data, "ok").into_response()
}
