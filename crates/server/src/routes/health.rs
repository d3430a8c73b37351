use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use orchestrator::RunnerState;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize, ToSchema)]
pub struct ReadyResponse {
    /// `idle`, `busy` or `retired`
    state: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Worker is idle", body = ReadyResponse),
        (status = 429, description = "Worker is busy or retired", body = ReadyResponse)
    ),
    tag = "health"
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let runner_state = state.runner.state();
    let status = match runner_state {
        RunnerState::Idle => StatusCode::OK,
        RunnerState::Busy | RunnerState::Retired => StatusCode::TOO_MANY_REQUESTS,
    };
    (
        status,
        Json(ReadyResponse {
            state: runner_state.as_str().to_string(),
        }),
    )
}
