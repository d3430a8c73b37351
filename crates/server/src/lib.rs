pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod worker;

use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "jobrelay API",
        version = "0.1.0",
        description = "Single-job execution worker: runs one instruction against a coding provider and streams its progress"
    ),
    paths(
        routes::health_check,
        routes::readiness,
        routes::execute_job,
        routes::get_session,
        routes::replay_session_events,
    ),
    components(schemas(
        routes::HealthResponse,
        routes::ReadyResponse,
        error::ErrorResponse,
        jobrelay_core::JobRequest,
        jobrelay_core::RepositoryBinding,
        jobrelay_core::Provider,
        jobrelay_core::ProviderOptions,
        jobrelay_core::PermissionMode,
        events::ProgressEvent,
        events::EventType,
        events::Stage,
        events::ErrorCode,
        db::SessionRecord,
    )),
    tags(
        (name = "health", description = "Liveness and readiness probes"),
        (name = "jobs", description = "Job execution (SSE)"),
        (name = "sessions", description = "Stored sessions and event replay"),
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/ready", get(routes::readiness))
        .route("/api/openapi.json", get(openapi_json))
        .route("/api/execute", post(routes::execute_job))
        .route("/api/sessions/{id}", get(routes::get_session))
        .route(
            "/api/sessions/{id}/events",
            get(routes::replay_session_events),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
