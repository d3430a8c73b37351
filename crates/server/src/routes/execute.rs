use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use events::ProgressEvent;
use futures::stream::{Stream, StreamExt};
use jobrelay_core::JobRequest;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use super::SSE_KEEP_ALIVE_INTERVAL;
use crate::error::AppError;
use crate::state::AppState;

/// One `data: <json>` record per event.
fn progress_to_sse_event(event: &ProgressEvent) -> Result<Event, Infallible> {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default().data(data))
}

#[utoipa::path(
    post,
    path = "/api/execute",
    request_body = JobRequest,
    responses(
        (status = 200, description = "SSE stream of progress events"),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 429, description = "Worker is busy or retired", body = crate::error::ErrorResponse)
    ),
    tag = "jobs"
)]
pub async fn execute_job(
    State(state): State<AppState>,
    payload: Result<Json<JobRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    let handle = state.runner.submit(request).await?;
    let job_id = handle.job_id;
    info!(job_id = %job_id, "Streaming job events");

    tokio::spawn(async move {
        match handle.outcome.await {
            Ok(outcome) => info!(
                job_id = %outcome.job_id,
                success = outcome.success,
                duration_ms = outcome.duration_ms,
                "Job finished"
            ),
            Err(e) => error!(job_id = %job_id, error = %e, "Job task aborted"),
        }
    });

    let stream = ReceiverStream::new(handle.events).map(|event| progress_to_sse_event(&event));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}
