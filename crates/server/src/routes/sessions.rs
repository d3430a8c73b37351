use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use db::{DbError, SessionRecord, SessionStore};
use events::ProgressEvent;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use utoipa::IntoParams;
use uuid::Uuid;

use super::SSE_KEEP_ALIVE_INTERVAL;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReplayQuery {
    /// Replay events with a sequence greater than this one.
    pub after: Option<u64>,
}

/// Resume cursor: `Last-Event-ID` wins over `?after=`.
fn replay_cursor(headers: &HeaderMap, query: &ReplayQuery) -> Option<u64> {
    headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
        .or(query.after)
}

fn replay_to_sse_event(event: &ProgressEvent) -> Result<Event, Infallible> {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default()
        .id(event.sequence.to_string())
        .data(data))
}

/// Live events of a running job that come after `cursor`.
struct LiveTail {
    rx: broadcast::Receiver<ProgressEvent>,
    store: Arc<dyn SessionStore>,
    session_id: Uuid,
    cursor: Option<u64>,
    backlog: VecDeque<ProgressEvent>,
    done: bool,
}

/// Follows the job's bus until its terminal event.
///
/// Sinks see every event before the bus does, so when the receiver lags the
/// skipped events are already in the store and are refilled from there.
fn live_tail(tail: LiveTail) -> impl Stream<Item = ProgressEvent> {
    stream::unfold(tail, |mut tail| async move {
        loop {
            if tail.done {
                return None;
            }
            if let Some(event) = tail.backlog.pop_front() {
                if tail.cursor.is_some_and(|c| event.sequence <= c) {
                    continue;
                }
                tail.cursor = Some(event.sequence);
                tail.done = event.is_terminal();
                return Some((event, tail));
            }
            match tail.rx.recv().await {
                Ok(event) => tail.backlog.push_back(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        session_id = %tail.session_id,
                        skipped,
                        "Replay fell behind the live feed, refilling from the store"
                    );
                    match tail.store.events_after(tail.session_id, tail.cursor).await {
                        Ok(missed) => tail.backlog.extend(missed),
                        Err(e) => {
                            warn!(session_id = %tail.session_id, error = %e, "Replay refill failed");
                            return None;
                        }
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}",
    params(
        ("id" = Uuid, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session record with its event log", body = SessionRecord),
        (status = 404, description = "Session not found", body = crate::error::ErrorResponse),
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionRecord>, AppError> {
    state
        .store
        .find(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Session not found: {}", id)))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/events",
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ReplayQuery,
    ),
    responses(
        (status = 200, description = "SSE replay of stored events, followed by live events while the job runs"),
        (status = 404, description = "Session not found", body = crate::error::ErrorResponse),
    ),
    tag = "sessions"
)]
pub async fn replay_session_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ReplayQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let after = replay_cursor(&headers, &query);

    // Subscribe before reading history so nothing falls between the two.
    let live = state
        .runner
        .current_job()
        .filter(|job| job.job_id == id)
        .map(|job| job.bus.subscribe());

    let history = match state.store.events_after(id, after).await {
        Ok(history) => history,
        // The record is created on the job's first event.
        Err(DbError::SessionNotFound(_)) if live.is_some() => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let finished = history.last().is_some_and(ProgressEvent::is_terminal);
    let cursor = history.last().map(|e| e.sequence).or(after);

    let live_stream = match live {
        Some(rx) if !finished => live_tail(LiveTail {
            rx,
            store: state.store.clone(),
            session_id: id,
            cursor,
            backlog: VecDeque::new(),
            done: false,
        })
        .boxed(),
        _ => stream::empty::<ProgressEvent>().boxed(),
    };

    let stream = stream::iter(history)
        .chain(live_stream)
        .map(|event| replay_to_sse_event(&event));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}
