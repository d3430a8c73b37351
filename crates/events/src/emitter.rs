//! Ordered, append-only delivery of a job's progress events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::types::ProgressEvent;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("Event stream for job {0} is closed")]
    Closed(Uuid),
}

#[derive(Debug, Error)]
#[error("Event sink failed: {0}")]
pub struct SinkError(pub String);

/// Durable consumer of every event a job emits (e.g. the session recorder).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &ProgressEvent) -> Result<(), SinkError>;
}

struct EmitterState {
    next_sequence: u64,
    closed: bool,
    caller: Option<mpsc::Sender<ProgressEvent>>,
}

/// Single writer for one job's event stream.
///
/// Every emission goes through one lock: sequence numbers are gap-free and
/// each consumer sees events in exactly the order they were emitted. The
/// emitter closes itself after the terminal `job_completed` event.
pub struct EventEmitter {
    job_id: Uuid,
    state: Mutex<EmitterState>,
    sinks: Vec<Arc<dyn EventSink>>,
    bus: EventBus,
    disconnect: CancellationToken,
}

impl EventEmitter {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            state: Mutex::new(EmitterState {
                next_sequence: 0,
                closed: false,
                caller: None,
            }),
            sinks: Vec::new(),
            bus: EventBus::new(),
            disconnect: CancellationToken::new(),
        }
    }

    /// Primary caller stream. When its receiver is dropped `disconnect` is cancelled.
    pub fn with_caller(mut self, caller: mpsc::Sender<ProgressEvent>) -> Self {
        self.state.get_mut().caller = Some(caller);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Token cancelled when the primary caller goes away.
    pub fn with_disconnect_token(mut self, token: CancellationToken) -> Self {
        self.disconnect = token;
        self
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Stamps and delivers `event`. Returns the assigned sequence number.
    pub async fn emit(&self, mut event: ProgressEvent) -> Result<u64, EmitError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(EmitError::Closed(self.job_id));
        }

        event.sequence = state.next_sequence;
        event.job_id = self.job_id;
        event.timestamp = Utc::now();
        state.next_sequence += 1;
        if event.is_terminal() {
            state.closed = true;
        }

        debug!(
            job_id = %self.job_id,
            sequence = event.sequence,
            event_type = event.event_type.as_str(),
            stage = ?event.stage,
            "Emitting event"
        );

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&event).await {
                warn!(job_id = %self.job_id, error = %e, "Event sink rejected event");
            }
        }

        if let Some(caller) = &state.caller {
            if caller.send(event.clone()).await.is_err() {
                warn!(job_id = %self.job_id, "Caller stream closed, cancelling job");
                state.caller = None;
                self.disconnect.cancel();
            }
        }

        self.bus.publish(event.clone());

        let sequence = event.sequence;
        if state.closed {
            // Dropping the sender ends the caller stream.
            state.caller = None;
        }
        Ok(sequence)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("job_id", &self.job_id)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
