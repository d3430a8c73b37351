//! Job Runner: accepts one job at a time and drives it through the pipeline.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use db::{NewSession, SessionStore};
use events::{EventBus, EventEmitter, ProgressEvent};
use jobrelay_core::{Job, JobRequest};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::pipeline::{Pipeline, TerminalOutcome};
use crate::recorder::RecordingSink;

pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_millis(500);
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// What the runner does after a job reaches its terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerMode {
    /// Go back to idle and accept the next job.
    LongLived,
    /// Retire and fire the shutdown token after `grace`.
    Ephemeral { grace: Duration },
}

impl RunnerMode {
    pub fn ephemeral() -> Self {
        Self::Ephemeral {
            grace: DEFAULT_EXIT_GRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RunnerState {
    Idle = 0,
    Busy = 1,
    Retired = 2,
}

impl RunnerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Busy,
            _ => Self::Retired,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Retired => "retired",
        }
    }
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The job currently owned by the runner.
#[derive(Clone)]
pub struct ActiveJob {
    pub job_id: Uuid,
    /// Live feed of the job's events for secondary observers.
    pub bus: EventBus,
}

#[derive(Clone)]
pub struct RunnerConfig {
    pub mode: RunnerMode,
    pub store: Option<Arc<dyn SessionStore>>,
    pub shutdown: CancellationToken,
    pub channel_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: RunnerMode::LongLived,
            store: None,
            shutdown: CancellationToken::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RunnerConfig {
    pub fn with_mode(mut self, mode: RunnerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Token fired when an ephemeral runner retires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

struct Inner {
    pipeline: Pipeline,
    config: RunnerConfig,
    state: AtomicU8,
    current: Mutex<Option<ActiveJob>>,
}

/// An accepted job: its caller event stream and its eventual outcome.
pub struct JobHandle {
    pub job_id: Uuid,
    pub events: mpsc::Receiver<ProgressEvent>,
    pub outcome: JoinHandle<TerminalOutcome>,
}

#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<Inner>,
}

impl JobRunner {
    pub fn new(pipeline: Pipeline, config: RunnerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline,
                config,
                state: AtomicU8::new(RunnerState::Idle as u8),
                current: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> RunnerState {
        RunnerState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn mode(&self) -> RunnerMode {
        self.inner.config.mode
    }

    pub fn current_job(&self) -> Option<ActiveJob> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.inner.config.store.as_ref()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.config.shutdown.clone()
    }

    /// Accepts `request` if the runner is idle and starts it in the background.
    ///
    /// Rejections (`Validation`, `Busy`, `Retired`) happen before any event
    /// is emitted and leave the runner's state untouched.
    pub async fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        let job = Job::from_request(request)?;
        let mut permit = JobPermit::acquire(self.inner.clone())?;

        let provider_session = match &job.resume_session_id {
            Some(session_id) => self.resolve_resume(session_id).await?,
            None => None,
        };

        let (tx, rx) = mpsc::channel(self.inner.config.channel_capacity);
        let caller = tx.clone();
        let cancel = self.inner.config.shutdown.child_token();
        let bus = EventBus::new();
        let mut emitter = EventEmitter::new(job.id)
            .with_caller(tx)
            .with_bus(bus.clone())
            .with_disconnect_token(cancel.clone());
        if let Some(store) = &self.inner.config.store {
            emitter = emitter.with_sink(Arc::new(RecordingSink::new(
                store.clone(),
                new_session(&job),
            )));
        }

        permit.start(job.id, bus);
        info!(job_id = %job.id, provider = %job.provider, "Job accepted");

        let job_id = job.id;
        let inner = self.inner.clone();
        let outcome = tokio::spawn(async move {
            let outcome = {
                let run = inner.pipeline.run(&job, provider_session, &emitter, &cancel);
                tokio::pin!(run);

                // A quiet provider emits nothing, so the emitter alone would
                // only notice a gone caller on its next send.
                let finished = tokio::select! {
                    outcome = &mut run => Some(outcome),
                    _ = caller.closed() => None,
                };
                match finished {
                    Some(outcome) => outcome,
                    None => {
                        warn!(job_id = %job.id, "Caller disconnected, cancelling job");
                        cancel.cancel();
                        run.await
                    }
                }
            };
            // The watcher's sender must go before the stream can end.
            drop(caller);

            if let (Some(store), Some(native)) =
                (&inner.config.store, &outcome.provider_session_id)
            {
                if let Err(e) = store.set_provider_session(job.id, native).await {
                    warn!(job_id = %job.id, error = %e, "Could not record provider session");
                }
            }

            // Closes the caller stream before the runner frees up.
            drop(emitter);
            if let RunnerMode::Ephemeral { grace } = inner.config.mode {
                debug!(job_id = %job.id, grace_ms = grace.as_millis() as u64, "Waiting before retiring");
                tokio::time::sleep(grace).await;
            }
            drop(permit);
            outcome
        });

        Ok(JobHandle {
            job_id,
            events: rx,
            outcome,
        })
    }

    /// Provider-native session id stored for the session being resumed.
    async fn resolve_resume(&self, session_id: &str) -> Result<Option<String>> {
        let unknown = || OrchestratorError::Validation(format!("Unknown session: {}", session_id));

        let id = Uuid::parse_str(session_id.trim()).map_err(|_| unknown())?;
        let Some(store) = &self.inner.config.store else {
            return Err(unknown());
        };
        let record = store.find(id).await?.ok_or_else(unknown)?;
        debug!(session_id = %id, provider_session_id = ?record.provider_session_id, "Resuming session");
        Ok(record.provider_session_id)
    }
}

fn new_session(job: &Job) -> NewSession {
    let session = NewSession::new(job.id, job.provider);
    match &job.repository {
        Some(repo) => session.with_repository(vcs::redact(&repo.url), repo.branch.clone()),
        None => session,
    }
}

/// Exclusive hold on the runner, released on drop.
///
/// A permit that never started a job returns the runner to idle; otherwise
/// the mode decides between idle and retired.
struct JobPermit {
    inner: Arc<Inner>,
    started: bool,
}

impl JobPermit {
    fn acquire(inner: Arc<Inner>) -> Result<Self> {
        match inner.state.compare_exchange(
            RunnerState::Idle as u8,
            RunnerState::Busy as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(Self {
                inner,
                started: false,
            }),
            Err(state) if RunnerState::from_u8(state) == RunnerState::Retired => {
                Err(OrchestratorError::Retired)
            }
            Err(_) => Err(OrchestratorError::Busy),
        }
    }

    fn start(&mut self, job_id: Uuid, bus: EventBus) {
        *self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ActiveJob { job_id, bus });
        self.started = true;
    }
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        let finished = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let next = match (self.started, self.inner.config.mode) {
            (true, RunnerMode::Ephemeral { .. }) => RunnerState::Retired,
            _ => RunnerState::Idle,
        };
        self.inner.state.store(next as u8, Ordering::Release);

        let job_id = finished.map(|job| job.job_id);
        if next == RunnerState::Retired {
            info!(job_id = ?job_id, "Runner retired, requesting shutdown");
            self.inner.config.shutdown.cancel();
        } else {
            debug!(job_id = ?job_id, "Runner idle");
        }
    }
}
