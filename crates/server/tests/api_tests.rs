use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use db::{MemorySessionStore, SessionStore};
use futures::StreamExt;
use jobrelay_core::{JobRequest, Provider};
use orchestrator::provider::ProviderStream;
use orchestrator::{
    ExecutionRequest, JobRunner, Pipeline, ProviderExecutor, ProviderMessage, ProviderRegistry,
    RunnerConfig, RunnerMode,
};
use serde_json::{json, Value};
use server::{create_router, state::AppState};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vcs::GitVcs;

struct EchoExecutor {
    delay: Duration,
}

#[async_trait]
impl ProviderExecutor for EchoExecutor {
    async fn execute(&self, request: ExecutionRequest) -> orchestrator::Result<ProviderStream> {
        tokio::time::sleep(self.delay).await;
        let items = vec![
            Ok(ProviderMessage::Output(json!({
                "type": "assistant",
                "text": format!("echo: {}", request.prompt),
            }))),
            Ok(ProviderMessage::Finished {
                provider_session_id: Some("native-1".to_string()),
            }),
        ];
        Ok(futures::stream::iter(items).boxed())
    }
}

struct TestApp {
    server: TestServer,
    runner: JobRunner,
    store: Arc<dyn SessionStore>,
    _root: TempDir,
}

fn setup_with(mode: RunnerMode, delay: Duration, shutdown: CancellationToken) -> TestApp {
    let root = TempDir::new().expect("Failed to create temp dir");
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let pipeline = Pipeline::new(
        root.path(),
        Arc::new(GitVcs::new()),
        ProviderRegistry::new().register(Provider::Claude, Arc::new(EchoExecutor { delay })),
    );
    let runner = JobRunner::new(
        pipeline,
        RunnerConfig::default()
            .with_mode(mode)
            .with_store(store.clone())
            .with_shutdown(shutdown),
    );

    let app = create_router(AppState::new(runner.clone(), store.clone()));
    let server = TestServer::new(app).expect("Failed to create test server");

    TestApp {
        server,
        runner,
        store,
        _root: root,
    }
}

fn setup() -> TestApp {
    setup_with(RunnerMode::LongLived, Duration::ZERO, CancellationToken::new())
}

/// Parses every `data:` record of an SSE body.
fn sse_records(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter_map(|frame| {
            let data: Vec<&str> = frame
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim_start)
                .collect();
            if data.is_empty() {
                None
            } else {
                serde_json::from_str(&data.join("\n")).ok()
            }
        })
        .collect()
}

async fn run_job(app: &TestApp, instruction: &str) -> Vec<Value> {
    let response = app
        .server
        .post("/api/execute")
        .json(&json!({"instruction": instruction, "provider": "claude"}))
        .await;
    response.assert_status_ok();
    sse_records(&response.text())
}

fn job_id_of(records: &[Value]) -> Uuid {
    records[0]["jobId"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("first record carries jobId")
}

mod health {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = setup();

        let response = app.server.get("/health").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_ready_when_idle() {
        let app = setup();

        let response = app.server.get("/ready").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["state"], "idle");
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let app = setup();

        let response = app.server.get("/api/openapi.json").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert!(body["paths"]["/api/execute"].is_object());
        assert!(body["paths"]["/api/sessions/{id}/events"].is_object());
    }
}

mod execute {
    use super::*;

    #[tokio::test]
    async fn test_streams_events_until_completed() {
        let app = setup();

        let response = app
            .server
            .post("/api/execute")
            .json(&json!({"instruction": "Say hello", "provider": "claude"}))
            .await;

        response.assert_status_ok();
        let body = response.text();
        assert!(body.starts_with("data: "));

        let records = sse_records(&body);
        let types: Vec<&str> = records
            .iter()
            .map(|r| r["type"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(types.first(), Some(&"connected"));
        assert_eq!(types.last(), Some(&"job_completed"));
        assert!(types.contains(&"session_name"));
        assert!(!types.contains(&"commit_progress"));

        let output = records
            .iter()
            .find(|r| r["type"] == "provider_output")
            .unwrap();
        assert_eq!(output["payload"]["text"], "echo: Say hello");

        let sequences: Vec<u64> = records
            .iter()
            .map(|r| r["sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(sequences, (0..records.len() as u64).collect::<Vec<_>>());

        let last = records.last().unwrap();
        assert_eq!(last["sessionId"], records[0]["jobId"]);
        assert!(last["duration_ms"].is_u64());
        assert!(last.get("error").is_none());
        assert_eq!(app.runner.state(), orchestrator::RunnerState::Idle);
    }

    #[tokio::test]
    async fn test_empty_instruction_is_rejected() {
        let app = setup();

        let response = app
            .server
            .post("/api/execute")
            .json(&json!({"instruction": "  ", "provider": "claude"}))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let app = setup();

        let response = app
            .server
            .post("/api/execute")
            .json(&json!({"instruction": "hi", "provider": "cursor"}))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_fails_in_stream() {
        let app = setup();

        let response = app
            .server
            .post("/api/execute")
            .json(&json!({"instruction": "hi", "provider": "gemini"}))
            .await;

        response.assert_status_ok();
        let records = sse_records(&response.text());
        let error = records.iter().find(|r| r["type"] == "error").unwrap();
        assert_eq!(error["code"], "PROVIDER_ERROR");
        assert_eq!(error["stage"], "executing_provider");
        let last = records.last().unwrap();
        assert_eq!(last["type"], "job_completed");
        assert!(last["error"].is_string());
    }

    #[tokio::test]
    async fn test_busy_worker_returns_429() {
        let app = setup_with(
            RunnerMode::LongLived,
            Duration::from_millis(300),
            CancellationToken::new(),
        );

        let mut first = app
            .runner
            .submit(JobRequest::new("long job", Provider::Claude))
            .await
            .unwrap();

        let response = app
            .server
            .post("/api/execute")
            .json(&json!({"instruction": "second", "provider": "claude"}))
            .await;
        response.assert_status(StatusCode::TOO_MANY_REQUESTS);

        let ready = app.server.get("/ready").await;
        ready.assert_status(StatusCode::TOO_MANY_REQUESTS);
        let body: Value = ready.json();
        assert_eq!(body["state"], "busy");

        let mut last = None;
        while let Some(event) = first.events.recv().await {
            last = Some(event);
        }
        assert!(last.unwrap().is_terminal());
        assert!(first.outcome.await.unwrap().success);

        app.server.get("/ready").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_ephemeral_worker_retires_after_job() {
        let shutdown = CancellationToken::new();
        let app = setup_with(
            RunnerMode::Ephemeral {
                grace: Duration::from_millis(10),
            },
            Duration::ZERO,
            shutdown.clone(),
        );

        let records = run_job(&app, "only job").await;
        assert_eq!(records.last().unwrap()["type"], "job_completed");

        tokio::time::timeout(Duration::from_secs(5), shutdown.cancelled())
            .await
            .expect("runner fires shutdown after the grace period");

        let ready = app.server.get("/ready").await;
        ready.assert_status(StatusCode::TOO_MANY_REQUESTS);
        let body: Value = ready.json();
        assert_eq!(body["state"], "retired");

        app.server
            .post("/api/execute")
            .json(&json!({"instruction": "another", "provider": "claude"}))
            .await
            .assert_status(StatusCode::TOO_MANY_REQUESTS);
    }
}

mod sessions {
    use super::*;

    #[tokio::test]
    async fn test_get_session_after_job() {
        let app = setup();
        let records = run_job(&app, "Record me").await;
        let job_id = job_id_of(&records);

        let response = app.server.get(&format!("/api/sessions/{}", job_id)).await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["id"], job_id.to_string());
        assert_eq!(body["provider"], "claude");
        assert_eq!(body["providerSessionId"], "native-1");
        assert_eq!(body["events"].as_array().unwrap().len(), records.len());

        let stored = app.store.find(job_id).await.unwrap().unwrap();
        assert!(stored.events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_get_unknown_session_returns_404() {
        let app = setup();

        let response = app
            .server
            .get(&format!("/api/sessions/{}", Uuid::new_v4()))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_replay_after_last_event_id() {
        let app = setup();
        let records = run_job(&app, "Replay me").await;
        let job_id = job_id_of(&records);

        let response = app
            .server
            .get(&format!("/api/sessions/{}/events", job_id))
            .add_header(
                HeaderName::from_static("last-event-id"),
                HeaderValue::from_static("2"),
            )
            .await;

        response.assert_status_ok();
        let body = response.text();
        assert!(body.contains("id: 3\n"));
        let replayed = sse_records(&body);
        assert_eq!(replayed.len(), records.len() - 3);
        assert_eq!(replayed[0]["sequence"], 3);
        assert_eq!(replayed.last().unwrap()["type"], "job_completed");
    }

    #[tokio::test]
    async fn test_replay_with_after_query() {
        let app = setup();
        let records = run_job(&app, "Replay me").await;
        let job_id = job_id_of(&records);

        let response = app
            .server
            .get(&format!("/api/sessions/{}/events", job_id))
            .add_query_param("after", 0)
            .await;

        response.assert_status_ok();
        let replayed = sse_records(&response.text());
        assert_eq!(replayed.len(), records.len() - 1);
        assert_eq!(replayed[0]["type"], "session_name");
    }

    #[tokio::test]
    async fn test_replay_follows_running_job_to_completion() {
        let app = setup_with(
            RunnerMode::LongLived,
            Duration::from_millis(300),
            CancellationToken::new(),
        );

        let mut handle = app
            .runner
            .submit(JobRequest::new("Follow me live", Provider::Claude))
            .await
            .unwrap();

        let response = app
            .server
            .get(&format!("/api/sessions/{}/events", handle.job_id))
            .await;

        response.assert_status_ok();
        let replayed = sse_records(&response.text());
        let sequences: Vec<u64> = replayed
            .iter()
            .map(|r| r["sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(sequences, (0..replayed.len() as u64).collect::<Vec<_>>());
        assert!(replayed.iter().any(|r| r["type"] == "provider_output"));
        assert_eq!(replayed.last().unwrap()["type"], "job_completed");

        let mut streamed = Vec::new();
        while let Some(event) = handle.events.recv().await {
            streamed.push(event);
        }
        assert_eq!(streamed.len(), replayed.len());
    }

    #[tokio::test]
    async fn test_replay_unknown_session_returns_404() {
        let app = setup();

        let response = app
            .server
            .get(&format!("/api/sessions/{}/events", Uuid::new_v4()))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
    }
}
