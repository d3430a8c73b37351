use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobrelay_core::JobRequest;
use server::config::{ServerMode, WorkerConfig};
use server::{create_router, state::AppState, worker};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_FILE: &str = "jobrelay.toml";

#[derive(Parser)]
#[command(name = "jobrelay")]
#[command(about = "Runs one coding-agent job at a time and streams its progress", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Exit after the first job completes
        #[arg(long)]
        ephemeral: bool,
    },
    /// Run a single job in process and print its events as JSON lines
    Exec {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON file holding the job request
        #[arg(short, long)]
        request: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            ephemeral,
        } => {
            init_tracing(false);
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if ephemeral {
                config.server.mode = ServerMode::Ephemeral;
            }
            serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Exec { config, request } => {
            init_tracing(true);
            let config = load_config(config.as_deref())?;
            exec(config, &request).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    let mut config = WorkerConfig::load(Some(path))
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    config
        .apply_env()
        .context("Invalid JOBRELAY_* environment override")?;
    Ok(config)
}

async fn serve(config: WorkerConfig) -> Result<()> {
    let shutdown = CancellationToken::new();
    let (runner, store) = worker::build_runner(&config, shutdown.clone()).await?;

    let app = create_router(AppState::new(runner, store));
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    tracing::info!(
        address = %listener.local_addr()?,
        mode = ?config.server.mode,
        workspace_root = %config.workspace.root.display(),
        "jobrelay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    tracing::info!("jobrelay stopped");
    Ok(())
}

/// Resolves when the runner retires or the process receives Ctrl+C.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::info!("Runner retired, shutting down");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Ctrl+C received, shutting down");
            shutdown.cancel();
        }
    }
}

async fn exec(mut config: WorkerConfig, request_path: &Path) -> Result<ExitCode> {
    let content = tokio::fs::read_to_string(request_path)
        .await
        .with_context(|| format!("Failed to read request {}", request_path.display()))?;
    let request: JobRequest =
        serde_json::from_str(&content).context("Request file is not a valid job request")?;

    config.server.mode = ServerMode::LongLived;
    let shutdown = CancellationToken::new();
    let (runner, _store) = worker::build_runner(&config, shutdown).await?;

    let mut handle = runner.submit(request).await.context("Job rejected")?;

    let stdout = std::io::stdout();
    while let Some(event) = handle.events.recv().await {
        let line = serde_json::to_string(&event)?;
        let mut out = stdout.lock();
        writeln!(out, "{}", line)?;
        out.flush()?;
    }

    let outcome = handle.outcome.await.context("Job task failed")?;
    if outcome.success {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(
            job_id = %outcome.job_id,
            error = outcome.error.as_deref().unwrap_or_default(),
            "Job failed"
        );
        Ok(ExitCode::FAILURE)
    }
}

fn init_tracing(to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    if to_stderr {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .init();
    }
}
