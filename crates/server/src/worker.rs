//! Assembles a [`JobRunner`] from a [`WorkerConfig`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use db::{MemorySessionStore, SessionStore, SqliteSessionStore};
use orchestrator::{
    AutoCommit, AutoCommitConfig, ChatCompletionGenerator, CommandExecutor, CommandSpec, JobRunner,
    Pipeline, ProviderRegistry, RemoteExecutor, RemotePullPreparer, RunnerConfig,
};
use relay::{ExecutionClient, RepoPullClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vcs::{GitAuthor, GitVcs, VersionControl};

use crate::config::WorkerConfig;

/// SQLite store when a database URL is configured, in-memory otherwise.
pub async fn build_store(config: &WorkerConfig) -> Result<Arc<dyn SessionStore>> {
    match &config.store.database_url {
        Some(url) => {
            let pool = db::create_pool(url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            info!(database_url = %url, "Session store: sqlite");
            Ok(Arc::new(SqliteSessionStore::new(pool)))
        }
        None => {
            info!("Session store: in-memory");
            Ok(Arc::new(MemorySessionStore::new()))
        }
    }
}

pub fn build_registry(config: &WorkerConfig) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for (provider, command) in config.provider_commands()? {
        info!(provider = %provider, program = %command.program, "Local provider command");
        let spec = CommandSpec::new(command.program.clone()).with_args(command.args.clone());
        registry = registry.register(provider, Arc::new(CommandExecutor::new(spec)));
    }
    if let Some(url) = &config.services.execution_url {
        info!(execution_url = %url, "Remote execution service");
        registry = registry.with_fallback(Arc::new(RemoteExecutor::new(ExecutionClient::new(
            url.clone(),
        ))));
    }
    if registry.is_empty() {
        warn!("No provider executors configured; every job will fail with PROVIDER_ERROR");
    }
    Ok(registry)
}

pub fn build_pipeline(config: &WorkerConfig) -> Result<Pipeline> {
    let mut git = GitVcs::new().with_timeout(Duration::from_secs(config.git.timeout_secs));
    if let (Some(name), Some(email)) = (&config.git.author_name, &config.git.author_email) {
        git = git.with_author(GitAuthor::new(name.clone(), email.clone()));
    }
    let vcs: Arc<dyn VersionControl> = Arc::new(git);

    let mut auto_commit = AutoCommit::new(
        vcs.clone(),
        AutoCommitConfig {
            push: config.commit.push,
            remote: config.commit.remote.clone(),
            max_diff_bytes: config.commit.max_diff_bytes,
            ..AutoCommitConfig::default()
        },
    );
    if let Some(generator) = &config.commit.generator {
        let mut chat = ChatCompletionGenerator::new(generator.base_url.clone(), generator.model.clone())
            .with_timeout(Duration::from_secs(generator.timeout_secs));
        match generator.api_key_env.as_deref().map(std::env::var) {
            Some(Ok(key)) => chat = chat.with_api_key(key),
            Some(Err(_)) => warn!("Commit message API key variable is not set"),
            None => {}
        }
        auto_commit = auto_commit.with_generator(Arc::new(chat));
    }

    let mut pipeline = Pipeline::new(config.workspace.root.clone(), vcs, build_registry(config)?)
        .with_auto_commit(auto_commit);
    if let Some(url) = &config.services.pull_url {
        info!(pull_url = %url, "Remote repository pull service");
        pipeline = pipeline.with_preparer(Arc::new(RemotePullPreparer::new(RepoPullClient::new(
            url.clone(),
        ))));
    }
    Ok(pipeline)
}

/// Store and runner sharing the same store, wired to `shutdown`.
pub async fn build_runner(
    config: &WorkerConfig,
    shutdown: CancellationToken,
) -> Result<(JobRunner, Arc<dyn SessionStore>)> {
    tokio::fs::create_dir_all(&config.workspace.root)
        .await
        .with_context(|| {
            format!(
                "Failed to create workspace root {}",
                config.workspace.root.display()
            )
        })?;

    if !GitVcs::new().is_available().await {
        warn!("git not found on PATH; repository-bound jobs will fail");
    }

    let store = build_store(config).await?;
    let pipeline = build_pipeline(config)?;
    let runner = JobRunner::new(
        pipeline,
        RunnerConfig::default()
            .with_mode(config.runner_mode())
            .with_store(store.clone())
            .with_shutdown(shutdown),
    );
    Ok((runner, store))
}
