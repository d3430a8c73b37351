use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jobrelay_core::Provider;
use orchestrator::RunnerMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    #[default]
    LongLived,
    Ephemeral,
}

impl ServerMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "long_lived" => Some(Self::LongLived),
            "ephemeral" => Some(Self::Ephemeral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub mode: ServerMode,
    /// Delay between the terminal event and process exit in ephemeral mode.
    pub exit_grace_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            mode: ServerMode::LongLived,
            exit_grace_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSection {
    pub root: PathBuf,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("jobrelay").join("workspaces"),
        }
    }
}

/// Downstream services. Unset means the local implementation is used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesSection {
    pub pull_url: Option<String>,
    pub execution_url: Option<String>,
}

/// Local CLI that runs one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitSection {
    pub push: bool,
    pub remote: String,
    pub max_diff_bytes: usize,
    pub generator: Option<GeneratorSection>,
}

impl Default for CommitSection {
    fn default() -> Self {
        Self {
            push: true,
            remote: "origin".to_string(),
            max_diff_bytes: 8000,
            generator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSection {
    pub timeout_secs: u64,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            author_name: None,
            author_email: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// SQLite URL. Without one, sessions live in memory.
    pub database_url: Option<String>,
}

/// Worker configuration, loaded from TOML and overridden by environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub server: ServerSection,
    pub workspace: WorkspaceSection,
    pub services: ServicesSection,
    /// Keyed by provider name (`claude`, `codex`, ...).
    pub providers: HashMap<String, ProviderCommand>,
    pub commit: CommitSection,
    pub git: GitSection,
    pub store: StoreSection,
}

impl WorkerConfig {
    /// Reads `path` if given and present; otherwise starts from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                debug!(path = %path.display(), "Config loaded");
                Self::from_toml(&content)?
            }
            Some(path) => {
                debug!(path = %path.display(), "Config file does not exist, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `JOBRELAY_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("JOBRELAY_PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "JOBRELAY_PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(mode) = lookup("JOBRELAY_MODE") {
            self.server.mode = ServerMode::parse(&mode).ok_or_else(|| ConfigError::Invalid {
                key: "JOBRELAY_MODE".to_string(),
                value: mode.clone(),
            })?;
        }
        if let Some(root) = lookup("JOBRELAY_WORKSPACE_ROOT") {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(url) = lookup("JOBRELAY_DATABASE_URL") {
            self.store.database_url = Some(url);
        }
        if let Some(url) = lookup("JOBRELAY_PULL_URL") {
            self.services.pull_url = Some(url);
        }
        if let Some(url) = lookup("JOBRELAY_EXECUTION_URL") {
            self.services.execution_url = Some(url);
        }
        Ok(())
    }

    /// Local provider commands, keyed by the provider they run.
    pub fn provider_commands(&self) -> Result<Vec<(Provider, &ProviderCommand)>, ConfigError> {
        self.providers
            .iter()
            .map(|(name, command)| {
                Provider::parse(name)
                    .map(|provider| (provider, command))
                    .ok_or_else(|| ConfigError::Invalid {
                        key: "providers".to_string(),
                        value: name.clone(),
                    })
            })
            .collect()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn runner_mode(&self) -> RunnerMode {
        match self.server.mode {
            ServerMode::LongLived => RunnerMode::LongLived,
            ServerMode::Ephemeral => RunnerMode::Ephemeral {
                grace: Duration::from_millis(self.server.exit_grace_ms),
            },
        }
    }
}
