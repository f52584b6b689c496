//! Configuration loading from needle.toml.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use policy::Policy;
use runtime::{FsModule, LogModule, NeedleExecutor, NetworkModule};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Sandbox limits and filesystem root.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Policy rules (allow/deny).
    #[serde(flatten)]
    pub policy: Policy,
}

/// Where needles may touch the filesystem, and how long they may run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory that `fs` paths are relative to.
    pub root: PathBuf,
    pub deadline_secs: u64,
    pub memory_limit_mb: usize,
    pub network_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("sandbox"),
            deadline_secs: 30,
            memory_limit_mb: 64,
            network_timeout_secs: runtime::DEFAULT_NETWORK_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    ///
    /// A file without `[allow]` or `[deny]` tables gets the restrictive
    /// default policy rather than an empty one.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let has_policy = table.contains_key("allow") || table.contains_key("deny");

        let mut config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if !has_policy {
            config.policy = Policy::restrictive();
        }
        config.policy.validate()?;

        if config.sandbox.deadline_secs == 0 {
            return Err(ConfigError::Invalid("sandbox.deadline_secs must be positive".into()));
        }
        if config.sandbox.network_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "sandbox.network_timeout_secs must be positive".into(),
            ));
        }
        Ok(config)
    }

    /// Create a default configuration.
    pub fn default_config() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            policy: Policy::restrictive(),
        }
    }

    /// Build an executor with the `fs`, `network` and `log` capabilities.
    ///
    /// Creates the sandbox root if needed.
    pub fn executor(&self) -> std::io::Result<NeedleExecutor> {
        let policy = Arc::new(self.policy.clone());
        let network = NetworkModule::new(policy.clone())
            .with_timeout(Duration::from_secs(self.sandbox.network_timeout_secs));

        let mut builder = NeedleExecutor::builder()
            .capability(FsModule::new(&self.sandbox.root, policy)?)
            .capability(network)
            .capability(LogModule::tracing())
            .deadline(Duration::from_secs(self.sandbox.deadline_secs));
        if self.sandbox.memory_limit_mb > 0 {
            builder = builder.memory_limit(self.sandbox.memory_limit_mb * 1024 * 1024);
        }
        Ok(builder.build())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Policy(#[from] policy::Error),
}
