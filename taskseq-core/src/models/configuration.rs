//! Configuration data structures

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logging level configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "trace")]
    Trace,
}

/// What to do with a sync or fire-and-forget task found `IN_PROGRESS` on resume
///
/// There is no way to tell whether such a call landed before the client went away.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Run the task again
    #[default]
    Redispatch,
    /// Trust that it went through and mark it completed
    AssumeCompleted,
}

/// Tuning knobs consumed by `SequenceRunner`
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Delay between two status polls of the same request
    pub poll_interval: Duration,
    /// Consecutive poll transport errors tolerated before the task fails
    pub max_transport_failures: u32,
    pub resume_policy: ResumePolicy,
    /// Buffer size of the progress event channel
    pub event_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_transport_failures: 5,
            resume_policy: ResumePolicy::Redispatch,
            event_capacity: 256,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Cluster-management server, e.g. `http://ambari.example.com:8080`
    pub server_url: String,
    /// Cluster the sequences act on
    pub cluster_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Inter-poll delay in milliseconds
    pub poll_interval_ms: u64,
    /// Consecutive transport failures tolerated while polling
    pub max_transport_failures: u32,
    pub resume_policy: ResumePolicy,
    /// Logging verbosity level
    pub log_level: LogLevel,
    /// Directory holding persisted run states
    pub state_dir: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            cluster_name: "cluster".to_string(),
            username: None,
            password: None,
            poll_interval_ms: 1000,
            max_transport_failures: 5,
            resume_policy: ResumePolicy::Redispatch,
            log_level: LogLevel::Info,
            state_dir: None,
        }
    }
}

impl Configuration {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Configuration =
                toml::from_str(&content).context("Failed to parse config file")?;
            Ok(config)
        } else {
            // Return default configuration if file doesn't exist
            Ok(Configuration::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Get the XDG config directory path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("taskseq").join("config.toml"))
    }

    /// Configured state directory, or `~/.taskseq/state`
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home.join(".taskseq").join("state")
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_transport_failures: self.max_transport_failures,
            resume_policy: self.resume_policy,
            ..RunnerConfig::default()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match url::Url::parse(&self.server_url) {
            Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
            Ok(parsed) => errors.push(format!(
                "server_url must use http or https, got '{}'",
                parsed.scheme()
            )),
            Err(e) => errors.push(format!("server_url is not a valid URL: {}", e)),
        }

        if self.cluster_name.trim().is_empty() {
            errors.push("cluster_name cannot be empty".to_string());
        }

        if self.poll_interval_ms < 100 {
            errors.push("poll_interval_ms must be at least 100".to_string());
        }
        if self.poll_interval_ms > 60_000 {
            errors.push("poll_interval_ms cannot exceed 60000 (1 minute)".to_string());
        }

        if self.max_transport_failures > 100 {
            errors.push("max_transport_failures cannot exceed 100".to_string());
        }

        if self.username.is_some() != self.password.is_some() {
            errors.push("username and password must be set together".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
