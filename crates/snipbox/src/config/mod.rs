use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::tools::ToolsConfig;
use crate::filter::SourceLimits;
use crate::types::ResourceLimits;

mod loader;
pub mod tools;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../snipbox.example.toml");

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "SNIPBOX";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Heartbeat and idle settings of the session supervisor
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Seconds between server pings
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: f64,

    /// Seconds a client has to answer a ping
    #[serde(default = "default_heartbeat_grace")]
    pub heartbeat_grace: f64,

    /// Seconds without any client traffic before the session is closed
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: f64,
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval)
    }

    pub fn heartbeat_grace(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_grace)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.idle_timeout)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_grace: default_heartbeat_grace(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

fn default_heartbeat_interval() -> f64 {
    30.0
}

fn default_heartbeat_grace() -> f64 {
    10.0
}

fn default_idle_timeout() -> f64 {
    600.0
}

/// Listener settings of the server binary
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Config for snipbox
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory under which every job gets its own workspace
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,

    /// Upper bound on jobs running at once across all sessions
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Seconds a job may wait for a free slot before being refused
    #[serde(default = "default_queue_timeout")]
    pub queue_timeout: f64,

    /// Ceilings applied by the pre-filter
    #[serde(default)]
    pub source_limits: SourceLimits,

    /// Resource envelope of a program run
    #[serde(default)]
    pub limits: ResourceLimits,

    /// External tool binaries and their timeouts
    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Config built purely from built-in defaults, ignoring the example file
    pub fn builtin() -> Self {
        Self {
            temp_root: default_temp_root(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            queue_timeout: default_queue_timeout(),
            source_limits: SourceLimits::default(),
            limits: ResourceLimits::default(),
            tools: ToolsConfig::default(),
            session: SessionConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.queue_timeout)
    }

    /// Merge resource limits with defaults
    pub fn effective_limits(&self, overrides: Option<&ResourceLimits>) -> ResourceLimits {
        match overrides {
            Some(limits) => self.limits.with_overrides(limits),
            None => self.limits.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_temp_root() -> PathBuf {
    std::env::temp_dir().join("snipbox")
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_queue_timeout() -> f64 {
    5.0
}
