//! Layered configuration for questforge.
//!
//! Values come from `questforge.toml` (optional), then the environment, then
//! CLI flags applied by the command layer.
//!
//! ```toml
//! [generation]
//! model = "claude-3-5-sonnet-latest"
//! max_tokens = 4096
//! max_attempts = 5
//! max_continuations = 40
//! deadline_secs = 900
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! history_file = "session_history.json"
//! outputs_dir = "outputs"
//! linger_secs = 300
//!
//! [server.rate_limit]
//! max_requests = 3
//! window_secs = 14400
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "questforge.toml";

/// Settings for the generation service and the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound on calls per continuation run.
    #[serde(default = "default_max_continuations")]
    pub max_continuations: usize,
    /// Overall bound on one generation run.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Never written back out; comes from the environment in practice.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_api_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_attempts() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_continuations() -> usize {
    40
}

fn default_deadline_secs() -> u64 {
    900
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            max_continuations: default_max_continuations(),
            deadline_secs: default_deadline_secs(),
            api_key: None,
        }
    }
}

impl GenerationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Submission throttle per client address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> usize {
    3
}

fn default_window_secs() -> u64 {
    4 * 60 * 60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Settings for the web service and session registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: PathBuf,
    /// How long a finished session stays queryable in the demoted cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Idle age after which a session's history is reaped.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,
    /// Grace period between the end of a run and session cleanup.
    #[serde(default = "default_linger_secs")]
    pub linger_secs: u64,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_history_file() -> PathBuf {
    PathBuf::from("session_history.json")
}

fn default_outputs_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_stale_after_secs() -> u64 {
    60 * 60
}

fn default_reap_interval_secs() -> u64 {
    100 * 60
}

fn default_persist_interval_secs() -> u64 {
    50 * 60
}

fn default_linger_secs() -> u64 {
    5 * 60
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            history_file: default_history_file(),
            outputs_dir: default_outputs_dir(),
            cache_ttl_secs: default_cache_ttl_secs(),
            stale_after_secs: default_stale_after_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            persist_interval_secs: default_persist_interval_secs(),
            linger_secs: default_linger_secs(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ServerSettings {
    pub fn linger(&self) -> Duration {
        Duration::from_secs(self.linger_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs.max(1))
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestConfig {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerSettings,
}

impl QuestConfig {
    /// Load from `path`, or from `questforge.toml` when present, then apply
    /// the process environment. An explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay environment values; `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let key = lookup("ANTHROPIC_API_KEY")
            .or_else(|| lookup("CLAUDE_API_KEY"))
            .filter(|k| !k.is_empty());
        if key.is_some() {
            self.generation.api_key = key;
        }
        if let Some(model) = lookup("QUESTFORGE_MODEL").filter(|m| !m.is_empty()) {
            self.generation.model = model;
        }
        if let Some(url) = lookup("QUESTFORGE_API_URL").filter(|u| !u.is_empty()) {
            self.generation.api_url = url;
        }
    }

    /// Render as TOML for `questforge config`.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
