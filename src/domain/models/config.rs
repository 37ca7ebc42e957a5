use serde::{Deserialize, Serialize};

/// Main configuration structure for Crucible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Completion provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Engine defaults
    #[serde(default)]
    pub engine: EngineConfig,

    /// Job lifecycle configuration
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".crucible/crucible.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Completion provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderConfig {
    /// Backend selector: "anthropic" or "mock"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Base URL for the API backend
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default model selector
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Rate limit in requests per second
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
}

fn default_backend() -> String {
    "anthropic".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

const fn default_timeout_secs() -> u64 {
    300
}

const fn default_rate_limit_rps() -> f64 {
    10.0
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            rate_limit_rps: default_rate_limit_rps(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum retry attempts for transient provider errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Engine defaults applied when a submission omits overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Iteration cap for the root role
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Iteration cap for each subordinate role
    #[serde(default = "default_subordinate_max_iterations")]
    pub subordinate_max_iterations: u32,

    /// Delegation levels below the root coordinator
    #[serde(default = "default_delegation_depth")]
    pub delegation_depth: u32,

    /// Sentinel marker the evaluator emits on genuine convergence
    #[serde(default = "default_stop_marker")]
    pub stop_marker: String,
}

const fn default_max_iterations() -> u32 {
    3
}

const fn default_subordinate_max_iterations() -> u32 {
    3
}

const fn default_delegation_depth() -> u32 {
    1
}

fn default_stop_marker() -> String {
    super::role::DEFAULT_STOP_MARKER.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            subordinate_max_iterations: default_subordinate_max_iterations(),
            delegation_depth: default_delegation_depth(),
            stop_marker: default_stop_marker(),
        }
    }
}

/// Job lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobsConfig {
    /// Seconds a job record remains fetchable after its last write
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

const fn default_ttl_secs() -> u64 {
    3_600
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}
