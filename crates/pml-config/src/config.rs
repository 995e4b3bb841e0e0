// pml-config/src/config.rs
// ============================================================================
// Module: Gateway Configuration Model
// Description: Canonical pml-gateway.toml model with strict validation.
// Purpose: Single source of truth for gateway configuration semantics.
// Dependencies: pml-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration loads from TOML, applies the documented environment variable
//! overrides, and validates fail-closed: unknown fields, unparseable values,
//! and out-of-range settings are errors, never silent defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Environment Variables
// ============================================================================

/// Database path override.
pub const ENV_DB_PATH: &str = "DB_PATH";
/// Maximum concurrency override.
pub const ENV_MAX_CONCURRENCY: &str = "MAX_CONCURRENCY";
/// Default task timeout override.
pub const ENV_DEFAULT_TASK_TIMEOUT_MS: &str = "DEFAULT_TASK_TIMEOUT_MS";
/// Abort grace window override.
pub const ENV_ABORT_TIMEOUT_MS: &str = "ABORT_TIMEOUT_MS";
/// Checkpoint retention override.
pub const ENV_CHECKPOINTS_PER_WORKFLOW: &str = "CHECKPOINTS_PER_WORKFLOW";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the config file failed.
    #[error("config io error: {0}")]
    Io(String),
    /// Parsing the config file failed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A setting failed validation.
    #[error("invalid config: {field}: {reason}")]
    Invalid {
        /// Offending field path.
        field: &'static str,
        /// Failure description.
        reason: String,
    },
}

/// Builds an invalid-field error.
fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Server transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// Plain HTTP JSON-RPC.
    #[default]
    Http,
    /// JSON-RPC over server-sent events.
    Sse,
}

/// Server section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address (`host:port`).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Transport exposed to clients.
    #[serde(default)]
    pub transport: ServerTransport,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            transport: ServerTransport::default(),
        }
    }
}

/// Default bind address.
fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Storage section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Default database path.
fn default_db_path() -> PathBuf {
    PathBuf::from("pml-gateway.db")
}

/// Executor section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSection {
    /// Maximum concurrent task dispatches per workflow.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-task timeout in milliseconds.
    #[serde(default = "default_task_timeout_ms")]
    pub default_task_timeout_ms: u64,
    /// Abort grace window in milliseconds.
    #[serde(default = "default_abort_timeout_ms")]
    pub abort_timeout_ms: u64,
    /// Checkpoints retained per workflow.
    #[serde(default = "default_checkpoints_per_workflow")]
    pub checkpoints_per_workflow: usize,
    /// Whether to checkpoint at every completed topological layer.
    #[serde(default)]
    pub checkpoint_every_layer: bool,
    /// Confidence threshold above which tasks dispatch speculatively.
    #[serde(default = "default_speculation_threshold")]
    pub speculation_threshold: f64,
    /// Blocklist patterns suppressing speculation.
    #[serde(default = "default_dangerous_patterns")]
    pub dangerous_patterns: Vec<String>,
    /// Whether denied tasks may re-dispatch once at an escalated level.
    #[serde(default)]
    pub allow_escalation: bool,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_task_timeout_ms: default_task_timeout_ms(),
            abort_timeout_ms: default_abort_timeout_ms(),
            checkpoints_per_workflow: default_checkpoints_per_workflow(),
            checkpoint_every_layer: false,
            speculation_threshold: default_speculation_threshold(),
            dangerous_patterns: default_dangerous_patterns(),
            allow_escalation: false,
        }
    }
}

/// Default concurrency cap.
const fn default_max_concurrency() -> usize {
    8
}

/// Default per-task timeout.
const fn default_task_timeout_ms() -> u64 {
    30_000
}

/// Default abort grace window.
const fn default_abort_timeout_ms() -> u64 {
    5_000
}

/// Default checkpoint retention.
const fn default_checkpoints_per_workflow() -> usize {
    5
}

/// Default speculation threshold.
const fn default_speculation_threshold() -> f64 {
    0.85
}

/// Default dangerous-tool patterns.
fn default_dangerous_patterns() -> Vec<String> {
    pml_core::runtime::DEFAULT_DANGEROUS_PATTERNS
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Trace sink section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceSinkSection {
    /// Records buffered per writer before a forced flush.
    #[serde(default = "default_trace_buffer")]
    pub buffer_size: usize,
    /// Flush interval in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for TraceSinkSection {
    fn default() -> Self {
        Self {
            buffer_size: default_trace_buffer(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

/// Default trace buffer size.
const fn default_trace_buffer() -> usize {
    100
}

/// Default flush interval.
const fn default_flush_interval_ms() -> u64 {
    5_000
}

/// Embedding provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Deterministic local feature-hash embedder.
    #[default]
    Hash,
    /// Deployed HTTP embedding model.
    Http,
}

/// Embedding section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingSection {
    /// Provider selection.
    #[serde(default)]
    pub provider: EmbeddingProvider,
    /// Endpoint URL for the HTTP provider.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Sandbox section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxSection {
    /// Sandbox worker endpoint; absent means code execution is unavailable.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// One downstream server declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownstreamServer {
    /// Server name (the prefix of qualified tool names).
    pub name: String,
    /// JSON-RPC endpoint.
    pub endpoint: String,
    /// Declared tools.
    #[serde(default)]
    pub tools: Vec<ToolDecl>,
}

/// One declared downstream tool.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDecl {
    /// Tool name within the server.
    pub name: String,
    /// Tool description used for semantic indexing.
    #[serde(default)]
    pub description: String,
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Canonical gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Server section.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage section.
    #[serde(default)]
    pub store: StoreSection,
    /// Executor section.
    #[serde(default)]
    pub executor: ExecutorSection,
    /// Trace sink section.
    #[serde(default)]
    pub trace_sink: TraceSinkSection,
    /// Embedding section.
    #[serde(default)]
    pub embedding: EmbeddingSection,
    /// Sandbox section.
    #[serde(default)]
    pub sandbox: SandboxSection,
    /// Downstream server declarations.
    #[serde(default)]
    pub downstream: Vec<DownstreamServer>,
}

impl GatewayConfig {
    /// Loads configuration from an optional TOML file, applies environment
    /// overrides, and validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failures.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|err| ConfigError::Io(err.to_string()))?;
                toml::from_str(&text).map_err(|err| ConfigError::Parse(err.to_string()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the documented environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when an override does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var(ENV_DB_PATH) {
            self.store.db_path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var(ENV_MAX_CONCURRENCY) {
            self.executor.max_concurrency = value
                .parse()
                .map_err(|_| invalid("executor.max_concurrency", format!("not a count: {value}")))?;
        }
        if let Ok(value) = std::env::var(ENV_DEFAULT_TASK_TIMEOUT_MS) {
            self.executor.default_task_timeout_ms = value.parse().map_err(|_| {
                invalid("executor.default_task_timeout_ms", format!("not a duration: {value}"))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_ABORT_TIMEOUT_MS) {
            self.executor.abort_timeout_ms = value.parse().map_err(|_| {
                invalid("executor.abort_timeout_ms", format!("not a duration: {value}"))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_CHECKPOINTS_PER_WORKFLOW) {
            self.executor.checkpoints_per_workflow = value.parse().map_err(|_| {
                invalid("executor.checkpoints_per_workflow", format!("not a count: {value}"))
            })?;
        }
        Ok(())
    }

    /// Validates the configuration, failing closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .map_err(|err| invalid("server.bind", err.to_string()))?;
        if self.store.db_path.as_os_str().is_empty() {
            return Err(invalid("store.db_path", "must not be empty"));
        }
        if self.executor.max_concurrency == 0 {
            return Err(invalid("executor.max_concurrency", "must be at least 1"));
        }
        if self.executor.default_task_timeout_ms == 0 {
            return Err(invalid("executor.default_task_timeout_ms", "must be positive"));
        }
        if self.executor.checkpoints_per_workflow == 0 {
            return Err(invalid("executor.checkpoints_per_workflow", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.executor.speculation_threshold) {
            return Err(invalid("executor.speculation_threshold", "must be within [0, 1]"));
        }
        if self.trace_sink.buffer_size == 0 {
            return Err(invalid("trace_sink.buffer_size", "must be at least 1"));
        }
        if self.trace_sink.flush_interval_ms == 0 {
            return Err(invalid("trace_sink.flush_interval_ms", "must be positive"));
        }
        if self.embedding.provider == EmbeddingProvider::Http {
            let endpoint = self
                .embedding
                .endpoint
                .as_deref()
                .ok_or_else(|| invalid("embedding.endpoint", "required for the http provider"))?;
            validate_url("embedding.endpoint", endpoint)?;
        }
        if let Some(endpoint) = self.sandbox.endpoint.as_deref() {
            validate_url("sandbox.endpoint", endpoint)?;
        }
        for server in &self.downstream {
            if server.name.is_empty() {
                return Err(invalid("downstream.name", "must not be empty"));
            }
            validate_url("downstream.endpoint", &server.endpoint)?;
        }
        Ok(())
    }
}

/// Validates a URL-valued setting.
fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(invalid(field, format!("not an http(s) url: {value}")))
    }
}
