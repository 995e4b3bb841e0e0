// pml-config/tests/config_validation.rs
// ============================================================================
// Module: Config Validation Tests
// Description: Defaults, environment overrides, and fail-closed validation.
// ============================================================================
//! ## Overview
//! Validates the canonical configuration model: defaults load cleanly, the
//! example stays parseable, unknown fields and out-of-range values fail, and
//! the documented environment variables override file settings.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
#![allow(
    unsafe_code,
    reason = "Environment overrides can only be exercised by mutating the environment."
)]

use std::io::Write;

use pml_config::ConfigError;
use pml_config::GatewayConfig;
use pml_config::config_toml_example;

/// Writes config text to a temp file and loads it.
fn load_text(text: &str) -> Result<GatewayConfig, ConfigError> {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    GatewayConfig::load(Some(file.path()))
}

/// Defaults validate without a config file.
#[test]
fn test_defaults_validate() {
    let config = GatewayConfig::load(None).unwrap();
    assert_eq!(config.executor.max_concurrency, 8);
    assert_eq!(config.executor.default_task_timeout_ms, 30_000);
    assert_eq!(config.executor.abort_timeout_ms, 5_000);
    assert_eq!(config.executor.checkpoints_per_workflow, 5);
    assert_eq!(config.trace_sink.buffer_size, 100);
    assert_eq!(config.trace_sink.flush_interval_ms, 5_000);
}

/// The shipped example parses and validates.
#[test]
fn test_example_parses() {
    let config = load_text(config_toml_example()).unwrap();
    assert_eq!(config.server.bind, "127.0.0.1:8787");
    assert!(!config.executor.dangerous_patterns.is_empty());
}

/// Unknown fields fail closed.
#[test]
fn test_unknown_field_rejected() {
    let result = load_text("[server]\nbind = \"127.0.0.1:8787\"\nsurprise = true\n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

/// Out-of-range settings fail validation.
#[test]
fn test_invalid_values_rejected() {
    let zero_concurrency = load_text("[executor]\nmax_concurrency = 0\n");
    assert!(matches!(zero_concurrency, Err(ConfigError::Invalid { .. })));

    let bad_bind = load_text("[server]\nbind = \"not-an-address\"\n");
    assert!(matches!(bad_bind, Err(ConfigError::Invalid { .. })));

    let bad_threshold = load_text("[executor]\nspeculation_threshold = 1.5\n");
    assert!(matches!(bad_threshold, Err(ConfigError::Invalid { .. })));

    let missing_endpoint = load_text("[embedding]\nprovider = \"http\"\n");
    assert!(matches!(missing_endpoint, Err(ConfigError::Invalid { .. })));
}

/// Environment variables override file settings.
#[test]
fn test_env_overrides() {
    let mut config = GatewayConfig::load(None).unwrap();
    // Apply overrides directly to avoid cross-test env mutation.
    unsafe {
        std::env::set_var("MAX_CONCURRENCY", "3");
        std::env::set_var("DB_PATH", "/tmp/override.db");
        std::env::set_var("DEFAULT_TASK_TIMEOUT_MS", "1234");
        std::env::set_var("ABORT_TIMEOUT_MS", "999");
        std::env::set_var("CHECKPOINTS_PER_WORKFLOW", "2");
    }
    config.apply_env_overrides().unwrap();
    unsafe {
        std::env::remove_var("MAX_CONCURRENCY");
        std::env::remove_var("DB_PATH");
        std::env::remove_var("DEFAULT_TASK_TIMEOUT_MS");
        std::env::remove_var("ABORT_TIMEOUT_MS");
        std::env::remove_var("CHECKPOINTS_PER_WORKFLOW");
    }

    assert_eq!(config.executor.max_concurrency, 3);
    assert_eq!(config.store.db_path, std::path::PathBuf::from("/tmp/override.db"));
    assert_eq!(config.executor.default_task_timeout_ms, 1234);
    assert_eq!(config.executor.abort_timeout_ms, 999);
    assert_eq!(config.executor.checkpoints_per_workflow, 2);
}

/// Downstream declarations validate endpoints.
#[test]
fn test_downstream_validation() {
    let bad = load_text(
        "[[downstream]]\nname = \"fs\"\nendpoint = \"ftp://example\"\n",
    );
    assert!(matches!(bad, Err(ConfigError::Invalid { .. })));

    let good = load_text(
        "[[downstream]]\nname = \"fs\"\nendpoint = \"http://127.0.0.1:9100/rpc\"\n\
         tools = [{ name = \"read\", description = \"Read a file\" }]\n",
    );
    assert!(good.is_ok());
}
