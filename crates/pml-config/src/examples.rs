// pml-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Deterministic commented example configuration.
// Purpose: Keep documentation and defaults in one generated artifact.
// Dependencies: none
// ============================================================================

//! ## Overview
//! The example mirrors the defaults in `config.rs`; tests assert it parses
//! and validates so the documentation can never drift from the model.

// ============================================================================
// SECTION: Example
// ============================================================================

/// Returns the commented example `pml-gateway.toml`.
#[must_use]
pub const fn config_toml_example() -> &'static str {
    r#"# PML Gateway configuration.

[server]
# Bind address for the JSON-RPC surface.
bind = "127.0.0.1:8787"
# Transport: "http" or "sse".
transport = "http"

[store]
# SQLite database holding capabilities, traces, and checkpoints.
# Overridable with DB_PATH.
db_path = "pml-gateway.db"

[executor]
# Concurrent task dispatches per workflow (MAX_CONCURRENCY).
max_concurrency = 8
# Per-task timeout in milliseconds (DEFAULT_TASK_TIMEOUT_MS).
default_task_timeout_ms = 30000
# Grace window granted to in-flight tasks after abort (ABORT_TIMEOUT_MS).
abort_timeout_ms = 5000
# Checkpoints retained per workflow (CHECKPOINTS_PER_WORKFLOW).
checkpoints_per_workflow = 5
# Also checkpoint at every completed topological layer.
checkpoint_every_layer = false
# Confidence required before a task dispatches speculatively.
speculation_threshold = 0.85
# Tool-name patterns that never speculate.
dangerous_patterns = [
    "delete", "remove", "destroy", "drop", "deploy",
    "publish", "send_email", "payment", "transfer", "execute_sql",
]
# Re-dispatch denied tasks once at an escalated permission level.
allow_escalation = false

[trace_sink]
# Records buffered per writer before a forced flush.
buffer_size = 100
# Flush interval in milliseconds.
flush_interval_ms = 5000

[embedding]
# "hash" is deterministic and local; "http" calls a deployed model.
provider = "hash"
# endpoint = "http://127.0.0.1:9090/embed"

[sandbox]
# Sandbox worker endpoint; omit to disable code execution.
# endpoint = "http://127.0.0.1:9091/run"

# Downstream MCP servers reachable from this gateway.
# [[downstream]]
# name = "fs"
# endpoint = "http://127.0.0.1:9100/rpc"
# tools = [
#     { name = "read", description = "Read a file" },
#     { name = "write", description = "Write a file" },
# ]
"#
}
