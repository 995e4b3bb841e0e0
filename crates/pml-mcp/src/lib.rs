// pml-mcp/src/lib.rs
// ============================================================================
// Module: PML MCP Library
// Description: Meta-tool router, JSON-RPC server, and component wiring.
// Purpose: Expose the gateway's meta-tool surface to MCP clients.
// Dependencies: pml-bus, pml-config, pml-core, pml-providers, pml-store-sqlite
// ============================================================================

//! ## Overview
//! `pml-mcp` exposes exactly five meta-tools (`discover`, `execute`, `abort`,
//! `continue`, `replan`) over JSON-RPC 2.0 with HTTP and SSE transports, and
//! provides the single `wire` composition root assembling the gateway from
//! validated configuration.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod server;
pub mod telemetry;
pub mod tooling;
pub mod tools;
pub mod wire;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use server::McpServer;
pub use server::McpServerError;
pub use telemetry::AuditEvent;
pub use telemetry::AuditSink;
pub use telemetry::FileAuditSink;
pub use telemetry::GatewayMetrics;
pub use telemetry::NoopAuditSink;
pub use telemetry::NoopMetrics;
pub use telemetry::RequestMetricEvent;
pub use telemetry::RequestOutcome;
pub use telemetry::RpcMethod;
pub use telemetry::StderrAuditSink;
pub use tooling::ToolDefinition;
pub use tooling::ToolName;
pub use tooling::tool_definitions;
pub use tools::AbortRequest;
pub use tools::AbortResponse;
pub use tools::ContinueRequest;
pub use tools::DiscoverRequest;
pub use tools::DiscoverResponse;
pub use tools::ExecuteOptions;
pub use tools::ExecuteRequest;
pub use tools::ExecuteResponse;
pub use tools::MetaToolRouter;
pub use tools::ReplanRequest;
pub use tools::SuggestionsPayload;
pub use tools::ToolError;
pub use wire::Components;
pub use wire::WireError;
pub use wire::wire;

#[cfg(test)]
mod tests {
    //! Test-only lint relaxations for panic-based assertions and debug output.
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
}
