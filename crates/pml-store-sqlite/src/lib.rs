// pml-store-sqlite/src/lib.rs
// ============================================================================
// Module: PML SQLite Store Library
// Description: Durable SQLite-backed stores for the PML Gateway.
// Purpose: Persist capabilities, traces, checkpoints, thresholds, and graphs.
// Dependencies: pml-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate implements every persistent gateway interface over one SQLite
//! WAL database with deterministic serialization and idempotent trace
//! inserts.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteGatewayStore;
pub use store::SqliteJournalMode;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;

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
