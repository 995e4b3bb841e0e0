// pml-bus/src/lib.rs
// ============================================================================
// Module: PML Bus Library
// Description: Event bus, peer fan-out, and trace sink for the PML Gateway.
// Purpose: Fan out typed events and persist traces without stalling producers.
// Dependencies: pml-core, tokio
// ============================================================================

//! ## Overview
//! PML bus provides the gateway's in-process pub/sub with cross-process
//! fan-out plus the buffered trace pipeline feeding the persistent store.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod bus;
pub mod fanout;
pub mod sink;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use bus::EventBus;
pub use bus::EventFilter;
pub use bus::HandlerHandle;
pub use bus::SUBSCRIBER_QUEUE_CAPACITY;
pub use bus::Subscription;
pub use fanout::PeerFanout;
pub use fanout::ProcessGroupFanout;
pub use sink::TraceSink;
pub use sink::TraceSinkConfig;
pub use sink::TraceSinkHandle;

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
