// pml-bus/src/fanout.rs
// ============================================================================
// Module: Peer Fan-Out
// Description: Cross-process event envelope delivery with loop prevention.
// Purpose: Mirror every emitted event onto a named broadcast channel.
// Dependencies: pml-core, tokio
// ============================================================================

//! ## Overview
//! Every emitted event is also published to a broadcast channel; a paired
//! relay re-injects peer envelopes into the local bus. Loop prevention relies
//! on the origin tag, not on the channel primitive, so deployments may
//! substitute any transport (a relay subprocess, a socket) that carries
//! [`EventEnvelope`] values unchanged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use pml_core::EventEnvelope;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bus::EventBus;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Outbound half of the cross-process fan-out.
pub trait PeerFanout: Send + Sync {
    /// Publishes an envelope to peers. Must not block and must not fail the
    /// caller; delivery is best-effort.
    fn send(&self, envelope: &EventEnvelope);
}

// ============================================================================
// SECTION: Process-Group Fan-Out
// ============================================================================

/// Default broadcast channel capacity.
const CHANNEL_CAPACITY: usize = 1024;

/// Broadcast-channel fan-out shared by a group of buses.
#[derive(Clone)]
pub struct ProcessGroupFanout {
    /// Shared broadcast sender.
    tx: broadcast::Sender<EventEnvelope>,
}

impl Default for ProcessGroupFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessGroupFanout {
    /// Creates a fan-out channel.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
        }
    }

    /// Spawns a relay re-injecting peer envelopes into the bus.
    ///
    /// The bus's own envelopes come back through the channel and are dropped
    /// by the origin check inside [`EventBus::inject`].
    #[must_use]
    pub fn attach(&self, bus: EventBus) -> JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => bus.inject(&envelope),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl PeerFanout for ProcessGroupFanout {
    fn send(&self, envelope: &EventEnvelope) {
        // Send fails only when no peer is listening; that is not an error.
        let _ = self.tx.send(envelope.clone());
    }
}
