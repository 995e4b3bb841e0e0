// pml-bus/tests/bus.rs
// ============================================================================
// Module: Event Bus Tests
// Description: Delivery order, filters, overflow shedding, loop prevention.
// ============================================================================
//! ## Overview
//! Validates per-subscriber ordering, kind filters, bounded-queue overflow
//! accounting, handler failure isolation, and origin-tagged fan-out loop
//! prevention.

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

use std::sync::Arc;
use std::time::Duration;

use pml_bus::EventBus;
use pml_bus::EventFilter;
use pml_bus::PeerFanout;
use pml_bus::ProcessGroupFanout;
use pml_core::EventKind;
use pml_core::GatewayEvent;
use pml_core::WorkflowId;

/// Builds a heartbeat event with a distinguishing counter.
fn heartbeat(completed: usize) -> GatewayEvent {
    GatewayEvent::WorkflowHeartbeat {
        workflow_id: WorkflowId::new("wf-bus"),
        completed,
        pending: 0,
    }
}

/// Builds a workflow-started event.
fn started(id: &str) -> GatewayEvent {
    GatewayEvent::WorkflowStarted {
        workflow_id: WorkflowId::new(id),
        intent: None,
    }
}

/// Events deliver to one subscriber in emission order.
#[tokio::test]
async fn test_delivery_in_emission_order() {
    let bus = EventBus::new("origin-a");
    let mut subscription = bus.subscribe(EventFilter::All);

    for index in 0..5 {
        bus.emit(heartbeat(index));
    }
    for index in 0..5 {
        let event = subscription.recv().await;
        assert_eq!(event, heartbeat(index));
    }
}

/// Kind filters only deliver matching events.
#[tokio::test]
async fn test_kind_filter() {
    let bus = EventBus::new("origin-a");
    let mut workflow_only = bus.subscribe(EventFilter::Kind(EventKind::Workflow));

    bus.emit(heartbeat(1));
    bus.emit(started("wf-filter"));

    let event = workflow_only.recv().await;
    assert_eq!(event, started("wf-filter"));
    assert!(workflow_only.try_recv().is_none());
}

/// Overflow sheds the oldest event and counts the drop.
#[tokio::test]
async fn test_overflow_drops_oldest() {
    let bus = EventBus::with_capacity("origin-a", 3);
    let mut subscription = bus.subscribe(EventFilter::All);

    for index in 0..5 {
        bus.emit(heartbeat(index));
    }
    assert_eq!(subscription.dropped(), 2);
    // The two oldest events were shed.
    assert_eq!(subscription.recv().await, heartbeat(2));
    assert_eq!(subscription.recv().await, heartbeat(3));
    assert_eq!(subscription.recv().await, heartbeat(4));
}

/// A failing handler never affects other subscribers.
#[tokio::test]
async fn test_handler_failure_isolated() {
    let bus = EventBus::new("origin-a");
    let failing = bus.on(EventFilter::All, |_event| Err("handler broke".to_string()));
    let mut healthy = bus.subscribe(EventFilter::All);

    bus.emit(heartbeat(7));
    assert_eq!(healthy.recv().await, heartbeat(7));

    // Give the failing drain task a moment to observe the event.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(failing.errors(), 1);
}

/// Peer fan-out delivers to other buses exactly once and never loops back.
#[tokio::test]
async fn test_fanout_loop_prevention() {
    let fanout = Arc::new(ProcessGroupFanout::new());
    let bus_a = EventBus::new("origin-a");
    let bus_b = EventBus::new("origin-b");
    bus_a.set_fanout(Arc::clone(&fanout) as Arc<dyn PeerFanout>);
    bus_b.set_fanout(Arc::clone(&fanout) as Arc<dyn PeerFanout>);
    let _relay_a = fanout.attach(bus_a.clone());
    let _relay_b = fanout.attach(bus_b.clone());

    let mut on_a = bus_a.subscribe(EventFilter::All);
    let mut on_b = bus_b.subscribe(EventFilter::All);

    bus_a.emit(started("wf-peer"));

    // Local delivery on A, relayed delivery on B.
    assert_eq!(on_a.recv().await, started("wf-peer"));
    assert_eq!(on_b.recv().await, started("wf-peer"));

    // No echo: A must not receive its own event again through the channel.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(on_a.try_recv().is_none());
    assert!(on_b.try_recv().is_none());
}
