// pml-core/tests/common/mod.rs
// ============================================================================
// Module: Executor Test Support
// Description: Deterministic collaborator doubles for runtime tests.
// Purpose: Drive the executor without network or sandbox processes.
// ============================================================================
//! ## Overview
//! Provides an invoker with scripted results, a sandbox echoing bindings, a
//! collecting event publisher, and a configurable speculation predictor.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Shared test support; not every test uses every helper."
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use pml_core::ArgumentValue;
use pml_core::EventPublisher;
use pml_core::GatewayEvent;
use pml_core::InvokeError;
use pml_core::PermissionSet;
use pml_core::SandboxError;
use pml_core::SandboxRequest;
use pml_core::SandboxResult;
use pml_core::SandboxWorker;
use pml_core::SpeculationPredictor;
use pml_core::Task;
use pml_core::TaskId;
use pml_core::TaskKind;
use pml_core::TaskMetadata;
use pml_core::ToolId;
use pml_core::ToolInvoker;
use pml_core::WorkflowId;
use serde_json::Value;
use serde_json::json;

/// Tool invoker with scripted per-tool results, latencies, and a call log.
pub struct ScriptedInvoker {
    /// Scripted results keyed by qualified tool name.
    results: Mutex<BTreeMap<String, Result<Value, String>>>,
    /// Scripted latency per qualified tool name, in milliseconds.
    delays: Mutex<BTreeMap<String, u64>>,
    /// Qualified tool names in invocation order.
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl Default for ScriptedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInvoker {
    /// Creates an invoker where every tool echoes its arguments.
    pub fn new() -> Self {
        Self {
            results: Mutex::new(BTreeMap::new()),
            delays: Mutex::new(BTreeMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Scripts a successful result for a tool.
    pub fn succeed(self, tool: &str, result: Value) -> Self {
        self.results.lock().unwrap().insert(tool.to_string(), Ok(result));
        self
    }

    /// Scripts a failure message for a tool.
    pub fn fail(self, tool: &str, message: &str) -> Self {
        self.results.lock().unwrap().insert(tool.to_string(), Err(message.to_string()));
        self
    }

    /// Scripts a latency for a tool.
    pub fn delay(self, tool: &str, delay_ms: u64) -> Self {
        self.delays.lock().unwrap().insert(tool.to_string(), delay_ms);
        self
    }

    /// Returns the recorded invocation order.
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        tool: &ToolId,
        arguments: &Value,
        _permission_set: PermissionSet,
    ) -> Result<Value, InvokeError> {
        self.calls.lock().unwrap().push(tool.to_string());
        let delay = self.delays.lock().unwrap().get(tool.as_str()).copied().unwrap_or(0);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        match self.results.lock().unwrap().get(tool.as_str()) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(message)) => Err(InvokeError::Failed(message.clone())),
            None => Ok(json!({ "echo": arguments })),
        }
    }

    fn available(&self, _tool: &ToolId) -> bool {
        true
    }
}

/// Sandbox double echoing its bindings as the execution result.
pub struct EchoSandbox {
    /// Number of executions performed.
    pub runs: AtomicUsize,
}

impl Default for EchoSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoSandbox {
    /// Creates the sandbox double.
    pub const fn new() -> Self {
        Self {
            runs: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SandboxWorker for EchoSandbox {
    async fn run(&self, request: SandboxRequest) -> Result<SandboxResult, SandboxError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let bindings: serde_json::Map<String, Value> =
            request.bindings.into_iter().collect();
        Ok(SandboxResult {
            result: Value::Object(bindings),
            traces: Vec::new(),
        })
    }
}

/// Event publisher collecting everything it sees.
#[derive(Default, Clone)]
pub struct CollectingPublisher {
    /// Collected events in emission order.
    pub events: Arc<Mutex<Vec<GatewayEvent>>>,
}

impl CollectingPublisher {
    /// Creates the collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of collected events.
    pub fn snapshot(&self) -> Vec<GatewayEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventPublisher for CollectingPublisher {
    fn publish(&self, event: GatewayEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Predictor speculating scripted tasks with fixed confidence and arguments.
#[derive(Default)]
pub struct ScriptedPredictor {
    /// Confidence per task identifier.
    pub confidences: BTreeMap<String, f64>,
    /// Predicted arguments per task identifier.
    pub arguments: BTreeMap<String, Value>,
}

impl SpeculationPredictor for ScriptedPredictor {
    fn confidence(&self, _workflow_id: &WorkflowId, task: &Task, _outcome: &str) -> f64 {
        self.confidences.get(task.id.as_str()).copied().unwrap_or(0.0)
    }

    fn predicted_arguments(&self, _workflow_id: &WorkflowId, task: &Task) -> Option<Value> {
        self.arguments.get(task.id.as_str()).cloned()
    }
}

/// Builds a tool-call task.
pub fn tool_task(id: &str, tool: &str, depends_on: &[&str]) -> Task {
    Task {
        id: TaskId::new(id),
        tool: ToolId::new(tool),
        kind: TaskKind::ToolCall,
        depends_on: depends_on.iter().map(|dep| TaskId::new(*dep)).collect(),
        arguments: BTreeMap::new(),
        static_code: None,
        condition: None,
        permission_set: PermissionSet::McpStandard,
        requires_approval: false,
        metadata: TaskMetadata::default(),
    }
}

/// Adds one argument to a task.
pub fn with_argument(mut task: Task, name: &str, argument: ArgumentValue) -> Task {
    task.arguments.insert(name.to_string(), argument);
    task
}
