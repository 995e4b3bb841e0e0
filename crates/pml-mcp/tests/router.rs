// pml-mcp/tests/router.rs
// ============================================================================
// Module: Meta-Tool Router Tests
// Description: Envelope routing, eager learning, approval, hybrid routing.
// ============================================================================
//! ## Overview
//! Drives the meta-tool surface end-to-end over a temporary store and a
//! scripted downstream invoker: code execution with eager learning and
//! dedup, the approval-gate continuation flow, boundary error codes, hybrid
//! `execute_locally` routing, and discover ranking.

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

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use pml_core::CapabilityId;
use pml_core::CapabilityStore;
use pml_core::ControlledExecutor;
use pml_core::DagSuggester;
use pml_core::ExecutorConfig;
use pml_core::InMemoryWorkflowCache;
use pml_core::InvokeError;
use pml_core::NoSpeculation;
use pml_core::NoopPublisher;
use pml_core::NoopRecorder;
use pml_core::PermissionSet;
use pml_core::SandboxError;
use pml_core::SandboxRequest;
use pml_core::SandboxResult;
use pml_core::SandboxWorker;
use pml_core::ToolId;
use pml_core::ToolIndex;
use pml_core::ToolInvoker;
use pml_core::runtime::CapabilityLearner;
use pml_core::runtime::CapabilityMatcher;
use pml_mcp::ExecuteOptions;
use pml_mcp::ExecuteRequest;
use pml_mcp::ExecuteResponse;
use pml_mcp::MetaToolRouter;
use pml_mcp::ToolError;
use pml_mcp::tool_definitions;
use pml_providers::DownstreamRegistry;
use pml_providers::HashEmbedder;
use pml_providers::ServerEntry;
use pml_store_sqlite::SqliteGatewayStore;
use pml_store_sqlite::SqliteStoreConfig;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Doubles
// ============================================================================

/// Invoker answering every tool with a scripted or echoed result.
struct ScriptedInvoker {
    /// Scripted results keyed by qualified tool name.
    results: Mutex<BTreeMap<String, Value>>,
}

impl Default for ScriptedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInvoker {
    /// Creates an invoker echoing arguments by default.
    fn new() -> Self {
        Self {
            results: Mutex::new(BTreeMap::new()),
        }
    }

    /// Scripts a result for a tool.
    fn succeed(self, tool: &str, result: Value) -> Self {
        self.results.lock().unwrap().insert(tool.to_string(), result);
        self
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
        match self.results.lock().unwrap().get(tool.as_str()) {
            Some(value) => Ok(value.clone()),
            None => Ok(json!({ "echo": arguments })),
        }
    }

    fn available(&self, _tool: &ToolId) -> bool {
        true
    }
}

/// Sandbox echoing its bindings.
struct EchoSandbox;

#[async_trait]
impl SandboxWorker for EchoSandbox {
    async fn run(&self, request: SandboxRequest) -> Result<SandboxResult, SandboxError> {
        let bindings: serde_json::Map<String, Value> = request.bindings.into_iter().collect();
        Ok(SandboxResult {
            result: Value::Object(bindings),
            traces: Vec::new(),
        })
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Builds a router over a temporary store and scripted collaborators.
fn harness(invoker: ScriptedInvoker) -> (MetaToolRouter, Arc<SqliteGatewayStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteGatewayStore::open(&SqliteStoreConfig::for_path(dir.path().join("gateway.db")))
            .unwrap(),
    );
    let embedder = Arc::new(HashEmbedder::new());
    let recorder = Arc::new(NoopRecorder);
    let publisher = Arc::new(NoopPublisher);

    let registry = DownstreamRegistry::new();
    for server in ["fs", "json", "api", "email"] {
        registry.register_server(server, ServerEntry {
            endpoint: url::Url::parse("http://127.0.0.1:1/rpc").unwrap(),
            tools: Vec::new(),
        });
    }

    let executor = Arc::new(ControlledExecutor::new(
        ExecutorConfig::default(),
        Arc::new(EchoSandbox),
        Arc::new(invoker),
        Arc::new(InMemoryWorkflowCache::new()),
        Arc::clone(&store) as Arc<dyn pml_core::CheckpointStore>,
        Arc::new(NoopPublisher),
        Arc::new(NoSpeculation),
    ));
    let matcher = Arc::new(CapabilityMatcher::new(
        Arc::clone(&store) as Arc<dyn CapabilityStore>,
        Arc::clone(&store) as Arc<dyn pml_core::DependencyGraphStore>,
        Arc::clone(&store) as Arc<dyn pml_core::ThresholdStore>,
        Arc::clone(&embedder) as Arc<dyn pml_core::Embedder>,
        Arc::clone(&recorder) as Arc<dyn pml_core::TraceRecorder>,
    ));
    let suggester = Arc::new(DagSuggester::new(
        matcher,
        Arc::clone(&store) as Arc<dyn ToolIndex>,
        Arc::clone(&store) as Arc<dyn pml_core::DependencyGraphStore>,
        Arc::clone(&embedder) as Arc<dyn pml_core::Embedder>,
    ));
    let learner = Arc::new(CapabilityLearner::new(
        Arc::clone(&store) as Arc<dyn CapabilityStore>,
        Arc::clone(&embedder) as Arc<dyn pml_core::Embedder>,
        Arc::clone(&publisher) as Arc<dyn pml_core::EventPublisher>,
    ));

    let router = MetaToolRouter::new(
        executor,
        suggester,
        learner,
        Arc::clone(&store) as Arc<dyn CapabilityStore>,
        Arc::clone(&store) as Arc<dyn ToolIndex>,
        Arc::clone(&store) as Arc<dyn pml_core::DependencyGraphStore>,
        Arc::clone(&store) as Arc<dyn pml_core::ThresholdStore>,
        embedder,
        recorder,
        publisher,
        registry,
    )
    .unwrap();
    (router, store, dir)
}

/// Builds an execute request for code.
fn code_request(code: &str, options: Option<ExecuteOptions>) -> ExecuteRequest {
    ExecuteRequest {
        code: Some(code.to_string()),
        intent: None,
        continue_workflow: None,
        options,
    }
}

// ============================================================================
// SECTION: Envelope Routing
// ============================================================================

/// Exactly five meta-tools are defined.
#[test]
fn test_meta_tool_surface_is_fixed() {
    let names: Vec<&str> =
        tool_definitions().iter().map(|definition| definition.name).collect();
    assert_eq!(names, vec!["discover", "execute", "abort", "continue", "replan"]);
}

/// Empty code answers with the EMPTY_CODE error code inside a success
/// envelope.
#[tokio::test]
async fn test_empty_code_error() {
    let (router, _store, _dir) = harness(ScriptedInvoker::new());
    let response = router.execute(code_request("   ", None)).await.unwrap();
    let ExecuteResponse::Success {
        error_code,
        result,
        ..
    } = response
    else {
        panic!("expected success envelope");
    };
    assert_eq!(error_code.as_deref(), Some("EMPTY_CODE"));
    assert!(result.is_none());
}

/// Schema validation rejects malformed tool input as a tool error.
#[tokio::test]
async fn test_invalid_input_rejected() {
    let (router, _store, _dir) = harness(ScriptedInvoker::new());
    let result = router.handle_tool_call("execute", json!({"code": 5})).await;
    assert!(matches!(result, Err(ToolError::InvalidInput(_))));

    let unknown = router.handle_tool_call("everything", json!({})).await;
    assert!(matches!(unknown, Err(ToolError::UnknownTool(_))));
}

// ============================================================================
// SECTION: Code Execution and Eager Learning
// ============================================================================

/// A successful code execution learns a capability; re-running the same
/// snippet with renamed variables dedups onto it and bumps usage.
#[tokio::test]
async fn test_execute_learns_and_dedups() {
    let (router, store, _dir) = harness(
        ScriptedInvoker::new()
            .succeed("fs:read", json!({"content": "body"}))
            .succeed("json:parse", json!({"value": 42})),
    );

    let first = "const f = await mcp.fs.read({path: args.p});\n\
                 return mcp.json.parse({text: f.content});";
    let second = "const data = await mcp.fs.read({path: args.p});\n\
                  return mcp.json.parse({text: data.content});";
    let mut options = ExecuteOptions::default();
    options.parameters.insert("p".to_string(), json!("notes.txt"));

    let response =
        router.execute(code_request(first, Some(options.clone()))).await.unwrap();
    let ExecuteResponse::Success {
        capability_id: Some(first_id),
        error_code: None,
        result: Some(result),
        ..
    } = response
    else {
        panic!("expected learned success");
    };
    assert_eq!(result, json!({"value": 42}));

    let response =
        router.execute(code_request(second, Some(options))).await.unwrap();
    let ExecuteResponse::Success {
        capability_id: Some(second_id),
        ..
    } = response
    else {
        panic!("expected dedup success");
    };
    assert_eq!(first_id, second_id);

    let stored =
        CapabilityStore::get(store.as_ref(), &CapabilityId::new(first_id)).unwrap().unwrap();
    assert_eq!(stored.stats.usage_count, 2);
    assert!(stored.code_hash.is_some());
    assert!(stored.code_snippet.contains("_n1"));
}

/// A missing parameter surfaces as MISSING_PARAMETER inside the envelope.
#[tokio::test]
async fn test_missing_parameter_code() {
    let (router, _store, _dir) = harness(ScriptedInvoker::new());
    let response = router
        .execute(code_request("await mcp.fs.read({path: args.p});", None))
        .await
        .unwrap();
    let ExecuteResponse::Success {
        error_code,
        ..
    } = response
    else {
        panic!("expected success envelope");
    };
    assert_eq!(error_code.as_deref(), Some("MISSING_PARAMETER"));
}

// ============================================================================
// SECTION: Approval Continuation
// ============================================================================

/// The approval flow: pause, reject (aborted, result null), reject again
/// (no-op), then a fresh run approves and completes.
#[tokio::test]
async fn test_approval_continuation_flow() {
    let (router, _store, _dir) =
        harness(ScriptedInvoker::new().succeed("email:send", json!({"sent": true})));
    let code = "await mcp.email.send({to: \"a@b.c\"});";
    let options = ExecuteOptions {
        require_approval: true,
        ..ExecuteOptions::default()
    };

    let response =
        router.execute(code_request(code, Some(options.clone()))).await.unwrap();
    let ExecuteResponse::ApprovalRequired {
        workflow_id,
        checkpoint_id,
        ..
    } = response
    else {
        panic!("expected approval_required");
    };
    assert!(!checkpoint_id.is_empty());

    let rejected = router
        .continue_workflow(pml_mcp::ContinueRequest {
            workflow_id: workflow_id.clone(),
            approved: false,
            checkpoint_id: None,
            options: None,
        })
        .await
        .unwrap();
    let ExecuteResponse::Success {
        result,
        error_code,
        ..
    } = rejected
    else {
        panic!("expected success envelope");
    };
    assert!(result.is_none());
    assert!(error_code.is_none());

    // The second rejection is a no-op with the same aborted shape.
    let again = router
        .continue_workflow(pml_mcp::ContinueRequest {
            workflow_id,
            approved: false,
            checkpoint_id: None,
            options: None,
        })
        .await
        .unwrap();
    assert!(matches!(again, ExecuteResponse::Success { result: None, .. }));

    // A fresh run approves and completes with the tool result.
    let response = router.execute(code_request(code, Some(options))).await.unwrap();
    let ExecuteResponse::ApprovalRequired {
        workflow_id,
        ..
    } = response
    else {
        panic!("expected approval_required");
    };
    let approved = router
        .continue_workflow(pml_mcp::ContinueRequest {
            workflow_id,
            approved: true,
            checkpoint_id: None,
            options: None,
        })
        .await
        .unwrap();
    let ExecuteResponse::Success {
        result: Some(result),
        ..
    } = approved
    else {
        panic!("expected completed success");
    };
    assert_eq!(result, json!({"sent": true}));
}

// ============================================================================
// SECTION: Hybrid Routing
// ============================================================================

/// A DAG needing declared client-only tools hands execution to the client.
#[tokio::test]
async fn test_execute_locally_for_client_tools() {
    let (router, _store, _dir) = harness(ScriptedInvoker::new());
    let code = "await mcp.browser.click({selector: \"#go\"});";
    let options = ExecuteOptions {
        client_tools: vec!["browser:click".to_string()],
        ..ExecuteOptions::default()
    };

    let response = router.execute(code_request(code, Some(options))).await.unwrap();
    let ExecuteResponse::ExecuteLocally {
        code: returned,
        client_tools,
        dag,
        ..
    } = response
    else {
        panic!("expected execute_locally");
    };
    assert_eq!(returned, code);
    assert_eq!(client_tools, vec!["browser:click".to_string()]);
    assert_eq!(dag.tasks.len(), 1);
}

// ============================================================================
// SECTION: Discover
// ============================================================================

/// Discover ranks seeded tools and reports graph metadata.
#[tokio::test]
async fn test_discover_ranks_tools() {
    let (router, store, _dir) = harness(ScriptedInvoker::new());
    let read = ToolId::qualified("fs", "read");
    let send = ToolId::qualified("email", "send");
    let read_embedding = HashEmbedder::embed_text("read a file from disk").unwrap();
    let send_embedding = HashEmbedder::embed_text("send an email message").unwrap();
    store.register_tool(&read, "read a file from disk", &read_embedding).unwrap();
    store.register_tool(&send, "send an email message", &send_embedding).unwrap();

    let response = router
        .discover(&pml_mcp::DiscoverRequest {
            query: "read a file from disk".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.tools.first().map(|tool| tool.name.clone()), Some("fs:read".to_string()));
    assert!((response.meta.alpha - 1.0).abs() < 1e-9);
    assert_eq!(response.meta.edge_count, 0);
}
