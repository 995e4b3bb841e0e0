// pml-mcp/src/wire.rs
// ============================================================================
// Module: Component Wiring
// Description: Single composition root building the gateway from config.
// Purpose: Construct and connect every subsystem in one place.
// Dependencies: pml-bus, pml-config, pml-core, pml-providers, pml-store-sqlite
// ============================================================================

//! ## Overview
//! `wire` is the only place components learn about each other's concrete
//! types; everything downstream holds interfaces. The function opens the
//! store, spawns the trace sink, attaches the event fan-out, seeds the
//! semantic tool index from the downstream declarations, and assembles the
//! executor, matcher, suggester, learner, and router.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use pml_bus::EventBus;
use pml_bus::ProcessGroupFanout;
use pml_bus::TraceSink;
use pml_bus::TraceSinkConfig;
use pml_config::EmbeddingProvider;
use pml_config::GatewayConfig;
use pml_core::CapabilityStore;
use pml_core::ControlledExecutor;
use pml_core::DagSuggester;
use pml_core::Embedder;
use pml_core::ExecutorConfig;
use pml_core::InMemoryWorkflowCache;
use pml_core::NoSpeculation;
use pml_core::SandboxError;
use pml_core::SandboxRequest;
use pml_core::SandboxResult;
use pml_core::SandboxWorker;
use pml_core::SpeculationPredictor;
use pml_core::ToolId;
use pml_core::ToolIndex;
use pml_core::runtime::CapabilityLearner;
use pml_core::runtime::CapabilityMatcher;
use pml_providers::DownstreamRegistry;
use pml_providers::HashEmbedder;
use pml_providers::HttpEmbedder;
use pml_providers::HttpSandboxWorker;
use pml_providers::HttpToolInvoker;
use pml_providers::ServerEntry;
use pml_store_sqlite::SqliteGatewayStore;
use pml_store_sqlite::SqliteStoreConfig;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::tools::MetaToolRouter;
use crate::tools::ToolError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Wiring errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// Opening the store failed.
    #[error("store error: {0}")]
    Store(String),
    /// An endpoint failed to parse.
    #[error("endpoint error: {0}")]
    Endpoint(String),
    /// Router construction failed.
    #[error(transparent)]
    Router(#[from] ToolError),
}

// ============================================================================
// SECTION: Components
// ============================================================================

/// Fully wired gateway components.
pub struct Components {
    /// Meta-tool router.
    pub router: MetaToolRouter,
    /// Event bus.
    pub bus: EventBus,
    /// Trace sink (close on shutdown to flush the remainder).
    pub sink: TraceSink,
    /// Downstream registry.
    pub registry: DownstreamRegistry,
}

/// Sandbox placeholder used when no worker endpoint is configured.
struct UnavailableSandbox;

#[async_trait]
impl SandboxWorker for UnavailableSandbox {
    async fn run(&self, _request: SandboxRequest) -> Result<SandboxResult, SandboxError> {
        Err(SandboxError::Failed("sandbox worker is not configured".to_string()))
    }
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

/// Builds every gateway component from validated configuration.
///
/// # Errors
///
/// Returns [`WireError`] when the store cannot open, an endpoint is invalid,
/// or router construction fails.
pub async fn wire(config: &GatewayConfig) -> Result<Components, WireError> {
    // Storage.
    let store = Arc::new(
        SqliteGatewayStore::open(&SqliteStoreConfig::for_path(&config.store.db_path))
            .map_err(|err| WireError::Store(err.to_string()))?,
    );

    // Event bus with process-group fan-out.
    let bus = EventBus::new(format!("gateway-{}", Uuid::new_v4()));
    let fanout = Arc::new(ProcessGroupFanout::new());
    bus.set_fanout(Arc::clone(&fanout) as Arc<dyn pml_bus::PeerFanout>);
    let _relay = fanout.attach(bus.clone());

    // Trace sink.
    let sink = TraceSink::spawn(
        Arc::clone(&store) as Arc<dyn pml_core::TraceStore>,
        TraceSinkConfig {
            buffer_size: config.trace_sink.buffer_size,
            flush_interval_ms: config.trace_sink.flush_interval_ms,
        },
    );
    let recorder = Arc::new(sink.handle());

    // Collaborators.
    let embedder: Arc<dyn Embedder> = match config.embedding.provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbedder::new()),
        EmbeddingProvider::Http => {
            let raw = config.embedding.endpoint.clone().unwrap_or_default();
            let endpoint =
                Url::parse(&raw).map_err(|err| WireError::Endpoint(err.to_string()))?;
            Arc::new(HttpEmbedder::new(endpoint))
        }
    };
    let sandbox: Arc<dyn SandboxWorker> = match &config.sandbox.endpoint {
        Some(raw) => {
            let endpoint =
                Url::parse(raw).map_err(|err| WireError::Endpoint(err.to_string()))?;
            Arc::new(HttpSandboxWorker::new(endpoint))
        }
        None => Arc::new(UnavailableSandbox),
    };

    // Downstream registry and semantic tool index.
    let registry = DownstreamRegistry::new();
    for server in &config.downstream {
        let endpoint = Url::parse(&server.endpoint)
            .map_err(|err| WireError::Endpoint(err.to_string()))?;
        registry.register_server(server.name.clone(), ServerEntry {
            endpoint,
            tools: server
                .tools
                .iter()
                .map(|tool| (tool.name.clone(), tool.description.clone()))
                .collect(),
        });
        for tool in &server.tools {
            let qualified = ToolId::qualified(&server.name, &tool.name);
            let text = if tool.description.is_empty() { &tool.name } else { &tool.description };
            if let Ok(embedding) = embedder.embed(text).await {
                let index: &dyn ToolIndex = store.as_ref();
                let _ = index.register_tool(&qualified, &tool.description, &embedding);
            }
        }
    }
    let invoker = Arc::new(HttpToolInvoker::new(registry.clone()));

    // Executor.
    let executor = Arc::new(ControlledExecutor::new(
        ExecutorConfig {
            max_concurrency: config.executor.max_concurrency,
            default_task_timeout_ms: config.executor.default_task_timeout_ms,
            abort_timeout_ms: config.executor.abort_timeout_ms,
            checkpoints_per_workflow: config.executor.checkpoints_per_workflow,
            checkpoint_every_layer: config.executor.checkpoint_every_layer,
            speculation_threshold: config.executor.speculation_threshold,
            dangerous_patterns: config.executor.dangerous_patterns.clone(),
            allow_escalation: config.executor.allow_escalation,
        },
        Arc::clone(&sandbox),
        invoker,
        Arc::new(InMemoryWorkflowCache::new()),
        Arc::clone(&store) as Arc<dyn pml_core::CheckpointStore>,
        Arc::new(bus.clone()),
        Arc::new(NoSpeculation) as Arc<dyn SpeculationPredictor>,
    ));

    // Matching pipeline.
    let matcher = Arc::new(CapabilityMatcher::new(
        Arc::clone(&store) as Arc<dyn CapabilityStore>,
        Arc::clone(&store) as Arc<dyn pml_core::DependencyGraphStore>,
        Arc::clone(&store) as Arc<dyn pml_core::ThresholdStore>,
        Arc::clone(&embedder),
        Arc::clone(&recorder) as Arc<dyn pml_core::TraceRecorder>,
    ));
    let suggester = Arc::new(DagSuggester::new(
        matcher,
        Arc::clone(&store) as Arc<dyn ToolIndex>,
        Arc::clone(&store) as Arc<dyn pml_core::DependencyGraphStore>,
        Arc::clone(&embedder),
    ));
    let learner = Arc::new(CapabilityLearner::new(
        Arc::clone(&store) as Arc<dyn CapabilityStore>,
        Arc::clone(&embedder),
        Arc::new(bus.clone()),
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
        Arc::clone(&recorder) as Arc<dyn pml_core::TraceRecorder>,
        Arc::new(bus.clone()),
        registry.clone(),
    )?;

    Ok(Components {
        router,
        bus,
        sink,
        registry,
    })
}
