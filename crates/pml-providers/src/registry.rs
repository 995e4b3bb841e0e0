// pml-providers/src/registry.rs
// ============================================================================
// Module: Downstream Registry
// Description: Registry of downstream MCP servers and client-only tools.
// Purpose: Resolve qualified tool names to endpoints and availability.
// Dependencies: pml-core, url
// ============================================================================

//! ## Overview
//! The registry maps downstream server names to endpoints and their tool
//! catalogs, and tracks tools only the connected client can execute. Hybrid
//! routing consults it to decide between server-side execution and an
//! `execute_locally` hand-back.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use pml_core::ToolId;
use url::Url;

// ============================================================================
// SECTION: Entries
// ============================================================================

/// One registered downstream server.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    /// JSON-RPC endpoint of the server.
    pub endpoint: Url,
    /// Known tools and their descriptions.
    pub tools: Vec<(String, String)>,
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Process-wide downstream registry.
#[derive(Debug, Default, Clone)]
pub struct DownstreamRegistry {
    /// Registered servers keyed by server name.
    servers: Arc<Mutex<BTreeMap<String, ServerEntry>>>,
    /// Tools only the connected client can execute.
    client_tools: Arc<Mutex<BTreeSet<String>>>,
}

impl DownstreamRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a downstream server.
    pub fn register_server(&self, name: impl Into<String>, entry: ServerEntry) {
        if let Ok(mut guard) = self.servers.lock() {
            guard.insert(name.into(), entry);
        }
    }

    /// Registers a client-only tool.
    pub fn register_client_tool(&self, tool: &ToolId) {
        if let Ok(mut guard) = self.client_tools.lock() {
            guard.insert(tool.as_str().to_string());
        }
    }

    /// Returns the endpoint for a server, if registered.
    #[must_use]
    pub fn server_endpoint(&self, server: &str) -> Option<Url> {
        self.servers.lock().ok()?.get(server).map(|entry| entry.endpoint.clone())
    }

    /// Returns true when the tool's server is registered with this gateway.
    #[must_use]
    pub fn is_server_tool(&self, tool: &ToolId) -> bool {
        if tool.is_pseudo() {
            return true;
        }
        tool.server().is_some_and(|server| {
            self.servers.lock().ok().is_some_and(|guard| guard.contains_key(server))
        })
    }

    /// Returns true when the tool is only available on the client.
    #[must_use]
    pub fn is_client_tool(&self, tool: &ToolId) -> bool {
        self.client_tools
            .lock()
            .ok()
            .is_some_and(|guard| guard.contains(tool.as_str()))
    }

    /// Returns every known server tool with its description.
    #[must_use]
    pub fn all_tools(&self) -> Vec<(ToolId, String)> {
        let Ok(guard) = self.servers.lock() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (server, entry) in guard.iter() {
            for (tool, description) in &entry.tools {
                out.push((ToolId::qualified(server, tool), description.clone()));
            }
        }
        out
    }
}
