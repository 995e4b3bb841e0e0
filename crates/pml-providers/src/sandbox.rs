// pml-providers/src/sandbox.rs
// ============================================================================
// Module: Sandbox Worker Client
// Description: HTTP client for the sandboxed code-execution collaborator.
// Purpose: Run snippet code with bindings under a permission set.
// Dependencies: pml-core, reqwest
// ============================================================================

//! ## Overview
//! The sandbox worker is an opaque collaborator
//! (`run(code, toolBindings, permissions)`); this client forwards requests to
//! its HTTP surface and maps refusals and timeouts onto the sandbox error
//! taxonomy.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use pml_core::SandboxError;
use pml_core::SandboxRequest;
use pml_core::SandboxResult;
use pml_core::SandboxWorker;
use url::Url;

// ============================================================================
// SECTION: Client
// ============================================================================

/// HTTP client for the sandbox worker pool.
pub struct HttpSandboxWorker {
    /// Worker endpoint.
    endpoint: Url,
    /// Shared HTTP client.
    client: reqwest::Client,
}

impl HttpSandboxWorker {
    /// Creates a client for the provided worker endpoint.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SandboxWorker for HttpSandboxWorker {
    async fn run(&self, request: SandboxRequest) -> Result<SandboxResult, SandboxError> {
        let timeout = Duration::from_millis(request.timeout_ms.max(1));
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SandboxError::Timeout
                } else {
                    SandboxError::Failed(err.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 403 {
            return Err(SandboxError::Denied("sandbox rejected permission set".to_string()));
        }
        if status.as_u16() == 408 {
            return Err(SandboxError::Timeout);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::Failed(format!("sandbox returned {status}: {body}")));
        }
        response.json().await.map_err(|err| SandboxError::Failed(err.to_string()))
    }
}
