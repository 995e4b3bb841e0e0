// pml-core/src/runtime/cache.rs
// ============================================================================
// Module: In-Memory Workflow Cache
// Description: TTL-bound workflow state cache and checkpoint store.
// Purpose: Provide deterministic in-process implementations without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides in-process implementations of [`WorkflowCache`] and
//! [`CheckpointStore`]. The cache enforces the one-hour TTL itself (expired
//! entries read as absent); every write refreshes the deadline. Suitable for
//! single-process deployments and tests; durable deployments use the SQLite
//! checkpoint store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crate::core::identifiers::CheckpointId;
use crate::core::identifiers::WorkflowId;
use crate::core::workflow::Checkpoint;
use crate::core::workflow::WorkflowState;
use crate::interfaces::CacheError;
use crate::interfaces::CheckpointStore;
use crate::interfaces::StoreError;
use crate::interfaces::WorkflowCache;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Workflow state TTL (one hour).
pub const WORKFLOW_STATE_TTL: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// SECTION: In-Memory Cache
// ============================================================================

/// Cache entry with its expiry deadline.
#[derive(Debug, Clone)]
struct Entry {
    /// Stored workflow state.
    state: WorkflowState,
    /// Expiry deadline.
    expires_at: Instant,
}

/// In-memory workflow state cache with TTL enforcement.
#[derive(Debug, Clone)]
pub struct InMemoryWorkflowCache {
    /// Entries keyed by workflow identifier.
    entries: Arc<Mutex<BTreeMap<String, Entry>>>,
    /// Entry TTL.
    ttl: Duration,
}

impl Default for InMemoryWorkflowCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkflowCache {
    /// Creates a cache with the standard one-hour TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(WORKFLOW_STATE_TTL)
    }

    /// Creates a cache with a custom TTL (used by tests).
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            ttl,
        }
    }

    /// Locks the entry map, mapping poisoning into a cache error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Entry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("workflow cache mutex poisoned".to_string()))
    }
}

impl WorkflowCache for InMemoryWorkflowCache {
    fn save(&self, workflow_id: &WorkflowId, state: &WorkflowState) -> Result<(), CacheError> {
        let mut guard = self.lock()?;
        guard.insert(
            workflow_id.as_str().to_string(),
            Entry {
                state: state.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    fn get(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowState>, CacheError> {
        let mut guard = self.lock()?;
        match guard.get(workflow_id.as_str()) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.state.clone())),
            Some(_) => {
                guard.remove(workflow_id.as_str());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn update(&self, workflow_id: &WorkflowId, state: &WorkflowState) -> Result<(), CacheError> {
        let mut guard = self.lock()?;
        let entry = guard
            .get_mut(workflow_id.as_str())
            .filter(|entry| entry.expires_at > Instant::now())
            .ok_or_else(|| CacheError::Missing(workflow_id.to_string()))?;
        entry.state = state.clone();
        entry.expires_at = Instant::now() + self.ttl;
        Ok(())
    }

    fn delete(&self, workflow_id: &WorkflowId) -> Result<(), CacheError> {
        self.lock()?.remove(workflow_id.as_str());
        Ok(())
    }

    fn extend(&self, workflow_id: &WorkflowId) -> Result<(), CacheError> {
        let mut guard = self.lock()?;
        let entry = guard
            .get_mut(workflow_id.as_str())
            .filter(|entry| entry.expires_at > Instant::now())
            .ok_or_else(|| CacheError::Missing(workflow_id.to_string()))?;
        entry.expires_at = Instant::now() + self.ttl;
        Ok(())
    }
}

// ============================================================================
// SECTION: In-Memory Checkpoint Store
// ============================================================================

/// In-memory checkpoint store for tests and single-process runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    /// Checkpoints per workflow, newest last.
    checkpoints: Arc<Mutex<BTreeMap<String, Vec<Checkpoint>>>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty checkpoint store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the checkpoint map, mapping poisoning into a store error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<Checkpoint>>>, StoreError>
    {
        self.checkpoints
            .lock()
            .map_err(|_| StoreError::Io("checkpoint store mutex poisoned".to_string()))
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint, keep: usize) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let list = guard.entry(checkpoint.workflow_id.as_str().to_string()).or_default();
        list.push(checkpoint.clone());
        while list.len() > keep.max(1) {
            list.remove(0);
        }
        Ok(())
    }

    fn latest(&self, workflow_id: &WorkflowId) -> Result<Option<Checkpoint>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.get(workflow_id.as_str()).and_then(|list| list.last().cloned()))
    }

    fn get(&self, id: &CheckpointId) -> Result<Option<Checkpoint>, StoreError> {
        let guard = self.lock()?;
        for list in guard.values() {
            if let Some(found) = list.iter().find(|checkpoint| &checkpoint.id == id) {
                return Ok(Some(found.clone()));
            }
        }
        Ok(None)
    }

    fn delete_for(&self, workflow_id: &WorkflowId) -> Result<(), StoreError> {
        self.lock()?.remove(workflow_id.as_str());
        Ok(())
    }
}
