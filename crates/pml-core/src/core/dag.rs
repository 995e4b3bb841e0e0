// pml-core/src/core/dag.rs
// ============================================================================
// Module: PML Gateway DAG Model
// Description: Executable DAG structure, typed edges, and validation.
// Purpose: Provide the canonical, validated graph consumed by the executor.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A DAG is a totally-ordered-by-id set of tasks plus typed edges. Validation
//! rejects cycles, self-loops, and dangling references before any task is
//! dispatched. Topological layers drive the executor's deterministic dispatch
//! order (layer ascending, then task id ascending).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::TaskId;
use crate::core::task::Task;

// ============================================================================
// SECTION: Edge Types
// ============================================================================

/// Typed edge classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Plain ordering dependency.
    Sequence,
    /// Branch edge guarded by a decision outcome.
    Conditional,
    /// Data-provision dependency.
    Provides,
    /// Containment of a nested structure.
    Contains,
    /// Fallback path taken when the source task fails.
    Alternative,
}

/// Directed edge between two tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    /// Source task identifier.
    pub from: TaskId,
    /// Target task identifier.
    pub to: TaskId,
    /// Edge classification.
    pub kind: EdgeKind,
    /// Decision outcome guarding a `Conditional` edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// DAG validation errors.
#[derive(Debug, Error)]
pub enum DagError {
    /// The graph contains a dependency cycle.
    #[error("dependency cycle involving task: {0}")]
    Cycle(String),
    /// A task depends on itself.
    #[error("self-loop on task: {0}")]
    SelfLoop(String),
    /// A dependency or edge references a task that does not exist.
    #[error("missing dependency: {0}")]
    MissingDependency(String),
    /// Two tasks share an identifier.
    #[error("duplicate task identifier: {0}")]
    DuplicateTask(String),
}

// ============================================================================
// SECTION: DAG
// ============================================================================

/// Executable DAG of tasks and typed edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    /// Tasks ordered by identifier.
    pub tasks: Vec<Task>,
    /// Typed edges between tasks.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Dag {
    /// Creates a DAG from tasks and edges.
    #[must_use]
    pub const fn new(tasks: Vec<Task>, edges: Vec<Edge>) -> Self {
        Self {
            tasks,
            edges,
        }
    }

    /// Returns the task with the provided identifier.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    /// Validates identifiers, dependencies, and acyclicity.
    ///
    /// # Errors
    ///
    /// Returns [`DagError`] when the graph violates a structural invariant.
    pub fn validate(&self) -> Result<(), DagError> {
        let mut ids = BTreeSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id.clone()) {
                return Err(DagError::DuplicateTask(task.id.to_string()));
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(DagError::SelfLoop(task.id.to_string()));
                }
                if !ids.contains(dep) {
                    return Err(DagError::MissingDependency(dep.to_string()));
                }
            }
        }

        for edge in &self.edges {
            if edge.from == edge.to {
                return Err(DagError::SelfLoop(edge.from.to_string()));
            }
            if !ids.contains(&edge.from) {
                return Err(DagError::MissingDependency(edge.from.to_string()));
            }
            if !ids.contains(&edge.to) {
                return Err(DagError::MissingDependency(edge.to.to_string()));
            }
        }

        self.layers().map(|_| ())
    }

    /// Computes topological layers over dependencies and ordering edges.
    ///
    /// Layer zero holds tasks with no predecessors; each subsequent layer
    /// holds tasks whose predecessors all sit in earlier layers. Tasks within
    /// a layer are ordered by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DagError::Cycle`] when no topological order exists.
    pub fn layers(&self) -> Result<Vec<Vec<TaskId>>, DagError> {
        let mut remaining: BTreeMap<TaskId, BTreeSet<TaskId>> = self
            .tasks
            .iter()
            .map(|task| (task.id.clone(), self.predecessors(&task.id)))
            .collect();

        let mut layers = Vec::new();
        while !remaining.is_empty() {
            let ready: Vec<TaskId> = remaining
                .iter()
                .filter(|(_, preds)| preds.is_empty())
                .map(|(id, _)| id.clone())
                .collect();
            if ready.is_empty() {
                let stuck = remaining
                    .keys()
                    .next()
                    .map_or_else(String::new, ToString::to_string);
                return Err(DagError::Cycle(stuck));
            }
            for id in &ready {
                remaining.remove(id);
            }
            for preds in remaining.values_mut() {
                for id in &ready {
                    preds.remove(id);
                }
            }
            layers.push(ready);
        }
        Ok(layers)
    }

    /// Returns the layer index of each task, keyed by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DagError::Cycle`] when no topological order exists.
    pub fn layer_index(&self) -> Result<BTreeMap<TaskId, usize>, DagError> {
        let mut index = BTreeMap::new();
        for (layer, ids) in self.layers()?.iter().enumerate() {
            for id in ids {
                index.insert(id.clone(), layer);
            }
        }
        Ok(index)
    }

    /// Returns the full predecessor set of a task (dependencies plus
    /// ordering, provision, and guard edges).
    #[must_use]
    pub fn predecessors(&self, id: &TaskId) -> BTreeSet<TaskId> {
        let mut preds: BTreeSet<TaskId> = self
            .task(id)
            .map(|task| task.depends_on.iter().cloned().collect())
            .unwrap_or_default();
        for edge in &self.edges {
            if &edge.to == id && edge.kind != EdgeKind::Alternative {
                preds.insert(edge.from.clone());
            }
        }
        preds
    }

    /// Returns the guards of a task: decision tasks plus the required
    /// outcomes, derived from incoming conditional edges.
    #[must_use]
    pub fn guards(&self, id: &TaskId) -> Vec<(TaskId, String)> {
        self.edges
            .iter()
            .filter(|edge| &edge.to == id && edge.kind == EdgeKind::Conditional)
            .filter_map(|edge| {
                edge.outcome.as_ref().map(|outcome| (edge.from.clone(), outcome.clone()))
            })
            .collect()
    }

    /// Returns tasks that serve as alternatives for the provided task.
    #[must_use]
    pub fn alternatives(&self, id: &TaskId) -> Vec<TaskId> {
        self.edges
            .iter()
            .filter(|edge| &edge.from == id && edge.kind == EdgeKind::Alternative)
            .map(|edge| edge.to.clone())
            .collect()
    }

    /// Returns the transitive downstream closure of a task.
    #[must_use]
    pub fn downstream(&self, id: &TaskId) -> BTreeSet<TaskId> {
        let mut closure = BTreeSet::new();
        let mut frontier = vec![id.clone()];
        while let Some(current) = frontier.pop() {
            for task in &self.tasks {
                let depends = task.depends_on.contains(&current)
                    || self.edges.iter().any(|edge| {
                        edge.from == current
                            && edge.to == task.id
                            && edge.kind != EdgeKind::Alternative
                    });
                if depends && closure.insert(task.id.clone()) {
                    frontier.push(task.id.clone());
                }
            }
        }
        closure
    }

    /// Returns the qualified tool names referenced by the DAG, deduplicated
    /// and ordered.
    #[must_use]
    pub fn tools(&self) -> Vec<crate::core::identifiers::ToolId> {
        let mut tools: Vec<_> = self
            .tasks
            .iter()
            .map(|task| task.tool.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        tools.sort();
        tools
    }
}
