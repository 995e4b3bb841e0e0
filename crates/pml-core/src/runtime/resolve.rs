// pml-core/src/runtime/resolve.rs
// ============================================================================
// Module: Argument Resolution
// Description: Materialization of tagged argument values before dispatch.
// Purpose: Guarantee no tagged value ever reaches a tool invocation.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Before dispatch every argument is materialized: literals pass through,
//! parameters come from the execution context, and references resolve against
//! completed task results, tracked literal bindings, then parameters, in that
//! order. Template references (backtick form) interpolate each `${...}` part
//! through the same resolution. The materialized argument map also yields the
//! fingerprint that guards speculation-cache consumption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::TaskId;
use crate::core::task::ArgumentValue;
use crate::core::task::Task;
use crate::structure::folding::stringify;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Argument materialization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A referenced parameter was not supplied.
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    /// A reference expression could not be resolved.
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
}

impl ResolveError {
    /// Returns the stable wire code for the failure.
    #[must_use]
    pub const fn as_code(&self) -> &'static str {
        match self {
            Self::MissingParameter(_) => "MISSING_PARAMETER",
            Self::UnresolvedReference(_) => "UNRESOLVED_REFERENCE",
        }
    }
}

// ============================================================================
// SECTION: Resolution Context
// ============================================================================

/// Lookup context for argument materialization.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Caller-supplied parameters.
    pub parameters: &'a BTreeMap<String, Value>,
    /// Literal bindings tracked by the structure builder.
    pub literal_bindings: &'a BTreeMap<String, Value>,
    /// Completed task results keyed by task identifier.
    pub results: &'a BTreeMap<TaskId, Value>,
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Materializes every argument of a task into a JSON object.
///
/// # Errors
///
/// Returns [`ResolveError`] when a parameter is missing or a reference does
/// not resolve.
pub fn resolve_arguments(task: &Task, ctx: &ResolveContext<'_>) -> Result<Value, ResolveError> {
    let mut out = serde_json::Map::new();
    for (name, argument) in &task.arguments {
        out.insert(name.clone(), resolve_argument(argument, ctx)?);
    }
    Ok(Value::Object(out))
}

/// Materializes one argument value.
///
/// # Errors
///
/// Returns [`ResolveError`] when the argument cannot be materialized.
pub fn resolve_argument(
    argument: &ArgumentValue,
    ctx: &ResolveContext<'_>,
) -> Result<Value, ResolveError> {
    match argument {
        ArgumentValue::Literal {
            value,
        } => Ok(value.clone()),
        ArgumentValue::Parameter {
            name,
        } => ctx
            .parameters
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::MissingParameter(name.clone())),
        ArgumentValue::Reference {
            expression,
        } => resolve_reference(expression, ctx),
    }
}

/// Resolves a reference expression (dotted path or template form).
fn resolve_reference(expression: &str, ctx: &ResolveContext<'_>) -> Result<Value, ResolveError> {
    if let Some(inner) = expression.strip_prefix('`').and_then(|rest| rest.strip_suffix('`')) {
        return resolve_template(inner, expression, ctx);
    }
    resolve_path(expression, ctx)
}

/// Resolves a dotted path expression rooted in a task, binding, or parameter.
fn resolve_path(expression: &str, ctx: &ResolveContext<'_>) -> Result<Value, ResolveError> {
    let (root, tail) = split_root(expression);

    let base = lookup_root(root, ctx)
        .ok_or_else(|| ResolveError::UnresolvedReference(expression.to_string()))?;

    let mut current = base;
    for segment in parse_segments(tail) {
        let next = match &segment {
            PathSegment::Key(name) => current.get(name.as_str()).cloned(),
            PathSegment::Index(position) => current.get(*position).cloned(),
        };
        current =
            next.ok_or_else(|| ResolveError::UnresolvedReference(expression.to_string()))?;
    }
    Ok(current)
}

/// Resolves a template reference by interpolating each `${...}` part.
fn resolve_template(
    inner: &str,
    expression: &str,
    ctx: &ResolveContext<'_>,
) -> Result<Value, ResolveError> {
    let mut out = String::new();
    let mut rest = inner;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(ResolveError::UnresolvedReference(expression.to_string()));
        };
        let part = &after[..end];
        let value = resolve_path(part, ctx)?;
        out.push_str(&stringify(&value));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// Root lookup order: task results, then literal bindings, then parameters.
fn lookup_root(root: &str, ctx: &ResolveContext<'_>) -> Option<Value> {
    if root == "args" || root == "params" {
        let map: serde_json::Map<String, Value> =
            ctx.parameters.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        return Some(Value::Object(map));
    }
    let task_id = TaskId::new(root);
    if let Some(result) = ctx.results.get(&task_id) {
        return Some(result.clone());
    }
    if let Some(binding) = ctx.literal_bindings.get(root) {
        return Some(binding.clone());
    }
    ctx.parameters.get(root).cloned()
}

// ============================================================================
// SECTION: Fingerprints
// ============================================================================

/// Computes the speculation fingerprint of a materialized argument map.
///
/// # Errors
///
/// Returns [`HashError`] when canonical serialization fails.
pub fn argument_fingerprint(arguments: &Value) -> Result<HashDigest, HashError> {
    hash_canonical_json(arguments)
}

// ============================================================================
// SECTION: Path Parsing
// ============================================================================

/// One parsed path segment.
enum PathSegment {
    /// Named property access.
    Key(String),
    /// Numeric index access.
    Index(usize),
}

/// Splits an expression into its root and remaining tail.
fn split_root(expression: &str) -> (&str, &str) {
    let boundary = expression.find(['.', '[']).unwrap_or(expression.len());
    (&expression[..boundary], &expression[boundary..])
}

/// Parses the tail of a path expression into segments.
fn parse_segments(tail: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut rest = tail;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let boundary = after.find(['.', '[']).unwrap_or(after.len());
            segments.push(PathSegment::Key(after[..boundary].to_string()));
            rest = &after[boundary..];
            continue;
        }
        if let Some(after) = rest.strip_prefix('[') {
            let Some(end) = after.find(']') else {
                break;
            };
            if let Ok(position) = after[..end].parse::<usize>() {
                segments.push(PathSegment::Index(position));
            } else {
                // Quoted or wildcard index: treat as a key lookup.
                let key = after[..end].trim_matches(['"', '\'']);
                segments.push(PathSegment::Key(key.to_string()));
            }
            rest = &after[end + 1..];
            continue;
        }
        break;
    }
    segments
}
