// pml-core/src/structure/folding.rs
// ============================================================================
// Module: Literal Folding
// Description: Static evaluation of expressions over known literals.
// Purpose: Fold statically-evaluable expressions into literal bindings.
// Dependencies: crate::structure::ast, serde_json
// ============================================================================

//! ## Overview
//! Expressions over known literals and tracked variables fold into concrete
//! JSON values with the fixed operator set. If any operand is not statically
//! known, folding is abandoned and no binding is recorded. The same evaluator
//! serves decision conditions at execution time, with completed task results
//! as the environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;
use serde_json::json;

use crate::structure::ast::BinaryOp;
use crate::structure::ast::Expr;
use crate::structure::ast::TemplatePart;
use crate::structure::ast::UnaryOp;

// ============================================================================
// SECTION: Folding
// ============================================================================

/// Attempts to fold an expression into a concrete value.
///
/// Returns `None` as soon as any operand is not statically known.
#[must_use]
pub fn fold(expr: &Expr, env: &BTreeMap<String, Value>) -> Option<Value> {
    match expr {
        Expr::Literal(value) => Some(value.clone()),
        Expr::Ident(name) => env.get(name).cloned(),
        Expr::Member {
            object,
            property,
        } => {
            let base = fold(object, env)?;
            base.get(property).cloned()
        }
        Expr::Index {
            object,
            index,
        } => {
            let base = fold(object, env)?;
            let key = fold(index, env)?;
            match key {
                Value::Number(number) => {
                    let position = number.as_u64()?;
                    base.get(usize::try_from(position).ok()?).cloned()
                }
                Value::String(name) => base.get(&name).cloned(),
                _ => None,
            }
        }
        Expr::Unary {
            op,
            operand,
        } => {
            let value = fold(operand, env)?;
            fold_unary(*op, &value)
        }
        Expr::Binary {
            op,
            lhs,
            rhs,
        } => {
            let left = fold(lhs, env)?;
            let right = fold(rhs, env)?;
            fold_binary(*op, &left, &right)
        }
        Expr::Ternary {
            cond,
            then,
            otherwise,
            ..
        } => {
            let value = fold(cond, env)?;
            if truthy(&value) { fold(then, env) } else { fold(otherwise, env) }
        }
        Expr::Array(elements) => {
            let mut folded = Vec::with_capacity(elements.len());
            for element in elements {
                folded.push(fold(element, env)?);
            }
            Some(Value::Array(folded))
        }
        Expr::Object(entries) => {
            let mut map = serde_json::Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), fold(value, env)?);
            }
            Some(Value::Object(map))
        }
        Expr::Template {
            parts,
            ..
        } => {
            let mut out = String::new();
            for part in parts {
                match part {
                    TemplatePart::Text(text) => out.push_str(text),
                    TemplatePart::Expr(inner) => {
                        let value = fold(inner, env)?;
                        out.push_str(&stringify(&value));
                    }
                }
            }
            Some(Value::String(out))
        }
        Expr::Call {
            ..
        }
        | Expr::Await(_)
        | Expr::Arrow {
            ..
        }
        | Expr::Unknown => None,
    }
}

/// Folds a unary operation.
fn fold_unary(op: UnaryOp, value: &Value) -> Option<Value> {
    match op {
        UnaryOp::Not => Some(Value::Bool(!truthy(value))),
        UnaryOp::Neg => value.as_f64().map(|number| json!(-number)),
        UnaryOp::Pos => coerce_number(value).map(|number| json!(number)),
        UnaryOp::TypeOf => Some(Value::String(type_of(value).to_string())),
    }
}

/// Folds a binary operation.
fn fold_binary(op: BinaryOp, left: &Value, right: &Value) -> Option<Value> {
    match op {
        BinaryOp::Add => {
            if left.is_string() || right.is_string() {
                Some(Value::String(format!("{}{}", stringify(left), stringify(right))))
            } else {
                numeric(left, right, |a, b| a + b)
            }
        }
        BinaryOp::Sub => numeric(left, right, |a, b| a - b),
        BinaryOp::Mul => numeric(left, right, |a, b| a * b),
        BinaryOp::Div => numeric(left, right, |a, b| a / b),
        BinaryOp::Mod => numeric(left, right, |a, b| a % b),
        BinaryOp::Pow => numeric(left, right, f64::powf),
        BinaryOp::StrictEq => Some(Value::Bool(left == right)),
        BinaryOp::StrictNe => Some(Value::Bool(left != right)),
        BinaryOp::Eq => Some(Value::Bool(loose_eq(left, right))),
        BinaryOp::Ne => Some(Value::Bool(!loose_eq(left, right))),
        BinaryOp::Lt => compare(left, right, |ord| ord == std::cmp::Ordering::Less),
        BinaryOp::Gt => compare(left, right, |ord| ord == std::cmp::Ordering::Greater),
        BinaryOp::Le => compare(left, right, |ord| ord != std::cmp::Ordering::Greater),
        BinaryOp::Ge => compare(left, right, |ord| ord != std::cmp::Ordering::Less),
        BinaryOp::And => {
            Some(if truthy(left) { right.clone() } else { left.clone() })
        }
        BinaryOp::Or => {
            Some(if truthy(left) { left.clone() } else { right.clone() })
        }
    }
}

/// Applies a numeric operation when both operands coerce to numbers.
fn numeric(left: &Value, right: &Value, op: impl Fn(f64, f64) -> f64) -> Option<Value> {
    let a = coerce_number(left)?;
    let b = coerce_number(right)?;
    let result = op(a, b);
    if result.is_finite() { Some(json!(result)) } else { None }
}

/// Applies a comparison when both operands are comparable.
fn compare(
    left: &Value,
    right: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Option<Value> {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
            let a = coerce_number(left)?;
            let b = coerce_number(right)?;
            a.partial_cmp(&b)?
        }
    };
    Some(Value::Bool(accept(ordering)))
}

/// Loose equality with number/string coercion.
fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (coerce_number(left), coerce_number(right)) {
        (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
        _ => false,
    }
}

/// Coerces a value into a number where JavaScript would.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::Array(_) | Value::Object(_) => None,
    }
}

// ============================================================================
// SECTION: Value Helpers
// ============================================================================

/// JavaScript-style truthiness.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String rendering used for template concatenation.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// `typeof` rendering.
const fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
    }
}
