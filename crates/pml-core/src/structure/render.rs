// pml-core/src/structure/render.rs
// ============================================================================
// Module: Canonical Expression Rendering
// Description: Whitespace-stable rendering of expressions with rewrites.
// Purpose: Produce hash-stable condition and reference text.
// Dependencies: crate::structure::ast, serde_json
// ============================================================================

//! ## Overview
//! Decision conditions and reference expressions contribute to the canonical
//! structure hash, so their text must not depend on the author's whitespace or
//! variable names. The renderer prints expressions in a fixed style and
//! rewrites identifiers through a caller-provided mapping (bound variables
//! become node identifiers, folded literals become JSON).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::structure::ast::ArrowBody;
use crate::structure::ast::Expr;
use crate::structure::ast::TemplatePart;

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Identifier rewrite callback: returns the replacement text, or `None` to
/// keep the identifier as written.
pub type Rewrite<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Renders an expression in canonical form.
#[must_use]
pub fn render_expr(expr: &Expr, rewrite: &Rewrite<'_>) -> String {
    match expr {
        Expr::Literal(value) => render_literal(value),
        Expr::Ident(name) => rewrite(name).unwrap_or_else(|| name.clone()),
        Expr::Member {
            object,
            property,
        } => format!("{}.{property}", render_expr(object, rewrite)),
        Expr::Index {
            object,
            index,
        } => {
            format!("{}[{}]", render_expr(object, rewrite), render_expr(index, rewrite))
        }
        Expr::Call {
            callee,
            args,
            ..
        } => {
            let rendered: Vec<String> = args.iter().map(|arg| render_expr(arg, rewrite)).collect();
            format!("{}({})", render_expr(callee, rewrite), rendered.join(", "))
        }
        Expr::Await(inner) => format!("await {}", render_expr(inner, rewrite)),
        Expr::Unary {
            op,
            operand,
        } => format!("{}{}", op.as_str(), render_expr(operand, rewrite)),
        Expr::Binary {
            op,
            lhs,
            rhs,
        } => format!(
            "{} {} {}",
            render_expr(lhs, rewrite),
            op.as_str(),
            render_expr(rhs, rewrite)
        ),
        Expr::Ternary {
            cond,
            then,
            otherwise,
            ..
        } => format!(
            "{} ? {} : {}",
            render_expr(cond, rewrite),
            render_expr(then, rewrite),
            render_expr(otherwise, rewrite)
        ),
        Expr::Array(elements) => {
            let rendered: Vec<String> =
                elements.iter().map(|element| render_expr(element, rewrite)).collect();
            format!("[{}]", rendered.join(", "))
        }
        Expr::Object(entries) => {
            let rendered: Vec<String> = entries
                .iter()
                .map(|(key, value)| format!("{key}: {}", render_expr(value, rewrite)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        Expr::Template {
            parts,
            ..
        } => {
            let mut out = String::from("`");
            for part in parts {
                match part {
                    TemplatePart::Text(text) => out.push_str(text),
                    TemplatePart::Expr(inner) => {
                        out.push_str("${");
                        out.push_str(&render_expr(inner, rewrite));
                        out.push('}');
                    }
                }
            }
            out.push('`');
            out
        }
        Expr::Arrow {
            params,
            body,
        } => {
            let body_text = match body {
                ArrowBody::Expr(inner) => render_expr(inner, rewrite),
                ArrowBody::Block(_) => "{...}".to_string(),
            };
            format!("({}) => {body_text}", params.join(", "))
        }
        Expr::Unknown => "null".to_string(),
    }
}

/// Renders a literal value as canonical JSON.
fn render_literal(value: &Value) -> String {
    value.to_string()
}
