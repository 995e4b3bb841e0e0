// pml-core/src/structure/builder.rs
// ============================================================================
// Module: Static Structure Walker
// Description: AST walk emitting canonical nodes, edges, and bindings.
// Purpose: Extract the content-addressable structure from a code snippet.
// Dependencies: crate::core, crate::structure
// ============================================================================

//! ## Overview
//! The walker turns the parsed snippet into a [`StaticStructure`]: tool and
//! capability calls become nodes, branches become decision nodes with
//! conditional edges, parallel constructs become fork/join pairs, and
//! whitelisted pure operations become `code:<op>` pseudo-tool nodes. Argument
//! normalization happens in place during the walk (references to bound
//! variables are rewritten to node paths immediately), which is what makes
//! the canonical hash stable under renaming.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde_json::Value;

use crate::core::dag::Edge;
use crate::core::dag::EdgeKind;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::ToolId;
use crate::core::pure::is_pure_op;
use crate::core::structure::StaticStructure;
use crate::core::structure::StructureNode;
use crate::core::task::ArgumentValue;
use crate::core::task::TaskKind;
use crate::structure::ast::ArrowBody;
use crate::structure::ast::Expr;
use crate::structure::ast::Span;
use crate::structure::ast::Stmt;
use crate::structure::ast::TemplatePart;
use crate::structure::error::ParseError;
use crate::structure::folding::fold;
use crate::structure::folding::stringify;
use crate::structure::lexer::Token;
use crate::structure::lexer::TokenKind;
use crate::structure::lexer::tokenize;
use crate::structure::parser::parse_program;
use crate::structure::render::render_expr;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Builds the canonical static structure for a snippet.
///
/// # Errors
///
/// Returns [`ParseError`] on malformed input. Unknown constructs are skipped
/// silently and never fail the build.
pub fn build_structure(source: &str) -> Result<StaticStructure, ParseError> {
    let program = parse_program(source)?;
    let mut walker = Walker::new(source);
    let mut scope = Scope::root();
    walker.walk_block(&program, &mut scope);
    Ok(walker.finish())
}

// ============================================================================
// SECTION: Walk Values
// ============================================================================

/// Result of walking one expression.
#[derive(Debug, Clone, PartialEq)]
enum WalkValue {
    /// The expression's value is the result of the given node.
    Node(TaskId),
    /// Statically known literal.
    Literal(Value),
    /// External parameter reference.
    Param(String),
    /// Canonical reference path (`n1.content[0]` or a template reference).
    Path(String),
    /// The bare external-arguments object (`args` / `params`).
    ArgsRoot,
    /// Nothing usable.
    Opaque,
}

/// Sequencing scope for a statement list or branch body.
#[derive(Debug, Clone)]
struct Scope {
    /// Last emitted node in this scope, for sequence chaining.
    last: Option<TaskId>,
    /// Guard applied to the first node emitted in this scope.
    guard: Option<(TaskId, String)>,
}

impl Scope {
    /// Creates the top-level scope.
    const fn root() -> Self {
        Self {
            last: None,
            guard: None,
        }
    }

    /// Creates a branch scope guarded by a decision outcome.
    const fn branch(decision: TaskId, outcome: String) -> Self {
        Self {
            last: None,
            guard: Some((decision, outcome)),
        }
    }

    /// Creates a child scope chained after an existing node.
    const fn after(node: TaskId) -> Self {
        Self {
            last: Some(node),
            guard: None,
        }
    }
}

// ============================================================================
// SECTION: Walker
// ============================================================================

/// Namespace identifiers whose members are pure operation groups.
const PURE_NAMESPACES: &[&str] = &["JSON", "Math", "Object", "Number", "Array", "String"];

/// Identifiers naming the external-arguments object.
const ARGS_IDENTS: &[&str] = &["args", "params"];

/// Heuristic markers identifying code template literals.
const CODE_TEMPLATE_MARKERS: &[&str] = &["await ", "=>", "page.", "mcp."];

/// AST walker accumulating the static structure.
struct Walker<'a> {
    /// Original source for span capture.
    source: &'a str,
    /// Emitted nodes in creation order.
    nodes: Vec<StructureNode>,
    /// Emitted edges.
    edges: Vec<Edge>,
    /// Code variables bound to node results.
    variable_bindings: BTreeMap<String, TaskId>,
    /// Statically folded bindings.
    literal_bindings: BTreeMap<String, Value>,
    /// Inferred external parameters.
    parameters: BTreeSet<String>,
    /// Substitution frames for unrolled lambda parameters.
    lambda_frames: Vec<BTreeMap<String, WalkValue>>,
    /// Next node index.
    counter: usize,
}

impl<'a> Walker<'a> {
    /// Creates a walker over the provided source.
    fn new(source: &'a str) -> Self {
        Self {
            source,
            nodes: Vec::new(),
            edges: Vec::new(),
            variable_bindings: BTreeMap::new(),
            literal_bindings: BTreeMap::new(),
            parameters: BTreeSet::new(),
            lambda_frames: Vec::new(),
            counter: 0,
        }
    }

    /// Finalizes the accumulated structure.
    fn finish(self) -> StaticStructure {
        StaticStructure {
            nodes: self.nodes,
            edges: self.edges,
            variable_bindings: self.variable_bindings,
            literal_bindings: self.literal_bindings,
            parameters: self.parameters,
        }
    }

    // ------------------------------------------------------------------
    // Node and edge emission
    // ------------------------------------------------------------------

    /// Allocates the next node identifier.
    fn next_id(&mut self) -> TaskId {
        self.counter += 1;
        TaskId::for_node(self.counter)
    }

    /// Emits a node without attaching edges.
    #[allow(
        clippy::too_many_arguments,
        reason = "Node fields map one-to-one onto the structure schema."
    )]
    fn emit(
        &mut self,
        kind: TaskKind,
        tool: Option<ToolId>,
        capability: Option<String>,
        arguments: BTreeMap<String, ArgumentValue>,
        static_code: Option<String>,
        condition: Option<String>,
    ) -> TaskId {
        let id = self.next_id();
        self.nodes.push(StructureNode {
            id: id.clone(),
            kind,
            tool,
            capability,
            arguments,
            static_code,
            condition,
        });
        id
    }

    /// Adds an edge.
    fn edge(&mut self, from: &TaskId, to: &TaskId, kind: EdgeKind, outcome: Option<String>) {
        self.edges.push(Edge {
            from: from.clone(),
            to: to.clone(),
            kind,
            outcome,
        });
    }

    /// Attaches a freshly emitted node into the scope's chain.
    fn attach(&mut self, id: &TaskId, scope: &mut Scope) {
        if let Some(last) = scope.last.clone() {
            self.edge(&last, id, EdgeKind::Sequence, None);
        } else if let Some((decision, outcome)) = scope.guard.clone() {
            self.edge(&decision, id, EdgeKind::Conditional, Some(outcome));
        }
        scope.last = Some(id.clone());
    }

    // ------------------------------------------------------------------
    // Environments
    // ------------------------------------------------------------------

    /// Builds the folding environment from literal bindings and lambda frames.
    fn fold_env(&self) -> BTreeMap<String, Value> {
        let mut env = self.literal_bindings.clone();
        for frame in &self.lambda_frames {
            for (name, value) in frame {
                if let WalkValue::Literal(literal) = value {
                    env.insert(name.clone(), literal.clone());
                }
            }
        }
        env
    }

    /// Looks up a name in the lambda substitution frames, innermost first.
    fn lambda_lookup(&self, name: &str) -> Option<WalkValue> {
        self.lambda_frames.iter().rev().find_map(|frame| frame.get(name).cloned())
    }

    /// Canonical identifier rewrite used for condition rendering.
    fn rewrite_ident(&self, name: &str) -> Option<String> {
        if let Some(value) = self.lambda_lookup(name) {
            return match value {
                WalkValue::Literal(literal) => Some(literal.to_string()),
                WalkValue::Path(path) => Some(path),
                WalkValue::Node(id) => Some(id.to_string()),
                WalkValue::Param(param) => Some(param),
                WalkValue::ArgsRoot | WalkValue::Opaque => None,
            };
        }
        if let Some(id) = self.variable_bindings.get(name) {
            return Some(id.to_string());
        }
        if let Some(value) = self.literal_bindings.get(name) {
            return Some(value.to_string());
        }
        None
    }

    /// Renders an expression canonically with bindings rewritten.
    fn render(&self, expr: &Expr) -> String {
        render_expr(expr, &|name| self.rewrite_ident(name))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Walks a statement list within one scope.
    fn walk_block(&mut self, stmts: &[Stmt], scope: &mut Scope) {
        for stmt in stmts {
            self.walk_stmt(stmt, scope);
        }
    }

    /// Walks a single statement.
    fn walk_stmt(&mut self, stmt: &Stmt, scope: &mut Scope) {
        match stmt {
            Stmt::Decl {
                name,
                init,
                ..
            } => {
                if let Some(folded) = fold(init, &self.fold_env()) {
                    self.literal_bindings.insert(name.clone(), folded);
                    return;
                }
                match self.walk_expr(init, scope) {
                    WalkValue::Node(id) => {
                        self.variable_bindings.insert(name.clone(), id);
                    }
                    WalkValue::Literal(value) => {
                        self.literal_bindings.insert(name.clone(), value);
                    }
                    WalkValue::Path(path) => {
                        // Bind through the referenced node so later uses
                        // canonicalize to the same path.
                        if let Some(root) = path.split(['.', '[']).next() {
                            self.variable_bindings.insert(name.clone(), TaskId::new(root));
                        }
                    }
                    WalkValue::Param(_) | WalkValue::ArgsRoot | WalkValue::Opaque => {}
                }
            }
            Stmt::Expr {
                expr,
                ..
            }
            | Stmt::Return {
                expr: Some(expr),
                ..
            } => {
                self.walk_expr(expr, scope);
            }
            Stmt::Return {
                expr: None,
                ..
            }
            | Stmt::Unknown {
                ..
            } => {}
            Stmt::If {
                cond,
                cond_span,
                then,
                otherwise,
            } => {
                self.walk_if(cond, *cond_span, then, otherwise.as_deref(), scope);
            }
            Stmt::Switch {
                subject,
                subject_span,
                cases,
                default,
            } => {
                self.walk_switch(subject, *subject_span, cases, default.as_deref(), scope);
            }
        }
    }

    /// Walks an `if`/`else` statement into a decision node plus branches.
    fn walk_if(
        &mut self,
        cond: &Expr,
        cond_span: Span,
        then: &[Stmt],
        otherwise: Option<&[Stmt]>,
        scope: &mut Scope,
    ) {
        let condition = self.render(cond);
        let static_code = cond_span.text(self.source).to_string();
        let decision = self.emit(
            TaskKind::Decision,
            Some(ToolId::pseudo("decision")),
            None,
            BTreeMap::new(),
            Some(static_code),
            Some(condition),
        );
        self.attach(&decision, scope);

        let mut then_scope = Scope::branch(decision.clone(), "true".to_string());
        self.walk_block(then, &mut then_scope);
        if let Some(body) = otherwise {
            let mut else_scope = Scope::branch(decision.clone(), "false".to_string());
            self.walk_block(body, &mut else_scope);
        }
        scope.last = Some(decision);
    }

    /// Walks a `switch` statement into a decision node plus case branches.
    fn walk_switch(
        &mut self,
        subject: &Expr,
        subject_span: Span,
        cases: &[crate::structure::ast::SwitchCase],
        default: Option<&[Stmt]>,
        scope: &mut Scope,
    ) {
        let condition = self.render(subject);
        let static_code = subject_span.text(self.source).to_string();
        let decision = self.emit(
            TaskKind::Decision,
            Some(ToolId::pseudo("decision")),
            None,
            BTreeMap::new(),
            Some(static_code),
            Some(condition),
        );
        self.attach(&decision, scope);

        for case in cases {
            let label = fold(&case.value, &self.fold_env())
                .map_or_else(|| self.render(&case.value), |value| stringify(&value));
            let mut case_scope = Scope::branch(decision.clone(), format!("case:{label}"));
            self.walk_block(&case.body, &mut case_scope);
        }
        if let Some(body) = default {
            let mut default_scope = Scope::branch(decision.clone(), "default".to_string());
            self.walk_block(body, &mut default_scope);
        }
        scope.last = Some(decision);
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Walks one expression, emitting nodes for recognized constructs.
    fn walk_expr(&mut self, expr: &Expr, scope: &mut Scope) -> WalkValue {
        match expr {
            Expr::Await(inner) => self.walk_expr(inner, scope),
            Expr::Call {
                callee,
                args,
                span,
            } => self.walk_call(callee, args, *span, scope),
            Expr::Ident(name) => self.walk_ident(name),
            Expr::Member {
                object,
                property,
            } => self.walk_member(object, property, scope),
            Expr::Index {
                object,
                index,
            } => self.walk_index(object, index, scope),
            Expr::Literal(value) => WalkValue::Literal(value.clone()),
            Expr::Template {
                parts,
                raw,
            } => self.walk_template(parts, raw),
            Expr::Ternary {
                cond,
                then,
                otherwise,
                cond_span,
            } => {
                if let Some(folded) = fold(expr, &self.fold_env()) {
                    return WalkValue::Literal(folded);
                }
                if contains_call(then) || contains_call(otherwise) {
                    return self.walk_ternary(cond, *cond_span, then, otherwise, scope);
                }
                WalkValue::Opaque
            }
            Expr::Array(_) | Expr::Object(_) | Expr::Binary {
                ..
            }
            | Expr::Unary {
                ..
            } => {
                if let Some(folded) = fold(expr, &self.fold_env()) {
                    return WalkValue::Literal(folded);
                }
                // Walk nested calls for their nodes even when the surrounding
                // expression is not statically known.
                self.walk_nested_calls(expr, scope);
                WalkValue::Opaque
            }
            Expr::Arrow {
                ..
            }
            | Expr::Unknown => WalkValue::Opaque,
        }
    }

    /// Walks an identifier reference.
    fn walk_ident(&mut self, name: &str) -> WalkValue {
        if let Some(value) = self.lambda_lookup(name) {
            return value;
        }
        if ARGS_IDENTS.contains(&name) {
            return WalkValue::ArgsRoot;
        }
        if let Some(id) = self.variable_bindings.get(name) {
            return WalkValue::Path(id.to_string());
        }
        if let Some(value) = self.literal_bindings.get(name) {
            return WalkValue::Literal(value.clone());
        }
        if PURE_NAMESPACES.contains(&name) || name == "mcp" || name == "capabilities" {
            return WalkValue::Opaque;
        }
        self.parameters.insert(name.to_string());
        WalkValue::Param(name.to_string())
    }

    /// Walks a property access.
    fn walk_member(&mut self, object: &Expr, property: &str, scope: &mut Scope) -> WalkValue {
        match self.walk_expr(object, scope) {
            WalkValue::ArgsRoot => {
                self.parameters.insert(property.to_string());
                WalkValue::Param(property.to_string())
            }
            WalkValue::Path(path) => WalkValue::Path(format!("{path}.{property}")),
            WalkValue::Param(name) => WalkValue::Path(format!("{name}.{property}")),
            WalkValue::Node(id) => WalkValue::Path(format!("{id}.{property}")),
            WalkValue::Literal(value) => {
                value.get(property).map_or(WalkValue::Opaque, |v| WalkValue::Literal(v.clone()))
            }
            WalkValue::Opaque => WalkValue::Opaque,
        }
    }

    /// Walks a computed index access.
    fn walk_index(&mut self, object: &Expr, index: &Expr, scope: &mut Scope) -> WalkValue {
        let base = self.walk_expr(object, scope);
        let Some(key) = fold(index, &self.fold_env()) else {
            return WalkValue::Opaque;
        };
        match base {
            WalkValue::Path(path) | WalkValue::Param(path) => match &key {
                Value::Number(number) => WalkValue::Path(format!("{path}[{number}]")),
                Value::String(name) => WalkValue::Path(format!("{path}.{name}")),
                _ => WalkValue::Opaque,
            },
            WalkValue::Node(id) => match &key {
                Value::Number(number) => WalkValue::Path(format!("{id}[{number}]")),
                Value::String(name) => WalkValue::Path(format!("{id}.{name}")),
                _ => WalkValue::Opaque,
            },
            WalkValue::Literal(value) => {
                let item = match &key {
                    Value::Number(number) => number
                        .as_u64()
                        .and_then(|position| usize::try_from(position).ok())
                        .and_then(|position| value.get(position)),
                    Value::String(name) => value.get(name),
                    _ => None,
                };
                item.map_or(WalkValue::Opaque, |v| WalkValue::Literal(v.clone()))
            }
            WalkValue::ArgsRoot | WalkValue::Opaque => WalkValue::Opaque,
        }
    }

    /// Walks a template literal.
    fn walk_template(&mut self, parts: &[TemplatePart], raw: &str) -> WalkValue {
        if let Some(folded) = fold(
            &Expr::Template {
                parts: parts.to_vec(),
                raw: raw.to_string(),
            },
            &self.fold_env(),
        ) {
            return WalkValue::Literal(folded);
        }
        // Interpolations referencing bound names make the whole template a
        // canonical reference expression.
        let rendered = self.render(&Expr::Template {
            parts: parts.to_vec(),
            raw: raw.to_string(),
        });
        WalkValue::Path(rendered)
    }

    /// Walks a value-level ternary into a decision node with branch nodes.
    fn walk_ternary(
        &mut self,
        cond: &Expr,
        cond_span: Span,
        then: &Expr,
        otherwise: &Expr,
        scope: &mut Scope,
    ) -> WalkValue {
        let condition = self.render(cond);
        let static_code = cond_span.text(self.source).to_string();
        let decision = self.emit(
            TaskKind::Decision,
            Some(ToolId::pseudo("decision")),
            None,
            BTreeMap::new(),
            Some(static_code),
            Some(condition),
        );
        self.attach(&decision, scope);

        let mut then_scope = Scope::branch(decision.clone(), "true".to_string());
        self.walk_expr(then, &mut then_scope);
        let mut else_scope = Scope::branch(decision.clone(), "false".to_string());
        self.walk_expr(otherwise, &mut else_scope);
        scope.last = Some(decision.clone());
        WalkValue::Node(decision)
    }

    /// Walks nested calls inside an otherwise-opaque expression.
    fn walk_nested_calls(&mut self, expr: &Expr, scope: &mut Scope) {
        match expr {
            Expr::Array(elements) => {
                for element in elements {
                    if matches!(element, Expr::Call { .. } | Expr::Await(_)) {
                        self.walk_expr(element, scope);
                    }
                }
            }
            Expr::Object(entries) => {
                for (_, value) in entries {
                    if matches!(value, Expr::Call { .. } | Expr::Await(_)) {
                        self.walk_expr(value, scope);
                    }
                }
            }
            Expr::Binary {
                lhs,
                rhs,
                ..
            } => {
                if matches!(lhs.as_ref(), Expr::Call { .. } | Expr::Await(_)) {
                    self.walk_expr(lhs, scope);
                }
                if matches!(rhs.as_ref(), Expr::Call { .. } | Expr::Await(_)) {
                    self.walk_expr(rhs, scope);
                }
            }
            Expr::Unary {
                operand,
                ..
            } => {
                if matches!(operand.as_ref(), Expr::Call { .. } | Expr::Await(_)) {
                    self.walk_expr(operand, scope);
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Walks a call expression, dispatching on the callee shape.
    fn walk_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
        scope: &mut Scope,
    ) -> WalkValue {
        let chain = member_chain(callee);

        // `await mcp.<server>.<tool>({...})`
        if let Some(("mcp", props)) = chain.as_deref_pair()
            && props.len() == 2
        {
            let tool = ToolId::qualified(&props[0], &props[1]);
            let arguments = self.extract_arguments(args.first(), scope);
            let id = self.emit(
                TaskKind::ToolCall,
                Some(tool),
                None,
                arguments,
                Some(span.text(self.source).to_string()),
                None,
            );
            self.attach(&id, scope);
            return WalkValue::Node(id);
        }

        // `await capabilities.<name>({...})`
        if let Some(("capabilities", props)) = chain.as_deref_pair()
            && props.len() == 1
        {
            let name = props[0].clone();
            let arguments = self.extract_arguments(args.first(), scope);
            let id = self.emit(
                TaskKind::Capability,
                Some(ToolId::qualified("capability", &name)),
                Some(name),
                arguments,
                Some(span.text(self.source).to_string()),
                None,
            );
            self.attach(&id, scope);
            return WalkValue::Node(id);
        }

        // `Promise.all([...])` / `Promise.allSettled([...])`
        if let Some(("Promise", props)) = chain.as_deref_pair()
            && props.len() == 1
            && (props[0] == "all" || props[0] == "allSettled")
        {
            if let Some(Expr::Array(elements)) = args.first() {
                return self.walk_parallel(elements, scope);
            }
            // Fan-out built by an inner expression (commonly `.map`).
            if let Some(inner) = args.first() {
                return self.walk_expr(inner, scope);
            }
            return WalkValue::Opaque;
        }

        // `<receiver>.map(x => ...)`
        if let Expr::Member {
            object,
            property,
        } = callee
            && property == "map"
            && let Some(Expr::Arrow {
                params,
                body,
            }) = args.first()
        {
            return self.walk_map(object, params, body, scope);
        }

        // Whitelisted pure operations: namespace calls, method calls, chains.
        if let Expr::Member {
            object,
            property,
        } = callee
            && is_pure_op(property)
        {
            let is_namespace =
                matches!(object.as_ref(), Expr::Ident(name) if PURE_NAMESPACES.contains(&name.as_str()));
            let receiver = if is_namespace {
                None
            } else {
                Some(self.walk_expr(object, scope))
            };
            let mut arguments = BTreeMap::new();
            if let Some(value) = receiver {
                arguments.insert("target".to_string(), self.to_argument(value));
            }
            for (index, arg) in args.iter().enumerate() {
                let value = self.walk_argument(arg, scope);
                arguments.insert(index.to_string(), value);
            }
            let id = self.emit(
                TaskKind::CodeExecution,
                Some(ToolId::pseudo(property)),
                None,
                arguments,
                Some(span.text(self.source).to_string()),
                None,
            );
            self.attach(&id, scope);
            return WalkValue::Node(id);
        }

        // Bare whitelisted calls (`parseInt(...)`).
        if let Expr::Ident(name) = callee
            && is_pure_op(name)
        {
            let mut arguments = BTreeMap::new();
            for (index, arg) in args.iter().enumerate() {
                let value = self.walk_argument(arg, scope);
                arguments.insert(index.to_string(), value);
            }
            let id = self.emit(
                TaskKind::CodeExecution,
                Some(ToolId::pseudo(name)),
                None,
                arguments,
                Some(span.text(self.source).to_string()),
                None,
            );
            self.attach(&id, scope);
            return WalkValue::Node(id);
        }

        // Unrecognized call: walk arguments for nested recognized calls and
        // skip the call itself.
        for arg in args {
            if matches!(arg, Expr::Call { .. } | Expr::Await(_)) {
                self.walk_expr(arg, scope);
            }
        }
        WalkValue::Opaque
    }

    /// Walks a parallel fan-out over explicit call elements.
    fn walk_parallel(&mut self, elements: &[Expr], scope: &mut Scope) -> WalkValue {
        let fork = self.emit(
            TaskKind::Fork,
            Some(ToolId::pseudo("fork")),
            None,
            BTreeMap::new(),
            None,
            None,
        );
        self.attach(&fork, scope);

        let mut children = Vec::new();
        for element in elements {
            let mut child_scope = Scope::after(fork.clone());
            if let WalkValue::Node(id) = self.walk_expr(element, &mut child_scope) {
                children.push(id);
            }
        }

        let join = self.emit(
            TaskKind::Join,
            Some(ToolId::pseudo("join")),
            None,
            BTreeMap::new(),
            None,
            None,
        );
        for child in &children {
            self.edge(child, &join, EdgeKind::Sequence, None);
        }
        scope.last = Some(join.clone());
        WalkValue::Node(join)
    }

    /// Walks `.map` over a literal array (unrolled) or a variable (template).
    fn walk_map(
        &mut self,
        receiver: &Expr,
        params: &[String],
        body: &ArrowBody,
        scope: &mut Scope,
    ) -> WalkValue {
        let param = params.first().cloned().unwrap_or_default();

        // Literal arrays unroll into fork + one node per element + join.
        if let Some(Value::Array(elements)) = fold(receiver, &self.fold_env()) {
            let fork = self.emit(
                TaskKind::Fork,
                Some(ToolId::pseudo("fork")),
                None,
                BTreeMap::new(),
                None,
                None,
            );
            self.attach(&fork, scope);

            let mut children = Vec::new();
            for element in elements {
                let mut frame = BTreeMap::new();
                frame.insert(param.clone(), WalkValue::Literal(element));
                self.lambda_frames.push(frame);
                let mut child_scope = Scope::after(fork.clone());
                let value = self.walk_arrow_body(body, &mut child_scope);
                self.lambda_frames.pop();
                if let WalkValue::Node(id) = value {
                    children.push(id);
                }
            }

            let join = self.emit(
                TaskKind::Join,
                Some(ToolId::pseudo("join")),
                None,
                BTreeMap::new(),
                None,
                None,
            );
            for child in &children {
                self.edge(child, &join, EdgeKind::Sequence, None);
            }
            scope.last = Some(join.clone());
            return WalkValue::Node(join);
        }

        // Variable arrays produce one template task; the lambda parameter
        // becomes an element reference on the bound source.
        let binding = match self.walk_expr(receiver, scope) {
            WalkValue::Path(path) => WalkValue::Path(format!("{path}[*]")),
            WalkValue::Param(name) => WalkValue::Path(format!("{name}[*]")),
            WalkValue::Node(id) => WalkValue::Path(format!("{id}[*]")),
            other => other,
        };
        let mut frame = BTreeMap::new();
        frame.insert(param, binding);
        self.lambda_frames.push(frame);
        let value = self.walk_arrow_body(body, scope);
        self.lambda_frames.pop();
        match value {
            WalkValue::Node(id) => WalkValue::Node(id),
            _ => WalkValue::Opaque,
        }
    }

    /// Walks an arrow body within the current frames.
    fn walk_arrow_body(&mut self, body: &ArrowBody, scope: &mut Scope) -> WalkValue {
        match body {
            ArrowBody::Expr(expr) => self.walk_expr(expr, scope),
            ArrowBody::Block(stmts) => {
                self.walk_block(stmts, scope);
                scope.last.clone().map_or(WalkValue::Opaque, WalkValue::Node)
            }
        }
    }

    // ------------------------------------------------------------------
    // Argument extraction
    // ------------------------------------------------------------------

    /// Extracts a call's argument object into normalized argument values.
    fn extract_arguments(
        &mut self,
        arg: Option<&Expr>,
        scope: &mut Scope,
    ) -> BTreeMap<String, ArgumentValue> {
        let mut out = BTreeMap::new();
        match arg {
            None => {}
            Some(Expr::Object(entries)) => {
                for (key, value) in entries {
                    let argument = self.walk_argument(value, scope);
                    out.insert(key.clone(), argument);
                }
            }
            Some(other) => {
                let argument = self.walk_argument(other, scope);
                out.insert("0".to_string(), argument);
            }
        }
        out
    }

    /// Normalizes one argument expression in place.
    fn walk_argument(&mut self, expr: &Expr, scope: &mut Scope) -> ArgumentValue {
        // Code template literals are scanned before folding so their nested
        // literals surface as named parameters.
        if let Expr::Template {
            raw,
            ..
        } = expr
            && is_code_template(raw)
        {
            return self.code_template_argument(raw);
        }
        if let Some(folded) = fold(expr, &self.fold_env()) {
            return ArgumentValue::literal(folded);
        }
        let value = self.walk_expr(expr, scope);
        match value {
            WalkValue::Opaque => ArgumentValue::reference(self.render(expr)),
            other => self.to_argument(other),
        }
    }

    /// Converts a walk value into an argument value.
    fn to_argument(&mut self, value: WalkValue) -> ArgumentValue {
        match value {
            WalkValue::Literal(literal) => ArgumentValue::literal(literal),
            WalkValue::Param(name) => {
                self.parameters.insert(name.clone());
                ArgumentValue::parameter(name)
            }
            WalkValue::Path(path) => ArgumentValue::reference(path),
            WalkValue::Node(id) => ArgumentValue::reference(id.to_string()),
            WalkValue::ArgsRoot => ArgumentValue::reference("args".to_string()),
            WalkValue::Opaque => ArgumentValue::literal(Value::Null),
        }
    }

    /// Parameterizes a code template literal: nested literals in call and
    /// object-value position become named parameters, with numeric suffixes
    /// on collision.
    fn code_template_argument(&mut self, raw: &str) -> ArgumentValue {
        let Ok(tokens) = tokenize(raw) else {
            return ArgumentValue::literal(Value::String(raw.to_string()));
        };

        let mut replacements: Vec<(usize, usize, String)> = Vec::new();
        let mut taken: BTreeSet<String> = BTreeSet::new();
        for (index, token) in tokens.iter().enumerate() {
            if token.kind != TokenKind::Str && token.kind != TokenKind::Number {
                continue;
            }
            let Some(base) = template_param_context(&tokens, index) else {
                continue;
            };
            let name = unique_param_name(&base, &taken);
            taken.insert(name.clone());
            replacements.push((token.start, token.end, name));
        }

        if replacements.is_empty() {
            return ArgumentValue::literal(Value::String(raw.to_string()));
        }

        let mut rewritten = String::new();
        let mut cursor = 0usize;
        for (start, end, name) in &replacements {
            rewritten.push_str(&raw[cursor..*start]);
            rewritten.push_str("${");
            rewritten.push_str(name);
            rewritten.push('}');
            cursor = *end;
            self.parameters.insert(name.clone());
        }
        rewritten.push_str(&raw[cursor..]);
        ArgumentValue::reference(format!("`{rewritten}`"))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Flattened member chain: base identifier plus property names.
struct MemberChain {
    /// Base identifier, when the chain roots in one.
    base: Option<String>,
    /// Property names from base outward.
    props: Vec<String>,
}

impl MemberChain {
    /// Returns the base and properties when the chain roots in an identifier.
    fn as_deref_pair(&self) -> Option<(&str, &[String])> {
        self.base.as_deref().map(|base| (base, self.props.as_slice()))
    }
}

/// Flattens a callee expression into a member chain.
fn member_chain(expr: &Expr) -> MemberChain {
    let mut props = Vec::new();
    let mut current = expr;
    loop {
        match current {
            Expr::Member {
                object,
                property,
            } => {
                props.push(property.clone());
                current = object;
            }
            Expr::Ident(name) => {
                props.reverse();
                return MemberChain {
                    base: Some(name.clone()),
                    props,
                };
            }
            _ => {
                props.reverse();
                return MemberChain {
                    base: None,
                    props,
                };
            }
        }
    }
}

/// Returns true when the expression tree contains a call.
fn contains_call(expr: &Expr) -> bool {
    match expr {
        Expr::Call {
            ..
        } => true,
        Expr::Await(inner) => contains_call(inner),
        Expr::Member {
            object,
            ..
        } => contains_call(object),
        Expr::Index {
            object,
            index,
        } => contains_call(object) || contains_call(index),
        Expr::Unary {
            operand,
            ..
        } => contains_call(operand),
        Expr::Binary {
            lhs,
            rhs,
            ..
        } => contains_call(lhs) || contains_call(rhs),
        Expr::Ternary {
            cond,
            then,
            otherwise,
            ..
        } => contains_call(cond) || contains_call(then) || contains_call(otherwise),
        Expr::Array(elements) => elements.iter().any(contains_call),
        Expr::Object(entries) => entries.iter().any(|(_, value)| contains_call(value)),
        Expr::Template {
            parts,
            ..
        } => parts.iter().any(|part| match part {
            TemplatePart::Expr(inner) => contains_call(inner),
            TemplatePart::Text(_) => false,
        }),
        Expr::Literal(_)
        | Expr::Ident(_)
        | Expr::Arrow {
            ..
        }
        | Expr::Unknown => false,
    }
}

/// Returns true when a template literal looks like embedded code.
fn is_code_template(raw: &str) -> bool {
    CODE_TEMPLATE_MARKERS.iter().any(|marker| raw.contains(marker))
}

/// Parameter names inferred from well-known call contexts.
const PARAM_NAME_BY_CALLEE: &[(&str, &str)] = &[
    ("goto", "url"),
    ("open", "url"),
    ("navigate", "url"),
    ("fetch", "url"),
    ("get", "url"),
    ("post", "url"),
    ("click", "selector"),
    ("select", "selector"),
    ("waitForSelector", "selector"),
    ("type", "text"),
    ("fill", "text"),
    ("write", "text"),
];

/// Infers the parameter base name for a literal token inside a code template.
///
/// Literals in call position take a name derived from the callee; literals in
/// object-value position take the key name. Other positions stay verbatim.
fn template_param_context(tokens: &[Token], index: usize) -> Option<String> {
    if index >= 1 {
        let prev = &tokens[index - 1];
        if prev.kind == TokenKind::Punct && prev.text == "(" && index >= 2 {
            let callee = &tokens[index - 2];
            if callee.kind == TokenKind::Ident {
                let mapped = PARAM_NAME_BY_CALLEE
                    .iter()
                    .find(|(name, _)| *name == callee.text)
                    .map_or(callee.text.as_str(), |(_, param)| *param);
                return Some(mapped.to_string());
            }
        }
        if prev.kind == TokenKind::Punct && prev.text == ":" && index >= 2 {
            let key = &tokens[index - 2];
            if key.kind == TokenKind::Ident {
                return Some(key.text.clone());
            }
        }
    }
    None
}

/// Resolves name collisions with a numeric suffix.
fn unique_param_name(base: &str, taken: &BTreeSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut counter = 2usize;
    loop {
        let candidate = format!("{base}{counter}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
