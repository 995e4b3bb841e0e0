// pml-core/src/structure/parser.rs
// ============================================================================
// Module: Snippet Parser
// Description: Tolerant recursive-descent parser for the snippet language.
// Purpose: Produce the walkable AST while skipping unrecognized statements.
// Dependencies: crate::structure::{ast, error, lexer}
// ============================================================================

//! ## Overview
//! The parser recognizes the constructs the structure builder extracts and
//! degrades everything else to `Unknown` nodes by scanning to a statement
//! boundary with balanced delimiters. Only malformed input (unbalanced
//! delimiters, lexer failures) raises [`ParseError`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use serde_json::json;

use crate::structure::ast::ArrowBody;
use crate::structure::ast::BinaryOp;
use crate::structure::ast::Expr;
use crate::structure::ast::Span;
use crate::structure::ast::Stmt;
use crate::structure::ast::SwitchCase;
use crate::structure::ast::TemplatePart;
use crate::structure::ast::UnaryOp;
use crate::structure::error::ParseError;
use crate::structure::lexer::Token;
use crate::structure::lexer::TokenKind;
use crate::structure::lexer::tokenize;

// ============================================================================
// SECTION: Entry Points
// ============================================================================

/// Parses snippet source into a statement list.
///
/// # Errors
///
/// Returns [`ParseError`] on malformed input.
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
    };
    parser.parse_statements(true)
}

/// Parses a standalone expression (used for template interpolations and
/// condition evaluation).
///
/// # Errors
///
/// Returns [`ParseError`] on malformed input.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
    };
    parser.parse_expr()
}

// ============================================================================
// SECTION: Parser State
// ============================================================================

/// Statement keywords the builder does not recognize; statements starting
/// with one of these are skipped wholesale.
const SKIPPED_KEYWORDS: &[&str] = &[
    "for", "while", "do", "try", "catch", "finally", "throw", "function", "class", "import",
    "export", "break", "continue", "new", "delete", "yield",
];

/// Recursive-descent parser over a token stream.
struct Parser {
    /// Token stream.
    tokens: Vec<Token>,
    /// Cursor into the token stream.
    pos: usize,
}

impl Parser {
    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    /// Returns the current token, if any.
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Returns the token at the provided lookahead distance.
    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    /// Returns true when the current token is the provided punctuation.
    fn at_punct(&self, text: &str) -> bool {
        self.peek().is_some_and(|tok| tok.kind == TokenKind::Punct && tok.text == text)
    }

    /// Returns true when the current token is the provided identifier.
    fn at_ident(&self, text: &str) -> bool {
        self.peek().is_some_and(|tok| tok.kind == TokenKind::Ident && tok.text == text)
    }

    /// Consumes the current token.
    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consumes the current token when it matches the punctuation.
    fn eat_punct(&mut self, text: &str) -> bool {
        if self.at_punct(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consumes the current token or fails with the expectation message.
    fn expect_punct(&mut self, text: &str) -> Result<(), ParseError> {
        if self.eat_punct(text) {
            Ok(())
        } else {
            Err(ParseError::new(self.offset(), format!("expected `{text}`")))
        }
    }

    /// Returns the byte offset of the current token (or end of input).
    fn offset(&self) -> usize {
        self.peek().map_or_else(
            || self.tokens.last().map_or(0, |tok| tok.end),
            |tok| tok.start,
        )
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parses statements until end of input or a closing brace.
    fn parse_statements(&mut self, top_level: bool) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            if self.peek().is_none() {
                if top_level {
                    return Ok(stmts);
                }
                return Err(ParseError::new(self.offset(), "unexpected end of block"));
            }
            if self.at_punct("}") {
                return Ok(stmts);
            }
            if self.eat_punct(";") {
                continue;
            }
            stmts.push(self.parse_stmt()?);
        }
    }

    /// Parses one statement, degrading unrecognized syntax to `Unknown`.
    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.offset();

        if self.at_ident("const") || self.at_ident("let") || self.at_ident("var") {
            return self.parse_decl(start);
        }
        if self.at_ident("return") {
            self.pos += 1;
            if self.at_punct(";") || self.at_punct("}") || self.peek().is_none() {
                self.eat_punct(";");
                return Ok(Stmt::Return {
                    expr: None,
                    span: Span::new(start, self.offset()),
                });
            }
            let checkpoint = self.pos;
            return match self.parse_expr() {
                Ok(expr) => {
                    self.eat_punct(";");
                    Ok(Stmt::Return {
                        expr: Some(expr),
                        span: Span::new(start, self.offset()),
                    })
                }
                Err(_) => {
                    self.pos = checkpoint;
                    self.skip_statement(start)
                }
            };
        }
        if self.at_ident("if") {
            return self.parse_if(start);
        }
        if self.at_ident("switch") {
            return self.parse_switch(start);
        }
        if self.peek().is_some_and(|tok| {
            tok.kind == TokenKind::Ident && SKIPPED_KEYWORDS.contains(&tok.text.as_str())
        }) {
            return self.skip_statement(start);
        }

        let checkpoint = self.pos;
        match self.parse_expr() {
            Ok(expr) => {
                self.eat_punct(";");
                Ok(Stmt::Expr {
                    expr,
                    span: Span::new(start, self.offset()),
                })
            }
            Err(_) => {
                self.pos = checkpoint;
                self.skip_statement(start)
            }
        }
    }

    /// Parses a variable declaration.
    fn parse_decl(&mut self, start: usize) -> Result<Stmt, ParseError> {
        self.pos += 1;
        let name = match self.peek() {
            Some(tok) if tok.kind == TokenKind::Ident => tok.text.clone(),
            // Destructuring and other patterns are not recognized.
            _ => return self.skip_statement(start),
        };
        self.pos += 1;
        if !self.eat_punct("=") {
            return self.skip_statement(start);
        }
        let checkpoint = self.pos;
        match self.parse_expr() {
            Ok(init) => {
                self.eat_punct(";");
                Ok(Stmt::Decl {
                    name,
                    init,
                    span: Span::new(start, self.offset()),
                })
            }
            Err(_) => {
                self.pos = checkpoint;
                self.skip_statement(start)
            }
        }
    }

    /// Parses an `if`/`else` statement.
    fn parse_if(&mut self, _start: usize) -> Result<Stmt, ParseError> {
        self.pos += 1;
        self.expect_punct("(")?;
        let cond_start = self.offset();
        let cond = self.parse_expr()?;
        let cond_end = self.previous_end();
        self.expect_punct(")")?;
        let then = self.parse_branch_body()?;
        let otherwise = if self.at_ident("else") {
            self.pos += 1;
            if self.at_ident("if") {
                let nested = self.parse_if(self.offset())?;
                Some(vec![nested])
            } else {
                Some(self.parse_branch_body()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            cond_span: Span::new(cond_start, cond_end),
            then,
            otherwise,
        })
    }

    /// Parses a `switch` statement.
    fn parse_switch(&mut self, _start: usize) -> Result<Stmt, ParseError> {
        self.pos += 1;
        self.expect_punct("(")?;
        let subject_start = self.offset();
        let subject = self.parse_expr()?;
        let subject_end = self.previous_end();
        self.expect_punct(")")?;
        self.expect_punct("{")?;

        let mut cases = Vec::new();
        let mut default = None;
        loop {
            if self.eat_punct("}") {
                break;
            }
            if self.at_ident("case") {
                self.pos += 1;
                let value = self.parse_expr()?;
                self.expect_punct(":")?;
                let body = self.parse_case_body()?;
                cases.push(SwitchCase {
                    value,
                    body,
                });
                continue;
            }
            if self.at_ident("default") {
                self.pos += 1;
                self.expect_punct(":")?;
                default = Some(self.parse_case_body()?);
                continue;
            }
            return Err(ParseError::new(self.offset(), "expected `case`, `default`, or `}`"));
        }

        Ok(Stmt::Switch {
            subject,
            subject_span: Span::new(subject_start, subject_end),
            cases,
            default,
        })
    }

    /// Parses statements of a switch case until the next label or the end.
    fn parse_case_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            if self.at_punct("}") || self.at_ident("case") || self.at_ident("default") {
                return Ok(stmts);
            }
            if self.eat_punct(";") {
                continue;
            }
            if self.at_ident("break") {
                self.pos += 1;
                self.eat_punct(";");
                continue;
            }
            if self.peek().is_none() {
                return Err(ParseError::new(self.offset(), "unexpected end of switch"));
            }
            stmts.push(self.parse_stmt()?);
        }
    }

    /// Parses a brace-delimited branch body or a single statement.
    fn parse_branch_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.eat_punct("{") {
            let stmts = self.parse_statements(false)?;
            self.expect_punct("}")?;
            Ok(stmts)
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    /// Returns the end offset of the previously consumed token.
    fn previous_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|index| self.tokens.get(index))
            .map_or(0, |tok| tok.end)
    }

    /// Skips a statement by scanning to a boundary with balanced delimiters.
    fn skip_statement(&mut self, start: usize) -> Result<Stmt, ParseError> {
        let mut depth = 0usize;
        let mut consumed = false;
        while let Some(token) = self.peek() {
            let text = token.text.as_str();
            if token.kind == TokenKind::Punct {
                match text {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" => {
                        if depth == 0 {
                            return Err(ParseError::new(token.start, "unbalanced delimiter"));
                        }
                        depth -= 1;
                    }
                    "}" => {
                        if depth == 0 {
                            // Closing brace of an enclosing block: stop here.
                            break;
                        }
                        depth -= 1;
                        if depth == 0 {
                            // Block-terminated statement (for, while, try):
                            // the closing brace ends it.
                            self.pos += 1;
                            consumed = true;
                            break;
                        }
                    }
                    ";" => {
                        if depth == 0 {
                            self.pos += 1;
                            consumed = true;
                            break;
                        }
                    }
                    _ => {}
                }
            }
            self.pos += 1;
            consumed = true;
        }
        if depth > 0 {
            return Err(ParseError::new(self.offset(), "unbalanced delimiter"));
        }
        if !consumed {
            // Guarantee forward progress.
            self.pos += 1;
        }
        Ok(Stmt::Unknown {
            span: Span::new(start, self.previous_end()),
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Parses a full expression (ternary precedence and below).
    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let cond_start = self.offset();
        let cond = self.parse_or()?;
        let cond_end = self.previous_end();
        if self.eat_punct("?") {
            let then = self.parse_expr()?;
            self.expect_punct(":")?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
                cond_span: Span::new(cond_start, cond_end),
            });
        }
        Ok(cond)
    }

    /// Parses `||` chains.
    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat_punct("||") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    /// Parses `&&` chains.
    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        while self.eat_punct("&&") {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    /// Parses equality chains.
    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = if self.eat_punct("===") {
                BinaryOp::StrictEq
            } else if self.eat_punct("!==") {
                BinaryOp::StrictNe
            } else if self.eat_punct("==") {
                BinaryOp::Eq
            } else if self.eat_punct("!=") {
                BinaryOp::Ne
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    /// Parses relational chains.
    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.eat_punct("<=") {
                BinaryOp::Le
            } else if self.eat_punct(">=") {
                BinaryOp::Ge
            } else if self.eat_punct("<") {
                BinaryOp::Lt
            } else if self.eat_punct(">") {
                BinaryOp::Gt
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    /// Parses additive chains.
    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_punct("+") {
                BinaryOp::Add
            } else if self.eat_punct("-") {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    /// Parses multiplicative chains.
    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_exponent()?;
        loop {
            let op = if self.eat_punct("*") {
                BinaryOp::Mul
            } else if self.eat_punct("/") {
                BinaryOp::Div
            } else if self.eat_punct("%") {
                BinaryOp::Mod
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_exponent()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    /// Parses right-associative exponentiation.
    fn parse_exponent(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_unary()?;
        if self.eat_punct("**") {
            let rhs = self.parse_exponent()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    /// Parses unary operators and `await`.
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.at_ident("await") {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Await(Box::new(operand)));
        }
        if self.at_ident("typeof") {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::TypeOf,
                operand: Box::new(operand),
            });
        }
        let op = if self.eat_punct("!") {
            Some(UnaryOp::Not)
        } else if self.eat_punct("-") {
            Some(UnaryOp::Neg)
        } else if self.eat_punct("+") {
            Some(UnaryOp::Pos)
        } else {
            None
        };
        if let Some(op) = op {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    /// Parses member access, index access, and calls.
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let start = self.offset();
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") || self.eat_punct("?.") {
                let property = match self.advance() {
                    Some(tok) if tok.kind == TokenKind::Ident => tok.text,
                    _ => return Err(ParseError::new(self.offset(), "expected property name")),
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
                continue;
            }
            if self.eat_punct("[") {
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
                continue;
            }
            if self.at_punct("(") {
                self.pos += 1;
                let mut args = Vec::new();
                if !self.at_punct(")") {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                }
                self.expect_punct(")")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    span: Span::new(start, self.previous_end()),
                };
                continue;
            }
            return Ok(expr);
        }
    }

    /// Parses a primary expression.
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.peek().cloned() else {
            return Err(ParseError::new(self.offset(), "unexpected end of expression"));
        };

        match token.kind {
            TokenKind::Number => {
                self.pos += 1;
                let cleaned = token.text.replace('_', "");
                let number: f64 = cleaned
                    .parse()
                    .map_err(|_| ParseError::new(token.start, "invalid number literal"))?;
                Ok(Expr::Literal(json!(number)))
            }
            TokenKind::Str => {
                self.pos += 1;
                Ok(Expr::Literal(Value::String(token.value.unwrap_or_default())))
            }
            TokenKind::Template => {
                self.pos += 1;
                let raw = token.value.unwrap_or_default();
                let parts = parse_template_parts(&raw, token.start)?;
                Ok(Expr::Template {
                    parts,
                    raw,
                })
            }
            TokenKind::Ident => self.parse_ident_primary(&token),
            TokenKind::Punct => self.parse_punct_primary(&token),
        }
    }

    /// Parses identifier-led primaries (keyword literals, arrows, references).
    fn parse_ident_primary(&mut self, token: &Token) -> Result<Expr, ParseError> {
        match token.text.as_str() {
            "true" => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Bool(true)))
            }
            "false" => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Bool(false)))
            }
            "null" | "undefined" => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Null))
            }
            "async" => {
                // `async` arrow wrapper: consume and parse the wrapped arrow.
                self.pos += 1;
                self.parse_primary()
            }
            name if SKIPPED_KEYWORDS.contains(&name) => {
                Err(ParseError::new(token.start, format!("unsupported keyword `{name}`")))
            }
            name => {
                // Single-parameter arrow function: `x => body`.
                if self.peek_at(1).is_some_and(|next| next.text == "=>") {
                    self.pos += 2;
                    let body = self.parse_arrow_body()?;
                    return Ok(Expr::Arrow {
                        params: vec![name.to_string()],
                        body,
                    });
                }
                self.pos += 1;
                Ok(Expr::Ident(name.to_string()))
            }
        }
    }

    /// Parses punctuation-led primaries (parens, arrays, objects).
    fn parse_punct_primary(&mut self, token: &Token) -> Result<Expr, ParseError> {
        match token.text.as_str() {
            "(" => {
                if let Some(params) = self.try_arrow_params() {
                    let body = self.parse_arrow_body()?;
                    return Ok(Expr::Arrow {
                        params,
                        body,
                    });
                }
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            "[" => {
                self.pos += 1;
                let mut elements = Vec::new();
                if !self.at_punct("]") {
                    loop {
                        elements.push(self.parse_expr()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                        if self.at_punct("]") {
                            break;
                        }
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(elements))
            }
            "{" => {
                self.pos += 1;
                let mut entries = Vec::new();
                if !self.at_punct("}") {
                    loop {
                        let key = match self.advance() {
                            Some(tok) if tok.kind == TokenKind::Ident => tok.text,
                            Some(tok) if tok.kind == TokenKind::Str => {
                                tok.value.unwrap_or_default()
                            }
                            Some(tok) => {
                                return Err(ParseError::new(tok.start, "expected object key"));
                            }
                            None => {
                                return Err(ParseError::new(
                                    self.offset(),
                                    "unexpected end of object literal",
                                ));
                            }
                        };
                        if self.eat_punct(":") {
                            let value = self.parse_expr()?;
                            entries.push((key, value));
                        } else {
                            // Shorthand property.
                            entries.push((key.clone(), Expr::Ident(key)));
                        }
                        if !self.eat_punct(",") {
                            break;
                        }
                        if self.at_punct("}") {
                            break;
                        }
                    }
                }
                self.expect_punct("}")?;
                Ok(Expr::Object(entries))
            }
            other => Err(ParseError::new(token.start, format!("unexpected token `{other}`"))),
        }
    }

    /// Attempts to parse parenthesized arrow parameters, restoring the cursor
    /// when the parens do not introduce an arrow.
    fn try_arrow_params(&mut self) -> Option<Vec<String>> {
        let checkpoint = self.pos;
        // Scan for the matching close paren.
        let mut depth = 0usize;
        let mut scan = self.pos;
        loop {
            let token = self.tokens.get(scan)?;
            if token.kind == TokenKind::Punct {
                match token.text.as_str() {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => {
                        depth = depth.checked_sub(1)?;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            scan += 1;
        }
        let is_arrow = self.tokens.get(scan + 1).is_some_and(|tok| tok.text == "=>");
        if !is_arrow {
            return None;
        }

        self.pos += 1;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            match self.advance() {
                Some(tok) if tok.kind == TokenKind::Ident => params.push(tok.text),
                Some(_) | None => {
                    self.pos = checkpoint;
                    return None;
                }
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        if !self.eat_punct(")") || !self.eat_punct("=>") {
            self.pos = checkpoint;
            return None;
        }
        Some(params)
    }

    /// Parses an arrow function body.
    fn parse_arrow_body(&mut self) -> Result<ArrowBody, ParseError> {
        if self.eat_punct("{") {
            let stmts = self.parse_statements(false)?;
            self.expect_punct("}")?;
            Ok(ArrowBody::Block(stmts))
        } else {
            let expr = self.parse_expr()?;
            Ok(ArrowBody::Expr(Box::new(expr)))
        }
    }
}

// ============================================================================
// SECTION: Template Parts
// ============================================================================

/// Splits raw template text into literal and interpolation parts.
fn parse_template_parts(raw: &str, base_offset: usize) -> Result<Vec<TemplatePart>, ParseError> {
    let mut parts = Vec::new();
    let mut rest = raw;
    let mut consumed = 0usize;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            parts.push(TemplatePart::Text(rest[..start].to_string()));
        }
        let inner_start = start + 2;
        let mut depth = 1usize;
        let mut end = inner_start;
        for (index, ch) in rest[inner_start..].char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = inner_start + index;
                        break;
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(ParseError::new(
                base_offset + consumed + start,
                "unterminated template interpolation",
            ));
        }
        let inner = &rest[inner_start..end];
        let expr = parse_expression(inner)?;
        parts.push(TemplatePart::Expr(expr));
        consumed += end + 1;
        rest = &rest[end + 1..];
    }
    if !rest.is_empty() {
        parts.push(TemplatePart::Text(rest.to_string()));
    }
    Ok(parts)
}
