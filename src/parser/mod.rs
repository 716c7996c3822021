//! Parser for rill filters
//!
//! Recursive descent with one function per precedence level, producing
//! a span-annotated [`ast::Ast`]. From loosest to tightest binding:
//! function definitions and `label`/`as` bindings, pipe, comma,
//! assignment, alternative `//`, `or`, `and`, comparison, additive,
//! multiplicative, unary, postfix (`.field`, `[...]`, `[]`, slices,
//! `?`), primary.
//!
//! There is no error recovery; the first error aborts the parse.

pub mod ast;

use std::rc::Rc;

use crate::errors::{RillError, RillResult};
use crate::evaluator::value::Value;
use crate::lexer::token::{Span, Token, TokenKind};
use ast::*;

/// Maximum parse recursion depth before the parser bails out. Each
/// nesting level expands to several stack frames in the recursive
/// descent parser, so this must stay conservative.
const MAX_PARSE_DEPTH: usize = 256;

/// Parser for a lexed token stream
pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
    /// Current recursion depth
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser from a token stream
    pub fn new(tokens: Vec<Token>, source: &'a str) -> Self {
        Self {
            tokens,
            pos: 0,
            source,
            depth: 0,
        }
    }

    /// Parse a complete filter
    pub fn parse(&mut self) -> RillResult<Ast> {
        let ast = self.parse_pipe()?;
        if !self.is_at_end() {
            return Err(self.error_unexpected("end of filter"));
        }
        Ok(ast)
    }

    /// Parse the lowest precedence tier: `def`, `label`, `as`-bindings,
    /// and the pipe operator
    fn parse_pipe(&mut self) -> RillResult<Ast> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            self.depth -= 1;
            return Err(RillError::ParseDepthExceeded {
                src: self.source.to_string(),
                span: self.current_span().into(),
                limit: MAX_PARSE_DEPTH,
            });
        }
        let result = self.parse_pipe_inner();
        self.depth -= 1;
        result
    }

    fn parse_pipe_inner(&mut self) -> RillResult<Ast> {
        let start = self.current_span();

        if self.check(&TokenKind::Def) {
            return self.parse_funcdef();
        }

        if self.check(&TokenKind::Label) {
            self.advance();
            let name = self.expect_var()?;
            self.expect(&TokenKind::Pipe, "'|' after label")?;
            let body = self.parse_pipe()?;
            let span = start.to(self.previous_span());
            return Ok(Ast::new(
                AstKind::Label {
                    name,
                    body: Box::new(body),
                },
                span,
            ));
        }

        let lhs = self.parse_comma()?;

        if self.check(&TokenKind::As) {
            self.advance();
            let var = self.expect_var()?;
            self.expect(&TokenKind::Pipe, "'|' after binding")?;
            let body = self.parse_pipe()?;
            let span = start.to(self.previous_span());
            return Ok(Ast::new(
                AstKind::Bind {
                    source: Box::new(lhs),
                    var,
                    body: Box::new(body),
                },
                span,
            ));
        }

        if self.check(&TokenKind::Pipe) {
            self.advance();
            let rhs = self.parse_pipe()?;
            let span = start.to(self.previous_span());
            return Ok(Ast::new(
                AstKind::Pipe {
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                span,
            ));
        }

        Ok(lhs)
    }

    /// Parse `def name(a; b): body; rest`
    fn parse_funcdef(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        self.expect(&TokenKind::Def, "'def'")?;
        let name = self.expect_ident("function name")?;

        let mut params = Vec::new();
        if self.check(&TokenKind::LeftParen) {
            self.advance();
            loop {
                params.push(self.expect_ident("parameter name")?);
                if self.check(&TokenKind::Semicolon) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(&TokenKind::RightParen, "')' after parameters")?;
        }

        self.expect(&TokenKind::Colon, "':' before function body")?;
        let body = self.parse_pipe()?;
        self.expect(&TokenKind::Semicolon, "';' after function body")?;
        let rest = self.parse_pipe()?;

        let span = start.to(self.previous_span());
        Ok(Ast::new(
            AstKind::FuncDef {
                name,
                params,
                body: Rc::new(body),
                rest: Box::new(rest),
            },
            span,
        ))
    }

    /// Parse the comma operator
    fn parse_comma(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        let mut left = self.parse_assign()?;

        while self.check(&TokenKind::Comma) {
            self.advance();
            let right = self.parse_assign()?;
            let span = start.to(self.previous_span());
            left = Ast::new(
                AstKind::Comma {
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse assignment operators (right associative)
    fn parse_assign(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        let lhs = self.parse_alternative()?;

        let op = match self.current().kind {
            TokenKind::Eq => AssignOp::Assign,
            TokenKind::PipeEq => AssignOp::Update,
            TokenKind::PlusEq => AssignOp::Add,
            TokenKind::MinusEq => AssignOp::Sub,
            TokenKind::StarEq => AssignOp::Mul,
            TokenKind::SlashEq => AssignOp::Div,
            TokenKind::PercentEq => AssignOp::Mod,
            TokenKind::AltEq => AssignOp::Alt,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_assign()?;
        let span = start.to(self.previous_span());

        Ok(Ast::new(
            AstKind::Assign {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        ))
    }

    /// Parse the alternative operator `//`
    fn parse_alternative(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        let mut left = self.parse_or()?;

        while self.check(&TokenKind::Alt) {
            self.advance();
            let right = self.parse_or()?;
            let span = start.to(self.previous_span());
            left = Ast::new(
                AstKind::Alternative {
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse `or`
    fn parse_or(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        let mut left = self.parse_and()?;

        while self.check(&TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            let span = start.to(self.previous_span());
            left = Ast::new(
                AstKind::Logic {
                    op: LogicOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse `and`
    fn parse_and(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        let mut left = self.parse_comparison()?;

        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.parse_comparison()?;
            let span = start.to(self.previous_span());
            left = Ast::new(
                AstKind::Logic {
                    op: LogicOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse comparison operators
    fn parse_comparison(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        let mut left = self.parse_additive()?;

        loop {
            let op = match self.current().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            let span = start.to(self.previous_span());
            left = Ast::new(
                AstKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse `+` and `-`
    fn parse_additive(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            let span = start.to(self.previous_span());
            left = Ast::new(
                AstKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse `*`, `/`, `%`
    fn parse_multiplicative(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let span = start.to(self.previous_span());
            left = Ast::new(
                AstKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse unary `-` and `not`
    fn parse_unary(&mut self) -> RillResult<Ast> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            self.depth -= 1;
            return Err(RillError::ParseDepthExceeded {
                src: self.source.to_string(),
                span: self.current_span().into(),
                limit: MAX_PARSE_DEPTH,
            });
        }
        let result = self.parse_unary_inner();
        self.depth -= 1;
        result
    }

    fn parse_unary_inner(&mut self) -> RillResult<Ast> {
        let start = self.current_span();

        if self.check(&TokenKind::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.to(self.previous_span());
            return Ok(Ast::new(
                AstKind::Neg {
                    expr: Box::new(operand),
                },
                span,
            ));
        }

        // `not expr` is the unary form; a bare `not` (as in `. | not`)
        // is the zero-arity builtin
        if self.check(&TokenKind::Not) && self.peek_starts_expr() {
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.to(self.previous_span());
            return Ok(Ast::new(
                AstKind::Not {
                    expr: Box::new(operand),
                },
                span,
            ));
        }

        self.parse_postfix()
    }

    /// Parse the postfix chain: `.field`, `[...]`, `[]`, slices, `?`
    fn parse_postfix(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        let mut expr = self.parse_primary()?;

        loop {
            match &self.current().kind {
                TokenKind::Dot => {
                    match self.peek_kind() {
                        Some(TokenKind::Ident(_)) | Some(TokenKind::String(_)) => {
                            self.advance(); // .
                            let name = match self.current().kind.clone() {
                                TokenKind::Ident(name) => name,
                                TokenKind::String(name) => name,
                                _ => unreachable!("peeked above"),
                            };
                            self.advance();
                            let span = start.to(self.previous_span());
                            expr = Ast::new(
                                AstKind::Field {
                                    target: Box::new(expr),
                                    name,
                                },
                                span,
                            );
                        }
                        Some(TokenKind::LeftBracket) => {
                            // `.a.[0]` — the dot before the bracket is inert
                            self.advance();
                        }
                        _ => break,
                    }
                }
                TokenKind::LeftBracket => {
                    expr = self.parse_bracket_suffix(expr, start)?;
                }
                TokenKind::Question => {
                    self.advance();
                    let span = start.to(self.previous_span());
                    expr = Ast::new(
                        AstKind::TryCatch {
                            body: Box::new(expr),
                            handler: None,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// Parse `[...]` after an expression: iterate, index, or slice
    fn parse_bracket_suffix(&mut self, target: Ast, start: Span) -> RillResult<Ast> {
        self.expect(&TokenKind::LeftBracket, "'['")?;

        if self.check(&TokenKind::RightBracket) {
            self.advance();
            let span = start.to(self.previous_span());
            return Ok(Ast::new(
                AstKind::Iterate {
                    target: Box::new(target),
                },
                span,
            ));
        }

        if self.check(&TokenKind::Colon) {
            self.advance();
            let end = self.parse_pipe()?;
            self.expect(&TokenKind::RightBracket, "']' after slice")?;
            let span = start.to(self.previous_span());
            return Ok(Ast::new(
                AstKind::Slice {
                    target: Box::new(target),
                    start: None,
                    end: Some(Box::new(end)),
                },
                span,
            ));
        }

        let index = self.parse_pipe()?;

        if self.check(&TokenKind::Colon) {
            self.advance();
            let end = if self.check(&TokenKind::RightBracket) {
                None
            } else {
                Some(Box::new(self.parse_pipe()?))
            };
            self.expect(&TokenKind::RightBracket, "']' after slice")?;
            let span = start.to(self.previous_span());
            return Ok(Ast::new(
                AstKind::Slice {
                    target: Box::new(target),
                    start: Some(Box::new(index)),
                    end,
                },
                span,
            ));
        }

        self.expect(&TokenKind::RightBracket, "']' after index")?;
        let span = start.to(self.previous_span());
        Ok(Ast::new(
            AstKind::Index {
                target: Box::new(target),
                index: Box::new(index),
            },
            span,
        ))
    }

    /// Parse a primary expression
    fn parse_primary(&mut self) -> RillResult<Ast> {
        let start = self.current_span();

        match self.current().kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Ast::new(AstKind::Literal(Value::Number(n)), start))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Ast::new(AstKind::Literal(Value::String(s)), start))
            }
            TokenKind::StringStart(_) => self.parse_interpolated_string(),
            TokenKind::Null => {
                self.advance();
                Ok(Ast::new(AstKind::Literal(Value::Null), start))
            }
            TokenKind::True => {
                self.advance();
                Ok(Ast::new(AstKind::Literal(Value::Bool(true)), start))
            }
            TokenKind::False => {
                self.advance();
                Ok(Ast::new(AstKind::Literal(Value::Bool(false)), start))
            }
            TokenKind::Var(name) => {
                self.advance();
                Ok(Ast::new(AstKind::Var(name), start))
            }
            TokenKind::Dot => {
                self.advance();
                match self.current().kind.clone() {
                    TokenKind::Ident(name) => {
                        self.advance();
                        let span = start.to(self.previous_span());
                        Ok(Ast::new(
                            AstKind::Field {
                                target: Box::new(Ast::new(AstKind::Identity, start)),
                                name,
                            },
                            span,
                        ))
                    }
                    TokenKind::String(name) => {
                        self.advance();
                        let span = start.to(self.previous_span());
                        Ok(Ast::new(
                            AstKind::Field {
                                target: Box::new(Ast::new(AstKind::Identity, start)),
                                name,
                            },
                            span,
                        ))
                    }
                    _ => Ok(Ast::new(AstKind::Identity, start)),
                }
            }
            TokenKind::DotDot => {
                self.advance();
                Ok(Ast::new(AstKind::Recurse, start))
            }
            TokenKind::Ident(name) => {
                self.advance();
                // `break` is an ordinary identifier until a `$label` follows
                if name == "break" {
                    if let TokenKind::Var(label) = self.current().kind.clone() {
                        self.advance();
                        let span = start.to(self.previous_span());
                        return Ok(Ast::new(AstKind::Break { name: label }, span));
                    }
                }
                let args = if self.check(&TokenKind::LeftParen) {
                    self.advance();
                    let mut args = vec![Rc::new(self.parse_pipe()?)];
                    while self.check(&TokenKind::Semicolon) {
                        self.advance();
                        args.push(Rc::new(self.parse_pipe()?));
                    }
                    self.expect(&TokenKind::RightParen, "')' after arguments")?;
                    args
                } else {
                    Vec::new()
                };
                let span = start.to(self.previous_span());
                Ok(Ast::new(AstKind::Call { name, args }, span))
            }
            TokenKind::Not => {
                // Bare `not`, e.g. `. | not`
                self.advance();
                Ok(Ast::new(
                    AstKind::Call {
                        name: "not".to_string(),
                        args: Vec::new(),
                    },
                    start,
                ))
            }
            TokenKind::If => self.parse_if(),
            TokenKind::Reduce => {
                self.advance();
                let source = self.parse_postfix()?;
                self.expect(&TokenKind::As, "'as' after reduce source")?;
                let var = self.expect_var()?;
                self.expect(&TokenKind::LeftParen, "'(' after reduce binding")?;
                let init = self.parse_pipe()?;
                self.expect(&TokenKind::Semicolon, "';' between init and update")?;
                let update = self.parse_pipe()?;
                self.expect(&TokenKind::RightParen, "')' after reduce update")?;
                let span = start.to(self.previous_span());
                Ok(Ast::new(
                    AstKind::Reduce {
                        source: Box::new(source),
                        var,
                        init: Box::new(init),
                        update: Box::new(update),
                    },
                    span,
                ))
            }
            TokenKind::Foreach => {
                self.advance();
                let source = self.parse_postfix()?;
                self.expect(&TokenKind::As, "'as' after foreach source")?;
                let var = self.expect_var()?;
                self.expect(&TokenKind::LeftParen, "'(' after foreach binding")?;
                let init = self.parse_pipe()?;
                self.expect(&TokenKind::Semicolon, "';' between init and update")?;
                let update = self.parse_pipe()?;
                let extract = if self.check(&TokenKind::Semicolon) {
                    self.advance();
                    Some(Box::new(self.parse_pipe()?))
                } else {
                    None
                };
                self.expect(&TokenKind::RightParen, "')' after foreach body")?;
                let span = start.to(self.previous_span());
                Ok(Ast::new(
                    AstKind::Foreach {
                        source: Box::new(source),
                        var,
                        init: Box::new(init),
                        update: Box::new(update),
                        extract,
                    },
                    span,
                ))
            }
            TokenKind::Try => {
                // Body and handler stop at `|` and `,`, so a pipe after
                // the try applies to the whole expression
                self.advance();
                let body = self.parse_assign()?;
                let handler = if self.check(&TokenKind::Catch) {
                    self.advance();
                    Some(Box::new(self.parse_assign()?))
                } else {
                    None
                };
                let span = start.to(self.previous_span());
                Ok(Ast::new(
                    AstKind::TryCatch {
                        body: Box::new(body),
                        handler,
                    },
                    span,
                ))
            }
            TokenKind::LeftParen => {
                self.advance();
                let mut inner = self.parse_pipe()?;
                self.expect(&TokenKind::RightParen, "')'")?;
                inner.span = start.to(self.previous_span());
                Ok(inner)
            }
            TokenKind::LeftBracket => {
                self.advance();
                if self.check(&TokenKind::RightBracket) {
                    self.advance();
                    let span = start.to(self.previous_span());
                    return Ok(Ast::new(AstKind::Array { items: None }, span));
                }
                let inner = self.parse_pipe()?;
                self.expect(&TokenKind::RightBracket, "']' after array items")?;
                let span = start.to(self.previous_span());
                Ok(Ast::new(
                    AstKind::Array {
                        items: Some(Box::new(inner)),
                    },
                    span,
                ))
            }
            TokenKind::LeftBrace => self.parse_object(),
            _ => Err(self.error_unexpected("expression")),
        }
    }

    /// Parse an interpolated string into a concatenation of literal
    /// segments and `tostring`-wrapped embeds
    fn parse_interpolated_string(&mut self) -> RillResult<Ast> {
        let start = self.current_span();

        let first = match self.current().kind.clone() {
            TokenKind::StringStart(s) => s,
            _ => return Err(self.error_unexpected("string")),
        };
        self.advance();

        // The leading literal also forces the result to be a string
        // when the whole literal is a single embed
        let mut acc = Ast::new(AstKind::Literal(Value::String(first)), start);

        loop {
            let embed = self.parse_pipe()?;
            let embed_span = embed.span;
            let stringified = Ast::new(
                AstKind::Pipe {
                    left: Box::new(embed),
                    right: Box::new(Ast::new(
                        AstKind::Call {
                            name: "tostring".to_string(),
                            args: Vec::new(),
                        },
                        embed_span,
                    )),
                },
                embed_span,
            );
            acc = concat(acc, stringified, start.to(self.previous_span()));

            match self.current().kind.clone() {
                TokenKind::StringMiddle(s) => {
                    let seg_span = self.current_span();
                    self.advance();
                    if !s.is_empty() {
                        let lit = Ast::new(AstKind::Literal(Value::String(s)), seg_span);
                        acc = concat(acc, lit, start.to(seg_span));
                    }
                }
                TokenKind::StringEnd(s) => {
                    let seg_span = self.current_span();
                    self.advance();
                    if !s.is_empty() {
                        let lit = Ast::new(AstKind::Literal(Value::String(s)), seg_span);
                        acc = concat(acc, lit, start.to(seg_span));
                    }
                    acc.span = start.to(seg_span);
                    return Ok(acc);
                }
                _ => return Err(self.error_unexpected("string continuation or end")),
            }
        }
    }

    /// Parse an object literal
    fn parse_object(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        self.expect(&TokenKind::LeftBrace, "'{'")?;

        let mut entries = Vec::new();

        if !self.check(&TokenKind::RightBrace) {
            loop {
                entries.push(self.parse_object_entry()?);
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        self.expect(&TokenKind::RightBrace, "'}' after object entries")?;
        let span = start.to(self.previous_span());
        Ok(Ast::new(AstKind::Object { entries }, span))
    }

    /// Parse one `key: value` entry; a lone identifier or string key is
    /// shorthand for `key: .key`
    fn parse_object_entry(&mut self) -> RillResult<ObjectEntry> {
        let key_span = self.current_span();

        // Identifier, keyword, or plain string keys may use shorthand
        let literal_key = match self.current().kind.clone() {
            TokenKind::Ident(name) => Some(name),
            TokenKind::String(s) => Some(s),
            ref k if k.keyword_str().is_some() => Some(k.keyword_str().unwrap().to_string()),
            _ => None,
        };

        if let Some(name) = literal_key {
            self.advance();
            let value = if self.check(&TokenKind::Colon) {
                self.advance();
                self.parse_object_value()?
            } else {
                // `{foo}` is `{foo: .foo}`
                Ast::new(
                    AstKind::Field {
                        target: Box::new(Ast::new(AstKind::Identity, key_span)),
                        name: name.clone(),
                    },
                    key_span,
                )
            };
            return Ok(ObjectEntry {
                key: ObjectKey::Literal(name),
                value,
            });
        }

        let key = match self.current().kind {
            TokenKind::StringStart(_) => {
                let key_ast = self.parse_interpolated_string()?;
                ObjectKey::Expr(Box::new(key_ast))
            }
            TokenKind::LeftParen => {
                self.advance();
                let key_ast = self.parse_pipe()?;
                self.expect(&TokenKind::RightParen, "')' after computed key")?;
                ObjectKey::Expr(Box::new(key_ast))
            }
            _ => return Err(self.error_unexpected("object key")),
        };

        self.expect(&TokenKind::Colon, "':' after computed key")?;
        let value = self.parse_object_value()?;
        Ok(ObjectEntry { key, value })
    }

    /// Parse an object value: everything except a top-level comma,
    /// which separates entries
    fn parse_object_value(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        let mut expr = self.parse_assign()?;

        while self.check(&TokenKind::Pipe) {
            self.advance();
            let rhs = self.parse_assign()?;
            let span = start.to(self.previous_span());
            expr = Ast::new(
                AstKind::Pipe {
                    left: Box::new(expr),
                    right: Box::new(rhs),
                },
                span,
            );
        }

        Ok(expr)
    }

    /// Parse `if cond then a (elif c then b)* (else d)? end`
    fn parse_if(&mut self) -> RillResult<Ast> {
        let start = self.current_span();
        self.expect(&TokenKind::If, "'if'")?;
        let cond = self.parse_pipe()?;
        self.expect(&TokenKind::Then, "'then' after condition")?;
        let then = self.parse_pipe()?;

        let mut elifs = Vec::new();
        while self.check(&TokenKind::Elif) {
            self.advance();
            let c = self.parse_pipe()?;
            self.expect(&TokenKind::Then, "'then' after elif condition")?;
            let t = self.parse_pipe()?;
            elifs.push((c, t));
        }

        let mut else_ = if self.check(&TokenKind::Else) {
            self.advance();
            Some(Box::new(self.parse_pipe()?))
        } else {
            None
        };
        self.expect(&TokenKind::End, "'end' to close if")?;
        let span = start.to(self.previous_span());

        // Nest elif chains into the else branch, back to front
        for (c, t) in elifs.into_iter().rev() {
            let branch_span = c.span.to(t.span);
            else_ = Some(Box::new(Ast::new(
                AstKind::If {
                    cond: Box::new(c),
                    then: Box::new(t),
                    else_,
                },
                branch_span,
            )));
        }

        Ok(Ast::new(
            AstKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                else_,
            },
            span,
        ))
    }

    // Helper methods

    /// Get the current token
    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or_else(|| {
            self.tokens
                .last()
                .expect("token stream always ends with Eof")
        })
    }

    /// Peek one token past the current one
    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos + 1).map(|t| &t.kind)
    }

    /// Whether the token after `not` can begin an expression
    fn peek_starts_expr(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::Number(_)
                    | TokenKind::String(_)
                    | TokenKind::StringStart(_)
                    | TokenKind::Ident(_)
                    | TokenKind::Var(_)
                    | TokenKind::Dot
                    | TokenKind::DotDot
                    | TokenKind::LeftParen
                    | TokenKind::LeftBracket
                    | TokenKind::LeftBrace
                    | TokenKind::If
                    | TokenKind::Try
                    | TokenKind::Reduce
                    | TokenKind::Foreach
                    | TokenKind::Minus
                    | TokenKind::Not
                    | TokenKind::Null
                    | TokenKind::True
                    | TokenKind::False
            )
        )
    }

    fn current_span(&self) -> Span {
        self.current().span
    }

    fn previous_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    /// Check if the current token matches the expected kind
    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    /// Consume the expected token or fail
    fn expect(&mut self, kind: &TokenKind, expected: &str) -> RillResult<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_unexpected(expected))
        }
    }

    /// Consume an identifier and return its name
    fn expect_ident(&mut self, expected: &str) -> RillResult<String> {
        match self.current().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_unexpected(expected)),
        }
    }

    /// Consume a `$name` variable and return the bare name
    fn expect_var(&mut self) -> RillResult<String> {
        match self.current().kind.clone() {
            TokenKind::Var(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_unexpected("variable name ($name)")),
        }
    }

    fn error_unexpected(&self, expected: &str) -> RillError {
        RillError::unexpected_token(
            self.source,
            self.current_span(),
            expected,
            self.current().kind.to_string(),
        )
    }
}

/// Build a string-concatenation node for interpolation segments
fn concat(left: Ast, right: Ast, span: Span) -> Ast {
    Ast::new(
        AstKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Ast {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens, source).parse().unwrap()
    }

    fn parse_err(source: &str) -> RillError {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens, source).parse().unwrap_err()
    }

    #[test]
    fn test_identity() {
        assert_eq!(parse(".").kind, AstKind::Identity);
    }

    #[test]
    fn test_field_chain() {
        let ast = parse(".a.b");
        match ast.kind {
            AstKind::Field { target, name } => {
                assert_eq!(name, "b");
                assert!(matches!(target.kind, AstKind::Field { .. }));
            }
            other => panic!("expected field access, got {:?}", other),
        }
    }

    #[test]
    fn test_quoted_field() {
        let ast = parse(r#"."a key""#);
        match ast.kind {
            AstKind::Field { name, .. } => assert_eq!(name, "a key"),
            other => panic!("expected field access, got {:?}", other),
        }
    }

    #[test]
    fn test_pipe_and_comma_precedence() {
        // Comma binds tighter than pipe: `a, b | c` is `(a, b) | c`
        let ast = parse(".a, .b | .c");
        match ast.kind {
            AstKind::Pipe { left, .. } => {
                assert!(matches!(left.kind, AstKind::Comma { .. }));
            }
            other => panic!("expected pipe, got {:?}", other),
        }
    }

    #[test]
    fn test_iterate_and_index() {
        assert!(matches!(parse(".[]").kind, AstKind::Iterate { .. }));
        assert!(matches!(parse(".[0]").kind, AstKind::Index { .. }));
        assert!(matches!(parse(".a[]").kind, AstKind::Iterate { .. }));
        assert!(matches!(parse(".a.[0]").kind, AstKind::Index { .. }));
    }

    #[test]
    fn test_slices() {
        match parse(".[1:2]").kind {
            AstKind::Slice { start, end, .. } => {
                assert!(start.is_some());
                assert!(end.is_some());
            }
            other => panic!("expected slice, got {:?}", other),
        }
        match parse(".[:2]").kind {
            AstKind::Slice { start, end, .. } => {
                assert!(start.is_none());
                assert!(end.is_some());
            }
            other => panic!("expected slice, got {:?}", other),
        }
        match parse(".[1:]").kind {
            AstKind::Slice { start, end, .. } => {
                assert!(start.is_some());
                assert!(end.is_none());
            }
            other => panic!("expected slice, got {:?}", other),
        }
    }

    #[test]
    fn test_question_wraps_in_try() {
        match parse(".a?").kind {
            AstKind::TryCatch { handler, .. } => assert!(handler.is_none()),
            other => panic!("expected try, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        match parse("1 + 2 * 3").kind {
            AstKind::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => {
                assert!(matches!(
                    right.kind,
                    AstKind::Binary {
                        op: BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("expected addition, got {:?}", other),
        }
    }

    #[test]
    fn test_alternative_binds_looser_than_or() {
        match parse(".a or .b // .c").kind {
            AstKind::Alternative { left, .. } => {
                assert!(matches!(
                    left.kind,
                    AstKind::Logic {
                        op: LogicOp::Or,
                        ..
                    }
                ));
            }
            other => panic!("expected alternative, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_is_right_associative() {
        match parse(".a = .b = 1").kind {
            AstKind::Assign { op, rhs, .. } => {
                assert_eq!(op, AssignOp::Assign);
                assert!(matches!(rhs.kind, AstKind::Assign { .. }));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_compound_assignments() {
        for (src, op) in [
            (".a |= .+1", AssignOp::Update),
            (".a += 1", AssignOp::Add),
            (".a -= 1", AssignOp::Sub),
            (".a *= 2", AssignOp::Mul),
            (".a /= 2", AssignOp::Div),
            (".a %= 2", AssignOp::Mod),
            (".a //= 1", AssignOp::Alt),
        ] {
            match parse(src).kind {
                AstKind::Assign { op: found, .. } => assert_eq!(found, op, "{}", src),
                other => panic!("expected assignment for {}, got {:?}", src, other),
            }
        }
    }

    #[test]
    fn test_object_shorthand() {
        let ast = parse("{foo, bar: 1}");
        match ast.kind {
            AstKind::Object { entries } => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].key, ObjectKey::Literal("foo".to_string()));
                // {foo} rewrites to {foo: .foo}
                assert!(matches!(entries[0].value.kind, AstKind::Field { .. }));
                assert!(matches!(
                    entries[1].value.kind,
                    AstKind::Literal(Value::Number(_))
                ));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_object_keyword_and_computed_keys() {
        let ast = parse("{if: 1, (.k): 2}");
        match ast.kind {
            AstKind::Object { entries } => {
                assert_eq!(entries[0].key, ObjectKey::Literal("if".to_string()));
                assert!(matches!(entries[1].key, ObjectKey::Expr(_)));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_object_value_allows_pipe_but_not_comma() {
        let ast = parse("{a: .x | .y, b: 2}");
        match ast.kind {
            AstKind::Object { entries } => {
                assert_eq!(entries.len(), 2);
                assert!(matches!(entries[0].value.kind, AstKind::Pipe { .. }));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_if_elif_else_desugars() {
        let ast = parse("if .a then 1 elif .b then 2 else 3 end");
        match ast.kind {
            AstKind::If { else_, .. } => {
                let nested = else_.expect("elif becomes nested if");
                assert!(matches!(nested.kind, AstKind::If { .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_if_without_else() {
        match parse("if .a then 1 end").kind {
            AstKind::If { else_, .. } => assert!(else_.is_none()),
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_def_and_call() {
        let ast = parse("def double: . * 2; [.[] | double]");
        match ast.kind {
            AstKind::FuncDef { name, params, .. } => {
                assert_eq!(name, "double");
                assert!(params.is_empty());
            }
            other => panic!("expected def, got {:?}", other),
        }

        let ast = parse("def f(g; h): g + h; f(1; 2)");
        match ast.kind {
            AstKind::FuncDef { params, rest, .. } => {
                assert_eq!(params, vec!["g".to_string(), "h".to_string()]);
                match &rest.kind {
                    AstKind::Call { name, args } => {
                        assert_eq!(name, "f");
                        assert_eq!(args.len(), 2);
                    }
                    other => panic!("expected call, got {:?}", other),
                }
            }
            other => panic!("expected def, got {:?}", other),
        }
    }

    #[test]
    fn test_bind() {
        match parse(".items as $xs | $xs").kind {
            AstKind::Bind { var, .. } => assert_eq!(var, "xs"),
            other => panic!("expected bind, got {:?}", other),
        }
    }

    #[test]
    fn test_reduce_and_foreach() {
        match parse("reduce .[] as $x (0; . + $x)").kind {
            AstKind::Reduce { var, .. } => assert_eq!(var, "x"),
            other => panic!("expected reduce, got {:?}", other),
        }
        match parse("foreach .[] as $x (0; . + $x; . * 2)").kind {
            AstKind::Foreach { extract, .. } => assert!(extract.is_some()),
            other => panic!("expected foreach, got {:?}", other),
        }
        match parse("foreach .[] as $x (0; . + $x)").kind {
            AstKind::Foreach { extract, .. } => assert!(extract.is_none()),
            other => panic!("expected foreach, got {:?}", other),
        }
    }

    #[test]
    fn test_try_catch() {
        match parse("try .a catch .b").kind {
            AstKind::TryCatch { handler, .. } => assert!(handler.is_some()),
            other => panic!("expected try, got {:?}", other),
        }
        match parse("try .a").kind {
            AstKind::TryCatch { handler, .. } => assert!(handler.is_none()),
            other => panic!("expected try, got {:?}", other),
        }
    }

    #[test]
    fn test_label_break() {
        match parse("label $out | break $out").kind {
            AstKind::Label { name, body } => {
                assert_eq!(name, "out");
                match body.kind {
                    AstKind::Break { name } => assert_eq!(name, "out"),
                    other => panic!("expected break, got {:?}", other),
                }
            }
            other => panic!("expected label, got {:?}", other),
        }
    }

    #[test]
    fn test_interpolation_desugars_to_concat() {
        // "a\(.b)c" becomes ("a" + (.b | tostring)) + "c"
        match parse(r#""a\(.b)c""#).kind {
            AstKind::Binary {
                op: BinaryOp::Add,
                left,
                right,
            } => {
                assert!(matches!(
                    right.kind,
                    AstKind::Literal(Value::String(ref s)) if s == "c"
                ));
                assert!(matches!(
                    left.kind,
                    AstKind::Binary {
                        op: BinaryOp::Add,
                        ..
                    }
                ));
            }
            other => panic!("expected concatenation, got {:?}", other),
        }
    }

    #[test]
    fn test_unary_not_vs_builtin_not() {
        assert!(matches!(parse("not .a").kind, AstKind::Not { .. }));
        assert!(matches!(parse("not").kind, AstKind::Call { ref name, .. } if name == "not"));
        match parse(".a | not").kind {
            AstKind::Pipe { right, .. } => {
                assert!(matches!(right.kind, AstKind::Call { ref name, .. } if name == "not"));
            }
            other => panic!("expected pipe, got {:?}", other),
        }
    }

    #[test]
    fn test_recurse_token() {
        assert!(matches!(parse("..").kind, AstKind::Recurse));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse_err(".a |"),
            RillError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            parse_err("if .a then 1"),
            RillError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            parse_err("{a 1}"),
            RillError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            parse_err("1 2"),
            RillError::UnexpectedToken { .. }
        ));
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let src = format!("{}1{}", "(".repeat(400), ")".repeat(400));
        assert!(matches!(
            parse_err(&src),
            RillError::ParseDepthExceeded { .. }
        ));
    }

    #[test]
    fn test_spans_cover_nodes() {
        let ast = parse(".foo | .bar");
        assert_eq!(ast.span, Span::new(0, 11));
        match ast.kind {
            AstKind::Pipe { left, right } => {
                assert_eq!(left.span, Span::new(0, 4));
                assert_eq!(right.span, Span::new(7, 11));
            }
            other => panic!("expected pipe, got {:?}", other),
        }
    }
}
