//! Static validation of parsed filters
//!
//! A single AST walk that resolves every call before evaluation starts:
//! a call must name either a function in scope (a `def` or a formal
//! argument) or a builtin with a matching arity. The walk also rejects
//! the sandbox-forbidden names outright, so a filter that would reach
//! for the clock, the environment, or external input streams fails
//! before it runs.

use crate::errors::{RillError, RillResult};
use crate::evaluator::builtins;
use crate::lexer::token::Span;
use crate::parser::ast::{Ast, AstKind, ObjectKey};

/// Names that reach outside the sandbox; rejected even though they are
/// not registered builtins
const FORBIDDEN: &[&str] = &["now", "input", "inputs", "env", "import", "include"];

/// Variables that expose ambient state
const FORBIDDEN_VARS: &[&str] = &["ENV"];

/// Validate a parsed filter against the builtin registry
pub fn validate(source: &str, ast: &Ast) -> RillResult<()> {
    let mut validator = Validator {
        source,
        scopes: Vec::new(),
    };
    validator.walk(ast)
}

struct Validator<'a> {
    source: &'a str,
    /// Stack of function scopes; each frame lists (name, arity) pairs
    scopes: Vec<Vec<(String, usize)>>,
}

impl Validator<'_> {
    fn walk(&mut self, node: &Ast) -> RillResult<()> {
        match &node.kind {
            AstKind::Identity
            | AstKind::Recurse
            | AstKind::Literal(_)
            | AstKind::Break { .. } => Ok(()),

            AstKind::Var(name) => {
                if FORBIDDEN_VARS.contains(&name.as_str()) {
                    return Err(RillError::Forbidden {
                        src: self.source.to_string(),
                        span: node.span.into(),
                        name: format!("${}", name),
                    });
                }
                Ok(())
            }

            AstKind::Field { target, .. } => self.walk(target),
            AstKind::Iterate { target } => self.walk(target),
            AstKind::Index { target, index } => {
                self.walk(target)?;
                self.walk(index)
            }
            AstKind::Slice { target, start, end } => {
                self.walk(target)?;
                if let Some(start) = start {
                    self.walk(start)?;
                }
                if let Some(end) = end {
                    self.walk(end)?;
                }
                Ok(())
            }
            AstKind::Array { items } => match items {
                Some(items) => self.walk(items),
                None => Ok(()),
            },
            AstKind::Object { entries } => {
                for entry in entries {
                    if let ObjectKey::Expr(key) = &entry.key {
                        self.walk(key)?;
                    }
                    self.walk(&entry.value)?;
                }
                Ok(())
            }
            AstKind::Pipe { left, right }
            | AstKind::Comma { left, right }
            | AstKind::Alternative { left, right }
            | AstKind::Binary { left, right, .. }
            | AstKind::Logic { left, right, .. } => {
                self.walk(left)?;
                self.walk(right)
            }
            AstKind::Neg { expr } | AstKind::Not { expr } => self.walk(expr),
            AstKind::If { cond, then, else_ } => {
                self.walk(cond)?;
                self.walk(then)?;
                if let Some(else_) = else_ {
                    self.walk(else_)?;
                }
                Ok(())
            }
            AstKind::Bind { source, body, .. } => {
                self.walk(source)?;
                self.walk(body)
            }
            AstKind::FuncDef {
                name,
                params,
                body,
                rest,
            } => {
                // The definition is visible to its own body (recursion)
                // and to the rest of the program
                self.scopes.push(vec![(name.clone(), params.len())]);
                // Formals enter the body's scope as zero-arity names
                self.scopes
                    .push(params.iter().map(|p| (p.clone(), 0)).collect());
                self.walk(body)?;
                self.scopes.pop();
                self.walk(rest)?;
                self.scopes.pop();
                Ok(())
            }
            AstKind::Call { name, args } => {
                self.check_call(name, args.len(), node.span)?;
                for arg in args {
                    self.walk(arg)?;
                }
                Ok(())
            }
            AstKind::Reduce {
                source,
                init,
                update,
                ..
            } => {
                self.walk(source)?;
                self.walk(init)?;
                self.walk(update)
            }
            AstKind::Foreach {
                source,
                init,
                update,
                extract,
                ..
            } => {
                self.walk(source)?;
                self.walk(init)?;
                self.walk(update)?;
                if let Some(extract) = extract {
                    self.walk(extract)?;
                }
                Ok(())
            }
            AstKind::TryCatch { body, handler } => {
                self.walk(body)?;
                if let Some(handler) = handler {
                    self.walk(handler)?;
                }
                Ok(())
            }
            AstKind::Label { body, .. } => self.walk(body),
            AstKind::Assign { lhs, rhs, .. } => {
                self.walk(lhs)?;
                self.walk(rhs)
            }
        }
    }

    fn check_call(&self, name: &str, arity: usize, span: Span) -> RillResult<()> {
        // An in-scope function accepts the call by name alone: a formal
        // argument shadows builtins of every arity
        let in_scope = self
            .scopes
            .iter()
            .rev()
            .any(|frame| frame.iter().any(|(n, _)| n == name));
        if in_scope {
            return Ok(());
        }

        if FORBIDDEN.contains(&name) {
            return Err(RillError::Forbidden {
                src: self.source.to_string(),
                span: span.into(),
                name: name.to_string(),
            });
        }

        match builtins::arities_of(name) {
            Some(arities) if arities.contains(&arity) => Ok(()),
            Some(arities) => Err(RillError::ArityMismatch {
                src: self.source.to_string(),
                span: span.into(),
                name: name.to_string(),
                found: arity,
                expected: arities
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(" or "),
            }),
            None => Err(RillError::UnknownFunction {
                src: self.source.to_string(),
                span: span.into(),
                name: name.to_string(),
                arity,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn check(source: &str) -> RillResult<()> {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let ast = Parser::new(tokens, source).parse().unwrap();
        validate(source, &ast)
    }

    #[test]
    fn test_accepts_builtins() {
        assert!(check("keys").is_ok());
        assert!(check("map(select(. > 1))").is_ok());
        assert!(check("range(0; 10; 2)").is_ok());
    }

    #[test]
    fn test_unknown_function() {
        assert!(matches!(
            check("frobnicate"),
            Err(RillError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_arity_mismatch() {
        assert!(matches!(
            check("length(1)"),
            Err(RillError::ArityMismatch { .. })
        ));
        assert!(matches!(
            check("map"),
            Err(RillError::ArityMismatch { .. })
        ));
        assert!(matches!(
            check("range(1; 2; 3; 4)"),
            Err(RillError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn test_forbidden_names() {
        for src in ["now", "input", "inputs", "env", "import", "include"] {
            assert!(
                matches!(check(src), Err(RillError::Forbidden { .. })),
                "{} should be forbidden",
                src
            );
        }
        assert!(matches!(check("$ENV"), Err(RillError::Forbidden { .. })));
    }

    #[test]
    fn test_user_defs_enter_scope() {
        assert!(check("def f: 1; f").is_ok());
        assert!(check("def f(g): g; f(2)").is_ok());
        // Recursion: the definition is visible inside its own body
        assert!(check("def f: if . == 0 then 1 else . - 1 | f end; f").is_ok());
    }

    #[test]
    fn test_defs_scope_does_not_leak() {
        // f is not visible before its definition finishes
        assert!(matches!(
            check("f | def f: 1; ."),
            Err(RillError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_formal_shadows_builtin_arity() {
        // `length` as a formal argument shadows the builtin entirely
        assert!(check("def f(length): length; f(1)").is_ok());
    }

    #[test]
    fn test_walks_into_all_positions() {
        assert!(matches!(
            check("[1, nosuch]"),
            Err(RillError::UnknownFunction { .. })
        ));
        assert!(matches!(
            check("{a: nosuch}"),
            Err(RillError::UnknownFunction { .. })
        ));
        assert!(matches!(
            check("if nosuch then 1 else 2 end"),
            Err(RillError::UnknownFunction { .. })
        ));
        assert!(matches!(
            check("reduce .[] as $x (0; nosuch)"),
            Err(RillError::UnknownFunction { .. })
        ));
        assert!(matches!(
            check("try nosuch"),
            Err(RillError::UnknownFunction { .. })
        ));
    }
}
