//! rill — a deterministic, sandboxed jq-subset filter engine
//!
//! A filter written in a subset of the jq language transforms one
//! JSON-like input value into a finite sequence of output values. The
//! engine is built for embedding in untrusted evaluation contexts:
//! there is no access to the clock, the environment, the filesystem, or
//! the network, and every run is bounded by configurable step, depth,
//! and output caps. Given the same source, input, limits, and globals,
//! the output sequence is always identical.
//!
//! # Example
//!
//! ```
//! use rill::{run, Options, Value};
//!
//! let input = Value::from_serde_json(serde_json::json!({"a": [1, 2, 3]}));
//! let outputs = run(".a | map(. + 1)", &input, &Options::default()).unwrap();
//! assert_eq!(outputs[0].encode_json(), "[2,3,4]");
//! ```

pub mod errors;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod validator;

use std::collections::BTreeMap;

pub use errors::{ErrorCategory, FaultKind, RillError, RillResult};
pub use evaluator::paths::{Path, PathSeg};
pub use evaluator::{Env, Evaluator, Limits, Value};
pub use lexer::token::{Span, Token, TokenKind};
pub use lexer::Lexer;
pub use parser::{ast, Parser};
pub use validator::validate;

/// Options for one [`run`] invocation
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Resource caps; see [`Limits`] for the defaults
    pub limits: Limits,
    /// Globals exposed to the filter as `$name`
    pub vars: BTreeMap<String, Value>,
}

/// Tokenize filter source
pub fn lex(source: &str) -> RillResult<Vec<Token>> {
    Lexer::new(source).tokenize()
}

/// Tokenize and parse filter source
pub fn parse(source: &str) -> RillResult<ast::Ast> {
    let tokens = lex(source)?;
    Parser::new(tokens, source).parse()
}

/// Parse, validate, and evaluate a filter against one input value.
///
/// Returns every output of the filter in order, or the first error.
/// Outputs produced before a fault are discarded.
pub fn run(source: &str, input: &Value, options: &Options) -> RillResult<Vec<Value>> {
    let ast = parse(source)?;
    validate(source, &ast)?;
    let evaluator = Evaluator::new(source, options.limits.clone());
    evaluator.run(&ast, input, &options.vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_end_to_end() {
        let input = Value::from_serde_json(serde_json::json!({"b": 1, "a": 2}));
        let outputs = run("keys", &input, &Options::default()).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].encode_json(), r#"["a","b"]"#);
    }

    #[test]
    fn test_run_reports_each_stage() {
        assert_eq!(
            run("\"abc", &Value::Null, &Options::default())
                .unwrap_err()
                .category(),
            ErrorCategory::Lex
        );
        assert_eq!(
            run(".a |", &Value::Null, &Options::default())
                .unwrap_err()
                .category(),
            ErrorCategory::Parse
        );
        assert_eq!(
            run("now", &Value::Null, &Options::default())
                .unwrap_err()
                .category(),
            ErrorCategory::Validate
        );
        assert_eq!(
            run("1 + \"a\"", &Value::Null, &Options::default())
                .unwrap_err()
                .category(),
            ErrorCategory::Runtime
        );
    }

    #[test]
    fn test_globals() {
        let mut options = Options::default();
        options
            .vars
            .insert("who".to_string(), Value::from("world"));
        let outputs = run("\"hello \\($who)\"", &Value::Null, &options).unwrap();
        assert_eq!(outputs[0].encode_json(), "\"hello world\"");
    }

    #[test]
    fn test_custom_limits() {
        let options = Options {
            limits: Limits {
                max_steps: 50,
                ..Limits::default()
            },
            ..Options::default()
        };
        let err = run("[range(100)]", &Value::Null, &options).unwrap_err();
        assert_eq!(err.fault_kind(), Some(FaultKind::Resource));
    }
}
