//! The assignment engine: `=`, `|=`, and the compound operators
//!
//! Assignment resolves every path the left side selects against the
//! current input, orders the paths in descending total order (so
//! same-array updates and deletions stay stable), then writes through
//! the path machinery. The input value itself is never mutated; each
//! emission is a freshly built structure.

use crate::errors::FaultKind;
use crate::lexer::token::Span;
use crate::parser::ast::{Ast, AssignOp};

use super::env::Env;
use super::paths::{cmp_paths, Path};
use super::value::Value;
use super::{EvalResult, Evaluator, Flow, Sink};

impl Evaluator<'_> {
    pub(crate) fn eval_assign(
        &self,
        op: AssignOp,
        lhs: &Ast,
        rhs: &Ast,
        input: &Value,
        env: &Env,
        span: Span,
        out: &mut Sink,
    ) -> EvalResult<Flow> {
        let mut paths = self.collect_paths(lhs, input, env)?;
        paths.sort_by(|a, b| cmp_paths(b, a));

        match op {
            // `=`: the right side sees the original input; each of its
            // values writes to every path
            AssignOp::Assign => {
                let rhs_vals = self.collect(rhs, input, env)?;
                for rv in &rhs_vals {
                    self.charge_step(span)?;
                    let mut acc = input.clone();
                    for path in &paths {
                        acc = self.path_set(&acc, path, rv, span)?;
                    }
                    if out(acc)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Ok(Flow::Continue)
            }

            // `|=`: the right side sees the value at each path. No
            // output deletes the path, one output stores, several fan
            // out across paths.
            AssignOp::Update => self.update_paths(input.clone(), &paths, rhs, env, span, out),

            // `//=`: replace only where the current value is falsey
            AssignOp::Alt => {
                let rhs_vals = self.collect(rhs, input, env)?;
                for rv in &rhs_vals {
                    self.charge_step(span)?;
                    let mut acc = input.clone();
                    for path in &paths {
                        let current = self.path_get(&acc, path, span)?;
                        if !current.is_truthy() {
                            acc = self.path_set(&acc, path, rv, span)?;
                        }
                    }
                    if out(acc)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Ok(Flow::Continue)
            }

            // `+=` and friends: combine the value at each path with the
            // right side (evaluated against the original input)
            _ => {
                let binop = op.binary_op().unwrap_or_else(|| {
                    unreachable!("assignment operator {} has no binary form", op)
                });
                let rhs_vals = self.collect(rhs, input, env)?;
                for rv in &rhs_vals {
                    self.charge_step(span)?;
                    let mut acc = input.clone();
                    for path in &paths {
                        let current = self.path_get(&acc, path, span)?;
                        let combined = self.apply_binary(binop, &current, rv, span)?;
                        acc = self.path_set(&acc, path, &combined, span)?;
                    }
                    if out(acc)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Ok(Flow::Continue)
            }
        }
    }

    /// `|=` over a path list: the Cartesian product of per-path update
    /// choices, paths processed in the given (descending) order
    fn update_paths(
        &self,
        acc: Value,
        paths: &[Path],
        rhs: &Ast,
        env: &Env,
        span: Span,
        out: &mut Sink,
    ) -> EvalResult<Flow> {
        let Some((path, rest)) = paths.split_first() else {
            return out(acc);
        };
        self.charge_step(span)?;

        let current = self.path_get(&acc, path, span)?;
        let updates = self.collect(rhs, &current, env)?;

        if updates.is_empty() {
            let deleted = self.path_delete(&acc, path, span)?;
            return self.update_paths(deleted, rest, rhs, env, span, out);
        }
        for v in &updates {
            let updated = self.path_set(&acc, path, v, span)?;
            if self.update_paths(updated, rest, rhs, env, span, out)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Shared entry for `setpath`-style writes where the path arrives
    /// value-encoded
    pub(crate) fn set_encoded_path(
        &self,
        input: &Value,
        encoded: &Value,
        new: &Value,
        span: Span,
    ) -> EvalResult<Value> {
        let path = self.path_from_value(encoded, span)?;
        self.path_set(input, &path, new, span)
    }

    /// Shared entry for `delpaths`: the argument is an array of
    /// value-encoded paths
    pub(crate) fn delete_encoded_paths(
        &self,
        input: &Value,
        encoded: &Value,
        span: Span,
    ) -> EvalResult<Value> {
        let Value::Array(items) = encoded else {
            return Err(self.fault(
                span,
                FaultKind::Type,
                format!(
                    "delpaths expects an array of paths, got {} ({})",
                    encoded.type_name(),
                    encoded
                ),
            ));
        };
        let mut paths = Vec::with_capacity(items.len());
        for item in items {
            paths.push(self.path_from_value(item, span)?);
        }
        self.delete_paths(input, paths, span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::Limits;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use std::collections::BTreeMap;

    fn run(filter: &str, input: &str) -> Vec<String> {
        let tokens = Lexer::new(filter).tokenize().unwrap();
        let ast = Parser::new(tokens, filter).parse().unwrap();
        crate::validator::validate(filter, &ast).unwrap();
        let input = Value::from_serde_json(serde_json::from_str(input).unwrap());
        let evaluator = Evaluator::new(filter, Limits::default());
        evaluator
            .run(&ast, &input, &BTreeMap::new())
            .unwrap()
            .iter()
            .map(|v| v.encode_json())
            .collect()
    }

    #[test]
    fn test_plain_assign() {
        assert_eq!(run(".a = 5", r#"{"a":1,"b":2}"#), vec![r#"{"a":5,"b":2}"#]);
        assert_eq!(run(".a.b = 1", "null"), vec![r#"{"a":{"b":1}}"#]);
        assert_eq!(run(".[0] = 9", "[1,2]"), vec!["[9,2]"]);
    }

    #[test]
    fn test_assign_rhs_sees_original_input() {
        // .b on the right refers to the whole input, not the value at .a
        assert_eq!(
            run(".a = .b", r#"{"a":1,"b":2}"#),
            vec![r#"{"a":2,"b":2}"#]
        );
    }

    #[test]
    fn test_assign_multiple_paths() {
        assert_eq!(
            run("(.a, .b) = 1", r#"{"a":0,"b":0}"#),
            vec![r#"{"a":1,"b":1}"#]
        );
        assert_eq!(run(".[] = 0", "[1,2,3]"), vec!["[0,0,0]"]);
    }

    #[test]
    fn test_assign_fan_out_over_rhs() {
        assert_eq!(
            run(".a = (1, 2)", r#"{"a":0}"#),
            vec![r#"{"a":1}"#, r#"{"a":2}"#]
        );
    }

    #[test]
    fn test_update_assign() {
        assert_eq!(run(".a |= . + 1", r#"{"a":1}"#), vec![r#"{"a":2}"#]);
        assert_eq!(run(".[] |= . * 2", "[1,2]"), vec!["[2,4]"]);
    }

    #[test]
    fn test_update_empty_deletes() {
        assert_eq!(run(".a |= empty", r#"{"a":1,"b":2}"#), vec![r#"{"b":2}"#]);
        // Deleting several array slots: descending path order keeps
        // later targets valid
        assert_eq!(
            run(".[] |= (if . == 2 then empty else . end)", "[1,2,3,2]"),
            vec!["[1,3]"]
        );
    }

    #[test]
    fn test_arithmetic_assign() {
        assert_eq!(run(".a += 2", r#"{"a":1}"#), vec![r#"{"a":3}"#]);
        assert_eq!(run(".a -= 2", r#"{"a":5}"#), vec![r#"{"a":3}"#]);
        assert_eq!(run(".a *= 3", r#"{"a":2}"#), vec![r#"{"a":6}"#]);
        assert_eq!(run(".a /= 2", r#"{"a":5}"#), vec![r#"{"a":2.5}"#]);
        assert_eq!(run(".a %= 3", r#"{"a":7}"#), vec![r#"{"a":1}"#]);
    }

    #[test]
    fn test_alt_assign() {
        assert_eq!(run(".a //= 5", r#"{"a":null}"#), vec![r#"{"a":5}"#]);
        assert_eq!(run(".a //= 5", r#"{"a":false}"#), vec![r#"{"a":5}"#]);
        assert_eq!(run(".a //= 5", r#"{"a":1}"#), vec![r#"{"a":1}"#]);
    }

    #[test]
    fn test_assign_preserves_input() {
        // The original binding still sees the untouched value
        assert_eq!(
            run(". as $orig | (.a = 9) | [$orig.a, .a]", r#"{"a":1}"#),
            vec!["[1,9]"]
        );
    }

    #[test]
    fn test_assign_through_select() {
        assert_eq!(
            run("(.[] | select(. > 1)) = 0", "[1,2,3]"),
            vec!["[1,0,0]"]
        );
    }

    #[test]
    fn test_slice_assign() {
        assert_eq!(run(".[1:3] = [9]", "[1,2,3,4]"), vec!["[1,9,4]"]);
    }
}
