//! Built-in functions for rill filters
//!
//! Dispatch is keyed by (name, arity): the [`NAMES`] table answers
//! existence and arity questions for the validator, and [`call`] routes
//! a resolved call to its implementation. Builtins receive the raw
//! argument ASTs and evaluate them through the evaluator, which keeps
//! jq's pass-by-filter semantics: an argument re-runs against whatever
//! input is current at each use. No builtin performs I/O.
//!
//! Loop-like builtins charge one step per iteration so the step cap
//! bounds wall-clock work, not just AST size.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::errors::FaultKind;
use crate::lexer::token::Span;
use crate::parser::ast::{Ast, BinaryOp};

use super::env::Env;
use super::paths::path_to_value;
use super::value::Value;
use super::{split_string, EvalResult, Evaluator, Flow, Sink};

/// Every builtin with its accepted arities
pub const NAMES: &[(&str, &[usize])] = &[
    // Types and conversion
    ("type", &[0]),
    ("tostring", &[0]),
    ("tonumber", &[0]),
    ("toboolean", &[0]),
    ("length", &[0]),
    ("not", &[0]),
    ("empty", &[0]),
    // Keys and membership
    ("keys", &[0]),
    ("keys_unsorted", &[0]),
    ("has", &[1]),
    ("in", &[1]),
    ("contains", &[1]),
    ("inside", &[1]),
    // Collection transforms
    ("map", &[1]),
    ("select", &[1]),
    ("sort", &[0]),
    ("sort_by", &[1]),
    ("unique", &[0]),
    ("unique_by", &[1]),
    ("group_by", &[1]),
    ("reverse", &[0]),
    ("flatten", &[0, 1]),
    ("transpose", &[0]),
    ("bsearch", &[1]),
    ("combinations", &[0, 1]),
    // Entries
    ("to_entries", &[0]),
    ("from_entries", &[0]),
    ("with_entries", &[1]),
    // Strings
    ("split", &[1]),
    ("join", &[1]),
    ("startswith", &[1]),
    ("endswith", &[1]),
    ("index", &[1]),
    ("rindex", &[1]),
    ("indices", &[1]),
    ("explode", &[0]),
    ("implode", &[0]),
    ("ltrimstr", &[1]),
    ("rtrimstr", &[1]),
    ("ascii_upcase", &[0]),
    ("ascii_downcase", &[0]),
    // Paths
    ("paths", &[0]),
    ("path", &[1]),
    ("getpath", &[1]),
    ("setpath", &[2]),
    ("delpaths", &[1]),
    // Generators and iterators
    ("range", &[1, 2, 3]),
    ("limit", &[2]),
    ("first", &[1]),
    ("last", &[1]),
    ("nth", &[2]),
    ("isempty", &[1]),
    ("all", &[1]),
    ("any", &[1]),
    ("recurse", &[1]),
    ("while", &[2]),
    ("until", &[2]),
    ("repeat", &[1]),
    ("walk", &[1]),
    // Math
    ("floor", &[0]),
    ("ceil", &[0]),
    ("round", &[0]),
    ("abs", &[0]),
    ("sqrt", &[0]),
    ("isnan", &[0]),
    ("isfinite", &[0]),
    ("infinite", &[0]),
    ("min", &[0]),
    ("max", &[0]),
    ("min_by", &[1]),
    ("max_by", &[1]),
    ("add", &[0]),
    // Errors
    ("error", &[1]),
];

/// The arities a builtin accepts, if the name exists
pub fn arities_of(name: &str) -> Option<&'static [usize]> {
    NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, arities)| *arities)
}

/// Dispatch a builtin call
pub(crate) fn call(
    ev: &Evaluator,
    name: &str,
    args: &[Rc<Ast>],
    input: &Value,
    env: &Env,
    span: Span,
    out: &mut Sink,
) -> EvalResult<Flow> {
    match (name, args.len()) {
        ("empty", 0) => Ok(Flow::Continue),
        ("type", 0) => out(Value::String(input.type_name().to_string())),
        ("not", 0) => out(Value::Bool(!input.is_truthy())),
        ("tostring", 0) => out(tostring(input)),
        ("tonumber", 0) => out(tonumber(ev, input, span)?),
        ("toboolean", 0) => out(toboolean(ev, input, span)?),
        ("length", 0) => out(length(ev, input, span)?),

        ("keys", 0) | ("keys_unsorted", 0) => out(keys(ev, input, span)?),
        ("has", 1) => fan1(ev, &args[0], input, env, out, |k| has(ev, input, &k, span)),
        ("in", 1) => fan1(ev, &args[0], input, env, out, |container| {
            has(ev, &container, input, span)
        }),
        ("contains", 1) => fan1(ev, &args[0], input, env, out, |b| {
            Ok(Value::Bool(contains_value(ev, input, &b, span)?))
        }),
        ("inside", 1) => fan1(ev, &args[0], input, env, out, |b| {
            Ok(Value::Bool(contains_value(ev, &b, input, span)?))
        }),

        ("map", 1) => builtin_map(ev, &args[0], input, env, span, out),
        ("select", 1) => {
            ev.eval(&args[0], input, env, &mut |c| {
                if c.is_truthy() {
                    out(input.clone())
                } else {
                    Ok(Flow::Continue)
                }
            })
        }
        ("sort", 0) => out(Value::Array(sorted(ev, input, span, "sort")?)),
        ("sort_by", 1) => {
            let keyed = keyed_elements(ev, &args[0], input, env, span, "sort_by")?;
            out(Value::Array(keyed.into_iter().map(|(_, v)| v).collect()))
        }
        ("unique", 0) => {
            let mut items = sorted(ev, input, span, "unique")?;
            items.dedup_by(|a, b| a.total_cmp(b) == std::cmp::Ordering::Equal);
            out(Value::Array(items))
        }
        ("unique_by", 1) => {
            let keyed = keyed_elements(ev, &args[0], input, env, span, "unique_by")?;
            let mut result: Vec<Value> = Vec::new();
            let mut last_key: Option<Value> = None;
            for (key, v) in keyed {
                let fresh = match &last_key {
                    Some(prev) => prev.total_cmp(&key) != std::cmp::Ordering::Equal,
                    None => true,
                };
                if fresh {
                    result.push(v);
                    last_key = Some(key);
                }
            }
            out(Value::Array(result))
        }
        ("group_by", 1) => {
            let keyed = keyed_elements(ev, &args[0], input, env, span, "group_by")?;
            let mut groups: Vec<Value> = Vec::new();
            let mut current: Vec<Value> = Vec::new();
            let mut last_key: Option<Value> = None;
            for (key, v) in keyed {
                let same = matches!(
                    &last_key,
                    Some(prev) if prev.total_cmp(&key) == std::cmp::Ordering::Equal
                );
                if !same && !current.is_empty() {
                    groups.push(Value::Array(std::mem::take(&mut current)));
                }
                current.push(v);
                last_key = Some(key);
            }
            if !current.is_empty() {
                groups.push(Value::Array(current));
            }
            out(Value::Array(groups))
        }
        ("reverse", 0) => out(reverse(ev, input, span)?),
        ("flatten", 0) => out(Value::Array(flatten(ev, input, i64::MAX, span)?)),
        ("flatten", 1) => fan1(ev, &args[0], input, env, out, |d| {
            let Some(depth) = d.as_integer() else {
                return Err(ev.fault(
                    span,
                    FaultKind::Type,
                    format!("flatten depth must be a number, got {}", d.type_name()),
                ));
            };
            if depth < 0 {
                return Err(ev.fault(
                    span,
                    FaultKind::Arith,
                    "flatten depth must not be negative".to_string(),
                ));
            }
            Ok(Value::Array(flatten(ev, input, depth, span)?))
        }),
        ("transpose", 0) => out(transpose(ev, input, span)?),
        ("bsearch", 1) => fan1(ev, &args[0], input, env, out, |target| {
            bsearch(ev, input, &target, span)
        }),
        ("combinations", 0) => combinations(ev, input, span, out),
        ("combinations", 1) => fan1_flow(ev, &args[0], input, env, out, |n, out| {
            let Some(count) = n.as_integer() else {
                return Err(ev.fault(
                    span,
                    FaultKind::Type,
                    format!("combinations count must be a number, got {}", n.type_name()),
                ));
            };
            let copies = Value::Array(vec![input.clone(); count.max(0) as usize]);
            combinations(ev, &copies, span, out)
        }),

        ("to_entries", 0) => out(to_entries(ev, input, span)?),
        ("from_entries", 0) => out(from_entries(ev, input, span)?),
        ("with_entries", 1) => {
            let entries = to_entries(ev, input, span)?;
            let mut mapped = Vec::new();
            map_into(ev, &args[0], &entries, env, span, &mut mapped)?;
            out(from_entries(ev, &Value::Array(mapped), span)?)
        }

        ("split", 1) => fan1(ev, &args[0], input, env, out, |sep| {
            match (input, &sep) {
                (Value::String(s), Value::String(sep)) => {
                    Ok(Value::Array(split_string(s, sep)))
                }
                _ => Err(ev.fault(
                    span,
                    FaultKind::Type,
                    format!(
                        "split input and separator must be strings, got {} and {}",
                        input.type_name(),
                        sep.type_name()
                    ),
                )),
            }
        }),
        ("join", 1) => fan1(ev, &args[0], input, env, out, |sep| join(ev, input, &sep, span)),
        ("startswith", 1) => fan1(ev, &args[0], input, env, out, |prefix| {
            match (input, &prefix) {
                (Value::String(s), Value::String(p)) => Ok(Value::Bool(s.starts_with(p.as_str()))),
                _ => Err(ev.fault(
                    span,
                    FaultKind::Type,
                    "startswith() requires string inputs".to_string(),
                )),
            }
        }),
        ("endswith", 1) => fan1(ev, &args[0], input, env, out, |suffix| {
            match (input, &suffix) {
                (Value::String(s), Value::String(p)) => Ok(Value::Bool(s.ends_with(p.as_str()))),
                _ => Err(ev.fault(
                    span,
                    FaultKind::Type,
                    "endswith() requires string inputs".to_string(),
                )),
            }
        }),
        ("index", 1) => fan1(ev, &args[0], input, env, out, |needle| {
            Ok(match indices_of(ev, input, &needle, span)? {
                Some(found) => found
                    .first()
                    .map(|i| Value::Number(*i as f64))
                    .unwrap_or(Value::Null),
                None => Value::Null,
            })
        }),
        ("rindex", 1) => fan1(ev, &args[0], input, env, out, |needle| {
            Ok(match indices_of(ev, input, &needle, span)? {
                Some(found) => found
                    .last()
                    .map(|i| Value::Number(*i as f64))
                    .unwrap_or(Value::Null),
                None => Value::Null,
            })
        }),
        ("indices", 1) => fan1(ev, &args[0], input, env, out, |needle| {
            Ok(match indices_of(ev, input, &needle, span)? {
                Some(found) => Value::Array(
                    found.into_iter().map(|i| Value::Number(i as f64)).collect(),
                ),
                None => Value::Null,
            })
        }),
        ("explode", 0) => match input {
            Value::String(s) => out(Value::Array(
                s.chars().map(|c| Value::Number(c as u32 as f64)).collect(),
            )),
            other => Err(ev.fault(
                span,
                FaultKind::Type,
                format!("explode input must be a string, got {}", other.type_name()),
            )),
        },
        ("implode", 0) => out(implode(ev, input, span)?),
        ("ltrimstr", 1) => fan1(ev, &args[0], input, env, out, |prefix| {
            Ok(match (input, &prefix) {
                (Value::String(s), Value::String(p)) => match s.strip_prefix(p.as_str()) {
                    Some(rest) => Value::String(rest.to_string()),
                    None => input.clone(),
                },
                _ => input.clone(),
            })
        }),
        ("rtrimstr", 1) => fan1(ev, &args[0], input, env, out, |suffix| {
            Ok(match (input, &suffix) {
                (Value::String(s), Value::String(p)) => match s.strip_suffix(p.as_str()) {
                    Some(rest) => Value::String(rest.to_string()),
                    None => input.clone(),
                },
                _ => input.clone(),
            })
        }),
        ("ascii_upcase", 0) => match input {
            Value::String(s) => out(Value::String(s.to_ascii_uppercase())),
            other => Err(ev.fault(
                span,
                FaultKind::Type,
                format!("ascii_upcase input must be a string, got {}", other.type_name()),
            )),
        },
        ("ascii_downcase", 0) => match input {
            Value::String(s) => out(Value::String(s.to_ascii_lowercase())),
            other => Err(ev.fault(
                span,
                FaultKind::Type,
                format!("ascii_downcase input must be a string, got {}", other.type_name()),
            )),
        },

        ("paths", 0) => leaf_paths(ev, input, &mut Vec::new(), span, out),
        ("path", 1) => ev.resolve_paths(&args[0], input, env, &mut |path| {
            out(path_to_value(&path))
        }),
        ("getpath", 1) => fan1(ev, &args[0], input, env, out, |p| {
            let path = ev.path_from_value(&p, span)?;
            ev.path_get(input, &path, span)
        }),
        ("setpath", 2) => {
            let paths = ev.collect(&args[0], input, env)?;
            let values = ev.collect(&args[1], input, env)?;
            for p in &paths {
                for v in &values {
                    let updated = ev.set_encoded_path(input, p, v, span)?;
                    if out(updated)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
            Ok(Flow::Continue)
        }
        ("delpaths", 1) => fan1(ev, &args[0], input, env, out, |ps| {
            ev.delete_encoded_paths(input, &ps, span)
        }),

        ("range", 1) => {
            let stops = ev.collect(&args[0], input, env)?;
            for stop in &stops {
                let stop = number_arg(ev, stop, span, "range")?;
                if emit_range(ev, 0.0, stop, 1.0, span, out)? == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            Ok(Flow::Continue)
        }
        ("range", 2) => {
            let froms = ev.collect(&args[0], input, env)?;
            let tos = ev.collect(&args[1], input, env)?;
            for from in &froms {
                let from = number_arg(ev, from, span, "range")?;
                for to in &tos {
                    let to = number_arg(ev, to, span, "range")?;
                    if emit_range(ev, from, to, 1.0, span, out)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
            Ok(Flow::Continue)
        }
        ("range", 3) => {
            let froms = ev.collect(&args[0], input, env)?;
            let tos = ev.collect(&args[1], input, env)?;
            let steps = ev.collect(&args[2], input, env)?;
            for from in &froms {
                let from = number_arg(ev, from, span, "range")?;
                for to in &tos {
                    let to = number_arg(ev, to, span, "range")?;
                    for step in &steps {
                        let step = number_arg(ev, step, span, "range")?;
                        if step == 0.0 {
                            return Err(ev.fault(
                                span,
                                FaultKind::Arith,
                                "range step must be non-zero".to_string(),
                            ));
                        }
                        if emit_range(ev, from, to, step, span, out)? == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                }
            }
            Ok(Flow::Continue)
        }
        ("limit", 2) => {
            let counts = ev.collect(&args[0], input, env)?;
            for n in &counts {
                let n = number_arg(ev, n, span, "limit")?;
                if n <= 0.0 {
                    continue;
                }
                let n = n.trunc() as u64;
                let mut taken = 0u64;
                let mut downstream = Flow::Continue;
                ev.eval(&args[1], input, env, &mut |v| {
                    ev.charge_step(span)?;
                    taken += 1;
                    downstream = out(v)?;
                    if downstream == Flow::Stop || taken >= n {
                        Ok(Flow::Stop)
                    } else {
                        Ok(Flow::Continue)
                    }
                })?;
                if downstream == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            Ok(Flow::Continue)
        }
        ("first", 1) => {
            let mut downstream = Flow::Continue;
            ev.eval(&args[0], input, env, &mut |v| {
                downstream = out(v)?;
                Ok(Flow::Stop)
            })?;
            Ok(downstream)
        }
        ("last", 1) => {
            let mut last = None;
            ev.eval(&args[0], input, env, &mut |v| {
                last = Some(v);
                Ok(Flow::Continue)
            })?;
            match last {
                Some(v) => out(v),
                None => Ok(Flow::Continue),
            }
        }
        ("nth", 2) => {
            let counts = ev.collect(&args[0], input, env)?;
            for n in &counts {
                let n = number_arg(ev, n, span, "nth")?;
                if n < 0.0 {
                    return Err(ev.fault(
                        span,
                        FaultKind::Index,
                        "nth doesn't support negative indices".to_string(),
                    ));
                }
                // As in jq, nth is last(limit(n + 1; f))
                let wanted = n.trunc() as u64 + 1;
                let mut taken = 0u64;
                let mut last = None;
                ev.eval(&args[1], input, env, &mut |v| {
                    ev.charge_step(span)?;
                    taken += 1;
                    last = Some(v);
                    if taken >= wanted {
                        Ok(Flow::Stop)
                    } else {
                        Ok(Flow::Continue)
                    }
                })?;
                if let Some(v) = last {
                    if out(v)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
            Ok(Flow::Continue)
        }
        ("isempty", 1) => {
            let mut produced = false;
            ev.eval(&args[0], input, env, &mut |_| {
                produced = true;
                Ok(Flow::Stop)
            })?;
            out(Value::Bool(!produced))
        }
        ("all", 1) => {
            let verdict = quantify(ev, &args[0], input, env, span, false)?;
            out(Value::Bool(verdict))
        }
        ("any", 1) => {
            let verdict = quantify(ev, &args[0], input, env, span, true)?;
            out(Value::Bool(verdict))
        }
        ("recurse", 1) => recurse_filter(ev, &args[0], input, env, span, out),
        ("while", 2) => {
            let mut v = input.clone();
            loop {
                ev.charge_step(span)?;
                let cond = ev.eval_one(&args[0], &v, env, "while condition")?;
                if !cond.is_truthy() {
                    return Ok(Flow::Continue);
                }
                if out(v.clone())? == Flow::Stop {
                    return Ok(Flow::Stop);
                }
                v = ev.eval_one(&args[1], &v, env, "while update")?;
            }
        }
        ("until", 2) => {
            let mut v = input.clone();
            loop {
                ev.charge_step(span)?;
                let cond = ev.eval_one(&args[0], &v, env, "until condition")?;
                if cond.is_truthy() {
                    return out(v);
                }
                v = ev.eval_one(&args[1], &v, env, "until update")?;
            }
        }
        ("repeat", 1) => {
            let mut v = input.clone();
            loop {
                ev.charge_step(span)?;
                if out(v.clone())? == Flow::Stop {
                    return Ok(Flow::Stop);
                }
                v = ev.eval_one(&args[0], &v, env, "repeat body")?;
            }
        }
        ("walk", 1) => {
            let walked = walk(ev, &args[0], input, env, span)?;
            out(walked)
        }

        ("floor", 0) => out(Value::Number(number_input(ev, input, span, "floor")?.floor())),
        ("ceil", 0) => out(Value::Number(number_input(ev, input, span, "ceil")?.ceil())),
        // Rounds half away from zero
        ("round", 0) => out(Value::Number(number_input(ev, input, span, "round")?.round())),
        ("abs", 0) => out(Value::Number(number_input(ev, input, span, "abs")?.abs())),
        ("sqrt", 0) => out(Value::Number(number_input(ev, input, span, "sqrt")?.sqrt())),
        ("isnan", 0) => out(Value::Bool(number_input(ev, input, span, "isnan")?.is_nan())),
        ("isfinite", 0) => out(Value::Bool(
            number_input(ev, input, span, "isfinite")?.is_finite(),
        )),
        ("infinite", 0) => out(Value::Number(f64::INFINITY)),
        ("min", 0) => out(extremum(ev, input, span, "min", true)?),
        ("max", 0) => out(extremum(ev, input, span, "max", false)?),
        ("min_by", 1) => {
            let keyed = keyed_elements(ev, &args[0], input, env, span, "min_by")?;
            out(extremum_keyed(keyed, true))
        }
        ("max_by", 1) => {
            let keyed = keyed_elements(ev, &args[0], input, env, span, "max_by")?;
            out(extremum_keyed(keyed, false))
        }
        ("add", 0) => out(add(ev, input, span)?),

        ("error", 1) => {
            ev.eval(&args[0], input, env, &mut |v| {
                let message = match v {
                    Value::String(s) => s,
                    other => other.encode_json(),
                };
                Err(ev.fault(span, FaultKind::User, message))
            })?;
            Ok(Flow::Continue)
        }

        _ => Err(ev.fault(
            span,
            FaultKind::Unbound,
            format!("{}/{} is not defined", name, args.len()),
        )),
    }
}

/// Stream an argument, mapping each of its values through `f`
fn fan1(
    ev: &Evaluator,
    arg: &Ast,
    input: &Value,
    env: &Env,
    out: &mut Sink,
    mut f: impl FnMut(Value) -> EvalResult<Value>,
) -> EvalResult<Flow> {
    ev.eval(arg, input, env, &mut |v| {
        let mapped = f(v)?;
        out(mapped)
    })
}

/// Stream an argument, letting `f` emit any number of values per input
fn fan1_flow(
    ev: &Evaluator,
    arg: &Ast,
    input: &Value,
    env: &Env,
    out: &mut Sink,
    mut f: impl FnMut(Value, &mut Sink) -> EvalResult<Flow>,
) -> EvalResult<Flow> {
    ev.eval(arg, input, env, &mut |v| f(v, &mut *out))
}

fn tostring(input: &Value) -> Value {
    match input {
        Value::String(_) => input.clone(),
        other => Value::String(other.encode_json()),
    }
}

fn tonumber(ev: &Evaluator, input: &Value, span: Span) -> EvalResult<Value> {
    match input {
        Value::Number(_) => Ok(input.clone()),
        Value::String(s) => match serde_json::from_str::<f64>(s) {
            Ok(n) => Ok(Value::Number(n)),
            Err(_) => Err(ev.fault(
                span,
                FaultKind::Type,
                format!("cannot parse '{}' as a number", s),
            )),
        },
        other => Err(ev.fault(
            span,
            FaultKind::Type,
            format!("{} ({}) cannot be parsed as a number", other.type_name(), other),
        )),
    }
}

fn toboolean(ev: &Evaluator, input: &Value, span: Span) -> EvalResult<Value> {
    match input {
        Value::Bool(_) => Ok(input.clone()),
        Value::String(s) if s == "true" => Ok(Value::Bool(true)),
        Value::String(s) if s == "false" => Ok(Value::Bool(false)),
        Value::String(s) => Err(ev.fault(
            span,
            FaultKind::Type,
            format!("cannot parse '{}' as a boolean", s),
        )),
        other => Err(ev.fault(
            span,
            FaultKind::Type,
            format!("{} cannot be parsed as a boolean", other.type_name()),
        )),
    }
}

fn length(ev: &Evaluator, input: &Value, span: Span) -> EvalResult<Value> {
    match input {
        Value::Null => Ok(Value::Number(0.0)),
        Value::Number(n) => Ok(Value::Number(n.abs())),
        Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::Array(items) => Ok(Value::Number(items.len() as f64)),
        Value::Object(map) => Ok(Value::Number(map.len() as f64)),
        Value::Bool(_) => Err(ev.fault(
            span,
            FaultKind::Type,
            "boolean has no length".to_string(),
        )),
    }
}

fn keys(ev: &Evaluator, input: &Value, span: Span) -> EvalResult<Value> {
    match input {
        Value::Object(map) => Ok(Value::Array(
            map.keys().map(|k| Value::String(k.clone())).collect(),
        )),
        Value::Array(items) => Ok(Value::Array(
            (0..items.len()).map(|i| Value::Number(i as f64)).collect(),
        )),
        other => Err(ev.fault(
            span,
            FaultKind::Type,
            format!("{} ({}) has no keys", other.type_name(), other),
        )),
    }
}

fn has(ev: &Evaluator, container: &Value, key: &Value, span: Span) -> EvalResult<Value> {
    match (container, key) {
        (Value::Object(map), Value::String(k)) => Ok(Value::Bool(map.contains_key(k))),
        (Value::Array(items), Value::Number(_)) => {
            let Some(i) = key.as_integer() else {
                return Err(ev.fault(
                    span,
                    FaultKind::Index,
                    format!("array index {} is not an integer", key),
                ));
            };
            Ok(Value::Bool(i >= 0 && (i as usize) < items.len()))
        }
        (c, k) => Err(ev.fault(
            span,
            FaultKind::Type,
            format!(
                "cannot check whether {} has a {} key",
                c.type_name(),
                k.type_name()
            ),
        )),
    }
}

/// Recursive containment: objects by keys, arrays element-wise,
/// strings by substring, scalars by equality
fn contains_value(ev: &Evaluator, a: &Value, b: &Value, span: Span) -> EvalResult<bool> {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            for (k, bv) in b {
                match a.get(k) {
                    Some(av) if contains_value(ev, av, bv, span)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::Array(a), Value::Array(b)) => {
            for bv in b {
                let mut found = false;
                for av in a {
                    if contains_value(ev, av, bv, span)? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::String(a), Value::String(b)) => Ok(a.contains(b.as_str())),
        (a, b) if a.type_name() == b.type_name() => Ok(a == b),
        (a, b) => Err(ev.fault(
            span,
            FaultKind::Type,
            format!(
                "cannot check whether {} contains {}",
                a.type_name(),
                b.type_name()
            ),
        )),
    }
}

/// `map(f)`: every output of f over every element, in order
fn builtin_map(
    ev: &Evaluator,
    f: &Ast,
    input: &Value,
    env: &Env,
    span: Span,
    out: &mut Sink,
) -> EvalResult<Flow> {
    let mut mapped = Vec::new();
    map_into(ev, f, input, env, span, &mut mapped)?;
    out(Value::Array(mapped))
}

fn map_into(
    ev: &Evaluator,
    f: &Ast,
    input: &Value,
    env: &Env,
    span: Span,
    acc: &mut Vec<Value>,
) -> EvalResult<()> {
    let elements: Vec<&Value> = match input {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        other => {
            return Err(ev.fault(
                span,
                FaultKind::Type,
                format!("cannot iterate over {} ({})", other.type_name(), other),
            ))
        }
    };
    for element in elements {
        ev.charge_step(span)?;
        ev.eval(f, element, env, &mut |v| {
            acc.push(v);
            Ok(Flow::Continue)
        })?;
    }
    Ok(())
}

fn sorted(ev: &Evaluator, input: &Value, span: Span, who: &str) -> EvalResult<Vec<Value>> {
    let Value::Array(items) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!("{} input must be an array, got {}", who, input.type_name()),
        ));
    };
    let mut items = items.clone();
    items.sort_by(|a, b| a.total_cmp(b));
    Ok(items)
}

/// Pair each array element with its `[f]` key and stable-sort by key
fn keyed_elements(
    ev: &Evaluator,
    f: &Ast,
    input: &Value,
    env: &Env,
    span: Span,
    who: &str,
) -> EvalResult<Vec<(Value, Value)>> {
    let Value::Array(items) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!("{} input must be an array, got {}", who, input.type_name()),
        ));
    };
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        ev.charge_step(span)?;
        let key = Value::Array(ev.collect(f, item, env)?);
        keyed.push((key, item.clone()));
    }
    keyed.sort_by(|(a, _), (b, _)| a.total_cmp(b));
    Ok(keyed)
}

fn reverse(ev: &Evaluator, input: &Value, span: Span) -> EvalResult<Value> {
    match input {
        Value::Array(items) => Ok(Value::Array(items.iter().rev().cloned().collect())),
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        Value::Null => Ok(Value::Array(Vec::new())),
        other => Err(ev.fault(
            span,
            FaultKind::Type,
            format!("cannot reverse {} ({})", other.type_name(), other),
        )),
    }
}

fn flatten(ev: &Evaluator, input: &Value, depth: i64, span: Span) -> EvalResult<Vec<Value>> {
    let Value::Array(items) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!("flatten input must be an array, got {}", input.type_name()),
        ));
    };
    let mut flat = Vec::new();
    for item in items {
        ev.charge_step(span)?;
        match item {
            Value::Array(_) if depth > 0 => {
                flat.extend(flatten(ev, item, depth - 1, span)?);
            }
            other => flat.push(other.clone()),
        }
    }
    Ok(flat)
}

fn transpose(ev: &Evaluator, input: &Value, span: Span) -> EvalResult<Value> {
    let Value::Array(rows) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!("transpose input must be an array, got {}", input.type_name()),
        ));
    };
    let mut width = 0;
    for row in rows {
        let Value::Array(cells) = row else {
            return Err(ev.fault(
                span,
                FaultKind::Type,
                format!("transpose rows must be arrays, got {}", row.type_name()),
            ));
        };
        width = width.max(cells.len());
    }
    let mut result = Vec::with_capacity(width);
    for col in 0..width {
        let column = rows
            .iter()
            .map(|row| match row {
                Value::Array(cells) => cells.get(col).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
            .collect();
        result.push(Value::Array(column));
    }
    Ok(Value::Array(result))
}

/// Binary search in a sorted array: the index when found, otherwise
/// `-1 - insertion_point`
fn bsearch(ev: &Evaluator, input: &Value, target: &Value, span: Span) -> EvalResult<Value> {
    let Value::Array(items) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!("bsearch input must be an array, got {}", input.type_name()),
        ));
    };
    let mut lo = 0usize;
    let mut hi = items.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if items[mid].total_cmp(target) == std::cmp::Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo < items.len() && items[lo].total_cmp(target) == std::cmp::Ordering::Equal {
        Ok(Value::Number(lo as f64))
    } else {
        Ok(Value::Number(-1.0 - lo as f64))
    }
}

/// Cartesian product of an array of arrays, one output array per pick
fn combinations(
    ev: &Evaluator,
    input: &Value,
    span: Span,
    out: &mut Sink,
) -> EvalResult<Flow> {
    let Value::Array(axes) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!(
                "combinations input must be an array of arrays, got {}",
                input.type_name()
            ),
        ));
    };
    for axis in axes {
        if !matches!(axis, Value::Array(_)) {
            return Err(ev.fault(
                span,
                FaultKind::Type,
                format!(
                    "combinations input must be an array of arrays, got {} inside",
                    axis.type_name()
                ),
            ));
        }
    }
    fn emit(
        ev: &Evaluator,
        axes: &[Value],
        picked: &mut Vec<Value>,
        span: Span,
        out: &mut Sink,
    ) -> EvalResult<Flow> {
        let Some((axis, rest)) = axes.split_first() else {
            ev.charge_step(span)?;
            return out(Value::Array(picked.clone()));
        };
        let Value::Array(choices) = axis else {
            unreachable!("axes are checked above");
        };
        for choice in choices {
            picked.push(choice.clone());
            let flow = emit(ev, rest, picked, span, out)?;
            picked.pop();
            if flow == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }
    emit(ev, axes, &mut Vec::new(), span, out)
}

fn to_entries(ev: &Evaluator, input: &Value, span: Span) -> EvalResult<Value> {
    let Value::Object(map) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!("to_entries input must be an object, got {}", input.type_name()),
        ));
    };
    Ok(Value::Array(
        map.iter()
            .map(|(k, v)| {
                let mut entry = BTreeMap::new();
                entry.insert("key".to_string(), Value::String(k.clone()));
                entry.insert("value".to_string(), v.clone());
                Value::Object(entry)
            })
            .collect(),
    ))
}

fn from_entries(ev: &Evaluator, input: &Value, span: Span) -> EvalResult<Value> {
    let Value::Array(entries) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!(
                "from_entries input must be an array, got {}",
                input.type_name()
            ),
        ));
    };
    let mut map = BTreeMap::new();
    for entry in entries {
        ev.charge_step(span)?;
        let (key, value) = match entry {
            Value::Object(fields) => {
                let key = ["key", "k", "name", "Name", "K"]
                    .iter()
                    .find_map(|k| fields.get(*k))
                    .cloned()
                    .unwrap_or(Value::Null);
                let value = ["value", "v", "V"]
                    .iter()
                    .find_map(|k| fields.get(*k))
                    .cloned()
                    .unwrap_or(Value::Null);
                (key, value)
            }
            scalar => (scalar.clone(), Value::Null),
        };
        let key = match key {
            Value::String(s) => s,
            Value::Number(_) | Value::Bool(_) => key.encode_json(),
            other => {
                return Err(ev.fault(
                    span,
                    FaultKind::Type,
                    format!("entry key must be a scalar, got {}", other.type_name()),
                ))
            }
        };
        map.insert(key, value);
    }
    Ok(Value::Object(map))
}

fn join(ev: &Evaluator, input: &Value, sep: &Value, span: Span) -> EvalResult<Value> {
    let Value::Array(items) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!("join input must be an array, got {}", input.type_name()),
        ));
    };
    let Value::String(sep) = sep else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!("join separator must be a string, got {}", sep.type_name()),
        ));
    };
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Null => parts.push(String::new()),
            Value::String(s) => parts.push(s.clone()),
            Value::Number(_) | Value::Bool(_) => parts.push(item.encode_json()),
            other => {
                return Err(ev.fault(
                    span,
                    FaultKind::Type,
                    format!("cannot join with {}", other.type_name()),
                ))
            }
        }
    }
    Ok(Value::String(parts.join(sep)))
}

/// Occurrence positions for `index`/`rindex`/`indices`. `None` mirrors
/// jq's null results (null input, empty needle).
fn indices_of(
    ev: &Evaluator,
    input: &Value,
    needle: &Value,
    span: Span,
) -> EvalResult<Option<Vec<i64>>> {
    match (input, needle) {
        (Value::Null, _) => Ok(None),
        (Value::String(s), Value::String(sub)) => {
            if sub.is_empty() {
                return Ok(None);
            }
            let chars: Vec<char> = s.chars().collect();
            let sub_chars: Vec<char> = sub.chars().collect();
            Ok(Some(subsequence_positions(&chars, &sub_chars, |a, b| a == b)))
        }
        (Value::Array(items), Value::Array(sub)) => {
            if sub.is_empty() {
                return Ok(None);
            }
            Ok(Some(subsequence_positions(items, sub, |a, b| a == b)))
        }
        (Value::Array(items), scalar) => Ok(Some(
            items
                .iter()
                .enumerate()
                .filter(|(_, v)| *v == scalar)
                .map(|(i, _)| i as i64)
                .collect(),
        )),
        (a, b) => Err(ev.fault(
            span,
            FaultKind::Type,
            format!(
                "cannot search {} for {}",
                a.type_name(),
                b.type_name()
            ),
        )),
    }
}

/// Positions (possibly overlapping) where `sub` occurs in `items`
fn subsequence_positions<T>(items: &[T], sub: &[T], eq: impl Fn(&T, &T) -> bool) -> Vec<i64> {
    let mut positions = Vec::new();
    if sub.is_empty() || sub.len() > items.len() {
        return positions;
    }
    for start in 0..=(items.len() - sub.len()) {
        if sub.iter().enumerate().all(|(i, x)| eq(&items[start + i], x)) {
            positions.push(start as i64);
        }
    }
    positions
}

fn implode(ev: &Evaluator, input: &Value, span: Span) -> EvalResult<Value> {
    let Value::Array(codes) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!("implode input must be an array, got {}", input.type_name()),
        ));
    };
    let mut s = String::with_capacity(codes.len());
    for code in codes {
        let ch = code
            .as_integer()
            .and_then(|i| u32::try_from(i).ok())
            .and_then(char::from_u32);
        match ch {
            Some(ch) => s.push(ch),
            None => {
                return Err(ev.fault(
                    span,
                    FaultKind::Type,
                    format!("implode input contains an invalid code point: {}", code),
                ))
            }
        }
    }
    Ok(Value::String(s))
}

/// Paths to every scalar leaf, in traversal order
fn leaf_paths(
    ev: &Evaluator,
    value: &Value,
    prefix: &mut Vec<Value>,
    span: Span,
    out: &mut Sink,
) -> EvalResult<Flow> {
    let children: Vec<(Value, &Value)> = match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Number(i as f64), v))
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (Value::String(k.clone()), v))
            .collect(),
        _ => return Ok(Flow::Continue),
    };
    for (step, child) in children {
        ev.charge_step(span)?;
        prefix.push(step);
        let flow = match child {
            Value::Array(_) | Value::Object(_) => leaf_paths(ev, child, prefix, span, out)?,
            _ => out(Value::Array(prefix.clone()))?,
        };
        prefix.pop();
        if flow == Flow::Stop {
            return Ok(Flow::Stop);
        }
    }
    Ok(Flow::Continue)
}

fn emit_range(
    ev: &Evaluator,
    from: f64,
    to: f64,
    step: f64,
    span: Span,
    out: &mut Sink,
) -> EvalResult<Flow> {
    let mut x = from;
    while (step > 0.0 && x < to) || (step < 0.0 && x > to) {
        ev.charge_step(span)?;
        if out(Value::Number(x))? == Flow::Stop {
            return Ok(Flow::Stop);
        }
        x += step;
    }
    Ok(Flow::Continue)
}

/// Shared core of `all` and `any`: scan `f` over the input's elements,
/// early-exiting on the deciding truth value
fn quantify(
    ev: &Evaluator,
    f: &Ast,
    input: &Value,
    env: &Env,
    span: Span,
    looking_for: bool,
) -> EvalResult<bool> {
    let elements: Vec<&Value> = match input {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        other => {
            return Err(ev.fault(
                span,
                FaultKind::Type,
                format!("cannot iterate over {} ({})", other.type_name(), other),
            ))
        }
    };
    let mut decided = false;
    for element in elements {
        ev.charge_step(span)?;
        ev.eval(f, element, env, &mut |c| {
            if c.is_truthy() == looking_for {
                decided = true;
                Ok(Flow::Stop)
            } else {
                Ok(Flow::Continue)
            }
        })?;
        if decided {
            break;
        }
    }
    Ok(if looking_for { decided } else { !decided })
}

/// `recurse(f)`: the input, then recursively every output of f.
/// Depth accounting comes from the nested evaluation of f itself.
fn recurse_filter(
    ev: &Evaluator,
    f: &Ast,
    input: &Value,
    env: &Env,
    span: Span,
    out: &mut Sink,
) -> EvalResult<Flow> {
    ev.charge_step(span)?;
    if out(input.clone())? == Flow::Stop {
        return Ok(Flow::Stop);
    }
    ev.eval(f, input, env, &mut |v| {
        recurse_filter(ev, f, &v, env, span, &mut *out)
    })
}

/// `walk(f)`: rebuild bottom-up, applying f to every subtree
fn walk(ev: &Evaluator, f: &Ast, input: &Value, env: &Env, span: Span) -> EvalResult<Value> {
    ev.charge_step(span)?;
    let rebuilt = match input {
        Value::Array(items) => {
            let mut next = Vec::with_capacity(items.len());
            for item in items {
                next.push(walk(ev, f, item, env, span)?);
            }
            Value::Array(next)
        }
        Value::Object(map) => {
            let mut next = BTreeMap::new();
            for (k, v) in map {
                next.insert(k.clone(), walk(ev, f, v, env, span)?);
            }
            Value::Object(next)
        }
        other => other.clone(),
    };
    ev.eval_one(f, &rebuilt, env, "walk body")
}

fn number_input(ev: &Evaluator, input: &Value, span: Span, who: &str) -> EvalResult<f64> {
    match input {
        Value::Number(n) => Ok(*n),
        other => Err(ev.fault(
            span,
            FaultKind::Type,
            format!("{} input must be a number, got {}", who, other.type_name()),
        )),
    }
}

fn number_arg(ev: &Evaluator, v: &Value, span: Span, who: &str) -> EvalResult<f64> {
    match v {
        Value::Number(n) => Ok(*n),
        other => Err(ev.fault(
            span,
            FaultKind::Type,
            format!("{} arguments must be numbers, got {}", who, other.type_name()),
        )),
    }
}

/// `min`/`max` over an array: first minimal, last maximal (the ends of
/// a stable sort)
fn extremum(
    ev: &Evaluator,
    input: &Value,
    span: Span,
    who: &str,
    minimum: bool,
) -> EvalResult<Value> {
    let Value::Array(items) = input else {
        return Err(ev.fault(
            span,
            FaultKind::Type,
            format!("{} input must be an array, got {}", who, input.type_name()),
        ));
    };
    let Some(first) = items.first() else {
        return Ok(Value::Null);
    };
    let mut best = first;
    for v in &items[1..] {
        let replace = if minimum {
            v.total_cmp(best) == std::cmp::Ordering::Less
        } else {
            v.total_cmp(best) != std::cmp::Ordering::Less
        };
        if replace {
            best = v;
        }
    }
    Ok(best.clone())
}

fn extremum_keyed(keyed: Vec<(Value, Value)>, minimum: bool) -> Value {
    // keyed_elements already stable-sorted by key
    if keyed.is_empty() {
        return Value::Null;
    }
    if minimum {
        keyed.into_iter().next().unwrap().1
    } else {
        keyed.into_iter().last().unwrap().1
    }
}

/// `add`: fold `+` over the input's elements; null for empty input
fn add(ev: &Evaluator, input: &Value, span: Span) -> EvalResult<Value> {
    let elements: Vec<&Value> = match input {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        Value::Null => Vec::new(),
        other => {
            return Err(ev.fault(
                span,
                FaultKind::Type,
                format!("cannot iterate over {} ({})", other.type_name(), other),
            ))
        }
    };
    let mut acc = Value::Null;
    for element in elements {
        ev.charge_step(span)?;
        acc = ev.apply_binary(BinaryOp::Add, &acc, element, span)?;
    }
    Ok(acc)
}
