//! Path resolution: the structural addresses behind assignment,
//! `path()`, `getpath`, `setpath`, and `delpaths`
//!
//! A path is a list of segments — object key, array index, or slice —
//! identifying a location inside a value. The resolver walks a
//! restricted AST shape and produces every path the expression selects,
//! without materialising the selected values for the caller. All three
//! surfaces (assignment, `path/1`, delete) share this one resolver.

use std::collections::BTreeMap;

use crate::errors::FaultKind;
use crate::lexer::token::Span;
use crate::parser::ast::{Ast, AstKind};

use super::env::Env;
use super::value::Value;
use super::{EvalResult, Evaluator, Flow, Interrupt};

/// One step of a path
#[derive(Debug, Clone, PartialEq)]
pub enum PathSeg {
    /// Object key
    Key(String),
    /// Array index; negatives are kept as written and resolved against
    /// the array length at access time
    Index(i64),
    /// Array slice with optional endpoints
    Slice {
        start: Option<i64>,
        end: Option<i64>,
    },
}

/// A full path from the root
pub type Path = Vec<PathSeg>;

/// Encode a path in its value form: strings, numbers, and
/// `{"start":..,"end":..}` objects
pub fn path_to_value(path: &[PathSeg]) -> Value {
    Value::Array(
        path.iter()
            .map(|seg| match seg {
                PathSeg::Key(k) => Value::String(k.clone()),
                PathSeg::Index(i) => Value::Number(*i as f64),
                PathSeg::Slice { start, end } => {
                    let mut obj = BTreeMap::new();
                    obj.insert(
                        "start".to_string(),
                        start.map(|n| Value::Number(n as f64)).unwrap_or(Value::Null),
                    );
                    obj.insert(
                        "end".to_string(),
                        end.map(|n| Value::Number(n as f64)).unwrap_or(Value::Null),
                    );
                    Value::Object(obj)
                }
            })
            .collect(),
    )
}

/// Compare two paths by the total order of their value encodings
pub fn cmp_paths(a: &[PathSeg], b: &[PathSeg]) -> std::cmp::Ordering {
    path_to_value(a).total_cmp(&path_to_value(b))
}

type PathSink<'s> = dyn FnMut(Path) -> EvalResult<Flow> + 's;

/// The (path, value-at-path) consumer used internally
type ResolveSink<'s> = dyn FnMut(Path, &Value) -> EvalResult<Flow> + 's;

impl Evaluator<'_> {
    /// Resolve every path the expression selects against the input
    pub(crate) fn resolve_paths(
        &self,
        node: &Ast,
        input: &Value,
        env: &Env,
        out: &mut PathSink,
    ) -> EvalResult<Flow> {
        self.resolve_node(node, input, env, &mut |path, _| out(path))
    }

    /// Resolve and collect every path the expression selects
    pub(crate) fn collect_paths(
        &self,
        node: &Ast,
        input: &Value,
        env: &Env,
    ) -> EvalResult<Vec<Path>> {
        let mut paths = Vec::new();
        self.resolve_paths(node, input, env, &mut |path| {
            paths.push(path);
            Ok(Flow::Continue)
        })?;
        Ok(paths)
    }

    /// Resolve one path-expression node against the current segment
    /// input, emitting each selected (relative path, value at path)
    fn resolve_node(
        &self,
        node: &Ast,
        input: &Value,
        env: &Env,
        out: &mut ResolveSink,
    ) -> EvalResult<Flow> {
        self.charge_step(node.span)?;
        let _depth = self.enter_depth(node.span)?;

        match &node.kind {
            AstKind::Identity => out(Vec::new(), input),

            AstKind::Field { target, name } => {
                self.resolve_node(target, input, env, &mut |mut path, v| {
                    let child = match v {
                        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
                        Value::Null => Value::Null,
                        other => {
                            return Err(self.fault(
                                node.span,
                                FaultKind::Type,
                                format!("cannot index {} with \"{}\"", other.type_name(), name),
                            ))
                        }
                    };
                    path.push(PathSeg::Key(name.clone()));
                    out(path, &child)
                })
            }

            AstKind::Index { target, index } => {
                // The index expression sees the segment input, not the container
                let indices = self.collect(index, input, env)?;
                self.resolve_node(target, input, env, &mut |path, v| {
                    for idx in &indices {
                        let (seg, child) = match (v, idx) {
                            (Value::Object(map), Value::String(k)) => (
                                PathSeg::Key(k.clone()),
                                map.get(k).cloned().unwrap_or(Value::Null),
                            ),
                            (Value::Null, Value::String(k)) => {
                                (PathSeg::Key(k.clone()), Value::Null)
                            }
                            (Value::Array(items), Value::Number(n)) => {
                                let Some(i) = Value::Number(*n).as_integer() else {
                                    return Err(self.fault(
                                        node.span,
                                        FaultKind::Index,
                                        format!("cannot index array with {}", Value::Number(*n)),
                                    ));
                                };
                                let len = items.len() as i64;
                                let at = if i < 0 { i + len } else { i };
                                let child = if at < 0 || at >= len {
                                    Value::Null
                                } else {
                                    items[at as usize].clone()
                                };
                                (PathSeg::Index(i), child)
                            }
                            (Value::Null, Value::Number(n)) => {
                                let Some(i) = Value::Number(*n).as_integer() else {
                                    return Err(self.fault(
                                        node.span,
                                        FaultKind::Index,
                                        format!("cannot index array with {}", Value::Number(*n)),
                                    ));
                                };
                                (PathSeg::Index(i), Value::Null)
                            }
                            (container, idx) => {
                                return Err(self.fault(
                                    node.span,
                                    FaultKind::Type,
                                    format!(
                                        "cannot index {} with {}",
                                        container.type_name(),
                                        idx.type_name()
                                    ),
                                ))
                            }
                        };
                        let mut extended = path.clone();
                        extended.push(seg);
                        if out(extended, &child)? == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                    Ok(Flow::Continue)
                })
            }

            AstKind::Slice { target, start, end } => {
                let starts = match start {
                    Some(s) => self.slice_bound_ints(s, input, env)?,
                    None => vec![None],
                };
                let ends = match end {
                    Some(e) => self.slice_bound_ints(e, input, env)?,
                    None => vec![None],
                };
                self.resolve_node(target, input, env, &mut |path, v| {
                    for s in &starts {
                        for e in &ends {
                            let child = match v {
                                Value::Array(_) => {
                                    self.slice_value(
                                        v,
                                        s.map(|i| i as f64),
                                        e.map(|i| i as f64),
                                        node.span,
                                    )?
                                }
                                Value::Null => Value::Null,
                                other => {
                                    return Err(self.fault(
                                        node.span,
                                        FaultKind::Type,
                                        format!("cannot slice {}", other.type_name()),
                                    ))
                                }
                            };
                            let mut extended = path.clone();
                            extended.push(PathSeg::Slice { start: *s, end: *e });
                            if out(extended, &child)? == Flow::Stop {
                                return Ok(Flow::Stop);
                            }
                        }
                    }
                    Ok(Flow::Continue)
                })
            }

            AstKind::Iterate { target } => {
                self.resolve_node(target, input, env, &mut |path, v| {
                    match v {
                        Value::Array(items) => {
                            for (i, child) in items.iter().enumerate() {
                                let mut extended = path.clone();
                                extended.push(PathSeg::Index(i as i64));
                                if out(extended, child)? == Flow::Stop {
                                    return Ok(Flow::Stop);
                                }
                            }
                        }
                        Value::Object(map) => {
                            for (k, child) in map {
                                let mut extended = path.clone();
                                extended.push(PathSeg::Key(k.clone()));
                                if out(extended, child)? == Flow::Stop {
                                    return Ok(Flow::Stop);
                                }
                            }
                        }
                        Value::Null => {}
                        other => {
                            return Err(self.fault(
                                node.span,
                                FaultKind::Type,
                                format!("cannot iterate over {}", other.type_name()),
                            ))
                        }
                    }
                    Ok(Flow::Continue)
                })
            }

            AstKind::Pipe { left, right } => {
                self.resolve_node(left, input, env, &mut |path, v| {
                    self.resolve_node(right, v, env, &mut |suffix, w| {
                        let mut joined = path.clone();
                        joined.extend(suffix);
                        out(joined, w)
                    })
                })
            }

            AstKind::Comma { left, right } => {
                match self.resolve_node(left, input, env, &mut *out)? {
                    Flow::Stop => Ok(Flow::Stop),
                    Flow::Continue => self.resolve_node(right, input, env, &mut *out),
                }
            }

            // `select(f)` keeps the current location per truthy output of f
            AstKind::Call { name, args } if name == "select" && args.len() == 1 => {
                let mut keep = 0usize;
                self.eval(&args[0], input, env, &mut |c| {
                    if c.is_truthy() {
                        keep += 1;
                    }
                    Ok(Flow::Continue)
                })?;
                for _ in 0..keep {
                    if out(Vec::new(), input)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Ok(Flow::Continue)
            }

            // `E?` suppresses faults raised while resolving E
            AstKind::TryCatch {
                body,
                handler: None,
            } => {
                let result = self.resolve_node(body, input, env, &mut |path, v| {
                    match out(path, v) {
                        Err(Interrupt::Fault { error, shield }) => Err(Interrupt::Fault {
                            error,
                            shield: shield + 1,
                        }),
                        other => other,
                    }
                });
                match result {
                    Err(Interrupt::Fault { error, shield: 0 }) if error.is_catchable() => {
                        Ok(Flow::Continue)
                    }
                    Err(Interrupt::Fault { error, shield }) if shield > 0 => {
                        Err(Interrupt::Fault {
                            error,
                            shield: shield - 1,
                        })
                    }
                    other => other,
                }
            }

            _ => Err(self.fault(
                node.span,
                FaultKind::Type,
                "invalid path expression".to_string(),
            )),
        }
    }

    /// Evaluate a slice endpoint inside a path expression to integers
    fn slice_bound_ints(
        &self,
        node: &Ast,
        input: &Value,
        env: &Env,
    ) -> EvalResult<Vec<Option<i64>>> {
        let mut bounds = Vec::new();
        for v in self.collect(node, input, env)? {
            match v {
                Value::Null => bounds.push(None),
                Value::Number(n) => bounds.push(Some(n.trunc() as i64)),
                other => {
                    return Err(self.fault(
                        node.span,
                        FaultKind::Type,
                        format!("slice endpoints must be numbers, got {}", other.type_name()),
                    ))
                }
            }
        }
        Ok(bounds)
    }

    /// Decode a value-encoded path
    pub(crate) fn path_from_value(&self, v: &Value, span: Span) -> EvalResult<Path> {
        let Value::Array(items) = v else {
            return Err(self.fault(
                span,
                FaultKind::Type,
                format!("path must be an array, got {} ({})", v.type_name(), v),
            ));
        };
        let mut path = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(k) => path.push(PathSeg::Key(k.clone())),
                Value::Number(n) => {
                    let Some(i) = item.as_integer() else {
                        return Err(self.fault(
                            span,
                            FaultKind::Index,
                            format!("path index {} is not an integer", n),
                        ));
                    };
                    path.push(PathSeg::Index(i));
                }
                Value::Object(map) => {
                    let bound = |name: &str| -> EvalResult<Option<i64>> {
                        match map.get(name) {
                            None | Some(Value::Null) => Ok(None),
                            Some(v @ Value::Number(_)) => Ok(Some(
                                v.as_integer().ok_or_else(|| {
                                    self.fault(
                                        span,
                                        FaultKind::Index,
                                        format!("slice bound {} is not an integer", v),
                                    )
                                })?,
                            )),
                            Some(other) => Err(self.fault(
                                span,
                                FaultKind::Type,
                                format!("slice bound must be a number, got {}", other.type_name()),
                            )),
                        }
                    };
                    path.push(PathSeg::Slice {
                        start: bound("start")?,
                        end: bound("end")?,
                    });
                }
                other => {
                    return Err(self.fault(
                        span,
                        FaultKind::Type,
                        format!(
                            "path segments must be strings or numbers, got {} ({})",
                            other.type_name(),
                            other
                        ),
                    ))
                }
            }
        }
        Ok(path)
    }

    /// Read the value at a path; undefined locations surface as null
    pub(crate) fn path_get(
        &self,
        value: &Value,
        path: &[PathSeg],
        span: Span,
    ) -> EvalResult<Value> {
        let Some((seg, rest)) = path.split_first() else {
            return Ok(value.clone());
        };
        let child = match (seg, value) {
            (PathSeg::Key(k), Value::Object(map)) => {
                map.get(k).cloned().unwrap_or(Value::Null)
            }
            (PathSeg::Key(_), Value::Null) => Value::Null,
            (PathSeg::Index(i), Value::Array(items)) => {
                let len = items.len() as i64;
                let at = if *i < 0 { i + len } else { *i };
                if at < 0 || at >= len {
                    Value::Null
                } else {
                    items[at as usize].clone()
                }
            }
            (PathSeg::Index(_), Value::Null) => Value::Null,
            (PathSeg::Slice { start, end }, Value::Array(_)) => self.slice_value(
                value,
                start.map(|i| i as f64),
                end.map(|i| i as f64),
                span,
            )?,
            (PathSeg::Slice { .. }, Value::Null) => Value::Null,
            (seg, other) => {
                return Err(self.fault(
                    span,
                    FaultKind::Type,
                    format!(
                        "cannot index {} with {}",
                        other.type_name(),
                        describe_seg(seg)
                    ),
                ))
            }
        };
        self.path_get(&child, rest, span)
    }

    /// Write a value at a path, building new structure along the way.
    /// Null parents materialise as whatever container the next segment
    /// needs; arrays extend with null padding for out-of-range writes.
    pub(crate) fn path_set(
        &self,
        value: &Value,
        path: &[PathSeg],
        new: &Value,
        span: Span,
    ) -> EvalResult<Value> {
        let Some((seg, rest)) = path.split_first() else {
            return Ok(new.clone());
        };
        match (seg, value) {
            (PathSeg::Key(k), Value::Object(map)) => {
                let child = map.get(k).cloned().unwrap_or(Value::Null);
                let updated = self.path_set(&child, rest, new, span)?;
                let mut map = map.clone();
                map.insert(k.clone(), updated);
                Ok(Value::Object(map))
            }
            (PathSeg::Key(k), Value::Null) => {
                let updated = self.path_set(&Value::Null, rest, new, span)?;
                let mut map = BTreeMap::new();
                map.insert(k.clone(), updated);
                Ok(Value::Object(map))
            }
            (PathSeg::Index(i), Value::Array(items)) => {
                let len = items.len() as i64;
                let at = if *i < 0 { i + len } else { *i };
                if at < 0 {
                    return Err(self.fault(
                        span,
                        FaultKind::Index,
                        format!("array index {} is out of bounds", i),
                    ));
                }
                let mut items = items.clone();
                while (items.len() as i64) <= at {
                    items.push(Value::Null);
                }
                let child = items[at as usize].clone();
                items[at as usize] = self.path_set(&child, rest, new, span)?;
                Ok(Value::Array(items))
            }
            (PathSeg::Index(i), Value::Null) => {
                if *i < 0 {
                    return Err(self.fault(
                        span,
                        FaultKind::Index,
                        format!("array index {} is out of bounds", i),
                    ));
                }
                let mut items = vec![Value::Null; *i as usize + 1];
                items[*i as usize] = self.path_set(&Value::Null, rest, new, span)?;
                Ok(Value::Array(items))
            }
            (PathSeg::Slice { start, end }, Value::Array(items)) => {
                if !rest.is_empty() {
                    return Err(self.fault(
                        span,
                        FaultKind::Type,
                        "cannot descend below a slice in a path".to_string(),
                    ));
                }
                let Value::Array(new_items) = new else {
                    return Err(self.fault(
                        span,
                        FaultKind::Type,
                        format!(
                            "a slice of an array can only be assigned another array, got {}",
                            new.type_name()
                        ),
                    ));
                };
                let (lo, hi) = normalize_slice(*start, *end, items.len());
                let mut result = items[..lo].to_vec();
                result.extend(new_items.iter().cloned());
                result.extend(items[hi..].iter().cloned());
                Ok(Value::Array(result))
            }
            (PathSeg::Slice { .. }, Value::Null) => {
                if !rest.is_empty() {
                    return Err(self.fault(
                        span,
                        FaultKind::Type,
                        "cannot descend below a slice in a path".to_string(),
                    ));
                }
                match new {
                    Value::Array(_) => Ok(new.clone()),
                    other => Err(self.fault(
                        span,
                        FaultKind::Type,
                        format!(
                            "a slice of an array can only be assigned another array, got {}",
                            other.type_name()
                        ),
                    )),
                }
            }
            (seg, other) => Err(self.fault(
                span,
                FaultKind::Type,
                format!(
                    "cannot index {} with {}",
                    other.type_name(),
                    describe_seg(seg)
                ),
            )),
        }
    }

    /// Remove the location a path points at; missing locations are a
    /// no-op, so deletes compose without ordering hazards
    pub(crate) fn path_delete(
        &self,
        value: &Value,
        path: &[PathSeg],
        span: Span,
    ) -> EvalResult<Value> {
        let Some((seg, rest)) = path.split_first() else {
            // Deleting the root leaves nothing behind
            return Ok(Value::Null);
        };
        if rest.is_empty() {
            return match (seg, value) {
                (PathSeg::Key(k), Value::Object(map)) => {
                    let mut map = map.clone();
                    map.remove(k);
                    Ok(Value::Object(map))
                }
                (PathSeg::Index(i), Value::Array(items)) => {
                    let len = items.len() as i64;
                    let at = if *i < 0 { i + len } else { *i };
                    if at < 0 || at >= len {
                        return Ok(value.clone());
                    }
                    let mut items = items.clone();
                    items.remove(at as usize);
                    Ok(Value::Array(items))
                }
                (PathSeg::Slice { start, end }, Value::Array(items)) => {
                    let (lo, hi) = normalize_slice(*start, *end, items.len());
                    let mut result = items[..lo].to_vec();
                    result.extend(items[hi..].iter().cloned());
                    Ok(Value::Array(result))
                }
                (_, Value::Null) => Ok(Value::Null),
                (seg, other) => Err(self.fault(
                    span,
                    FaultKind::Type,
                    format!(
                        "cannot delete {} of {}",
                        describe_seg(seg),
                        other.type_name()
                    ),
                )),
            };
        }

        match (seg, value) {
            (PathSeg::Key(k), Value::Object(map)) => match map.get(k) {
                None => Ok(value.clone()),
                Some(child) => {
                    let updated = self.path_delete(child, rest, span)?;
                    let mut map = map.clone();
                    map.insert(k.clone(), updated);
                    Ok(Value::Object(map))
                }
            },
            (PathSeg::Index(i), Value::Array(items)) => {
                let len = items.len() as i64;
                let at = if *i < 0 { i + len } else { *i };
                if at < 0 || at >= len {
                    return Ok(value.clone());
                }
                let updated = self.path_delete(&items[at as usize], rest, span)?;
                let mut items = items.clone();
                items[at as usize] = updated;
                Ok(Value::Array(items))
            }
            (_, Value::Null) => Ok(Value::Null),
            (PathSeg::Slice { .. }, _) => Err(self.fault(
                span,
                FaultKind::Type,
                "cannot descend below a slice in a path".to_string(),
            )),
            (seg, other) => Err(self.fault(
                span,
                FaultKind::Type,
                format!(
                    "cannot index {} with {}",
                    other.type_name(),
                    describe_seg(seg)
                ),
            )),
        }
    }

    /// Delete several paths. Negative indices are normalised against
    /// the arrays they point into first, then deletions run in
    /// descending path order, so earlier removals never shift the
    /// targets of later ones.
    pub(crate) fn delete_paths(
        &self,
        value: &Value,
        mut paths: Vec<Path>,
        span: Span,
    ) -> EvalResult<Value> {
        for path in paths.iter_mut() {
            self.normalize_negative_indices(value, path, span);
        }
        paths.sort_by(|a, b| cmp_paths(b, a));
        let mut result = value.clone();
        for path in &paths {
            result = self.path_delete(&result, path, span)?;
        }
        Ok(result)
    }

    /// Resolve negative Index segments against the arrays currently at
    /// each position; unresolvable prefixes leave the rest as written
    fn normalize_negative_indices(&self, value: &Value, path: &mut Path, span: Span) {
        let mut current = value.clone();
        for seg in path.iter_mut() {
            if let (PathSeg::Index(i), Value::Array(items)) = (&mut *seg, &current) {
                if *i < 0 {
                    *i += items.len() as i64;
                }
            }
            match self.path_get(&current, std::slice::from_ref(seg), span) {
                Ok(next) => current = next,
                Err(_) => break,
            }
        }
    }
}

/// Normalize slice endpoints stored in a path against an array length
fn normalize_slice(start: Option<i64>, end: Option<i64>, len: usize) -> (usize, usize) {
    let len = len as i64;
    let clamp = |bound: Option<i64>, default: i64| -> i64 {
        match bound {
            None => default,
            Some(i) if i < 0 => (len + i).max(0),
            Some(i) => i.min(len),
        }
    };
    let lo = clamp(start, 0);
    let hi = clamp(end, len).max(lo);
    (lo as usize, hi as usize)
}

fn describe_seg(seg: &PathSeg) -> String {
    match seg {
        PathSeg::Key(k) => format!("\"{}\"", k),
        PathSeg::Index(i) => i.to_string(),
        PathSeg::Slice { .. } => "a slice".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::Limits;

    fn ev() -> Evaluator<'static> {
        Evaluator::new(".", Limits::default())
    }

    fn json(s: &str) -> Value {
        Value::from_serde_json(serde_json::from_str(s).unwrap())
    }

    fn key(k: &str) -> PathSeg {
        PathSeg::Key(k.to_string())
    }

    #[test]
    fn test_path_value_round_trip() {
        let ev = ev();
        let path = vec![key("a"), PathSeg::Index(0), key("b")];
        let encoded = path_to_value(&path);
        assert_eq!(encoded.encode_json(), r#"["a",0,"b"]"#);
        let decoded = ev.path_from_value(&encoded, Span::default()).unwrap();
        assert_eq!(decoded, path);
    }

    #[test]
    fn test_get_missing_is_null() {
        let ev = ev();
        let v = json(r#"{"a":{"b":1}}"#);
        let got = ev
            .path_get(&v, &[key("a"), key("b")], Span::default())
            .unwrap();
        assert_eq!(got, Value::Number(1.0));
        let got = ev
            .path_get(&v, &[key("x"), key("y")], Span::default())
            .unwrap();
        assert_eq!(got, Value::Null);
    }

    #[test]
    fn test_get_negative_index() {
        let ev = ev();
        let v = json("[1,2,3]");
        let got = ev
            .path_get(&v, &[PathSeg::Index(-1)], Span::default())
            .unwrap();
        assert_eq!(got, Value::Number(3.0));
    }

    #[test]
    fn test_get_type_mismatch_faults() {
        let ev = ev();
        let v = json("[1,2,3]");
        assert!(ev.path_get(&v, &[key("a")], Span::default()).is_err());
    }

    #[test]
    fn test_set_builds_intermediates() {
        let ev = ev();
        let got = ev
            .path_set(
                &Value::Null,
                &[key("a"), PathSeg::Index(0)],
                &Value::Number(7.0),
                Span::default(),
            )
            .unwrap();
        assert_eq!(got.encode_json(), r#"{"a":[7]}"#);
    }

    #[test]
    fn test_set_pads_arrays() {
        let ev = ev();
        let v = json("[1]");
        let got = ev
            .path_set(&v, &[PathSeg::Index(3)], &Value::Number(9.0), Span::default())
            .unwrap();
        assert_eq!(got.encode_json(), "[1,null,null,9]");
    }

    #[test]
    fn test_set_rejects_incompatible_parent() {
        let ev = ev();
        let v = json("[1,2]");
        assert!(ev
            .path_set(&v, &[key("a")], &Value::Null, Span::default())
            .is_err());
        let v = json(r#"{"a":1}"#);
        assert!(ev
            .path_set(&v, &[PathSeg::Index(0)], &Value::Null, Span::default())
            .is_err());
    }

    #[test]
    fn test_set_slice_splices() {
        let ev = ev();
        let v = json("[1,2,3,4]");
        let got = ev
            .path_set(
                &v,
                &[PathSeg::Slice {
                    start: Some(1),
                    end: Some(3),
                }],
                &json("[9]"),
                Span::default(),
            )
            .unwrap();
        assert_eq!(got.encode_json(), "[1,9,4]");
    }

    #[test]
    fn test_delete_key_and_index() {
        let ev = ev();
        let v = json(r#"{"a":1,"b":2}"#);
        let got = ev.path_delete(&v, &[key("a")], Span::default()).unwrap();
        assert_eq!(got.encode_json(), r#"{"b":2}"#);

        let v = json("[1,2,3]");
        let got = ev
            .path_delete(&v, &[PathSeg::Index(1)], Span::default())
            .unwrap();
        assert_eq!(got.encode_json(), "[1,3]");

        // Missing targets are no-ops
        let got = ev
            .path_delete(&v, &[PathSeg::Index(9)], Span::default())
            .unwrap();
        assert_eq!(got.encode_json(), "[1,2,3]");
    }

    #[test]
    fn test_delete_paths_handles_index_shift() {
        let ev = ev();
        let v = json("[10,20,30,40]");
        let got = ev
            .delete_paths(
                &v,
                vec![vec![PathSeg::Index(0)], vec![PathSeg::Index(2)]],
                Span::default(),
            )
            .unwrap();
        assert_eq!(got.encode_json(), "[20,40]");
    }

    #[test]
    fn test_delete_paths_normalises_negatives() {
        let ev = ev();
        let v = json("[10,20,30]");
        let got = ev
            .delete_paths(
                &v,
                vec![vec![PathSeg::Index(-1)], vec![PathSeg::Index(0)]],
                Span::default(),
            )
            .unwrap();
        assert_eq!(got.encode_json(), "[20]");
    }

    #[test]
    fn test_cmp_paths_orders_by_encoding() {
        let a = vec![key("a")];
        let ab = vec![key("a"), key("b")];
        let b = vec![key("b")];
        assert_eq!(cmp_paths(&a, &ab), std::cmp::Ordering::Less);
        assert_eq!(cmp_paths(&ab, &b), std::cmp::Ordering::Less);
    }
}
