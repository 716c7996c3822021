//! Evaluator for rill filters
//!
//! A filter evaluates to a finite stream of values against a current
//! input and an environment. The stream is callback-driven: evaluating
//! a node delivers each produced value to a sink, which answers whether
//! the consumer wants more ([`Flow`]). This gives exact left-to-right
//! ordering, a cap check between any two emissions, and deterministic
//! cleanup of environment frames on every exit path — the properties a
//! generator would provide, without one.
//!
//! Faults and `break` signals unwind through `Err`. Because a sink may
//! run arbitrary downstream code, an interrupt raised *by the consumer*
//! must not be confused with one raised *inside* the producing
//! expression: `try` and `label` count the boundaries an interrupt has
//! crossed on the consumer side (`shield`) and only handle interrupts
//! of their own region.

pub mod assign;
pub mod builtins;
pub mod env;
pub mod paths;
pub mod tracker;
pub mod value;

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::errors::{FaultKind, RillError, RillResult};
use crate::lexer::token::Span;
use crate::parser::ast::{Ast, AstKind, BinaryOp, LogicOp, ObjectEntry, ObjectKey};

pub use env::Env;
pub use tracker::{Limits, Tracker};
pub use value::Value;

use env::FuncDef;
use tracker::{DepthGuard, Exceeded};

/// Whether the consumer wants more values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Non-local unwinding during evaluation
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// A runtime fault. `shield` counts the `try` boundaries the fault
    /// has crossed on the consumer side; a `try` only catches faults
    /// with a shield of zero, i.e. faults raised within its own body.
    Fault { error: RillError, shield: u32 },
    /// `break $label` travelling to its matching `label`. `shield`
    /// counts same-named label boundaries crossed on the consumer side,
    /// so shadowed label names resolve to the right binding.
    Break {
        label: String,
        shield: u32,
        span: Span,
    },
}

impl Interrupt {
    pub(crate) fn fault(error: RillError) -> Self {
        Interrupt::Fault { error, shield: 0 }
    }
}

impl From<RillError> for Interrupt {
    fn from(error: RillError) -> Self {
        Interrupt::fault(error)
    }
}

pub(crate) type EvalResult<T> = Result<T, Interrupt>;

/// The value consumer a node emits into
pub(crate) type Sink<'s> = dyn FnMut(Value) -> EvalResult<Flow> + 's;

/// Tree-walking evaluator for one `run` invocation
pub struct Evaluator<'a> {
    source: &'a str,
    tracker: Tracker,
}

impl<'a> Evaluator<'a> {
    pub fn new(source: &'a str, limits: Limits) -> Self {
        Self {
            source,
            tracker: Tracker::new(limits),
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Evaluate a validated filter against an input, collecting every
    /// output. Outputs produced before a fault are discarded.
    pub fn run(
        &self,
        ast: &Ast,
        input: &Value,
        globals: &BTreeMap<String, Value>,
    ) -> RillResult<Vec<Value>> {
        let env = Env::with_globals(globals);
        let mut outputs = Vec::new();

        let result = self.eval(ast, input, &env, &mut |v| {
            if let Err(e) = self.tracker.charge_output() {
                return Err(Interrupt::fault(self.resource_fault(e, ast.span)));
            }
            outputs.push(v);
            Ok(Flow::Continue)
        });

        match result {
            Ok(_) => Ok(outputs),
            Err(Interrupt::Fault { error, .. }) => Err(error),
            Err(Interrupt::Break { label, span, .. }) => Err(RillError::fault(
                self.source,
                span,
                FaultKind::Unbound,
                format!("break with no matching label ${}", label),
            )),
        }
    }

    /// Evaluate one node, delivering each produced value to `out`
    pub(crate) fn eval(
        &self,
        node: &Ast,
        input: &Value,
        env: &Env,
        out: &mut Sink,
    ) -> EvalResult<Flow> {
        self.charge_step(node.span)?;
        let _depth = self.enter_depth(node.span)?;

        match &node.kind {
            AstKind::Identity => out(input.clone()),

            AstKind::Recurse => self.recurse_value(input, node.span, out),

            AstKind::Literal(v) => out(v.clone()),

            AstKind::Var(name) => match env.lookup_var(name) {
                Some(v) => out(v.clone()),
                None => Err(self.fault(
                    node.span,
                    FaultKind::Unbound,
                    format!("${} is not defined", name),
                )),
            },

            AstKind::Field { target, name } => self.eval(target, input, env, &mut |t| {
                let v = self.field_value(&t, name, node.span)?;
                out(v)
            }),

            AstKind::Index { target, index } => {
                let indices = self.collect(index, input, env)?;
                self.eval(target, input, env, &mut |t| {
                    for idx in &indices {
                        let v = self.index_value(&t, idx, node.span)?;
                        if out(v)? == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                    Ok(Flow::Continue)
                })
            }

            AstKind::Slice { target, start, end } => {
                let starts = match start {
                    Some(s) => self.slice_bounds(s, input, env)?,
                    None => vec![None],
                };
                let ends = match end {
                    Some(e) => self.slice_bounds(e, input, env)?,
                    None => vec![None],
                };
                self.eval(target, input, env, &mut |t| {
                    for s in &starts {
                        for e in &ends {
                            let v = self.slice_value(&t, *s, *e, node.span)?;
                            if out(v)? == Flow::Stop {
                                return Ok(Flow::Stop);
                            }
                        }
                    }
                    Ok(Flow::Continue)
                })
            }

            AstKind::Iterate { target } => self.eval(target, input, env, &mut |t| match t {
                Value::Array(items) => {
                    for v in items {
                        if out(v)? == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                    Ok(Flow::Continue)
                }
                Value::Object(map) => {
                    for (_, v) in map {
                        if out(v)? == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                    Ok(Flow::Continue)
                }
                Value::Null => Ok(Flow::Continue),
                other => Err(self.fault(
                    node.span,
                    FaultKind::Type,
                    format!("cannot iterate over {} ({})", other.type_name(), other),
                )),
            }),

            AstKind::Array { items } => match items {
                None => out(Value::Array(Vec::new())),
                Some(items) => {
                    let mut acc = Vec::new();
                    self.eval(items, input, env, &mut |v| {
                        acc.push(v);
                        Ok(Flow::Continue)
                    })?;
                    out(Value::Array(acc))
                }
            },

            AstKind::Object { entries } => {
                let acc = BTreeMap::new();
                self.eval_object(entries, input, env, &acc, out)
            }

            AstKind::Pipe { left, right } => self.eval(left, input, env, &mut |v| {
                self.eval(right, &v, env, &mut *out)
            }),

            AstKind::Comma { left, right } => {
                match self.eval(left, input, env, &mut *out)? {
                    Flow::Stop => Ok(Flow::Stop),
                    Flow::Continue => self.eval(right, input, env, &mut *out),
                }
            }

            AstKind::Alternative { left, right } => {
                // Truthy left values stream through; the right side runs
                // only when none existed
                let mut any = false;
                let flow = self.eval(left, input, env, &mut |v| {
                    if v.is_truthy() {
                        any = true;
                        out(v)
                    } else {
                        Ok(Flow::Continue)
                    }
                })?;
                if any {
                    Ok(flow)
                } else {
                    self.eval(right, input, env, out)
                }
            }

            AstKind::Neg { expr } => self.eval(expr, input, env, &mut |v| match v {
                Value::Number(n) => out(Value::Number(-n)),
                other => Err(self.fault(
                    node.span,
                    FaultKind::Type,
                    format!("{} ({}) cannot be negated", other.type_name(), other),
                )),
            }),

            AstKind::Not { expr } => self.eval(expr, input, env, &mut |v| {
                out(Value::Bool(!v.is_truthy()))
            }),

            AstKind::Binary { op, left, right } => {
                let rights = self.collect(right, input, env)?;
                self.eval(left, input, env, &mut |l| {
                    for r in &rights {
                        let v = self.apply_binary(*op, &l, r, node.span)?;
                        if out(v)? == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                    Ok(Flow::Continue)
                })
            }

            AstKind::Logic { op, left, right } => {
                let op = *op;
                self.eval(left, input, env, &mut |l| {
                    match (op, l.is_truthy()) {
                        (LogicOp::Or, true) => out(Value::Bool(true)),
                        (LogicOp::And, false) => out(Value::Bool(false)),
                        _ => self.eval(right, input, env, &mut |r| {
                            out(Value::Bool(r.is_truthy()))
                        }),
                    }
                })
            }

            AstKind::If { cond, then, else_ } => self.eval(cond, input, env, &mut |c| {
                if c.is_truthy() {
                    self.eval(then, input, env, &mut *out)
                } else {
                    match else_ {
                        Some(e) => self.eval(e, input, env, &mut *out),
                        // A missing else branch passes the input through
                        None => out(input.clone()),
                    }
                }
            }),

            AstKind::Bind { source, var, body } => self.eval(source, input, env, &mut |v| {
                let bound = env.bind_var(var, v);
                self.eval(body, input, &bound, &mut *out)
            }),

            AstKind::FuncDef {
                name,
                params,
                body,
                rest,
            } => {
                let extended = env.bind_func(name, Rc::new(params.clone()), body.clone());
                self.eval(rest, input, &extended, out)
            }

            AstKind::Call { name, args } => {
                if let Some((def, def_env)) = env.lookup_func(name, args.len()) {
                    match def {
                        FuncDef::User { params, body } => {
                            let call_frame = def_env.bind_args(&params, args, env);
                            self.eval(&body, input, &call_frame, out)
                        }
                        FuncDef::Thunk {
                            body,
                            env: thunk_env,
                        } => self.eval(&body, input, &thunk_env, out),
                    }
                } else {
                    builtins::call(self, name, args, input, env, node.span, out)
                }
            }

            AstKind::Reduce {
                source,
                var,
                init,
                update,
            } => {
                let mut acc = self.eval_one(init, input, env, "reduce initial value")?;
                self.eval(source, input, env, &mut |v| {
                    self.charge_step(node.span)?;
                    let bound = env.bind_var(var, v);
                    let next = self.eval_one(update, &acc, &bound, "reduce update")?;
                    acc = next;
                    Ok(Flow::Continue)
                })?;
                out(acc)
            }

            AstKind::Foreach {
                source,
                var,
                init,
                update,
                extract,
            } => {
                let mut acc = self.eval_one(init, input, env, "foreach initial value")?;
                self.eval(source, input, env, &mut |v| {
                    self.charge_step(node.span)?;
                    let bound = env.bind_var(var, v);
                    let next = self.eval_one(update, &acc, &bound, "foreach update")?;
                    acc = next;
                    match extract {
                        Some(ex) => self.eval(ex, &acc, &bound, &mut *out),
                        None => out(acc.clone()),
                    }
                })
            }

            AstKind::TryCatch { body, handler } => {
                let result = self.eval(body, input, env, &mut |v| match out(v) {
                    Err(Interrupt::Fault { error, shield }) => Err(Interrupt::Fault {
                        error,
                        shield: shield + 1,
                    }),
                    other => other,
                });
                match result {
                    Err(Interrupt::Fault { error, shield: 0 }) if error.is_catchable() => {
                        match handler {
                            Some(h) => {
                                let msg = Value::String(error.message());
                                self.eval(h, &msg, env, out)
                            }
                            None => Ok(Flow::Continue),
                        }
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

            AstKind::Label { name, body } => {
                let result = self.eval(body, input, env, &mut |v| match out(v) {
                    Err(Interrupt::Break {
                        label,
                        shield,
                        span,
                    }) if label == *name => Err(Interrupt::Break {
                        label,
                        shield: shield + 1,
                        span,
                    }),
                    other => other,
                });
                match result {
                    Err(Interrupt::Break {
                        label, shield: 0, ..
                    }) if label == *name => Ok(Flow::Continue),
                    Err(Interrupt::Break {
                        label,
                        shield,
                        span,
                    }) if label == *name && shield > 0 => Err(Interrupt::Break {
                        label,
                        shield: shield - 1,
                        span,
                    }),
                    other => other,
                }
            }

            AstKind::Break { name } => Err(Interrupt::Break {
                label: name.clone(),
                shield: 0,
                span: node.span,
            }),

            AstKind::Assign { op, lhs, rhs } => {
                self.eval_assign(*op, lhs, rhs, input, env, node.span, out)
            }
        }
    }

    /// Object construction: the ordered Cartesian product over entries.
    /// Keys vary slower than values, entries left to right; later
    /// duplicate keys overwrite earlier ones within one product.
    fn eval_object(
        &self,
        entries: &[ObjectEntry],
        input: &Value,
        env: &Env,
        acc: &BTreeMap<String, Value>,
        out: &mut Sink,
    ) -> EvalResult<Flow> {
        let Some((entry, rest)) = entries.split_first() else {
            return out(Value::Object(acc.clone()));
        };

        let keys: Vec<String> = match &entry.key {
            ObjectKey::Literal(s) => vec![s.clone()],
            ObjectKey::Expr(e) => {
                let mut keys = Vec::new();
                for k in self.collect(e, input, env)? {
                    match k {
                        Value::String(s) => keys.push(s),
                        other => {
                            return Err(self.fault(
                                e.span,
                                FaultKind::Type,
                                format!(
                                    "object keys must be strings, got {} ({})",
                                    other.type_name(),
                                    other
                                ),
                            ))
                        }
                    }
                }
                keys
            }
        };

        for key in keys {
            let flow = self.eval(&entry.value, input, env, &mut |v| {
                let mut next = acc.clone();
                next.insert(key.clone(), v);
                self.eval_object(rest, input, env, &next, &mut *out)
            })?;
            if flow == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// `..`: the value itself, then its descendants depth-first. The
    /// depth guard bounds runaway structures alongside the step cap.
    fn recurse_value(&self, v: &Value, span: Span, out: &mut Sink) -> EvalResult<Flow> {
        self.charge_step(span)?;
        let _depth = self.enter_depth(span)?;

        if out(v.clone())? == Flow::Stop {
            return Ok(Flow::Stop);
        }
        match v {
            Value::Array(items) => {
                for child in items {
                    if self.recurse_value(child, span, out)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
            Value::Object(map) => {
                for child in map.values() {
                    if self.recurse_value(child, span, out)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }

    /// Evaluate a node and collect all its values
    pub(crate) fn collect(
        &self,
        node: &Ast,
        input: &Value,
        env: &Env,
    ) -> EvalResult<Vec<Value>> {
        let mut values = Vec::new();
        self.eval(node, input, env, &mut |v| {
            values.push(v);
            Ok(Flow::Continue)
        })?;
        Ok(values)
    }

    /// Evaluate a node that must produce exactly one value
    pub(crate) fn eval_one(
        &self,
        node: &Ast,
        input: &Value,
        env: &Env,
        what: &str,
    ) -> EvalResult<Value> {
        let mut result: Option<Value> = None;
        let mut extra = false;
        self.eval(node, input, env, &mut |v| {
            if result.is_none() {
                result = Some(v);
                Ok(Flow::Continue)
            } else {
                extra = true;
                Ok(Flow::Stop)
            }
        })?;
        if extra {
            return Err(self.fault(
                node.span,
                FaultKind::Type,
                format!("{} must produce exactly one value", what),
            ));
        }
        result.ok_or_else(|| {
            self.fault(
                node.span,
                FaultKind::Type,
                format!("{} produced no value", what),
            )
        })
    }

    /// `.name` access on one value
    pub(crate) fn field_value(
        &self,
        target: &Value,
        name: &str,
        span: Span,
    ) -> EvalResult<Value> {
        match target {
            Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(self.fault(
                span,
                FaultKind::Type,
                format!("cannot index {} with \"{}\"", other.type_name(), name),
            )),
        }
    }

    /// `T[I]` access for one (container, index) pair
    pub(crate) fn index_value(
        &self,
        target: &Value,
        index: &Value,
        span: Span,
    ) -> EvalResult<Value> {
        match (target, index) {
            (Value::Null, Value::Number(_)) | (Value::Null, Value::String(_)) => Ok(Value::Null),
            (Value::Array(items), Value::Number(n)) => {
                let Some(i) = Value::Number(*n).as_integer() else {
                    return Err(self.fault(
                        span,
                        FaultKind::Index,
                        format!("cannot index array with {}", Value::Number(*n)),
                    ));
                };
                let len = items.len() as i64;
                let i = if i < 0 { i + len } else { i };
                if i < 0 || i >= len {
                    Ok(Value::Null)
                } else {
                    Ok(items[i as usize].clone())
                }
            }
            (Value::Object(map), Value::String(key)) => {
                Ok(map.get(key).cloned().unwrap_or(Value::Null))
            }
            (Value::Object(_), other) => Err(self.fault(
                span,
                FaultKind::Index,
                format!("cannot index object with {}", other.type_name()),
            )),
            (other, idx) => Err(self.fault(
                span,
                FaultKind::Type,
                format!(
                    "cannot index {} with {}",
                    other.type_name(),
                    idx.type_name()
                ),
            )),
        }
    }

    /// Evaluate a slice endpoint expression to numbers or nulls
    fn slice_bounds(
        &self,
        node: &Ast,
        input: &Value,
        env: &Env,
    ) -> EvalResult<Vec<Option<f64>>> {
        let mut bounds = Vec::new();
        for v in self.collect(node, input, env)? {
            match v {
                Value::Null => bounds.push(None),
                Value::Number(n) => bounds.push(Some(n)),
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

    /// `T[a:b]` for one (container, start, end) triple. Non-integer
    /// endpoints truncate toward zero.
    pub(crate) fn slice_value(
        &self,
        target: &Value,
        start: Option<f64>,
        end: Option<f64>,
        span: Span,
    ) -> EvalResult<Value> {
        match target {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => {
                let (lo, hi) = slice_range(start, end, items.len());
                Ok(Value::Array(items[lo..hi].to_vec()))
            }
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (lo, hi) = slice_range(start, end, chars.len());
                Ok(Value::String(chars[lo..hi].iter().collect()))
            }
            other => Err(self.fault(
                span,
                FaultKind::Type,
                format!("cannot slice {} ({})", other.type_name(), other),
            )),
        }
    }

    /// Apply one arithmetic or comparison operator
    pub(crate) fn apply_binary(
        &self,
        op: BinaryOp,
        l: &Value,
        r: &Value,
        span: Span,
    ) -> EvalResult<Value> {
        match op {
            BinaryOp::Eq => return Ok(Value::Bool(l == r)),
            BinaryOp::NotEq => return Ok(Value::Bool(l != r)),
            BinaryOp::Lt => {
                return Ok(Value::Bool(l.total_cmp(r) == std::cmp::Ordering::Less));
            }
            BinaryOp::LtEq => {
                return Ok(Value::Bool(l.total_cmp(r) != std::cmp::Ordering::Greater));
            }
            BinaryOp::Gt => {
                return Ok(Value::Bool(l.total_cmp(r) == std::cmp::Ordering::Greater));
            }
            BinaryOp::GtEq => {
                return Ok(Value::Bool(l.total_cmp(r) != std::cmp::Ordering::Less));
            }
            _ => {}
        }

        match (op, l, r) {
            // `+` with null on either side passes the other through
            (BinaryOp::Add, Value::Null, x) | (BinaryOp::Add, x, Value::Null) => Ok(x.clone()),
            (BinaryOp::Add, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (BinaryOp::Add, Value::String(a), Value::String(b)) => {
                Ok(Value::String(format!("{}{}", a, b)))
            }
            (BinaryOp::Add, Value::Array(a), Value::Array(b)) => {
                let mut joined = a.clone();
                joined.extend(b.iter().cloned());
                Ok(Value::Array(joined))
            }
            (BinaryOp::Add, Value::Object(a), Value::Object(b)) => {
                let mut merged = a.clone();
                for (k, v) in b {
                    merged.insert(k.clone(), v.clone());
                }
                Ok(Value::Object(merged))
            }

            (BinaryOp::Sub, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
            (BinaryOp::Sub, Value::Array(a), Value::Array(b)) => {
                // Multiset difference: each right element removes one
                // matching occurrence
                let mut remaining = a.clone();
                for x in b {
                    if let Some(pos) = remaining.iter().position(|y| y == x) {
                        remaining.remove(pos);
                    }
                }
                Ok(Value::Array(remaining))
            }

            (BinaryOp::Mul, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
            (BinaryOp::Mul, Value::String(s), Value::Number(n))
            | (BinaryOp::Mul, Value::Number(n), Value::String(s)) => {
                if *n <= 0.0 || !n.is_finite() {
                    Ok(Value::Null)
                } else {
                    Ok(Value::String(s.repeat(n.trunc() as usize)))
                }
            }
            (BinaryOp::Mul, Value::Object(a), Value::Object(b)) => {
                Ok(Value::Object(deep_merge(a, b)))
            }

            (BinaryOp::Div, Value::Number(a), Value::Number(b)) => {
                if *b == 0.0 {
                    Err(self.fault(
                        span,
                        FaultKind::Arith,
                        format!("{} and {} cannot be divided because the divisor is zero", l, r),
                    ))
                } else {
                    Ok(Value::Number(a / b))
                }
            }
            (BinaryOp::Div, Value::String(s), Value::String(sep)) => {
                Ok(Value::Array(split_string(s, sep)))
            }

            (BinaryOp::Mod, Value::Number(a), Value::Number(b)) => {
                // Modulo works on truncated integers; the sign follows
                // the dividend
                let bi = b.trunc() as i64;
                if bi == 0 {
                    return Err(self.fault(
                        span,
                        FaultKind::Arith,
                        format!("{} and {} cannot be divided because the divisor is zero", l, r),
                    ));
                }
                let ai = a.trunc() as i64;
                Ok(Value::Number(ai.wrapping_rem(bi) as f64))
            }

            _ => Err(self.fault(
                span,
                FaultKind::Type,
                format!(
                    "{} ({}) and {} ({}) cannot be {}",
                    l.type_name(),
                    l,
                    r.type_name(),
                    r,
                    match op {
                        BinaryOp::Add => "added",
                        BinaryOp::Sub => "subtracted",
                        BinaryOp::Mul => "multiplied",
                        BinaryOp::Div | BinaryOp::Mod => "divided",
                        _ => unreachable!("comparisons are handled above"),
                    }
                ),
            )),
        }
    }

    // Fault and resource plumbing

    pub(crate) fn fault(
        &self,
        span: Span,
        kind: FaultKind,
        message: impl Into<String>,
    ) -> Interrupt {
        Interrupt::fault(RillError::fault(self.source, span, kind, message.into()))
    }

    pub(crate) fn charge_step(&self, span: Span) -> EvalResult<()> {
        self.tracker
            .charge_step()
            .map_err(|e| Interrupt::fault(self.resource_fault(e, span)))
    }

    pub(crate) fn enter_depth(&self, span: Span) -> EvalResult<DepthGuard<'_>> {
        self.tracker
            .enter()
            .map_err(|e| Interrupt::fault(self.resource_fault(e, span)))
    }

    fn resource_fault(&self, exceeded: Exceeded, span: Span) -> RillError {
        RillError::fault(
            self.source,
            span,
            FaultKind::Resource,
            exceeded.describe(self.tracker.limits()),
        )
    }
}

/// Normalize slice endpoints against a container length, truncating
/// fractional endpoints toward zero and measuring negatives from the end
fn slice_range(start: Option<f64>, end: Option<f64>, len: usize) -> (usize, usize) {
    let len = len as i64;
    let clamp = |bound: Option<f64>, default: i64| -> i64 {
        match bound {
            None => default,
            Some(f) => {
                let i = f.trunc() as i64;
                if i < 0 {
                    (len + i).max(0)
                } else {
                    i.min(len)
                }
            }
        }
    };
    let lo = clamp(start, 0);
    let hi = clamp(end, len).max(lo);
    (lo as usize, hi as usize)
}

/// Recursive object merge for `*`: right wins at non-object leaves
fn deep_merge(
    a: &BTreeMap<String, Value>,
    b: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let mut merged = a.clone();
    for (k, bv) in b {
        let child = match (a.get(k), bv) {
            (Some(Value::Object(ao)), Value::Object(bo)) => Value::Object(deep_merge(ao, bo)),
            _ => bv.clone(),
        };
        merged.insert(k.clone(), child);
    }
    merged
}

/// String split shared by `/` and the `split` builtin. An empty
/// separator splits into single code points; an empty input yields an
/// empty array.
pub(crate) fn split_string(s: &str, sep: &str) -> Vec<Value> {
    if s.is_empty() {
        Vec::new()
    } else if sep.is_empty() {
        s.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        s.split(sep).map(|p| Value::String(p.to_string())).collect()
    }
}
