//! Variable and function scoping for the rill evaluator
//!
//! The environment is a persistent stack of frames, shared by `Rc`:
//! extending it builds a new head, and "popping" is simply dropping the
//! extended handle. Frames are never mutated after construction, which
//! is what makes closure capture a cheap pointer copy.
//!
//! Function definitions come in two forms. A `def` body is evaluated in
//! the frame chain that contains its own frame, so recursion falls out
//! of lookup without a fix-point construct or a reference cycle. A
//! formal argument is a thunk carrying the call-site environment,
//! giving jq's pass-by-filter semantics: the argument filter re-runs
//! against whatever input is current wherever the formal is referenced.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::parser::ast::Ast;

use super::value::Value;

/// A function bound in a frame
#[derive(Debug, Clone)]
pub(crate) enum FuncDef {
    /// `def name(a; b): body` — evaluated in the chain containing its frame
    User {
        params: Rc<Vec<String>>,
        body: Rc<Ast>,
    },
    /// A formal argument bound at a call site; carries the caller's environment
    Thunk { body: Rc<Ast>, env: Env },
}

/// One scope record
#[derive(Debug)]
struct Frame {
    vars: HashMap<String, Value>,
    funcs: HashMap<(String, usize), FuncDef>,
    parent: Env,
}

/// A persistent stack of frames
#[derive(Debug, Clone, Default)]
pub struct Env {
    head: Option<Rc<Frame>>,
}

impl Env {
    /// The empty environment
    pub fn new() -> Self {
        Self { head: None }
    }

    /// An environment whose base frame holds the caller-supplied globals
    pub fn with_globals(globals: &BTreeMap<String, Value>) -> Self {
        if globals.is_empty() {
            return Self::new();
        }
        let vars = globals
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Env {
            head: Some(Rc::new(Frame {
                vars,
                funcs: HashMap::new(),
                parent: Env::new(),
            })),
        }
    }

    /// Extend with a frame binding one variable
    pub fn bind_var(&self, name: &str, value: Value) -> Env {
        let mut vars = HashMap::with_capacity(1);
        vars.insert(name.to_string(), value);
        Env {
            head: Some(Rc::new(Frame {
                vars,
                funcs: HashMap::new(),
                parent: self.clone(),
            })),
        }
    }

    /// Extend with a frame binding one user-defined function
    pub(crate) fn bind_func(&self, name: &str, params: Rc<Vec<String>>, body: Rc<Ast>) -> Env {
        let mut funcs = HashMap::with_capacity(1);
        funcs.insert(
            (name.to_string(), params.len()),
            FuncDef::User { params, body },
        );
        Env {
            head: Some(Rc::new(Frame {
                vars: HashMap::new(),
                funcs,
                parent: self.clone(),
            })),
        }
    }

    /// Extend with a frame binding each formal as a zero-arity thunk
    /// over the matching argument filter, closed over `call_env`
    pub(crate) fn bind_args(&self, params: &[String], args: &[Rc<Ast>], call_env: &Env) -> Env {
        debug_assert_eq!(params.len(), args.len());
        let mut funcs = HashMap::with_capacity(params.len());
        for (param, arg) in params.iter().zip(args.iter()) {
            funcs.insert(
                (param.clone(), 0),
                FuncDef::Thunk {
                    body: arg.clone(),
                    env: call_env.clone(),
                },
            );
        }
        Env {
            head: Some(Rc::new(Frame {
                vars: HashMap::new(),
                funcs,
                parent: self.clone(),
            })),
        }
    }

    /// Look up a variable, walking frames from top to bottom
    pub fn lookup_var(&self, name: &str) -> Option<&Value> {
        let mut cur = &self.head;
        while let Some(frame) = cur {
            if let Some(v) = frame.vars.get(name) {
                return Some(v);
            }
            cur = &frame.parent.head;
        }
        None
    }

    /// Look up a function by (name, arity). Returns the definition and
    /// the environment rooted at the frame that holds it — for a `def`
    /// that chain includes the definition itself, which is what makes
    /// recursive calls resolve.
    pub(crate) fn lookup_func(&self, name: &str, arity: usize) -> Option<(FuncDef, Env)> {
        let mut cur = &self.head;
        while let Some(frame) = cur {
            if let Some(def) = frame.funcs.get(&(name.to_string(), arity)) {
                return Some((
                    def.clone(),
                    Env {
                        head: Some(frame.clone()),
                    },
                ));
            }
            cur = &frame.parent.head;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::token::Span;
    use crate::parser::ast::{Ast, AstKind};

    fn identity_ast() -> Rc<Ast> {
        Rc::new(Ast {
            kind: AstKind::Identity,
            span: Span::default(),
        })
    }

    #[test]
    fn test_lookup_walks_frames() {
        let base = Env::new().bind_var("x", Value::from(1i64));
        let child = base.bind_var("y", Value::from(2i64));

        assert_eq!(child.lookup_var("x"), Some(&Value::from(1i64)));
        assert_eq!(child.lookup_var("y"), Some(&Value::from(2i64)));
        assert_eq!(base.lookup_var("y"), None);
    }

    #[test]
    fn test_shadowing() {
        let base = Env::new().bind_var("x", Value::from(1i64));
        let child = base.bind_var("x", Value::from(2i64));

        assert_eq!(child.lookup_var("x"), Some(&Value::from(2i64)));
        // The outer handle is untouched
        assert_eq!(base.lookup_var("x"), Some(&Value::from(1i64)));
    }

    #[test]
    fn test_globals() {
        let mut globals = BTreeMap::new();
        globals.insert("who".to_string(), Value::from("world"));
        let env = Env::with_globals(&globals);
        assert_eq!(env.lookup_var("who"), Some(&Value::from("world")));
        assert_eq!(env.lookup_var("other"), None);
    }

    #[test]
    fn test_func_lookup_is_arity_keyed() {
        let env = Env::new().bind_func("f", Rc::new(vec![]), identity_ast());
        assert!(env.lookup_func("f", 0).is_some());
        assert!(env.lookup_func("f", 1).is_none());
        assert!(env.lookup_func("g", 0).is_none());
    }

    #[test]
    fn test_func_env_contains_own_frame() {
        let env = Env::new().bind_func("f", Rc::new(vec![]), identity_ast());
        let (_, def_env) = env.lookup_func("f", 0).unwrap();
        // The returned chain resolves the function again: recursion
        assert!(def_env.lookup_func("f", 0).is_some());
    }

    #[test]
    fn test_arg_thunks_capture_call_env() {
        let call_env = Env::new().bind_var("x", Value::from(7i64));
        let env = Env::new().bind_args(
            &["a".to_string()],
            &[identity_ast()],
            &call_env,
        );
        match env.lookup_func("a", 0) {
            Some((FuncDef::Thunk { env: captured, .. }, _)) => {
                assert_eq!(captured.lookup_var("x"), Some(&Value::from(7i64)));
            }
            other => panic!("expected thunk, got {:?}", other),
        }
    }
}
