//! Resource accounting for the evaluator
//!
//! Three counters bound every evaluation: `steps` (work), `depth`
//! (active nesting), and `outputs` (values delivered to the caller).
//! Exceeding any cap is a fatal, uncatchable fault; this is the only
//! mechanism bounding a filter's runtime.

use std::cell::Cell;

/// Configurable caps for one `run` invocation
#[derive(Debug, Clone)]
pub struct Limits {
    /// Work units: one per AST node entered and one per iteration
    /// inside loop-like builtins
    pub max_steps: u64,
    /// Active evaluation nesting
    pub max_depth: u64,
    /// Values delivered to the caller
    pub max_outputs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_depth: 200,
            max_outputs: 10_000,
        }
    }
}

/// Which counter tripped its cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exceeded {
    Steps,
    Depth,
    Outputs,
}

impl Exceeded {
    pub fn describe(&self, limits: &Limits) -> String {
        match self {
            Exceeded::Steps => format!("step limit of {} exceeded", limits.max_steps),
            Exceeded::Depth => format!("depth limit of {} exceeded", limits.max_depth),
            Exceeded::Outputs => format!("output limit of {} exceeded", limits.max_outputs),
        }
    }
}

/// Counter state for one evaluation.
///
/// Counters use `Cell` so the tracker can be charged through shared
/// references; the evaluator threads `&Tracker` through closures that
/// could not all hold `&mut`.
#[derive(Debug)]
pub struct Tracker {
    limits: Limits,
    steps: Cell<u64>,
    depth: Cell<u64>,
    outputs: Cell<u64>,
}

impl Tracker {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            steps: Cell::new(0),
            depth: Cell::new(0),
            outputs: Cell::new(0),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Charge one unit of work
    pub fn charge_step(&self) -> Result<(), Exceeded> {
        let n = self.steps.get() + 1;
        self.steps.set(n);
        if n > self.limits.max_steps {
            Err(Exceeded::Steps)
        } else {
            Ok(())
        }
    }

    /// Enter one nesting level; the returned guard leaves it on drop,
    /// so faults and early stops cannot leak depth
    pub fn enter(&self) -> Result<DepthGuard<'_>, Exceeded> {
        let n = self.depth.get() + 1;
        self.depth.set(n);
        if n > self.limits.max_depth {
            self.depth.set(n - 1);
            Err(Exceeded::Depth)
        } else {
            Ok(DepthGuard { tracker: self })
        }
    }

    /// Charge one delivered output
    pub fn charge_output(&self) -> Result<(), Exceeded> {
        let n = self.outputs.get() + 1;
        self.outputs.set(n);
        if n > self.limits.max_outputs {
            Err(Exceeded::Outputs)
        } else {
            Ok(())
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps.get()
    }

    pub fn depth(&self) -> u64 {
        self.depth.get()
    }

    pub fn outputs(&self) -> u64 {
        self.outputs.get()
    }
}

/// RAII guard for one depth level
pub struct DepthGuard<'a> {
    tracker: &'a Tracker,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let d = self.tracker.depth.get();
        self.tracker.depth.set(d.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Limits {
        Limits {
            max_steps: 3,
            max_depth: 2,
            max_outputs: 1,
        }
    }

    #[test]
    fn test_steps_cap() {
        let t = Tracker::new(small());
        assert!(t.charge_step().is_ok());
        assert!(t.charge_step().is_ok());
        assert!(t.charge_step().is_ok());
        assert_eq!(t.charge_step(), Err(Exceeded::Steps));
        // Observed count never exceeds cap + 1
        assert_eq!(t.steps(), 4);
    }

    #[test]
    fn test_depth_guard_restores_on_drop() {
        let t = Tracker::new(small());
        {
            let _a = t.enter().unwrap();
            assert_eq!(t.depth(), 1);
            {
                let _b = t.enter().unwrap();
                assert_eq!(t.depth(), 2);
                assert_eq!(t.enter().err(), Some(Exceeded::Depth));
                assert_eq!(t.depth(), 2);
            }
            assert_eq!(t.depth(), 1);
        }
        assert_eq!(t.depth(), 0);
    }

    #[test]
    fn test_outputs_cap() {
        let t = Tracker::new(small());
        assert!(t.charge_output().is_ok());
        assert_eq!(t.charge_output(), Err(Exceeded::Outputs));
    }

    #[test]
    fn test_defaults() {
        let limits = Limits::default();
        assert_eq!(limits.max_steps, 100_000);
        assert_eq!(limits.max_depth, 200);
        assert_eq!(limits.max_outputs, 10_000);
    }
}
