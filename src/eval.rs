use std::collections::HashMap;
use std::io::{self, Write};
use std::mem;

use log::trace;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::MachineConfig;
use crate::env::{self, BindError};
use crate::error::SchemeResult;
use crate::forms::{self, FormHandler};
use crate::gc::{Collector, GcReport};
use crate::heap::Heap;
use crate::primitives;
use crate::printer::{self, Style};
use crate::reader;
use crate::stack::FrameStack;
use crate::symbol::SymbolTable;
use crate::value::{Closure, ClosureRef, EnvRef, SymbolId, Value, ValueRef};

/// The interpreter. All state the collector needs to find roots lives here:
/// the registries, the global environment and the frame stack.
pub struct Machine {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub stack: FrameStack,
    /// The global environment. Always a collector root.
    pub global: EnvRef,
    pub config: MachineConfig,
    pub rng: StdRng,
    /// Where `display` writes.
    pub output: Box<dyn Write>,
    collector: Collector,
    forms: HashMap<SymbolId, FormHandler>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> SchemeResult<Self> {
        let mut heap = Heap::new(config.heap_capacity);
        let global = env::make_environment(&mut heap, None)?;
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut m = Machine {
            heap,
            symbols: SymbolTable::new(),
            stack: FrameStack::new(),
            global,
            collector: Collector::new(config.gc_policy),
            forms: forms::table(),
            config,
            rng,
            output: Box::new(io::stdout()),
        };

        primitives::install(&mut m)?;
        Ok(m)
    }

    /// Drop every object and rebuild the global environment with the native
    /// closures installed. The output sink is kept.
    pub fn initialize(&mut self) -> SchemeResult<()> {
        let output = mem::replace(&mut self.output, Box::new(io::sink()));
        *self = Machine::new(self.config.clone())?;
        self.output = output;
        Ok(())
    }

    // ========================================================================
    // Core evaluation entry point
    // ========================================================================

    /// Evaluate `expr` in `env`.
    ///
    /// Pushes a frame holding `env` and `expr`, computes the result, hands it
    /// to the parent frame and pops. A collection may run after the pop; the
    /// result survives it because the parent frame now holds it. Callers that
    /// keep any other value across this call must have rooted it.
    pub fn evaluate(&mut self, env: EnvRef, expr: ValueRef) -> SchemeResult<ValueRef> {
        let frame = self.stack.push(env, expr);

        let result = if self.stack.depth() > self.config.max_depth {
            self.heap.make_error("maximum evaluation depth exceeded")
        } else {
            self.dispatch(env, expr)
        };

        self.stack.pop(frame, result.as_ref().ok().copied())?;
        let result = result?;

        if log::log_enabled!(log::Level::Trace) {
            trace!(
                "eval [{}] {} => {}",
                frame.depth(),
                self.render(expr),
                self.render(result)
            );
        }

        self.collector
            .maybe_collect(&mut self.heap, self.global, &self.stack);
        Ok(result)
    }

    fn dispatch(&mut self, env: EnvRef, expr: ValueRef) -> SchemeResult<ValueRef> {
        match *self.heap.get(expr) {
            Value::Pair(head, args) => {
                if let Some(name) = self.heap.as_atom(head) {
                    if let Some(&handler) = self.forms.get(&name) {
                        return handler(self, env, args);
                    }
                }
                self.eval_call(env, head, args)
            }
            Value::Atom(name) => match env::resolve_binding(&self.heap, env, name) {
                Some(v) => Ok(v),
                None => {
                    let msg = format!(
                        "couldn't resolve name \"{}\" to a value!",
                        self.symbols.name(name)
                    );
                    self.heap.make_error(msg)
                }
            },
            _ => Ok(expr),
        }
    }

    /// Evaluate operator and operands left to right, then apply.
    fn eval_call(&mut self, env: EnvRef, op_expr: ValueRef, operands: ValueRef) -> SchemeResult<ValueRef> {
        let op = self.evaluate(env, op_expr)?;
        if self.heap.is_error(op) {
            return Ok(op);
        }
        let closure = match self.heap.as_closure(op) {
            Some(c) => c,
            None => return self.heap.make_error("operator is not a valid lambda expression"),
        };
        self.stack.root_value(op);

        let mut builder = self.heap.list_builder()?;
        let args_slot = self.stack.root_value(builder.head);
        let mut count = 0;
        let mut rest = operands;
        while let Some((arg_expr, next)) = self.heap.as_pair(rest) {
            let v = self.evaluate(env, arg_expr)?;
            if self.heap.is_error(v) {
                return Ok(v);
            }
            self.heap.list_append(&mut builder, v)?;
            self.stack.set_value(args_slot, builder.head);
            count += 1;
            rest = next;
        }
        if !self.heap.is_nil(rest) {
            return self.heap.make_error("argument list must be a proper list");
        }

        self.apply(closure, count, builder.head)
    }

    /// Apply a closure to an already-evaluated argument list. `args` must be
    /// reachable from a root for the duration of the call.
    pub fn apply(&mut self, closure: ClosureRef, count: usize, args: ValueRef) -> SchemeResult<ValueRef> {
        match *self.heap.closure(closure) {
            Closure::Native { func, .. } => func(self, count, args),
            Closure::Interpreted {
                arg_spec,
                body,
                env: captured,
            } => {
                let child = env::make_environment(&mut self.heap, Some(captured))?;
                let env_slot = self.stack.register();
                self.stack.set_env(env_slot, child);

                match env::bind_names_values(&mut self.heap, child, arg_spec, args) {
                    Ok(()) => {}
                    Err(BindError::TooFewValues) => {
                        return self.heap.make_error("not enough arguments for lambda!")
                    }
                    Err(BindError::TooManyValues) => {
                        return self.heap.make_error("too many arguments for lambda!")
                    }
                    Err(BindError::NameNotAtom) => {
                        return self
                            .heap
                            .make_error("lambda argument must be an atom, or a list of atoms")
                    }
                }

                self.eval_sequence(child, body)
            }
        }
    }

    /// Evaluate each expression of a proper list in order. The result is the
    /// last value, or the first error. `env` must be rooted by the caller.
    pub fn eval_sequence(&mut self, env: EnvRef, exprs: ValueRef) -> SchemeResult<ValueRef> {
        let mut result = None;
        let mut rest = exprs;
        while let Some((expr, next)) = self.heap.as_pair(rest) {
            let v = self.evaluate(env, expr)?;
            if self.heap.is_error(v) {
                return Ok(v);
            }
            result = Some(v);
            rest = next;
        }
        match result {
            Some(v) => Ok(v),
            None => self.heap.make_nil(),
        }
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Run a full collection now, regardless of policy.
    pub fn collect(&mut self) -> GcReport {
        self.collector.collect(&mut self.heap, self.global, &self.stack)
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    // ========================================================================
    // Top level
    // ========================================================================

    /// Bind `name` in the global environment.
    pub fn define_global(&mut self, name: &str, value: ValueRef) {
        let id = self.symbols.intern(name);
        env::create_binding(&mut self.heap, self.global, id, value);
    }

    /// Look a name up in the global environment.
    pub fn lookup_global(&self, name: &str) -> Option<ValueRef> {
        let id = self.symbols.lookup(name)?;
        env::resolve_binding(&self.heap, self.global, id)
    }

    /// Read and evaluate every expression in `src` at top level, calling
    /// `on_result` with each result.
    ///
    /// The root frame is reset before each expression, so each result stays
    /// rooted only until the next one starts.
    pub fn eval_source<F>(&mut self, src: &str, mut on_result: F) -> SchemeResult<()>
    where
        F: FnMut(&mut Machine, ValueRef) -> SchemeResult<()>,
    {
        let mut pos = 0;
        while let Some((expr, next)) =
            reader::read_one_at(src, pos, &mut self.heap, &mut self.symbols)?
        {
            self.stack.reset_root();
            let result = self.evaluate(self.global, expr)?;
            on_result(self, result)?;
            pos = next;
        }
        Ok(())
    }

    /// Evaluate every expression in `src` at top level and return the last
    /// result (nil for empty input).
    pub fn eval_str(&mut self, src: &str) -> SchemeResult<ValueRef> {
        let mut last = None;
        self.eval_source(src, |_, v| {
            last = Some(v);
            Ok(())
        })?;
        match last {
            Some(v) => Ok(v),
            None => self.heap.make_nil(),
        }
    }

    /// Evaluate `src` in the global environment from inside a running
    /// evaluation, without touching the frames already on the stack. Stops at
    /// the first error value.
    pub fn eval_nested(&mut self, src: &str) -> SchemeResult<ValueRef> {
        let mut pos = 0;
        let mut last = None;
        while let Some((expr, next)) =
            reader::read_one_at(src, pos, &mut self.heap, &mut self.symbols)?
        {
            let v = self.evaluate(self.global, expr)?;
            if self.heap.is_error(v) {
                return Ok(v);
            }
            last = Some(v);
            pos = next;
        }
        match last {
            Some(v) => Ok(v),
            None => self.heap.make_nil(),
        }
    }

    /// Render in write style (strings quoted).
    pub fn render(&self, v: ValueRef) -> String {
        printer::print_val(v, &self.heap, &self.symbols, Style::Write)
    }

    /// Render in display style (strings raw).
    pub fn render_display(&self, v: ValueRef) -> String {
        printer::print_val(v, &self.heap, &self.symbols, Style::Display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcPolicy;

    fn machine() -> Machine {
        Machine::new(MachineConfig::default()).unwrap()
    }

    fn eval(m: &mut Machine, src: &str) -> String {
        let v = m.eval_str(src).unwrap();
        m.render(v)
    }

    #[test]
    fn self_evaluating_and_atoms() {
        let mut m = machine();
        assert_eq!(eval(&mut m, "42"), "42");
        assert_eq!(eval(&mut m, "\"s\""), "\"s\"");
        assert_eq!(eval(&mut m, "#f"), "#f");
        assert_eq!(eval(&mut m, "nil"), "nil");
        assert_eq!(eval(&mut m, "car"), "#<native:car>");
        assert_eq!(
            eval(&mut m, "undefined-thing"),
            "ERROR: couldn't resolve name \"undefined-thing\" to a value!"
        );
    }

    #[test]
    fn calls_evaluate_operands_in_order() {
        let mut m = machine();
        assert_eq!(eval(&mut m, "(+ 1 2 3)"), "6");
        assert_eq!(eval(&mut m, "((lambda (x y) (- x y)) 10 4)"), "6");
        assert_eq!(eval(&mut m, "((lambda args args) 1 2 3)"), "(1 2 3)");
        assert_eq!(eval(&mut m, "((lambda (a . rest) rest) 1 2 3)"), "(2 3)");
        assert_eq!(eval(&mut m, "((lambda () 7))"), "7");
    }

    #[test]
    fn call_errors() {
        let mut m = machine();
        assert_eq!(
            eval(&mut m, "(5 1)"),
            "ERROR: operator is not a valid lambda expression"
        );
        assert_eq!(
            eval(&mut m, "((lambda (x y) x) 1)"),
            "ERROR: not enough arguments for lambda!"
        );
        assert_eq!(
            eval(&mut m, "((lambda (x) x) 1 2)"),
            "ERROR: too many arguments for lambda!"
        );
        assert_eq!(eval(&mut m, "(+ 1 (car 5) (undefined))"), "ERROR: argument to car must be a cons pair");
    }

    #[test]
    fn depth_limit_yields_error_value() {
        let config = MachineConfig {
            max_depth: 64,
            ..MachineConfig::default()
        };
        let mut m = Machine::new(config).unwrap();
        m.eval_str("(define (loop n) (+ 1 (loop n)))").unwrap();
        assert_eq!(eval(&mut m, "(loop 0)"), "ERROR: maximum evaluation depth exceeded");
        assert_eq!(eval(&mut m, "(+ 1 1)"), "2");
    }

    #[test]
    fn stack_is_balanced_after_evaluation() {
        let mut m = machine();
        m.eval_str("(define (f x) (if (= x 0) 0 (f (- x 1))))").unwrap();
        m.eval_str("(f 20)").unwrap();
        assert_eq!(m.stack.depth(), 0);
    }

    #[test]
    fn initialize_resets_globals() {
        let mut m = machine();
        m.eval_str("(define x 1)").unwrap();
        assert!(m.lookup_global("x").is_some());
        m.initialize().unwrap();
        assert!(m.lookup_global("x").is_none());
        assert!(m.lookup_global("car").is_some());
    }

    #[test]
    fn threshold_policy_collects_less_often() {
        let config = MachineConfig {
            gc_policy: GcPolicy::Threshold {
                initial_bytes: 1 << 20,
            },
            ..MachineConfig::default()
        };
        let mut m = Machine::new(config).unwrap();
        assert_eq!(eval(&mut m, "(+ 1 2 3)"), "6");
        assert_eq!(m.collector().collections(), 0);
    }
}
