use std::fmt;

use crate::error::SchemeResult;
use crate::eval::Machine;

/// Unique identifier for an interned symbol.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Handle to a Value in the value registry. This is the GC handle for data.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef(pub u32);

/// Handle to a Closure in the closure registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureRef(pub u32);

/// Handle to an Environment in the environment registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvRef(pub u32);

/// Signature of a built-in procedure: the machine, the argument count, and
/// the evaluated operands as a proper list. Scheme-level failures come back
/// as `Value::Error`; `Err` is reserved for fatal host errors.
pub type NativeFn = fn(&mut Machine, usize, ValueRef) -> SchemeResult<ValueRef>;

/// Every runtime datum. Pairs are the only mutable variant.
#[derive(Clone, PartialEq)]
pub enum Value {
    Nil,
    Atom(SymbolId),
    Boolean(bool),
    Str(String),
    Float(f32),
    Closure(ClosureRef),
    Pair(ValueRef, ValueRef),
    Error(String),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Value::Pair(..))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Only `#f` is false. Nil and 0 are both true.
    pub fn is_false(&self) -> bool {
        matches!(self, Value::Boolean(false))
    }
}

/// A callable. Exactly one `Value::Closure` refers to any given Closure.
#[derive(Clone)]
pub enum Closure {
    Native {
        name: &'static str,
        func: NativeFn,
        env: EnvRef,
    },
    Interpreted {
        /// An atom, a proper list of atoms, or a dotted list of atoms.
        arg_spec: ValueRef,
        /// Non-empty proper list of body expressions.
        body: ValueRef,
        env: EnvRef,
    },
}

impl Closure {
    pub fn env(&self) -> EnvRef {
        match self {
            Closure::Native { env, .. } | Closure::Interpreted { env, .. } => *env,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Binding {
    pub name: SymbolId,
    pub value: ValueRef,
}

/// One scope. `parent` is None only for the global environment.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    pub bindings: Vec<Binding>,
    pub parent: Option<EnvRef>,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Atom(id) => write!(f, "Atom({})", id.0),
            Value::Boolean(b) => write!(f, "Boolean({})", b),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Closure(id) => write!(f, "Closure({})", id.0),
            Value::Pair(a, d) => write!(f, "Pair({}, {})", a.0, d.0),
            Value::Error(msg) => write!(f, "Error({:?})", msg),
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Closure::Native { name, env, .. } => write!(f, "Native({}, env {})", name, env.0),
            Closure::Interpreted { arg_spec, body, env } => write!(
                f,
                "Interpreted(args {}, body {}, env {})",
                arg_spec.0, body.0, env.0
            ),
        }
    }
}

impl fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolId({})", self.0)
    }
}

impl fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueRef({})", self.0)
    }
}

impl fmt::Debug for ClosureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClosureRef({})", self.0)
    }
}

impl fmt::Debug for EnvRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvRef({})", self.0)
    }
}
