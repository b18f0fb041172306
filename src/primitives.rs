use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SchemeResult;
use crate::eval::Machine;
use crate::heap::Heap;
use crate::value::{Closure, NativeFn, Value, ValueRef};

/// Every native closure bound in the global environment at startup.
const NATIVES: &[(&str, NativeFn)] = &[
    ("=", native_num_eq),
    ("<", native_less),
    (">", native_greater),
    ("<=", native_less_equal),
    (">=", native_greater_equal),
    ("eq?", native_eq),
    ("equal?", native_equal),
    ("boolean?", native_is_boolean),
    ("number?", native_is_number),
    ("pair?", native_is_pair),
    ("procedure?", native_is_procedure),
    ("string?", native_is_string),
    ("symbol?", native_is_symbol),
    ("+", native_add),
    ("-", native_sub),
    ("*", native_mul),
    ("/", native_div),
    ("cons", native_cons),
    ("car", native_car),
    ("cdr", native_cdr),
    ("list", native_list),
    ("length", native_length),
    ("set-car!", native_set_car),
    ("set-cdr!", native_set_cdr),
    ("display", native_display),
    ("error", native_error),
    ("srandom", native_srandom),
    ("random", native_random),
    ("time", native_time),
    ("sqrt", native_sqrt),
    ("eval-file", native_eval_file),
    ("gc", native_gc),
    ("heap-size", native_heap_size),
];

/// Bind every native in the global environment.
pub fn install(m: &mut Machine) -> SchemeResult<()> {
    for &(name, func) in NATIVES {
        let closure = m.heap.make_native(m.global, name, func)?;
        m.define_global(name, closure);
    }
    Ok(())
}

/// The argument list as a Vec. The evaluator always passes a proper list.
fn arg_vec(m: &Machine, args: ValueRef) -> Vec<ValueRef> {
    m.heap.list_to_vec(args).unwrap_or_default()
}

// ============================================================================
// Comparison
// ============================================================================

/// Apply `compare` to successive argument pairs, stopping at the first
/// pair out of order.
fn compare_chain(m: &mut Machine, args: ValueRef, compare: fn(f32, f32) -> bool) -> SchemeResult<ValueRef> {
    let items = arg_vec(m, args);
    if items.len() < 2 {
        return m.heap.make_error("comparison requires at least two arguments");
    }
    let mut prev = match m.heap.as_float(items[0]) {
        Some(x) => x,
        None => return m.heap.make_error("comparison requires numeric values"),
    };
    for &item in &items[1..] {
        let next = match m.heap.as_float(item) {
            Some(x) => x,
            None => return m.heap.make_error("comparison requires numeric values"),
        };
        if !compare(prev, next) {
            return m.heap.make_false();
        }
        prev = next;
    }
    m.heap.make_true()
}

fn native_num_eq(m: &mut Machine, _n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    compare_chain(m, args, |a, b| a == b)
}

fn native_less(m: &mut Machine, _n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    compare_chain(m, args, |a, b| a < b)
}

fn native_greater(m: &mut Machine, _n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    compare_chain(m, args, |a, b| a > b)
}

fn native_less_equal(m: &mut Machine, _n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    compare_chain(m, args, |a, b| a <= b)
}

fn native_greater_equal(m: &mut Machine, _n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    compare_chain(m, args, |a, b| a >= b)
}

// ============================================================================
// Equality
// ============================================================================

/// Identity for pairs and closures, value equality for everything else.
pub fn values_eq(heap: &Heap, a: ValueRef, b: ValueRef) -> bool {
    match (heap.get(a), heap.get(b)) {
        (Value::Nil, Value::Nil) => true,
        (Value::Atom(x), Value::Atom(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Pair(..), Value::Pair(..)) | (Value::Closure(_), Value::Closure(_)) => a == b,
        _ => false,
    }
}

/// Structural equality. Pairs compare element-wise; interpreted closures
/// compare equal when they share a captured environment and have equal
/// argument specs and bodies; natives compare by function.
pub fn values_equal(heap: &Heap, a: ValueRef, b: ValueRef) -> bool {
    let mut assumed = HashSet::new();
    equal_inner(heap, a, b, &mut assumed)
}

/// `assumed` holds pairs of cells already under comparison; meeting one again
/// means both sides cycle together, which counts as equal.
fn equal_inner(heap: &Heap, a: ValueRef, b: ValueRef, assumed: &mut HashSet<(ValueRef, ValueRef)>) -> bool {
    if a == b {
        return true;
    }
    match (heap.get(a), heap.get(b)) {
        (Value::Pair(a_car, a_cdr), Value::Pair(b_car, b_cdr)) => {
            if !assumed.insert((a, b)) {
                return true;
            }
            let (a_car, a_cdr, b_car, b_cdr) = (*a_car, *a_cdr, *b_car, *b_cdr);
            equal_inner(heap, a_car, b_car, assumed) && equal_inner(heap, a_cdr, b_cdr, assumed)
        }
        (Value::Closure(x), Value::Closure(y)) => match (heap.closure(*x), heap.closure(*y)) {
            (Closure::Native { func: f, .. }, Closure::Native { func: g, .. }) => {
                *f as usize == *g as usize
            }
            (
                Closure::Interpreted {
                    arg_spec: a_spec,
                    body: a_body,
                    env: a_env,
                },
                Closure::Interpreted {
                    arg_spec: b_spec,
                    body: b_body,
                    env: b_env,
                },
            ) => {
                let (a_spec, a_body, b_spec, b_body) = (*a_spec, *a_body, *b_spec, *b_body);
                a_env == b_env
                    && equal_inner(heap, a_spec, b_spec, assumed)
                    && equal_inner(heap, a_body, b_body, assumed)
            }
            _ => false,
        },
        _ => values_eq(heap, a, b),
    }
}

fn native_eq(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 2 {
        return m.heap.make_error("eq? requires exactly two arguments");
    }
    let items = arg_vec(m, args);
    let result = values_eq(&m.heap, items[0], items[1]);
    m.heap.make_bool(result)
}

fn native_equal(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 2 {
        return m.heap.make_error("equal? requires exactly two arguments");
    }
    let items = arg_vec(m, args);
    let result = values_equal(&m.heap, items[0], items[1]);
    m.heap.make_bool(result)
}

// ============================================================================
// Type predicates
// ============================================================================

fn type_predicate(
    m: &mut Machine,
    name: &str,
    n: usize,
    args: ValueRef,
    predicate: fn(&Heap, ValueRef) -> bool,
) -> SchemeResult<ValueRef> {
    if n != 1 {
        return m.heap.make_error(format!("{} takes exactly one argument", name));
    }
    let arg = m.heap.car(args);
    let result = arg.map_or(false, |v| predicate(&m.heap, v));
    m.heap.make_bool(result)
}

fn native_is_boolean(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    type_predicate(m, "boolean?", n, args, Heap::is_bool)
}

fn native_is_number(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    type_predicate(m, "number?", n, args, Heap::is_float)
}

fn native_is_pair(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    type_predicate(m, "pair?", n, args, Heap::is_pair)
}

fn native_is_procedure(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    type_predicate(m, "procedure?", n, args, Heap::is_closure)
}

fn native_is_string(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    type_predicate(m, "string?", n, args, Heap::is_string)
}

fn native_is_symbol(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    type_predicate(m, "symbol?", n, args, Heap::is_atom)
}

// ============================================================================
// Arithmetic
// ============================================================================

/// Collect numeric arguments, or the error value naming `op`.
fn float_args(m: &mut Machine, args: ValueRef, op: &str) -> SchemeResult<Result<Vec<f32>, ValueRef>> {
    let mut nums = Vec::new();
    for item in arg_vec(m, args) {
        match m.heap.as_float(item) {
            Some(x) => nums.push(x),
            None => {
                let err = m.heap.make_error(format!("invalid argument to {}", op))?;
                return Ok(Err(err));
            }
        }
    }
    Ok(Ok(nums))
}

fn native_add(m: &mut Machine, _n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    match float_args(m, args, "+")? {
        Ok(nums) => m.heap.make_float(nums.iter().sum()),
        Err(err) => Ok(err),
    }
}

fn native_mul(m: &mut Machine, _n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    match float_args(m, args, "*")? {
        Ok(nums) => m.heap.make_float(nums.iter().product()),
        Err(err) => Ok(err),
    }
}

fn native_sub(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n == 0 {
        return m.heap.make_error("- requires at least one argument");
    }
    let nums = match float_args(m, args, "-")? {
        Ok(nums) => nums,
        Err(err) => return Ok(err),
    };
    let result = match nums.split_first() {
        Some((&only, [])) => -only,
        Some((&first, rest)) => rest.iter().fold(first, |acc, x| acc - x),
        None => 0.0,
    };
    m.heap.make_float(result)
}

fn native_div(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n == 0 {
        return m.heap.make_error("/ requires at least one argument");
    }
    let nums = match float_args(m, args, "/")? {
        Ok(nums) => nums,
        Err(err) => return Ok(err),
    };
    let (first, rest) = match nums.split_first() {
        Some(parts) => parts,
        None => return m.heap.make_error("/ requires at least one argument"),
    };
    if rest.is_empty() {
        if *first == 0.0 {
            return m.heap.make_error("divide by zero");
        }
        return m.heap.make_float(1.0 / first);
    }
    let mut result = *first;
    for &divisor in rest {
        if divisor == 0.0 {
            return m.heap.make_error("divide by zero");
        }
        result /= divisor;
    }
    m.heap.make_float(result)
}

fn native_sqrt(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 1 {
        return m.heap.make_error("sqrt takes one argument");
    }
    match m.heap.car(args).and_then(|v| m.heap.as_float(v)) {
        Some(x) => m.heap.make_float(x.sqrt()),
        None => m.heap.make_error("invalid argument to sqrt"),
    }
}

// ============================================================================
// Pairs and lists
// ============================================================================

fn native_cons(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 2 {
        return m.heap.make_error("cons takes exactly two arguments");
    }
    let items = arg_vec(m, args);
    m.heap.make_cons(items[0], items[1])
}

fn native_car(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 1 {
        return m.heap.make_error("car takes exactly one argument");
    }
    match m.heap.car(args).and_then(|v| m.heap.car(v)) {
        Some(v) => Ok(v),
        None => m.heap.make_error("argument to car must be a cons pair"),
    }
}

fn native_cdr(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 1 {
        return m.heap.make_error("cdr takes exactly one argument");
    }
    match m.heap.car(args).and_then(|v| m.heap.cdr(v)) {
        Some(v) => Ok(v),
        None => m.heap.make_error("argument to cdr must be a cons pair"),
    }
}

/// The argument list is freshly built for each call, so it is the result.
fn native_list(_m: &mut Machine, _n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    Ok(args)
}

fn native_length(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 1 {
        return m.heap.make_error("length requires exactly one argument");
    }
    match m.heap.car(args).and_then(|v| m.heap.list_length(v)) {
        Some(len) => m.heap.make_float(len as f32),
        None => m.heap.make_error("argument to length must be a proper list"),
    }
}

fn native_set_car(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 2 {
        return m.heap.make_error("set-car! requires exactly two arguments");
    }
    let items = arg_vec(m, args);
    if !m.heap.set_car(items[0], items[1]) {
        return m.heap.make_error("first argument to set-car! must be a cons pair");
    }
    Ok(items[1])
}

fn native_set_cdr(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 2 {
        return m.heap.make_error("set-cdr! requires exactly two arguments");
    }
    let items = arg_vec(m, args);
    if !m.heap.set_cdr(items[0], items[1]) {
        return m.heap.make_error("first argument to set-cdr! must be a cons pair");
    }
    Ok(items[1])
}

// ============================================================================
// I/O, errors, randomness, time
// ============================================================================

/// Write every argument in display style, then a newline.
fn native_display(m: &mut Machine, _n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    let mut text = String::new();
    for item in arg_vec(m, args) {
        text.push_str(&m.render_display(item));
    }
    text.push('\n');
    let written = m.output.write_all(text.as_bytes()).and_then(|()| m.output.flush());
    match written {
        Ok(()) => m.heap.make_nil(),
        Err(e) => m.heap.make_error(format!("display could not write output: {}", e)),
    }
}

fn native_error(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 1 {
        return m.heap.make_error("error currently only supports one argument");
    }
    let msg = match m.heap.car(args).and_then(|v| m.heap.as_str(v)) {
        Some(s) => s.to_string(),
        None => return m.heap.make_error("argument to error must be a string"),
    };
    m.heap.make_error(msg)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Reseed from the argument, or from the clock. Returns the seed used.
fn native_srandom(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    let seed = match n {
        0 => now_secs() as u32,
        1 => match m.heap.car(args).and_then(|v| m.heap.as_float(v)) {
            Some(x) => x as u32,
            None => return m.heap.make_error("invalid argument to srandom"),
        },
        _ => return m.heap.make_error("srandom takes zero or one arguments"),
    };
    m.rng = StdRng::seed_from_u64(seed as u64);
    m.heap.make_float(seed as f32)
}

/// A non-negative integer below 2^31, or below the argument when given.
fn native_random(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    let bound = match n {
        0 => 1u32 << 31,
        1 => match m.heap.car(args).and_then(|v| m.heap.as_float(v)) {
            Some(x) if x >= 1.0 => x as u32,
            Some(_) => return m.heap.make_error("argument to random must be at least 1"),
            None => return m.heap.make_error("argument to random must be a number"),
        },
        _ => return m.heap.make_error("random takes zero or one arguments"),
    };
    let value = m.rng.gen_range(0..bound);
    m.heap.make_float(value as f32)
}

fn native_time(m: &mut Machine, n: usize, _args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 0 {
        return m.heap.make_error("time takes zero arguments");
    }
    m.heap.make_float(now_secs() as f32)
}

/// Evaluate every expression of a file in the global environment. Returns
/// #t, or the first error value produced.
fn native_eval_file(m: &mut Machine, n: usize, args: ValueRef) -> SchemeResult<ValueRef> {
    let path = match m.heap.car(args).and_then(|v| m.heap.as_str(v)) {
        Some(p) if n == 1 => p.to_string(),
        _ => return m.heap.make_error("eval-file takes exactly one string argument"),
    };

    let src = match fs::read_to_string(&path) {
        Ok(src) => src,
        Err(e) => return m.heap.make_error(format!("eval-file could not read \"{}\": {}", path, e)),
    };
    log::debug!("eval-file {} ({} bytes)", path, src.len());

    match m.eval_nested(&src) {
        Ok(v) if m.heap.is_error(v) => Ok(v),
        Ok(_) => m.heap.make_true(),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => m.heap.make_error(format!("eval-file \"{}\": {}", path, e)),
    }
}

// ============================================================================
// Collector introspection
// ============================================================================

/// Force a collection. Returns the number of values freed.
fn native_gc(m: &mut Machine, n: usize, _args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 0 {
        return m.heap.make_error("gc takes zero arguments");
    }
    let report = m.collect();
    m.heap.make_float(report.freed.values as f32)
}

/// Number of live values.
fn native_heap_size(m: &mut Machine, n: usize, _args: ValueRef) -> SchemeResult<ValueRef> {
    if n != 0 {
        return m.heap.make_error("heap-size takes zero arguments");
    }
    let live = m.heap.stats().values;
    m.heap.make_float(live as f32)
}
