//! Special forms. Each handler receives the unevaluated argument list (the
//! cdr of the form) and decides itself what to evaluate and where.

use std::collections::HashMap;

use crate::env;
use crate::error::SchemeResult;
use crate::eval::Machine;
use crate::symbol::sym;
use crate::value::{EnvRef, SymbolId, Value, ValueRef};

pub type FormHandler = fn(&mut Machine, EnvRef, ValueRef) -> SchemeResult<ValueRef>;

/// The dispatch table, built once per machine.
pub fn table() -> HashMap<SymbolId, FormHandler> {
    let entries: [(SymbolId, FormHandler); 10] = [
        (sym::BEGIN, form_begin),
        (sym::LET, form_let),
        (sym::IF, form_if),
        (sym::AND, form_and),
        (sym::OR, form_or),
        (sym::COND, form_cond),
        (sym::DEFINE, form_define),
        (sym::LAMBDA, form_lambda),
        (sym::QUOTE, form_quote),
        (sym::SET_BANG, form_set),
    ];
    entries.into_iter().collect()
}

fn form_begin(m: &mut Machine, env: EnvRef, args: ValueRef) -> SchemeResult<ValueRef> {
    if !m.heap.is_pair(args) {
        return m.heap.make_error("begin requires at least one expression");
    }
    m.eval_sequence(env, args)
}

/// `(let ((name expr) ...) body...)`. Values are evaluated in the outer
/// environment and bound in one fresh child environment.
fn form_let(m: &mut Machine, env: EnvRef, args: ValueRef) -> SchemeResult<ValueRef> {
    let (bindings, body) = match m.heap.as_pair(args) {
        Some(parts) => parts,
        None => return m.heap.make_error("let requires a binding list and a body"),
    };
    if !m.heap.is_pair(body) {
        return m.heap.make_error("let body must contain at least one expression");
    }
    let count = match m.heap.list_length(bindings) {
        Some(n) => n,
        None => return m.heap.make_error("let bindings must be a list"),
    };

    // Collect names first so malformed bindings fail before anything runs.
    let mut names = Vec::with_capacity(count);
    let mut exprs = Vec::with_capacity(count);
    let mut rest = bindings;
    while let Some((binding, next)) = m.heap.as_pair(rest) {
        let (name, tail) = match m.heap.as_pair(binding) {
            Some(parts) => parts,
            None => return m.heap.make_error("each let binding must be a (name value) list"),
        };
        let name = match m.heap.as_atom(name) {
            Some(id) => id,
            None => return m.heap.make_error("binding names must be atoms"),
        };
        match m.heap.as_pair(tail) {
            Some((expr, end)) if m.heap.is_nil(end) => exprs.push(expr),
            _ => return m.heap.make_error("each let binding must be a (name value) list"),
        }
        names.push(name);
        rest = next;
    }

    let mut builder = m.heap.list_builder()?;
    let values_slot = m.stack.root_value(builder.head);
    for expr in exprs {
        let v = m.evaluate(env, expr)?;
        if m.heap.is_error(v) {
            return Ok(v);
        }
        m.heap.list_append(&mut builder, v)?;
        m.stack.set_value(values_slot, builder.head);
    }

    let child = env::make_environment(&mut m.heap, Some(env))?;
    let env_slot = m.stack.register();
    m.stack.set_env(env_slot, child);

    let mut values = builder.head;
    for name in names {
        let Some((v, next)) = m.heap.as_pair(values) else {
            return m.heap.make_error("not enough values to complete bindings!");
        };
        env::create_binding(&mut m.heap, child, name, v);
        values = next;
    }
    if !m.heap.is_nil(values) {
        return m.heap.make_error("too many values for the specified bindings!");
    }

    m.eval_sequence(child, body)
}

fn form_if(m: &mut Machine, env: EnvRef, args: ValueRef) -> SchemeResult<ValueRef> {
    let parts = match m.heap.list_to_vec(args) {
        Some(parts) if parts.len() == 3 => parts,
        _ => return m.heap.make_error("if requires a test, a then branch and an else branch"),
    };

    let test = m.evaluate(env, parts[0])?;
    if m.heap.is_error(test) {
        return Ok(test);
    }
    if m.heap.is_false(test) {
        m.evaluate(env, parts[2])
    } else {
        m.evaluate(env, parts[1])
    }
}

fn form_and(m: &mut Machine, env: EnvRef, args: ValueRef) -> SchemeResult<ValueRef> {
    if m.heap.is_nil(args) {
        return m.heap.make_true();
    }
    let mut result = args;
    let mut rest = args;
    while let Some((expr, next)) = m.heap.as_pair(rest) {
        result = m.evaluate(env, expr)?;
        if m.heap.is_error(result) || m.heap.is_false(result) {
            return Ok(result);
        }
        rest = next;
    }
    Ok(result)
}

fn form_or(m: &mut Machine, env: EnvRef, args: ValueRef) -> SchemeResult<ValueRef> {
    if m.heap.is_nil(args) {
        return m.heap.make_false();
    }
    let mut result = args;
    let mut rest = args;
    while let Some((expr, next)) = m.heap.as_pair(rest) {
        result = m.evaluate(env, expr)?;
        if m.heap.is_error(result) || m.heap.is_true(result) {
            return Ok(result);
        }
        rest = next;
    }
    Ok(result)
}

/// A clause whose body is empty yields its test value.
fn form_cond(m: &mut Machine, env: EnvRef, args: ValueRef) -> SchemeResult<ValueRef> {
    let mut rest = args;
    while let Some((clause, next)) = m.heap.as_pair(rest) {
        let (test, body) = match m.heap.as_pair(clause) {
            Some(parts) => parts,
            None => return m.heap.make_error("cond clauses must be list expressions"),
        };

        if m.heap.as_atom(test) == Some(sym::ELSE) {
            if !m.heap.is_nil(next) {
                return m.heap.make_error("else clause must be last clause in cond");
            }
            return m.eval_sequence(env, body);
        }

        let t = m.evaluate(env, test)?;
        if m.heap.is_error(t) {
            return Ok(t);
        }
        if m.heap.is_true(t) {
            if m.heap.is_nil(body) {
                return Ok(t);
            }
            return m.eval_sequence(env, body);
        }
        rest = next;
    }
    m.heap.make_error("cond expression contains no matching branches!")
}

/// `(define name expr)` or `(define (name . args) body...)`. Returns the
/// defined name.
fn form_define(m: &mut Machine, env: EnvRef, args: ValueRef) -> SchemeResult<ValueRef> {
    let (target, rest) = match m.heap.as_pair(args) {
        Some(parts) => parts,
        None => return m.heap.make_error("define requires a name and a value"),
    };

    match *m.heap.get(target) {
        Value::Atom(name) => {
            let expr = match m.heap.as_pair(rest) {
                Some((expr, end)) if m.heap.is_nil(end) => expr,
                _ => return m.heap.make_error("define requires exactly one value expression"),
            };
            let v = m.evaluate(env, expr)?;
            if m.heap.is_error(v) {
                return Ok(v);
            }
            env::create_binding(&mut m.heap, env, name, v);
            Ok(target)
        }
        Value::Pair(head, arg_spec) => {
            let name = match m.heap.as_atom(head) {
                Some(id) => id,
                None => return m.heap.make_error("function name in sugared define must be an atom"),
            };
            let closure = m.heap.make_lambda(env, arg_spec, rest)?;
            if m.heap.is_error(closure) {
                return Ok(closure);
            }
            env::create_binding(&mut m.heap, env, name, closure);
            Ok(head)
        }
        _ => m.heap.make_error("first argument to define must be an atom"),
    }
}

fn form_lambda(m: &mut Machine, env: EnvRef, args: ValueRef) -> SchemeResult<ValueRef> {
    match m.heap.as_pair(args) {
        Some((arg_spec, body)) => m.heap.make_lambda(env, arg_spec, body),
        None => m.heap.make_error("lambda requires an argument list and a body"),
    }
}

fn form_quote(m: &mut Machine, _env: EnvRef, args: ValueRef) -> SchemeResult<ValueRef> {
    match m.heap.as_pair(args) {
        Some((datum, end)) if m.heap.is_nil(end) => Ok(datum),
        _ => m.heap.make_error("quote requires only a single argument"),
    }
}

fn form_set(m: &mut Machine, env: EnvRef, args: ValueRef) -> SchemeResult<ValueRef> {
    let parts = match m.heap.list_to_vec(args) {
        Some(parts) if parts.len() == 2 => parts,
        _ => return m.heap.make_error("set! requires exactly two arguments"),
    };
    let name = match m.heap.as_atom(parts[0]) {
        Some(id) => id,
        None => return m.heap.make_error("first argument to set! must be a name"),
    };

    let v = m.evaluate(env, parts[1])?;
    if m.heap.is_error(v) {
        return Ok(v);
    }
    if !env::update_binding(&mut m.heap, env, name, v) {
        return m.heap.make_error("no existing binding to update!");
    }
    Ok(v)
}
