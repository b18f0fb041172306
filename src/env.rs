use crate::error::SchemeResult;
use crate::heap::Heap;
use crate::value::{Binding, EnvRef, Environment, SymbolId, Value, ValueRef};

/// Why positional binding failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindError {
    TooFewValues,
    TooManyValues,
    NameNotAtom,
}

/// Allocate an empty environment. Only the global environment has no parent.
pub fn make_environment(heap: &mut Heap, parent: Option<EnvRef>) -> SchemeResult<EnvRef> {
    heap.alloc_environment(Environment {
        bindings: Vec::new(),
        parent,
    })
}

/// Bind `name` in `env` itself. An existing binding of the same name in
/// this environment is overwritten in place; otherwise a new one is appended.
pub fn create_binding(heap: &mut Heap, env: EnvRef, name: SymbolId, value: ValueRef) {
    let frame = heap.env_mut(env);
    match frame.bindings.iter_mut().find(|b| b.name == name) {
        Some(binding) => binding.value = value,
        None => frame.bindings.push(Binding { name, value }),
    }
}

/// Update the nearest existing binding of `name`, searching outward through
/// parents. Returns false, without creating anything, if no binding exists.
pub fn update_binding(heap: &mut Heap, env: EnvRef, name: SymbolId, value: ValueRef) -> bool {
    let mut current = Some(env);
    while let Some(e) = current {
        let frame = heap.env_mut(e);
        if let Some(binding) = frame.bindings.iter_mut().find(|b| b.name == name) {
            binding.value = value;
            return true;
        }
        current = frame.parent;
    }
    false
}

/// Look `name` up through the parent chain.
pub fn resolve_binding(heap: &Heap, env: EnvRef, name: SymbolId) -> Option<ValueRef> {
    let mut current = Some(env);
    while let Some(e) = current {
        let frame = heap.env(e);
        if let Some(binding) = frame.bindings.iter().find(|b| b.name == name) {
            return Some(binding.value);
        }
        current = frame.parent;
    }
    None
}

/// Bind a name pattern against a list of values in `env`.
///
/// `names` is an atom (binds the whole value list), a proper list of atoms
/// (positional, exact arity), or a dotted list of atoms (positional prefix,
/// remaining values bound to the trailing atom). Nothing is allocated, so
/// the collector cannot run while this executes.
pub fn bind_names_values(
    heap: &mut Heap,
    env: EnvRef,
    names: ValueRef,
    values: ValueRef,
) -> Result<(), BindError> {
    let mut names = names;
    let mut values = values;
    loop {
        match *heap.get(names) {
            Value::Nil => {
                return if heap.is_pair(values) {
                    Err(BindError::TooManyValues)
                } else {
                    Ok(())
                };
            }
            Value::Atom(rest) => {
                create_binding(heap, env, rest, values);
                return Ok(());
            }
            Value::Pair(name, next_names) => {
                let name = heap.as_atom(name).ok_or(BindError::NameNotAtom)?;
                let (value, next_values) = heap.as_pair(values).ok_or(BindError::TooFewValues)?;
                create_binding(heap, env, name, value);
                names = next_names;
                values = next_values;
            }
            _ => return Err(BindError::NameNotAtom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: SymbolId = SymbolId(100);
    const Y: SymbolId = SymbolId(101);
    const REST: SymbolId = SymbolId(102);

    fn setup() -> (Heap, EnvRef) {
        let mut heap = Heap::new(1 << 12);
        let global = make_environment(&mut heap, None).unwrap();
        (heap, global)
    }

    #[test]
    fn redefinition_updates_in_place() {
        let (mut heap, global) = setup();
        let one = heap.make_float(1.0).unwrap();
        let two = heap.make_float(2.0).unwrap();
        create_binding(&mut heap, global, X, one);
        create_binding(&mut heap, global, X, two);
        assert_eq!(heap.env(global).bindings.len(), 1);
        assert_eq!(resolve_binding(&heap, global, X), Some(two));
    }

    #[test]
    fn lookup_walks_parents_and_shadowing_wins() {
        let (mut heap, global) = setup();
        let child = make_environment(&mut heap, Some(global)).unwrap();
        let outer = heap.make_float(1.0).unwrap();
        let inner = heap.make_float(2.0).unwrap();
        create_binding(&mut heap, global, X, outer);
        assert_eq!(resolve_binding(&heap, child, X), Some(outer));
        create_binding(&mut heap, child, X, inner);
        assert_eq!(resolve_binding(&heap, child, X), Some(inner));
        assert_eq!(resolve_binding(&heap, global, X), Some(outer));
        assert_eq!(resolve_binding(&heap, child, Y), None);
    }

    #[test]
    fn update_never_creates() {
        let (mut heap, global) = setup();
        let child = make_environment(&mut heap, Some(global)).unwrap();
        let v = heap.make_float(1.0).unwrap();
        assert!(!update_binding(&mut heap, child, X, v));
        assert!(heap.env(global).bindings.is_empty());

        let w = heap.make_float(2.0).unwrap();
        create_binding(&mut heap, global, X, v);
        assert!(update_binding(&mut heap, child, X, w));
        assert!(heap.env(child).bindings.is_empty());
        assert_eq!(resolve_binding(&heap, global, X), Some(w));
    }

    #[test]
    fn positional_variadic_and_dotted_binding() {
        let (mut heap, global) = setup();
        let a = heap.make_float(1.0).unwrap();
        let b = heap.make_float(2.0).unwrap();
        let c = heap.make_float(3.0).unwrap();
        let values = heap.list(&[a, b, c]).unwrap();

        let x = heap.make_atom(X).unwrap();
        let y = heap.make_atom(Y).unwrap();
        let rest = heap.make_atom(REST).unwrap();

        let whole = make_environment(&mut heap, Some(global)).unwrap();
        assert_eq!(bind_names_values(&mut heap, whole, rest, values), Ok(()));
        assert_eq!(resolve_binding(&heap, whole, REST), Some(values));

        let dotted_names = heap.make_cons(y, rest).unwrap();
        let dotted_names = heap.make_cons(x, dotted_names).unwrap();
        let dotted = make_environment(&mut heap, Some(global)).unwrap();
        assert_eq!(bind_names_values(&mut heap, dotted, dotted_names, values), Ok(()));
        assert_eq!(resolve_binding(&heap, dotted, X), Some(a));
        assert_eq!(resolve_binding(&heap, dotted, Y), Some(b));
        let tail = resolve_binding(&heap, dotted, REST).unwrap();
        assert_eq!(heap.list_to_vec(tail), Some(vec![c]));
    }

    #[test]
    fn arity_mismatches_are_reported() {
        let (mut heap, global) = setup();
        let a = heap.make_float(1.0).unwrap();
        let x = heap.make_atom(X).unwrap();
        let y = heap.make_atom(Y).unwrap();
        let two_names = heap.list(&[x, y]).unwrap();
        let one_value = heap.list(&[a]).unwrap();
        let three_values = heap.list(&[a, a, a]).unwrap();

        let env = make_environment(&mut heap, Some(global)).unwrap();
        assert_eq!(
            bind_names_values(&mut heap, env, two_names, one_value),
            Err(BindError::TooFewValues)
        );
        assert_eq!(
            bind_names_values(&mut heap, env, two_names, three_values),
            Err(BindError::TooManyValues)
        );

        let bad = heap.list(&[a]).unwrap();
        assert_eq!(
            bind_names_values(&mut heap, env, bad, one_value),
            Err(BindError::NameNotAtom)
        );
    }
}
