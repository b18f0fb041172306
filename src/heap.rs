use std::fmt;
use std::mem;

use crate::error::{SchemeError, SchemeResult};
use crate::value::{Closure, ClosureRef, EnvRef, Environment, NativeFn, SymbolId, Value, ValueRef};

/// A registered object plus its collector mark.
struct Slot<T> {
    obj: T,
    mark: bool,
}

/// Append-only list of every live object of one kind.
///
/// Handles index `slots`, which never move, so a handle stays valid for as
/// long as its object survives. `live` records the handles in creation order
/// and is what the sweep walks and compacts. Freed slots go on a free list
/// and are reused by later allocations.
pub struct Registry<T> {
    kind: &'static str,
    slots: Vec<Option<Slot<T>>>,
    free_list: Vec<u32>,
    live: Vec<u32>,
    capacity: usize,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str, capacity: usize) -> Self {
        Registry {
            kind,
            slots: Vec::with_capacity(1024),
            free_list: Vec::new(),
            live: Vec::with_capacity(1024),
            capacity,
        }
    }

    /// Register a new object with a clear mark.
    /// Returns Err(HeapExhausted) if capacity is exceeded.
    pub fn alloc(&mut self, obj: T) -> SchemeResult<u32> {
        if self.live.len() >= self.capacity {
            return Err(SchemeError::HeapExhausted {
                kind: self.kind,
                capacity: self.capacity,
            });
        }

        let slot = Slot { obj, mark: false };
        let idx = match self.free_list.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as u32
            }
        };
        self.live.push(idx);
        Ok(idx)
    }

    fn slot(&self, idx: u32) -> &Slot<T> {
        match self.slots.get(idx as usize) {
            Some(Some(slot)) => slot,
            _ => panic!("use of freed {} #{}", self.kind, idx),
        }
    }

    fn slot_mut(&mut self, idx: u32) -> &mut Slot<T> {
        let kind = self.kind;
        match self.slots.get_mut(idx as usize) {
            Some(Some(slot)) => slot,
            _ => panic!("use of freed {} #{}", kind, idx),
        }
    }

    #[inline]
    pub fn get(&self, idx: u32) -> &T {
        &self.slot(idx).obj
    }

    #[inline]
    pub fn get_mut(&mut self, idx: u32) -> &mut T {
        &mut self.slot_mut(idx).obj
    }

    /// Set the mark. Returns true if the object was not already marked.
    pub fn mark(&mut self, idx: u32) -> bool {
        let slot = self.slot_mut(idx);
        if slot.mark {
            false
        } else {
            slot.mark = true;
            true
        }
    }

    pub fn is_marked(&self, idx: u32) -> bool {
        self.slot(idx).mark
    }

    /// Returns true if `idx` currently names a live object.
    pub fn contains(&self, idx: u32) -> bool {
        matches!(self.slots.get(idx as usize), Some(Some(_)))
    }

    /// Free every unmarked object, clear the mark on the survivors, then
    /// compact the live list. Returns the number of objects freed.
    pub fn sweep(&mut self) -> usize {
        let Registry {
            slots,
            free_list,
            live,
            ..
        } = self;

        let before = live.len();
        for &idx in live.iter() {
            match &mut slots[idx as usize] {
                Some(slot) if slot.mark => {
                    slot.mark = false;
                    continue;
                }
                _ => {}
            }
            // Dropping the slot releases owned payloads (strings, binding vectors).
            slots[idx as usize] = None;
            free_list.push(idx);
        }
        live.retain(|&idx| slots[idx as usize].is_some());
        before - live.len()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Number of marked objects (meaningful only between mark and sweep).
    pub fn marked_count(&self) -> usize {
        self.live.iter().filter(|&&idx| self.slot(idx).mark).count()
    }

    /// Live handles in creation order.
    pub fn handles(&self) -> impl Iterator<Item = u32> + '_ {
        self.live.iter().copied()
    }
}

/// Something the collector can trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Traced {
    Value(ValueRef),
    Closure(ClosureRef),
    Env(EnvRef),
}

/// Live object counts per registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub values: usize,
    pub closures: usize,
    pub environments: usize,
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} vals \t{} lambdas \t{} envs",
            self.values, self.closures, self.environments
        )
    }
}

/// Objects freed by one sweep, per registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepCounts {
    pub values: usize,
    pub closures: usize,
    pub environments: usize,
}

impl SweepCounts {
    pub fn total(&self) -> usize {
        self.values + self.closures + self.environments
    }
}

/// Incremental proper-list construction. `head` is Nil until the first
/// append; callers that evaluate between appends must keep `head` rooted.
#[derive(Clone, Copy, Debug)]
pub struct ListBuilder {
    pub head: ValueRef,
    tail: Option<ValueRef>,
}

/// The three object registries. All values, closures and environments are
/// allocated here, and only the sweep ever frees them.
pub struct Heap {
    values: Registry<Value>,
    closures: Registry<Closure>,
    envs: Registry<Environment>,
}

impl Heap {
    pub fn new(capacity: usize) -> Self {
        Heap {
            values: Registry::new("value", capacity),
            closures: Registry::new("closure", capacity),
            envs: Registry::new("environment", capacity),
        }
    }

    // === Allocation ===

    pub fn alloc_value(&mut self, value: Value) -> SchemeResult<ValueRef> {
        self.values.alloc(value).map(ValueRef)
    }

    pub fn alloc_closure(&mut self, closure: Closure) -> SchemeResult<ClosureRef> {
        self.closures.alloc(closure).map(ClosureRef)
    }

    pub fn alloc_environment(&mut self, env: Environment) -> SchemeResult<EnvRef> {
        self.envs.alloc(env).map(EnvRef)
    }

    // === Constructors ===

    pub fn make_nil(&mut self) -> SchemeResult<ValueRef> {
        self.alloc_value(Value::Nil)
    }

    pub fn make_atom(&mut self, name: SymbolId) -> SchemeResult<ValueRef> {
        self.alloc_value(Value::Atom(name))
    }

    pub fn make_bool(&mut self, b: bool) -> SchemeResult<ValueRef> {
        self.alloc_value(Value::Boolean(b))
    }

    pub fn make_true(&mut self) -> SchemeResult<ValueRef> {
        self.make_bool(true)
    }

    pub fn make_false(&mut self) -> SchemeResult<ValueRef> {
        self.make_bool(false)
    }

    pub fn make_string(&mut self, s: &str) -> SchemeResult<ValueRef> {
        self.alloc_value(Value::Str(s.to_string()))
    }

    pub fn make_float(&mut self, x: f32) -> SchemeResult<ValueRef> {
        self.alloc_value(Value::Float(x))
    }

    pub fn make_error(&mut self, msg: impl Into<String>) -> SchemeResult<ValueRef> {
        self.alloc_value(Value::Error(msg.into()))
    }

    pub fn make_cons(&mut self, car: ValueRef, cdr: ValueRef) -> SchemeResult<ValueRef> {
        self.alloc_value(Value::Pair(car, cdr))
    }

    /// Build an interpreted closure. The argument spec must be an atom, a
    /// proper list of atoms, or a dotted list of atoms; the body must be a
    /// non-empty list. A malformed spec or body yields an error value.
    pub fn make_lambda(
        &mut self,
        env: EnvRef,
        arg_spec: ValueRef,
        body: ValueRef,
    ) -> SchemeResult<ValueRef> {
        if !self.is_valid_arg_spec(arg_spec) {
            return self.make_error("lambda argument must be an atom, or a list of atoms");
        }
        if !self.is_pair(body) {
            return self.make_error("lambda body must be a list of scheme expressions");
        }

        let closure = self.alloc_closure(Closure::Interpreted {
            arg_spec,
            body,
            env,
        })?;
        self.alloc_value(Value::Closure(closure))
    }

    pub fn make_native(
        &mut self,
        env: EnvRef,
        name: &'static str,
        func: NativeFn,
    ) -> SchemeResult<ValueRef> {
        let closure = self.alloc_closure(Closure::Native { name, func, env })?;
        self.alloc_value(Value::Closure(closure))
    }

    fn is_valid_arg_spec(&self, spec: ValueRef) -> bool {
        let mut current = spec;
        loop {
            match self.get(current) {
                Value::Atom(_) | Value::Nil => return true,
                Value::Pair(car, cdr) => {
                    if !self.is_atom(*car) {
                        return false;
                    }
                    current = *cdr;
                }
                _ => return false,
            }
        }
    }

    // === Access ===

    #[inline]
    pub fn get(&self, v: ValueRef) -> &Value {
        self.values.get(v.0)
    }

    #[inline]
    pub fn closure(&self, c: ClosureRef) -> &Closure {
        self.closures.get(c.0)
    }

    #[inline]
    pub fn env(&self, e: EnvRef) -> &Environment {
        self.envs.get(e.0)
    }

    #[inline]
    pub fn env_mut(&mut self, e: EnvRef) -> &mut Environment {
        self.envs.get_mut(e.0)
    }

    pub fn contains_value(&self, v: ValueRef) -> bool {
        self.values.contains(v.0)
    }

    pub fn contains_env(&self, e: EnvRef) -> bool {
        self.envs.contains(e.0)
    }

    pub fn contains_closure(&self, c: ClosureRef) -> bool {
        self.closures.contains(c.0)
    }

    // === Predicates ===

    pub fn is_nil(&self, v: ValueRef) -> bool {
        self.get(v).is_nil()
    }

    pub fn is_atom(&self, v: ValueRef) -> bool {
        matches!(self.get(v), Value::Atom(_))
    }

    pub fn is_bool(&self, v: ValueRef) -> bool {
        matches!(self.get(v), Value::Boolean(_))
    }

    pub fn is_false(&self, v: ValueRef) -> bool {
        self.get(v).is_false()
    }

    pub fn is_true(&self, v: ValueRef) -> bool {
        !self.is_false(v)
    }

    pub fn is_error(&self, v: ValueRef) -> bool {
        self.get(v).is_error()
    }

    pub fn is_float(&self, v: ValueRef) -> bool {
        matches!(self.get(v), Value::Float(_))
    }

    pub fn is_string(&self, v: ValueRef) -> bool {
        matches!(self.get(v), Value::Str(_))
    }

    pub fn is_pair(&self, v: ValueRef) -> bool {
        self.get(v).is_pair()
    }

    pub fn is_closure(&self, v: ValueRef) -> bool {
        matches!(self.get(v), Value::Closure(_))
    }

    // === Extractors ===

    pub fn as_atom(&self, v: ValueRef) -> Option<SymbolId> {
        match self.get(v) {
            Value::Atom(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_float(&self, v: ValueRef) -> Option<f32> {
        match self.get(v) {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self, v: ValueRef) -> Option<&str> {
        match self.get(v) {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_closure(&self, v: ValueRef) -> Option<ClosureRef> {
        match self.get(v) {
            Value::Closure(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_pair(&self, v: ValueRef) -> Option<(ValueRef, ValueRef)> {
        match self.get(v) {
            Value::Pair(car, cdr) => Some((*car, *cdr)),
            _ => None,
        }
    }

    pub fn error_message(&self, v: ValueRef) -> Option<&str> {
        match self.get(v) {
            Value::Error(msg) => Some(msg),
            _ => None,
        }
    }

    // === Pairs and lists ===

    pub fn car(&self, v: ValueRef) -> Option<ValueRef> {
        self.as_pair(v).map(|(car, _)| car)
    }

    pub fn cdr(&self, v: ValueRef) -> Option<ValueRef> {
        self.as_pair(v).map(|(_, cdr)| cdr)
    }

    /// Replace the car of a pair in place. Returns false if `pair` is not a pair.
    pub fn set_car(&mut self, pair: ValueRef, v: ValueRef) -> bool {
        match self.values.get_mut(pair.0) {
            Value::Pair(car, _) => {
                *car = v;
                true
            }
            _ => false,
        }
    }

    /// Replace the cdr of a pair in place. Returns false if `pair` is not a pair.
    pub fn set_cdr(&mut self, pair: ValueRef, v: ValueRef) -> bool {
        match self.values.get_mut(pair.0) {
            Value::Pair(_, cdr) => {
                *cdr = v;
                true
            }
            _ => false,
        }
    }

    /// Length of a proper list, or None for improper and cyclic lists.
    pub fn list_length(&self, v: ValueRef) -> Option<usize> {
        let mut slow = v;
        let mut fast = v;
        let mut length = 0;
        loop {
            match self.get(fast) {
                Value::Nil => return Some(length),
                Value::Pair(_, cdr) => {
                    fast = *cdr;
                    length += 1;
                }
                _ => return None,
            }
            // Advance the slow pointer every other step; meeting means a cycle.
            if length % 2 == 0 {
                slow = self.cdr(slow)?;
                if slow == fast && self.is_pair(fast) {
                    return None;
                }
            }
        }
    }

    /// Collect a proper list into a Vec. Returns None if not a proper list.
    pub fn list_to_vec(&self, v: ValueRef) -> Option<Vec<ValueRef>> {
        let len = self.list_length(v)?;
        let mut result = Vec::with_capacity(len);
        let mut current = v;
        while let Some((car, cdr)) = self.as_pair(current) {
            result.push(car);
            current = cdr;
        }
        Some(result)
    }

    /// Build a proper list from a slice of values.
    pub fn list(&mut self, items: &[ValueRef]) -> SchemeResult<ValueRef> {
        let mut result = self.make_nil()?;
        for &item in items.iter().rev() {
            result = self.make_cons(item, result)?;
        }
        Ok(result)
    }

    pub fn list_builder(&mut self) -> SchemeResult<ListBuilder> {
        Ok(ListBuilder {
            head: self.make_nil()?,
            tail: None,
        })
    }

    /// Append `v` to the end of the builder's list.
    pub fn list_append(&mut self, builder: &mut ListBuilder, v: ValueRef) -> SchemeResult<()> {
        match builder.tail {
            None => {
                let cell = self.make_cons(v, builder.head)?;
                builder.head = cell;
                builder.tail = Some(cell);
            }
            Some(tail) => {
                let nil = match self.cdr(tail) {
                    Some(nil) => nil,
                    None => self.make_nil()?,
                };
                let cell = self.make_cons(v, nil)?;
                self.set_cdr(tail, cell);
                builder.tail = Some(cell);
            }
        }
        Ok(())
    }

    // === Statistics ===

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            values: self.values.len(),
            closures: self.closures.len(),
            environments: self.envs.len(),
        }
    }

    /// Bytes held by registered objects, not counting auxiliary payloads.
    pub fn footprint(&self) -> usize {
        mem::size_of::<Value>() * self.values.len()
            + mem::size_of::<Closure>() * self.closures.len()
            + mem::size_of::<Environment>() * self.envs.len()
    }

    pub fn value_handles(&self) -> impl Iterator<Item = ValueRef> + '_ {
        self.values.handles().map(ValueRef)
    }

    // === GC methods ===

    /// Mark a root or child. Already-marked objects are skipped, which is
    /// what terminates the traversal on cyclic pair structures.
    pub fn mark(&mut self, t: Traced, worklist: &mut Vec<Traced>) {
        let newly_marked = match t {
            Traced::Value(v) => self.values.mark(v.0),
            Traced::Closure(c) => self.closures.mark(c.0),
            Traced::Env(e) => self.envs.mark(e.0),
        };
        if newly_marked {
            worklist.push(t);
        }
    }

    /// Process the mark worklist depth-first until every object reachable
    /// from the pushed roots is marked.
    pub fn process_worklist(&mut self, worklist: &mut Vec<Traced>) {
        while let Some(t) = worklist.pop() {
            match t {
                Traced::Value(v) => match *self.get(v) {
                    Value::Pair(car, cdr) => {
                        self.mark(Traced::Value(car), worklist);
                        self.mark(Traced::Value(cdr), worklist);
                    }
                    Value::Closure(c) => self.mark(Traced::Closure(c), worklist),
                    _ => {}
                },
                Traced::Closure(c) => match *self.closure(c) {
                    Closure::Native { env, .. } => self.mark(Traced::Env(env), worklist),
                    Closure::Interpreted {
                        arg_spec,
                        body,
                        env,
                    } => {
                        self.mark(Traced::Value(arg_spec), worklist);
                        self.mark(Traced::Value(body), worklist);
                        self.mark(Traced::Env(env), worklist);
                    }
                },
                Traced::Env(e) => {
                    let count = self.env(e).bindings.len();
                    for i in 0..count {
                        let value = self.env(e).bindings[i].value;
                        self.mark(Traced::Value(value), worklist);
                    }
                    if let Some(parent) = self.env(e).parent {
                        self.mark(Traced::Env(parent), worklist);
                    }
                }
            }
        }
    }

    pub fn is_marked(&self, t: Traced) -> bool {
        match t {
            Traced::Value(v) => self.values.is_marked(v.0),
            Traced::Closure(c) => self.closures.is_marked(c.0),
            Traced::Env(e) => self.envs.is_marked(e.0),
        }
    }

    /// Number of marked objects across all registries (call after marking).
    pub fn marked_count(&self) -> usize {
        self.values.marked_count() + self.closures.marked_count() + self.envs.marked_count()
    }

    /// Sweep every registry.
    pub fn sweep(&mut self) -> SweepCounts {
        SweepCounts {
            values: self.values.sweep(),
            closures: self.closures.sweep(),
            environments: self.envs.sweep(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new(1 << 16)
    }

    #[test]
    fn allocation_registers_in_creation_order() {
        let mut heap = heap();
        let a = heap.make_float(1.0).unwrap();
        let b = heap.make_float(2.0).unwrap();
        let c = heap.make_cons(a, b).unwrap();
        let order: Vec<ValueRef> = heap.value_handles().collect();
        assert_eq!(order, vec![a, b, c]);
        assert_eq!(heap.stats().values, 3);
    }

    #[test]
    fn capacity_is_fatal() {
        let mut heap = Heap::new(2);
        heap.make_nil().unwrap();
        heap.make_nil().unwrap();
        match heap.make_nil() {
            Err(SchemeError::HeapExhausted { kind, capacity }) => {
                assert_eq!(kind, "value");
                assert_eq!(capacity, 2);
            }
            other => panic!("expected HeapExhausted, got {:?}", other),
        }
    }

    #[test]
    fn sweep_frees_unmarked_and_clears_marks() {
        let mut heap = heap();
        let keep = heap.make_float(1.0).unwrap();
        let drop = heap.make_string("garbage").unwrap();
        let mut worklist = Vec::new();
        heap.mark(Traced::Value(keep), &mut worklist);
        heap.process_worklist(&mut worklist);

        let freed = heap.sweep();
        assert_eq!(freed.values, 1);
        assert!(heap.contains_value(keep));
        assert!(!heap.contains_value(drop));
        assert!(!heap.is_marked(Traced::Value(keep)));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = heap();
        let first = heap.make_nil().unwrap();
        heap.sweep();
        let second = heap.make_nil().unwrap();
        assert_eq!(first, second);
        assert_eq!(heap.stats().values, 1);
    }

    #[test]
    fn marking_terminates_on_cycles() {
        let mut heap = heap();
        let one = heap.make_float(1.0).unwrap();
        let nil = heap.make_nil().unwrap();
        let cell = heap.make_cons(one, nil).unwrap();
        assert!(heap.set_cdr(cell, cell));

        let mut worklist = Vec::new();
        heap.mark(Traced::Value(cell), &mut worklist);
        heap.process_worklist(&mut worklist);
        assert_eq!(heap.marked_count(), 2);

        let freed = heap.sweep();
        assert_eq!(freed.values, 1); // the detached nil
        assert!(heap.contains_value(cell));
    }

    #[test]
    fn list_length_rejects_improper_and_cyclic() {
        let mut heap = heap();
        let a = heap.make_float(1.0).unwrap();
        let b = heap.make_float(2.0).unwrap();
        let list = heap.list(&[a, b]).unwrap();
        assert_eq!(heap.list_length(list), Some(2));

        let dotted = heap.make_cons(a, b).unwrap();
        assert_eq!(heap.list_length(dotted), None);
        assert_eq!(heap.list_length(a), None);

        let nil = heap.make_nil().unwrap();
        assert_eq!(heap.list_length(nil), Some(0));

        let (_, tail) = heap.as_pair(list).unwrap();
        heap.set_cdr(tail, list);
        assert_eq!(heap.list_length(list), None);
    }

    #[test]
    fn list_builder_preserves_order() {
        let mut heap = heap();
        let mut builder = heap.list_builder().unwrap();
        for x in [1.0, 2.0, 3.0] {
            let v = heap.make_float(x).unwrap();
            heap.list_append(&mut builder, v).unwrap();
        }
        let items: Vec<f32> = heap
            .list_to_vec(builder.head)
            .unwrap()
            .into_iter()
            .map(|v| heap.as_float(v).unwrap())
            .collect();
        assert_eq!(items, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn lambda_arg_spec_validation() {
        let mut heap = heap();
        let env = heap.alloc_environment(Environment::default()).unwrap();
        let x = heap.make_atom(SymbolId(100)).unwrap();
        let body = heap.list(&[x]).unwrap();

        let ok = heap.make_lambda(env, x, body).unwrap();
        assert!(heap.is_closure(ok));

        let five = heap.make_float(5.0).unwrap();
        let bad_spec = heap.list(&[five]).unwrap();
        let err = heap.make_lambda(env, bad_spec, body).unwrap();
        assert!(heap.error_message(err).unwrap().contains("list of atoms"));

        let nil = heap.make_nil().unwrap();
        let no_body = heap.make_lambda(env, x, nil).unwrap();
        assert!(heap.is_error(no_body));
    }

    #[test]
    fn closures_are_marked_through_their_value() {
        let mut heap = heap();
        let env = heap.alloc_environment(Environment::default()).unwrap();
        let x = heap.make_atom(SymbolId(100)).unwrap();
        let body = heap.list(&[x]).unwrap();
        let lambda = heap.make_lambda(env, x, body).unwrap();

        let mut worklist = Vec::new();
        heap.mark(Traced::Value(lambda), &mut worklist);
        heap.process_worklist(&mut worklist);
        let freed = heap.sweep();

        assert_eq!(freed.total(), 0);
        assert_eq!(heap.stats().values, 4);
        assert_eq!(heap.stats().closures, 1);
        assert_eq!(heap.stats().environments, 1);
    }
}
