use std::collections::HashSet;

use crate::heap::Heap;
use crate::symbol::SymbolTable;
use crate::value::{Closure, Value, ValueRef};

/// How strings are rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Style {
    /// Strings in double quotes (no escaping). Used by the REPL.
    Write,
    /// Strings as their raw text. Used by `display`.
    Display,
}

/// Render a value as Scheme surface syntax.
pub fn print_val(val: ValueRef, heap: &Heap, symbols: &SymbolTable, style: Style) -> String {
    let mut printer = Printer {
        heap,
        symbols,
        style,
        active: HashSet::new(),
        out: String::new(),
    };
    printer.print_inner(val, 0);
    printer.out
}

/// Integral values below 1e6 print as integers. Magnitudes from 1e6 up or
/// below 1e-4 use Rust's shortest exponent form (`1e7`, `1.2345675e6`), and
/// everything else the shortest decimal that reads back as the same `f32`.
pub fn format_float(x: f32) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = x.abs();
    if x.fract() == 0.0 && magnitude < 1e6 {
        return format!("{}", x as i64);
    }
    if magnitude >= 1e6 || magnitude < 1e-4 {
        return format!("{:e}", x);
    }
    format!("{}", x)
}

struct Printer<'a> {
    heap: &'a Heap,
    symbols: &'a SymbolTable,
    style: Style,
    /// Pairs on the path from the root to the current position. Meeting one
    /// again means the structure is cyclic.
    active: HashSet<ValueRef>,
    out: String,
}

impl<'a> Printer<'a> {
    fn print_inner(&mut self, val: ValueRef, depth: usize) {
        if depth > 1000 {
            self.out.push_str("...");
            return;
        }

        match self.heap.get(val) {
            Value::Nil => self.out.push_str("nil"),
            Value::Atom(id) => self.out.push_str(self.symbols.name(*id)),
            Value::Boolean(true) => self.out.push_str("#t"),
            Value::Boolean(false) => self.out.push_str("#f"),
            Value::Str(s) => match self.style {
                Style::Write => {
                    self.out.push('"');
                    self.out.push_str(s);
                    self.out.push('"');
                }
                Style::Display => self.out.push_str(s),
            },
            Value::Float(x) => self.out.push_str(&format_float(*x)),
            Value::Error(msg) => {
                self.out.push_str("ERROR: ");
                self.out.push_str(msg);
            }
            Value::Closure(c) => match *self.heap.closure(*c) {
                Closure::Native { name, .. } => {
                    self.out.push_str("#<native:");
                    self.out.push_str(name);
                    self.out.push('>');
                }
                Closure::Interpreted { arg_spec, body, .. } => {
                    self.out.push_str("#<lambda ");
                    self.print_inner(arg_spec, depth + 1);
                    self.out.push(' ');
                    self.print_inner(body, depth + 1);
                    self.out.push('>');
                }
            },
            Value::Pair(car, cdr) => {
                let (car, cdr) = (*car, *cdr);
                self.print_pair(val, car, cdr, depth);
            }
        }
    }

    fn print_pair(&mut self, val: ValueRef, car: ValueRef, cdr: ValueRef, depth: usize) {
        if !self.active.insert(val) {
            self.out.push_str("...");
            return;
        }
        let mut entered = vec![val];

        self.out.push('(');
        self.print_inner(car, depth + 1);

        let mut current = cdr;
        loop {
            match *self.heap.get(current) {
                Value::Nil => break,
                Value::Pair(next_car, next_cdr) => {
                    if !self.active.insert(current) {
                        self.out.push_str(" ...");
                        break;
                    }
                    entered.push(current);
                    self.out.push(' ');
                    self.print_inner(next_car, depth + 1);
                    current = next_cdr;
                }
                _ => {
                    self.out.push_str(" . ");
                    self.print_inner(current, depth + 1);
                    break;
                }
            }
        }
        self.out.push(')');

        for cell in entered {
            self.active.remove(&cell);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Heap, SymbolTable) {
        (Heap::new(1 << 12), SymbolTable::new())
    }

    #[test]
    fn floats_print_compactly() {
        assert_eq!(format_float(6.0), "6");
        assert_eq!(format_float(-3.0), "-3");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(1e7), "1e7");
        assert_eq!(format_float(1234567.5), "1.2345675e6");
        assert_eq!(format_float(0.00001), "1e-5");
    }

    #[test]
    fn atoms_and_literals() {
        let (mut heap, mut symbols) = setup();
        let name = symbols.intern("fact");
        let atom = heap.make_atom(name).unwrap();
        let t = heap.make_true().unwrap();
        let f = heap.make_false().unwrap();
        let nil = heap.make_nil().unwrap();
        let err = heap.make_error("divide by zero").unwrap();
        assert_eq!(print_val(atom, &heap, &symbols, Style::Write), "fact");
        assert_eq!(print_val(t, &heap, &symbols, Style::Write), "#t");
        assert_eq!(print_val(f, &heap, &symbols, Style::Write), "#f");
        assert_eq!(print_val(nil, &heap, &symbols, Style::Write), "nil");
        assert_eq!(
            print_val(err, &heap, &symbols, Style::Write),
            "ERROR: divide by zero"
        );
    }

    #[test]
    fn strings_depend_on_style() {
        let (mut heap, symbols) = setup();
        let s = heap.make_string("hi \"there\"").unwrap();
        assert_eq!(print_val(s, &heap, &symbols, Style::Write), "\"hi \"there\"\"");
        assert_eq!(print_val(s, &heap, &symbols, Style::Display), "hi \"there\"");
    }

    #[test]
    fn proper_and_dotted_lists() {
        let (mut heap, symbols) = setup();
        let one = heap.make_float(1.0).unwrap();
        let two = heap.make_float(2.0).unwrap();
        let list = heap.list(&[one, two]).unwrap();
        let dotted = heap.make_cons(one, two).unwrap();
        let nested = heap.list(&[list, dotted]).unwrap();
        assert_eq!(print_val(list, &heap, &symbols, Style::Write), "(1 2)");
        assert_eq!(print_val(dotted, &heap, &symbols, Style::Write), "(1 . 2)");
        assert_eq!(
            print_val(nested, &heap, &symbols, Style::Write),
            "((1 2) (1 . 2))"
        );
    }

    #[test]
    fn cycles_are_elided() {
        let (mut heap, symbols) = setup();
        let one = heap.make_float(1.0).unwrap();
        let nil = heap.make_nil().unwrap();
        let cell = heap.make_cons(one, nil).unwrap();
        heap.set_cdr(cell, cell);
        assert_eq!(print_val(cell, &heap, &symbols, Style::Write), "(1 ...)");

        let holder = heap.make_cons(one, nil).unwrap();
        heap.set_car(holder, holder);
        assert_eq!(print_val(holder, &heap, &symbols, Style::Write), "(...)");
    }

    #[test]
    fn shared_structure_is_not_a_cycle() {
        let (mut heap, symbols) = setup();
        let one = heap.make_float(1.0).unwrap();
        let inner = heap.list(&[one]).unwrap();
        let outer = heap.list(&[inner, inner]).unwrap();
        assert_eq!(print_val(outer, &heap, &symbols, Style::Write), "((1) (1))");
    }
}
