use crate::error::{SchemeError, SchemeResult};
use crate::heap::Heap;
use crate::symbol::{sym, SymbolTable};
use crate::value::ValueRef;

/// Parses source text into expression trees allocated on the heap.
///
/// Nothing read here is rooted. Callers must hand each expression to
/// `Machine::evaluate` (which roots it in a frame) before anything can
/// trigger a collection.
pub struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    heap: &'a mut Heap,
    symbols: &'a mut SymbolTable,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str, heap: &'a mut Heap, symbols: &'a mut SymbolTable) -> Self {
        Reader {
            input: input.as_bytes(),
            pos: 0,
            heap,
            symbols,
        }
    }

    /// Read one expression. Returns None at EOF.
    pub fn read(&mut self) -> SchemeResult<Option<ValueRef>> {
        self.skip_whitespace_and_comments();
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        let val = self.read_expr()?;
        Ok(Some(val))
    }

    /// Return current position in input.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while let Some(ch) = self.peek() {
                if ch.is_ascii_whitespace() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if self.peek() == Some(b';') {
                while let Some(ch) = self.peek() {
                    if ch == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn read_expr(&mut self) -> SchemeResult<ValueRef> {
        self.skip_whitespace_and_comments();

        let ch = self
            .peek()
            .ok_or_else(|| SchemeError::Read("unexpected end of input".into()))?;

        match ch {
            b'(' => self.read_list(),
            b')' => Err(SchemeError::Read("unexpected ')'".into())),
            b'\'' => self.read_quote(),
            b'"' => self.read_string(),
            _ => self.read_word(),
        }
    }

    /// Read a list: (a b c) or (a . b) or (a b . c)
    fn read_list(&mut self) -> SchemeResult<ValueRef> {
        self.advance(); // consume '('

        let mut elements = Vec::new();
        let mut dot_tail = None;

        loop {
            self.skip_whitespace_and_comments();

            match self.peek() {
                None => return Err(SchemeError::Read("unexpected end of input".into())),
                Some(b')') => {
                    self.advance();
                    break;
                }
                Some(b'.') if self.is_dot_separator() => {
                    if elements.is_empty() {
                        return Err(SchemeError::Read(
                            "Period must be preceded by at least one value.".into(),
                        ));
                    }
                    self.advance(); // consume '.'
                    dot_tail = Some(self.read_expr()?);
                    self.skip_whitespace_and_comments();
                    match self.peek() {
                        Some(b')') => {
                            self.advance();
                            break;
                        }
                        None => {
                            return Err(SchemeError::Read("unexpected end of input".into()))
                        }
                        Some(_) => {
                            return Err(SchemeError::Read(
                                "Only one value may follow period.".into(),
                            ))
                        }
                    }
                }
                Some(_) => elements.push(self.read_expr()?),
            }
        }

        let mut result = match dot_tail {
            Some(tail) => tail,
            None => self.heap.make_nil()?,
        };
        for val in elements.into_iter().rev() {
            result = self.heap.make_cons(val, result)?;
        }
        Ok(result)
    }

    /// A '.' is a separator when followed by whitespace, a delimiter, or EOF.
    fn is_dot_separator(&self) -> bool {
        match self.input.get(self.pos + 1) {
            None => true,
            Some(&next) => is_delimiter(next),
        }
    }

    /// Read quote: 'expr -> (quote expr)
    fn read_quote(&mut self) -> SchemeResult<ValueRef> {
        self.advance(); // consume '\''
        let expr = self.read_expr()?;
        let quote = self.heap.make_atom(sym::QUOTE)?;
        self.heap.list(&[quote, expr])
    }

    /// Strings run to the next '"' on the same line. There are no escapes.
    fn read_string(&mut self) -> SchemeResult<ValueRef> {
        self.advance(); // consume '"'
        let start = self.pos;
        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\n') | None => {
                    return Err(SchemeError::Read("unterminated string".into()));
                }
                Some(_) => {}
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos - 1])
            .map_err(|_| SchemeError::Read("invalid UTF-8 in string".into()))?;
        self.heap.make_string(text)
    }

    fn read_word(&mut self) -> SchemeResult<ValueRef> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if is_delimiter(ch) {
                break;
            }
            self.pos += 1;
        }

        let word = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| SchemeError::Read("invalid UTF-8".into()))?;

        if word.is_empty() {
            return Err(SchemeError::Read("empty word".into()));
        }

        match word {
            "nil" => return self.heap.make_nil(),
            "#t" => return self.heap.make_true(),
            "#f" => return self.heap.make_false(),
            _ => {}
        }

        if looks_numeric(word) {
            return match word.parse::<f32>() {
                Ok(x) => self.heap.make_float(x),
                Err(_) => Err(SchemeError::Read(format!("invalid number '{}'", word))),
            };
        }

        if word.starts_with('#') {
            return Err(SchemeError::Read(format!("unknown syntax '{}'", word)));
        }

        let id = self.symbols.intern(word);
        self.heap.make_atom(id)
    }
}

fn is_delimiter(ch: u8) -> bool {
    ch.is_ascii_whitespace() || matches!(ch, b'(' | b')' | b'\'' | b'"' | b';')
}

/// A digit, or a sign or '.' followed by a digit.
fn looks_numeric(word: &str) -> bool {
    let bytes = word.as_bytes();
    match bytes[0] {
        b'0'..=b'9' => true,
        b'+' | b'-' | b'.' => bytes.get(1).map_or(false, |b| b.is_ascii_digit()),
        _ => false,
    }
}

/// Read one expression starting at byte offset `pos`.
/// Returns `Ok(Some((value, new_pos)))` or `Ok(None)` if only whitespace/comments remain.
pub fn read_one_at(
    input: &str,
    pos: usize,
    heap: &mut Heap,
    symbols: &mut SymbolTable,
) -> SchemeResult<Option<(ValueRef, usize)>> {
    let mut reader = Reader::new(&input[pos..], heap, symbols);
    match reader.read()? {
        Some(val) => Ok(Some((val, pos + reader.position()))),
        None => Ok(None),
    }
}

/// True while `input` has an unclosed '(' or an unterminated string, so an
/// interactive driver should keep collecting lines.
pub fn needs_more_input(input: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut in_comment = false;
    for ch in input.bytes() {
        if in_comment {
            in_comment = ch != b'\n';
            continue;
        }
        if in_string {
            in_string = ch != b'"';
            continue;
        }
        match ch {
            b';' => in_comment = true,
            b'"' => in_string = true,
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
    }
    depth > 0 || in_string
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::{print_val, Style};

    fn read_back(src: &str) -> String {
        let mut heap = Heap::new(1 << 12);
        let mut symbols = SymbolTable::new();
        let (v, _) = read_one_at(src, 0, &mut heap, &mut symbols).unwrap().unwrap();
        print_val(v, &heap, &symbols, Style::Write)
    }

    fn read_err(src: &str) -> String {
        let mut heap = Heap::new(1 << 12);
        let mut symbols = SymbolTable::new();
        match read_one_at(src, 0, &mut heap, &mut symbols) {
            Err(SchemeError::Read(msg)) => msg,
            other => panic!("expected read error, got {:?}", other.map(|o| o.is_some())),
        }
    }

    #[test]
    fn reads_numbers_atoms_and_literals() {
        assert_eq!(read_back("42"), "42");
        assert_eq!(read_back("-2.5"), "-2.5");
        assert_eq!(read_back(".5"), "0.5");
        assert_eq!(read_back("1e3"), "1000");
        assert_eq!(read_back("-"), "-");
        assert_eq!(read_back("set-car!"), "set-car!");
        assert_eq!(read_back("#t"), "#t");
        assert_eq!(read_back("nil"), "nil");
        assert_eq!(read_back("()"), "nil");
    }

    #[test]
    fn reads_lists_strings_and_quote() {
        assert_eq!(read_back("(+ 1 (* 2 3))"), "(+ 1 (* 2 3))");
        assert_eq!(read_back("(a . b)"), "(a . b)");
        assert_eq!(read_back("(a b . c)"), "(a b . c)");
        assert_eq!(read_back("\"hello world\""), "\"hello world\"");
        assert_eq!(read_back("'x"), "(quote x)");
        assert_eq!(read_back("; comment\n  (f) ; trailing"), "(f)");
    }

    #[test]
    fn reports_malformed_input() {
        assert!(read_err("(. a)").contains("preceded by at least one value"));
        assert!(read_err("(a . b c)").contains("Only one value may follow period"));
        assert!(read_err(")").contains("unexpected ')'"));
        assert!(read_err("(1 2").contains("end of input"));
        assert!(read_err("\"open\nstring\"").contains("unterminated string"));
        assert!(read_err("1.2.3").contains("invalid number"));
    }

    #[test]
    fn positions_advance_one_expression_at_a_time() {
        let mut heap = Heap::new(1 << 12);
        let mut symbols = SymbolTable::new();
        let src = "(define x 1) x  ";
        let (_, next) = read_one_at(src, 0, &mut heap, &mut symbols).unwrap().unwrap();
        assert_eq!(next, 12);
        let (x, next) = read_one_at(src, next, &mut heap, &mut symbols).unwrap().unwrap();
        assert!(heap.is_atom(x));
        assert!(read_one_at(src, next, &mut heap, &mut symbols).unwrap().is_none());
    }

    #[test]
    fn continuation_detection() {
        assert!(needs_more_input("(define (f x)"));
        assert!(needs_more_input("(display \"a)"));
        assert!(!needs_more_input("(f x) ; (unbalanced in comment"));
        assert!(!needs_more_input("42"));
    }
}
