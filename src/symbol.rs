use std::collections::HashMap;

use crate::value::SymbolId;

/// Interned symbol table. Each unique atom name maps to a unique SymbolId, so
/// binding lookup and special-form dispatch compare integers, not strings.
pub struct SymbolTable {
    name_to_id: HashMap<String, SymbolId>,
    id_to_name: Vec<String>,
}

/// Well-known symbol IDs, pre-interned at startup.
/// These must match the order of interning in SymbolTable::new().
pub mod sym {
    use crate::value::SymbolId;

    pub const BEGIN: SymbolId = SymbolId(0);
    pub const LET: SymbolId = SymbolId(1);
    pub const IF: SymbolId = SymbolId(2);
    pub const AND: SymbolId = SymbolId(3);
    pub const OR: SymbolId = SymbolId(4);
    pub const COND: SymbolId = SymbolId(5);
    pub const DEFINE: SymbolId = SymbolId(6);
    pub const LAMBDA: SymbolId = SymbolId(7);
    pub const QUOTE: SymbolId = SymbolId(8);
    pub const SET_BANG: SymbolId = SymbolId(9);
    pub const ELSE: SymbolId = SymbolId(10);
}

impl SymbolTable {
    /// Create a new symbol table with the special-form keywords pre-interned.
    /// The order MUST match the constants in the `sym` module above.
    pub fn new() -> Self {
        let names = [
            "begin", "let", "if", "and", "or", "cond", "define", "lambda", "quote", "set!",
            "else",
        ];

        let mut name_to_id = HashMap::new();
        let mut id_to_name = Vec::new();

        for (i, name) in names.iter().enumerate() {
            let id = SymbolId(i as u32);
            name_to_id.insert(name.to_string(), id);
            id_to_name.push(name.to_string());
        }

        SymbolTable {
            name_to_id,
            id_to_name,
        }
    }

    /// Intern a symbol name. Returns the existing ID if already interned,
    /// or creates a new one.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = SymbolId(self.id_to_name.len() as u32);
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.push(name.to_string());
        id
    }

    /// Look up a symbol name by its ID.
    pub fn name(&self, id: SymbolId) -> &str {
        &self.id_to_name[id.0 as usize]
    }

    /// Look up a symbol ID by name, without interning.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.name_to_id.get(name).copied()
    }

    /// Total number of interned symbols.
    pub fn count(&self) -> usize {
        self.id_to_name.len()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
