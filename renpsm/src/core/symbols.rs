//! Compile-time bindings of names to literals.

use fxhash::FxHashMap;

use crate::core::Literal;
use crate::symbol::Symbol;

/// A scoped mapping from names to literals.
///
/// Every name has its own stack of bindings: binding a bound name shadows the
/// previous value, and unbinding restores it.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: FxHashMap<Symbol, Vec<Literal>>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    pub fn bind(&mut self, name: Symbol, value: Literal) {
        self.entries.entry(name).or_default().push(value);
    }

    /// Remove the innermost binding of `name`, returning it.
    pub fn unbind(&mut self, name: Symbol) -> Option<Literal> {
        let stack = self.entries.get_mut(&name)?;
        let value = stack.pop();
        if stack.is_empty() {
            self.entries.remove(&name);
        }
        value
    }

    pub fn get(&self, name: Symbol) -> Option<Literal> {
        self.entries.get(&name)?.last().copied()
    }

    pub fn is_bound(&self, name: Symbol) -> bool {
        self.entries.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
