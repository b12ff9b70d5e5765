//! Interned names of definitions, variables and functions.

use std::fmt;

use lasso::{Spur, ThreadedRodeo};
use once_cell::sync::Lazy;

static INTERNER: Lazy<ThreadedRodeo> = Lazy::new(ThreadedRodeo::new);

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(Spur);

impl Symbol {
    pub fn intern(name: impl AsRef<str>) -> Symbol {
        Symbol(INTERNER.get_or_intern(name))
    }

    pub fn intern_static(name: &'static str) -> Symbol {
        Symbol(INTERNER.get_or_intern_static(name))
    }

    /// Interned strings live as long as the process.
    pub fn resolve(&self) -> &'static str {
        INTERNER.resolve(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        self.resolve()
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.resolve())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resolve())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = Symbol::intern("Near");
        let b = Symbol::intern(String::from("Near"));
        assert_eq!(a, b);
        assert_ne!(a, Symbol::intern_static("Next"));
        assert_eq!(a.resolve(), "Near");
        assert_eq!(a.to_string(), "Near");
    }

    #[test]
    fn names_are_case_sensitive() {
        assert_ne!(Symbol::intern("halt"), Symbol::intern_static("Halt"));
    }

    #[test]
    fn symbols_are_shared_across_threads() {
        let here = Symbol::intern("Delta");
        let there = std::thread::spawn(|| Symbol::intern("Delta")).join().unwrap();
        assert_eq!(here, there);
    }
}
