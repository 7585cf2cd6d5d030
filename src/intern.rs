use std::sync::{Arc, PoisonError, RwLock};

use hashbrown::HashMap;
use once_cell::sync::Lazy;

#[derive(Debug, Default)]
struct TableContents {
    strings: Vec<&'static str>,
    indices: HashMap<&'static str, u32>,
}

/// Process wide string table. Strings are leaked on insertion and never
/// removed, so every `InternedSymbol` resolves for the rest of the program.
#[derive(Debug, Default)]
pub struct InterningTable {
    contents: RwLock<TableContents>,
}

pub static INTERNING_TABLE: Lazy<Arc<InterningTable>> = Lazy::new(Default::default);

impl InterningTable {
    pub fn get(&self, index: u32) -> Option<&'static str> {
        let contents = self.contents.read().unwrap_or_else(PoisonError::into_inner);

        contents.strings.get(index as usize).copied()
    }

    pub fn insert_if_absent(&self, string: &str) -> u32 {
        if let Some(index) = self.index_of(string) {
            return index;
        }

        let mut contents = self.contents.write().unwrap_or_else(PoisonError::into_inner);

        // Another writer may have raced us between the read and write lock
        if let Some(index) = contents.indices.get(string) {
            return *index;
        }

        let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
        let index = contents.strings.len() as u32;
        contents.strings.push(leaked);
        contents.indices.insert(leaked, index);
        index
    }

    pub fn index_of(&self, string: &str) -> Option<u32> {
        let contents = self.contents.read().unwrap_or_else(PoisonError::into_inner);

        contents.indices.get(string).copied()
    }
}

/// An index into the string interning table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternedSymbol(u32);

impl InternedSymbol {
    pub fn new(value: &str) -> Self {
        let index = INTERNING_TABLE.insert_if_absent(value);

        Self(index)
    }

    pub fn value(&self) -> &'static str {
        // Symbols are only ever created through `new`, which inserts first
        INTERNING_TABLE.get(self.0).unwrap_or_default()
    }
}

impl core::fmt::Debug for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InternedSymbol")
            .field(&self.0)
            .field(&self.value())
            .finish()
    }
}

impl core::fmt::Display for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

impl From<&str> for InternedSymbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = InternedSymbol::new("foo_interning_test");
        let b = InternedSymbol::new("foo_interning_test");
        let c = InternedSymbol::new("bar_interning_test");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(c.value(), "bar_interning_test");
        assert_eq!(format!("{a}"), "foo_interning_test");
    }
}
