use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Stable index of an interned string. Everywhere the runtime refers to a
/// class, field, method or descriptor name it does so through one of these,
/// so identical strings are stored once across all loaded classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrId(u32);

impl Display for StrId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "str#{}", self.0)
    }
}

/// Process-wide append-only table of UTF-8 strings with reverse lookup.
/// Indices are never reused and there is no eviction.
#[derive(Debug, Default)]
pub struct StringPool {
    entries: Vec<String>,
    index: HashMap<String, StrId>,
}

impl StringPool {
    pub fn new() -> StringPool {
        StringPool::default()
    }

    pub fn intern(&mut self, text: &str) -> StrId {
        if let Some(id) = self.index.get(text) {
            return *id;
        }
        let id = StrId(self.entries.len() as u32);
        self.entries.push(text.to_string());
        self.index.insert(text.to_string(), id);
        id
    }

    pub fn lookup(&self, id: StrId) -> &str {
        &self.entries[id.0 as usize]
    }

    pub fn find(&self, text: &str) -> Option<StrId> {
        self.index.get(text).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
