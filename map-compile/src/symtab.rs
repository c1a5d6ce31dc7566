//! Symbol table and string pool.
//!
//! `SymbolPool` maps an authored name to a `(kind, id)` pair; ids are
//! caller-assigned for waypoints (the waypoint's own array index, used
//! directly as the encoded `target` reference) and auto-incremented
//! 1-based for actors. Inserting a name twice with the same kind is a
//! no-op that returns the existing id; inserting with a different kind is
//! an error. `StringPool` is a simple dedup-on-insert ordered string list.

use crate::error::{CompileError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Actor,
    Waypoint,
}

impl SymbolKind {
    pub fn name(self) -> &'static str {
        match self {
            SymbolKind::Actor => "actor",
            SymbolKind::Waypoint => "waypoint",
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolPool {
    ids: HashMap<String, (SymbolKind, u32)>,
    counters: HashMap<SymbolKind, u32>,
}

impl SymbolPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `name` only if it exists with exactly `kind`; unlike
    /// [`SymbolPool::get`] this never errors, it just returns `None`.
    pub fn try_get(&self, kind: SymbolKind, name: &str) -> Option<u32> {
        self.ids
            .get(name)
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
    }

    /// Resolve `name` (or `0` if `name` is `None`) to its numeric id,
    /// failing if it doesn't exist or exists under a different kind.
    pub fn get(&self, kind: SymbolKind, name: Option<&str>) -> Result<u32> {
        let Some(name) = name else {
            return Ok(0);
        };
        match self.ids.get(name) {
            Some((k, id)) if *k == kind => Ok(*id),
            _ => Err(CompileError::UnknownSymbol {
                kind: kind.name(),
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Insert `name` under `kind`, auto-assigning the next 1-based id for
    /// that kind. Idempotent: re-inserting the same name/kind pair returns
    /// the original id.
    pub fn insert(&mut self, name: &str, kind: SymbolKind) -> Result<u32> {
        self.insert_with_id(name, kind, None)
    }

    /// Insert `name` under `kind` with an explicit id (used for waypoints,
    /// whose symbol id is their position in the waypoint list rather than
    /// an auto-incremented counter).
    pub fn insert_with_id(
        &mut self,
        name: &str,
        kind: SymbolKind,
        id: Option<u32>,
    ) -> Result<u32> {
        if let Some((existing_kind, existing_id)) = self.ids.get(name) {
            if *existing_kind != kind {
                return Err(CompileError::SymbolKindMismatch {
                    name: name.to_string(),
                    existing_kind: existing_kind.name(),
                }
                .into());
            }
            return Ok(*existing_id);
        }

        let id = match id {
            Some(id) => id,
            None => {
                let counter = self.counters.entry(kind).or_insert(0);
                *counter += 1;
                *counter
            }
        };
        self.ids.insert(name.to_string(), (kind, id));
        Ok(id)
    }
}

#[derive(Debug, Default)]
pub struct StringPool {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `s`, returning its index. Returns the existing index if an
    /// identical string was already inserted.
    pub fn insert(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.strings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_insert_is_idempotent_per_kind() {
        let mut pool = SymbolPool::new();
        let a = pool.insert("hero", SymbolKind::Actor).unwrap();
        let b = pool.insert("hero", SymbolKind::Actor).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn symbol_insert_rejects_kind_change() {
        let mut pool = SymbolPool::new();
        pool.insert("hero", SymbolKind::Actor).unwrap();
        assert!(pool.insert("hero", SymbolKind::Waypoint).is_err());
    }

    #[test]
    fn symbol_try_get_distinguishes_kind() {
        let mut pool = SymbolPool::new();
        pool.insert("a", SymbolKind::Actor).unwrap();
        assert_eq!(pool.try_get(SymbolKind::Actor, "a"), Some(1));
        assert_eq!(pool.try_get(SymbolKind::Waypoint, "a"), None);
    }

    #[test]
    fn string_pool_dedups() {
        let mut pool = StringPool::new();
        let a = pool.insert("hi");
        let b = pool.insert("hi");
        let c = pool.insert("bye");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
    }
}
