use super::SymbolLookup;
use alloc::string::{String, ToString};
use core::hash::BuildHasher;
use foldhash::fast::FixedState;
use hashbrown::HashMap;

const SEED: u64 = 0x6b52_49e0;

/// Name to absolute-address table with a fixed hasher seed, so that every
/// run of the same plan walks symbols in the same order.
#[derive(Clone, Debug)]
pub struct SymbolMap {
    map: HashMap<String, u32, FixedState>,
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolMap {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            map: HashMap::with_hasher(FixedState::with_seed(SEED)),
        }
    }

    /// Adds or replaces a symbol, returning the previous address.
    pub fn insert(&mut self, name: impl Into<String>, address: u32) -> Option<u32> {
        self.map.insert(name.into(), address)
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<u32> {
        self.map.get(name).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over `(name, address)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.map.iter().map(|(name, addr)| (name.as_str(), *addr))
    }
}

impl<'a> FromIterator<(&'a str, u32)> for SymbolMap {
    fn from_iter<T: IntoIterator<Item = (&'a str, u32)>>(iter: T) -> Self {
        let mut map = SymbolMap::new();
        for (name, addr) in iter {
            map.insert(name.to_string(), addr);
        }
        map
    }
}

impl SymbolLookup for SymbolMap {
    fn lookup(&self, name: &str) -> Option<u32> {
        self.get(name)
    }
}

impl<S: BuildHasher> SymbolLookup for HashMap<String, u32, S> {
    fn lookup(&self, name: &str) -> Option<u32> {
        self.get(name).copied()
    }
}
