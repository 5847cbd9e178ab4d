//! A minimal unordered index over a `HashMap`, used for full-scan and
//! point-lookup index shapes.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};
use storyline_core::Tuple;

use crate::index::{Index, ReplaceMode, ReplaceOutcome};
use crate::iterator_type::IteratorType;
use crate::key::{IndexDef, Key};

/// A `HashMap`-backed unordered index. No ordered range scans; callers
/// that pass anything but `IteratorType::All`/`Eq` get an empty result.
pub struct HashIndex {
    def: IndexDef,
    map: FxHashMap<Key, Tuple>,
}

impl HashIndex {
    /// Create an empty hash index over the given field positions.
    pub fn new(def: IndexDef) -> Self {
        HashIndex {
            def,
            map: FxHashMap::default(),
        }
    }
}

impl Index for HashIndex {
    fn def(&self) -> &IndexDef {
        &self.def
    }

    fn is_ordered(&self) -> bool {
        false
    }

    fn lookup(&mut self, key: &Key) -> Option<Tuple> {
        self.map.get(key).cloned()
    }

    fn replace(&mut self, key: &Key, new: Option<Tuple>, mode: ReplaceMode) -> ReplaceOutcome {
        let displaced = match mode {
            ReplaceMode::Insert => {
                let existing = self.map.get(key).cloned();
                if existing.is_none() {
                    if let Some(t) = new {
                        self.map.insert(key.clone(), t);
                    }
                }
                existing
            }
            ReplaceMode::Replace | ReplaceMode::ReplaceOrInsert => match new {
                Some(t) => self.map.insert(key.clone(), t),
                None => self.map.remove(key),
            },
        };
        ReplaceOutcome {
            displaced,
            successor: None,
        }
    }

    fn successor_of(&self, _key: &Key) -> Option<Tuple> {
        None
    }

    fn iter_all(&self) -> Vec<Tuple> {
        self.map.values().cloned().collect()
    }

    fn iter_range(&self, iter_type: IteratorType, key: &Key) -> Vec<Tuple> {
        match iter_type {
            IteratorType::All => self.iter_all(),
            IteratorType::Eq | IteratorType::ReverseEq => {
                self.map.get(key).cloned().into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        self.def.key_of(a).cmp(&self.def.key_of(b))
    }

    fn compare_with_key(&self, a: &Tuple, key: &Key) -> Ordering {
        let full = self.def.key_of(a);
        full.0[..key.len()].cmp(&key.0[..])
    }

    fn key_hash(&self, key: &Key) -> u64 {
        let mut h = FxHasher::default();
        key.hash(&mut h);
        h.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyline_core::FieldValue;

    fn tup(v: i64) -> Tuple {
        Tuple::new([FieldValue::Int(v)])
    }

    #[test]
    fn insert_displaces_nothing_first_time() {
        let mut idx = HashIndex::new(IndexDef::single(0));
        let k = Key::new([FieldValue::Int(1)]);
        let out = idx.replace(&k, Some(tup(1)), ReplaceMode::Insert);
        assert!(out.displaced.is_none());
        assert!(idx.lookup(&k).is_some());
    }

    #[test]
    fn full_scan_enumerates_all() {
        let mut idx = HashIndex::new(IndexDef::single(0));
        for v in [1, 2, 3] {
            idx.replace(&Key::new([FieldValue::Int(v)]), Some(tup(v)), ReplaceMode::Insert);
        }
        assert_eq!(idx.iter_all().len(), 3);
    }

    #[test]
    fn no_ordered_scan_support() {
        let mut idx = HashIndex::new(IndexDef::single(0));
        idx.replace(&Key::new([FieldValue::Int(1)]), Some(tup(1)), ReplaceMode::Insert);
        let got = idx.iter_range(IteratorType::Ge, &Key::new([FieldValue::Int(0)]));
        assert!(got.is_empty());
    }
}
