//! A minimal ordered index over a `BTreeMap`, sufficient to drive and
//! test the engine.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use storyline_core::Tuple;

use crate::index::{Index, ReplaceMode, ReplaceOutcome};
use crate::iterator_type::IteratorType;
use crate::key::{IndexDef, Key};

/// A `BTreeMap`-backed ordered index definition, keyed on `def`.
pub struct OrderedIndex {
    def: IndexDef,
    map: BTreeMap<Key, Tuple>,
}

impl OrderedIndex {
    /// Create an empty ordered index over the given field positions.
    pub fn new(def: IndexDef) -> Self {
        OrderedIndex {
            def,
            map: BTreeMap::new(),
        }
    }
}

impl Index for OrderedIndex {
    fn def(&self) -> &IndexDef {
        &self.def
    }

    fn is_ordered(&self) -> bool {
        true
    }

    fn lookup(&mut self, key: &Key) -> Option<Tuple> {
        self.map.get(key).cloned()
    }

    fn replace(&mut self, key: &Key, new: Option<Tuple>, mode: ReplaceMode) -> ReplaceOutcome {
        let displaced = match mode {
            ReplaceMode::Insert => self.map.get(key).cloned(),
            ReplaceMode::Replace | ReplaceMode::ReplaceOrInsert => match new.clone() {
                Some(t) => self.map.insert(key.clone(), t),
                None => self.map.remove(key),
            },
        };
        if matches!(mode, ReplaceMode::Insert) {
            if let Some(t) = new {
                self.map.entry(key.clone()).or_insert(t);
            }
        }
        let successor = self
            .map
            .range((
                std::ops::Bound::Excluded(key.clone()),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(_, t)| t.clone());
        ReplaceOutcome {
            displaced,
            successor,
        }
    }

    fn successor_of(&self, key: &Key) -> Option<Tuple> {
        self.map
            .range((
                std::ops::Bound::Excluded(key.clone()),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(_, t)| t.clone())
    }

    fn iter_all(&self) -> Vec<Tuple> {
        self.map.values().cloned().collect()
    }

    fn iter_range(&self, iter_type: IteratorType, key: &Key) -> Vec<Tuple> {
        match iter_type {
            IteratorType::All => self.iter_all(),
            IteratorType::Eq => self.map.get(key).cloned().into_iter().collect(),
            IteratorType::ReverseEq => self.map.get(key).cloned().into_iter().collect(),
            IteratorType::Gt => self
                .map
                .range((std::ops::Bound::Excluded(key.clone()), std::ops::Bound::Unbounded))
                .map(|(_, t)| t.clone())
                .collect(),
            IteratorType::Ge => self
                .map
                .range((std::ops::Bound::Included(key.clone()), std::ops::Bound::Unbounded))
                .map(|(_, t)| t.clone())
                .collect(),
            IteratorType::Lt => self
                .map
                .range((std::ops::Bound::Unbounded, std::ops::Bound::Excluded(key.clone())))
                .map(|(_, t)| t.clone())
                .rev()
                .collect(),
            IteratorType::Le => self
                .map
                .range((std::ops::Bound::Unbounded, std::ops::Bound::Included(key.clone())))
                .map(|(_, t)| t.clone())
                .rev()
                .collect(),
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
    fn insert_and_lookup() {
        let mut idx = OrderedIndex::new(IndexDef::single(0));
        let k = Key::new([FieldValue::Int(1)]);
        idx.replace(&k, Some(tup(1)), ReplaceMode::Insert);
        assert!(idx.lookup(&k).is_some());
    }

    #[test]
    fn successor_tracks_next_key() {
        let mut idx = OrderedIndex::new(IndexDef::single(0));
        idx.replace(&Key::new([FieldValue::Int(1)]), Some(tup(1)), ReplaceMode::Insert);
        idx.replace(&Key::new([FieldValue::Int(5)]), Some(tup(5)), ReplaceMode::Insert);
        let out = idx.replace(&Key::new([FieldValue::Int(3)]), Some(tup(3)), ReplaceMode::Insert);
        assert_eq!(out.successor.unwrap().field(0), Some(&FieldValue::Int(5)));
    }

    #[test]
    fn range_ge() {
        let mut idx = OrderedIndex::new(IndexDef::single(0));
        for v in [1, 2, 3, 4] {
            idx.replace(&Key::new([FieldValue::Int(v)]), Some(tup(v)), ReplaceMode::Insert);
        }
        let got = idx.iter_range(IteratorType::Ge, &Key::new([FieldValue::Int(2)]));
        assert_eq!(got.len(), 3);
    }
}
