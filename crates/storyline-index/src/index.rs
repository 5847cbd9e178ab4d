//! The index-layer contract the engine consumes.
//!
//! This crate treats indexes as external collaborators: the engine
//! never reaches into an index's internals, only through `replace`,
//! lookup, iteration, and the comparison primitives below.

use std::cmp::Ordering;

use storyline_core::Tuple;

use crate::key::Key;
use crate::iterator_type::IteratorType;

/// How a physical `replace` should behave toward an existing occupant of
/// the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Fail-shaped insert: caller expects no visible occupant at the key
    /// (visibility is still resolved against whatever is physically
    /// there).
    Insert,
    /// Caller expects exactly the given `old` tuple to be physically
    /// present and replaces it.
    Replace,
    /// Either insert or replace, whichever applies.
    ReplaceOrInsert,
}

/// Outcome of a physical `replace` call.
#[derive(Debug, Clone)]
pub struct ReplaceOutcome {
    /// The tuple the index previously held at this key, if any. Spec
    /// §4.1: "saving the displaced tuple."
    pub displaced: Option<Tuple>,
    /// For ordered indexes, the tuple immediately following the new
    /// tuple's position in key order, used to locate the chain a nearby
    /// gap tracker should attach to.
    pub successor: Option<Tuple>,
}

/// The physical index an MVCC chain's head story is installed into.
///
/// Implementors own exactly the *current* physical mapping from key to
/// tuple; all versioning lives one layer up, in the engine's story
/// chains.
pub trait Index {
    /// This index's definition (which fields, uniqueness).
    fn def(&self) -> &crate::key::IndexDef;

    /// Whether this index supports ordered range scans (`BTreeMap`-like)
    /// as opposed to only point/full-scan lookups (`HashMap`-like).
    fn is_ordered(&self) -> bool;

    /// Physically look up the tuple currently stored at `key`, if any.
    fn lookup(&mut self, key: &Key) -> Option<Tuple>;

    /// Physically install `new` (or remove, if `new` is `None`) at its
    /// key, per `mode`. Returns what was previously there and, for
    /// ordered indexes, the tuple that follows in key order.
    fn replace(
        &mut self,
        key: &Key,
        new: Option<Tuple>,
        mode: ReplaceMode,
    ) -> ReplaceOutcome;

    /// The tuple immediately following `key` in ascending key order, not
    /// counting any tuple physically at `key` itself. Ordered indexes
    /// only; hash indexes return `None`.
    fn successor_of(&self, key: &Key) -> Option<Tuple>;

    /// Enumerate every tuple currently physically present, in whatever
    /// order is natural for this index (ascending key order for ordered
    /// indexes, unspecified for hash indexes). Spec §3 "Full-scan gap."
    fn iter_all(&self) -> Vec<Tuple>;

    /// Enumerate tuples matching an ordered scan shape. Unsupported
    /// (returns the full set, for `IteratorType::All`, else empty) on
    /// indexes where `is_ordered()` is false.
    fn iter_range(&self, iter_type: IteratorType, key: &Key) -> Vec<Tuple>;

    /// Three-way comparison between two tuples' keys in this index.
    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering;

    /// Three-way comparison between a tuple's key and an explicit key,
    /// which may be a partial (prefix) key.
    fn compare_with_key(&self, a: &Tuple, key: &Key) -> Ordering;

    /// A hash of `key`, used by the point-hole hash table.
    fn key_hash(&self, key: &Key) -> u64;
}

/// A functional index computes its key from tuple contents via a
/// (possibly user-supplied) function rather than reading fixed field
/// positions.
///
/// This engine does not support multikey functional indexes: exactly
/// one key per tuple, never a set.
pub trait FunctionalIndex {
    /// Compute the single key this functional index would use for
    /// `tuple`, or `None` if the function declines to key this tuple
    /// (e.g. a partial functional index).
    fn key_list_iterator(&self, tuple: &Tuple) -> Option<Key>;
}
