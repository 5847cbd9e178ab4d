//! The comparison key the index layer compares and hashes on.
//!
//! The engine never interprets tuple contents itself; it only asks the
//! index for `tuple_compare`/`key_hash`/hints against a `Key` extracted
//! according to an index definition (the ordered list of field positions
//! this index is keyed on).

use storyline_core::{FieldValue, Tuple};

/// An index definition: which tuple fields this index is keyed on, in
/// order, and whether the index enforces uniqueness.
#[derive(Debug, Clone)]
pub struct IndexDef {
    /// Field positions, in key order. `[0]` alone is the typical primary
    /// index definition.
    pub parts: Vec<usize>,
    /// Whether this index rejects duplicate keys.
    pub unique: bool,
}

impl IndexDef {
    /// A single-field unique index definition, the common primary-index
    /// shape.
    pub fn single(field: usize) -> Self {
        IndexDef {
            parts: vec![field],
            unique: true,
        }
    }

    /// Extract this index's comparison key from a tuple.
    pub fn key_of(&self, tuple: &Tuple) -> Key {
        Key(self
            .parts
            .iter()
            .map(|&p| tuple.field(p).cloned().unwrap_or(FieldValue::Null))
            .collect())
    }

    /// Number of parts in this index's key.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }
}

/// A fully- or partially-specified comparison key: a sequence of field
/// values in index-part order. A partial key (fewer parts than the
/// index definition) is what ranged lookups and `track_gap`/`track_count`
/// use as their prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub Vec<FieldValue>);

impl Key {
    /// Build a key from explicit field values.
    pub fn new(parts: impl IntoIterator<Item = FieldValue>) -> Self {
        Key(parts.into_iter().collect())
    }

    /// Number of parts actually present in this key.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key carries zero parts (the empty prefix — "scan
    /// from the start").
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Truncate this key to its first `n` parts, producing the partial
    /// key a scan over an `n`-part prefix would compare against.
    pub fn prefix(&self, n: usize) -> Key {
        Key(self.0.iter().take(n).cloned().collect())
    }
}
