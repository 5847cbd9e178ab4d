//! The tuple type: an immutable, reference-counted, schema-conformant row.
//!
//! A tuple carries a flag `dirty`: true iff at least one story references
//! it. Tuples are owned jointly by stories, by the primary index (when
//! physically present), and transiently by readers.
//!
//! The engine is single-threaded-cooperative, so tuples use `Rc`, not
//! `Arc`: there is never a second execution context that could race on
//! the dirty flag or the reference count.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

/// A single field of a tuple.
///
/// Intentionally small and closed: the engine never interprets field
/// contents itself (comparison is delegated to the index layer), this
/// enum only needs to be storable, cloneable, and comparable enough for
/// the bundled index implementations to order/hash on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldValue {
    /// SQL-NULL-equivalent absence of a value.
    Null,
    /// A boolean field.
    Bool(bool),
    /// A signed 64-bit integer field.
    Int(i64),
    /// A UTF-8 string field.
    Str(String),
    /// An opaque byte-string field.
    Bytes(Vec<u8>),
}

/// A monotonically assigned tuple identity, used by the engine's
/// per-tuple story hash, which `story_new` publishes into when it
/// allocates a story.
///
/// This is an implementation identity, not a schema field: two tuples
/// with identical field contents still get distinct `TupleKey`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TupleKey(u64);

static NEXT_TUPLE_KEY: AtomicU64 = AtomicU64::new(1);

struct TupleInner {
    key: TupleKey,
    fields: SmallVec<[FieldValue; 4]>,
    dirty: Cell<bool>,
}

/// An immutable, reference-counted, schema-conformant row.
///
/// Clone is cheap (`Rc::clone`); all clones refer to the same logical
/// tuple and share the same `dirty` flag and `TupleKey`.
#[derive(Clone)]
pub struct Tuple(Rc<TupleInner>);

impl Tuple {
    /// Construct a new tuple from its fields. Not yet referenced by any
    /// story, so `is_dirty()` starts `false`.
    pub fn new(fields: impl IntoIterator<Item = FieldValue>) -> Self {
        Tuple(Rc::new(TupleInner {
            key: TupleKey(NEXT_TUPLE_KEY.fetch_add(1, Ordering::Relaxed)),
            fields: fields.into_iter().collect(),
            dirty: Cell::new(false),
        }))
    }

    /// The tuple's implementation identity.
    pub fn key(&self) -> TupleKey {
        self.0.key
    }

    /// Read a field by position, if present.
    pub fn field(&self, index: usize) -> Option<&FieldValue> {
        self.0.fields.get(index)
    }

    /// All fields, in schema order.
    pub fn fields(&self) -> &[FieldValue] {
        &self.0.fields
    }

    /// Whether at least one story currently references this tuple.
    pub fn is_dirty(&self) -> bool {
        self.0.dirty.get()
    }

    /// Mark this tuple dirty. Called by `story_new` when a story is
    /// created for it.
    pub fn mark_dirty(&self) {
        self.0.dirty.set(true);
    }

    /// Clear the dirty flag. Called by the garbage collector once no
    /// story references this tuple anymore.
    pub fn clear_dirty(&self) {
        self.0.dirty.set(false);
    }

    /// The number of live references to this tuple (stories + index +
    /// transient holders). Used by invariant tests.
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Identity comparison: true iff both `Tuple`s wrap the same
    /// allocation (not merely equal field contents).
    pub fn is_same_allocation(&self, other: &Tuple) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tuple")
            .field("key", &self.0.key)
            .field("fields", &self.0.fields)
            .field("dirty", &self.0.dirty.get())
            .finish()
    }
}

impl PartialEq for Tuple {
    /// Tuples compare equal iff they are the same allocation. Field-wise
    /// equality is an index-layer concern (`Index::compare`), not an
    /// identity concern.
    fn eq(&self, other: &Self) -> bool {
        self.is_same_allocation(other)
    }
}

impl Eq for Tuple {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tuple_is_clean() {
        let t = Tuple::new([FieldValue::Int(1)]);
        assert!(!t.is_dirty());
    }

    #[test]
    fn mark_and_clear_dirty() {
        let t = Tuple::new([FieldValue::Int(1)]);
        t.mark_dirty();
        assert!(t.is_dirty());
        t.clear_dirty();
        assert!(!t.is_dirty());
    }

    #[test]
    fn clone_shares_identity_and_dirty_flag() {
        let t1 = Tuple::new([FieldValue::Int(1)]);
        let t2 = t1.clone();
        assert!(t1.is_same_allocation(&t2));
        assert_eq!(t1.key(), t2.key());
        t1.mark_dirty();
        assert!(t2.is_dirty());
    }

    #[test]
    fn distinct_tuples_get_distinct_keys_even_if_equal_fields() {
        let t1 = Tuple::new([FieldValue::Int(1)]);
        let t2 = Tuple::new([FieldValue::Int(1)]);
        assert_ne!(t1.key(), t2.key());
        assert!(!t1.is_same_allocation(&t2));
    }

    #[test]
    fn field_access() {
        let t = Tuple::new([FieldValue::Int(7), FieldValue::Str("x".into())]);
        assert_eq!(t.field(0), Some(&FieldValue::Int(7)));
        assert_eq!(t.field(1), Some(&FieldValue::Str("x".into())));
        assert_eq!(t.field(2), None);
        assert_eq!(t.fields().len(), 2);
    }

    #[test]
    fn strong_count_tracks_clones() {
        let t1 = Tuple::new([FieldValue::Null]);
        assert_eq!(t1.strong_count(), 1);
        let t2 = t1.clone();
        assert_eq!(t1.strong_count(), 2);
        drop(t2);
        assert_eq!(t1.strong_count(), 1);
    }
}
