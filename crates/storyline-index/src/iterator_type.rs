//! Iterator/comparison shapes a scan or count can be parametrized by.
//!
//! A nearby-gap tie-break distinguishes `==`, `r==` (reverse-equal, i.e.
//! a full-key lookup scanned backwards), and the four ordered
//! comparisons. Kept as a small closed enum to avoid open virtual
//! dispatch over scan direction.
use std::cmp::Ordering;

/// How a scan over an ordered index is parametrized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IteratorType {
    /// Exact-key lookup, ascending tie-break.
    Eq,
    /// Exact-key lookup, descending tie-break (`r==`).
    ReverseEq,
    /// Strictly greater than the key.
    Gt,
    /// Greater than or equal to the key.
    Ge,
    /// Strictly less than the key.
    Lt,
    /// Less than or equal to the key.
    Le,
    /// Unordered full-index enumeration.
    All,
}

impl IteratorType {
    /// Whether this iterator walks the index in descending key order.
    pub fn is_descending(self) -> bool {
        matches!(self, IteratorType::ReverseEq | IteratorType::Lt | IteratorType::Le)
    }

    /// Whether this iterator type is an equality lookup (either
    /// direction), as opposed to a ranged scan.
    pub fn is_equality(self) -> bool {
        matches!(self, IteratorType::Eq | IteratorType::ReverseEq)
    }

    /// Given `cmp = candidate_key.cmp(&scan_key)`, whether a tuple with
    /// that comparison result lies within this iterator's matched range.
    /// Used by the writer-side gap scan and by `track_count`.
    pub fn matches(self, cmp: Ordering) -> bool {
        match self {
            IteratorType::Eq | IteratorType::ReverseEq => cmp == Ordering::Equal,
            IteratorType::Gt => cmp == Ordering::Greater,
            IteratorType::Ge => cmp != Ordering::Less,
            IteratorType::Lt => cmp == Ordering::Less,
            IteratorType::Le => cmp != Ordering::Greater,
            IteratorType::All => true,
        }
    }
}
