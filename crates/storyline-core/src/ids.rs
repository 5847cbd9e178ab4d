//! Small dense identifiers used throughout the engine.
//!
//! These are cheap, `Copy` integers rather than UUIDs: spaces and
//! indexes are assigned by the embedding database at DDL time, and
//! PSNs/transaction ids are counters on the engine's hot path, so
//! UUID-style allocation would be the wrong shape here.

use std::fmt;

/// Identifies a space (a typed table with a primary key and zero or more
/// secondary keys) within the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceId(pub u32);

impl SpaceId {
    /// Wrap a raw space id assigned by the embedding database.
    pub fn new(raw: u32) -> Self {
        SpaceId(raw)
    }

    /// The raw integer id.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space#{}", self.0)
    }
}

/// Identifies one index (ordered or unordered) attached to a space.
/// Index 0 is always the primary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexId(pub u32);

impl IndexId {
    /// The conventional id of a space's primary index.
    pub const PRIMARY: IndexId = IndexId(0);

    /// Wrap a raw index id.
    pub fn new(raw: u32) -> Self {
        IndexId(raw)
    }

    /// The raw integer id.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the primary index of its space.
    pub fn is_primary(self) -> bool {
        self == Self::PRIMARY
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index#{}", self.0)
    }
}

/// Identifies a transaction for the lifetime of the engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Wrap a raw transaction id.
    pub fn new(raw: u64) -> Self {
        TxnId(raw)
    }

    /// The raw integer id.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// A prepare sequence number.
///
/// 0 means "not prepared." PSNs are assigned monotonically at
/// preparation and induce the serialization order on prepared writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Psn(u64);

impl Psn {
    /// The sentinel meaning "this statement/story has not been prepared."
    pub const UNPREPARED: Psn = Psn(0);

    /// Wrap a raw PSN. Callers are responsible for monotonicity; the
    /// engine's PSN allocator (`Engine::next_psn`) is the only intended
    /// source of non-sentinel values.
    pub fn new(raw: u64) -> Self {
        Psn(raw)
    }

    /// The raw counter value, 0 meaning unprepared.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Whether this PSN represents an actual (non-sentinel) prepare.
    pub fn is_prepared(self) -> bool {
        self.0 != 0
    }
}

impl Default for Psn {
    fn default() -> Self {
        Psn::UNPREPARED
    }
}

impl fmt::Display for Psn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_prepared() {
            write!(f, "psn:{}", self.0)
        } else {
            write!(f, "psn:none")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psn_unprepared_sentinel() {
        assert!(!Psn::UNPREPARED.is_prepared());
        assert_eq!(Psn::UNPREPARED.raw(), 0);
        assert_eq!(Psn::default(), Psn::UNPREPARED);
    }

    #[test]
    fn psn_ordering_is_numeric() {
        assert!(Psn::new(5) < Psn::new(10));
        assert!(Psn::UNPREPARED < Psn::new(1));
    }

    #[test]
    fn index_primary_is_zero() {
        assert!(IndexId::PRIMARY.is_primary());
        assert_eq!(IndexId::PRIMARY.raw(), 0);
        assert!(!IndexId::new(1).is_primary());
    }

    #[test]
    fn ids_display() {
        assert_eq!(SpaceId::new(3).to_string(), "space#3");
        assert_eq!(IndexId::new(1).to_string(), "index#1");
        assert_eq!(TxnId::new(42).to_string(), "txn#42");
        assert_eq!(Psn::new(7).to_string(), "psn:7");
        assert_eq!(Psn::UNPREPARED.to_string(), "psn:none");
    }
}
