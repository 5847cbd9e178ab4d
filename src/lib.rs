//! `storyline`: the in-memory MVCC transaction-history engine, root
//! facade crate.
//!
//! This crate is the thin top-level layer: it re-exports the lower
//! crates, adds a small [`Storyline`] driver that ties a physical index
//! lookup to the visibility resolver the way an embedding database
//! would, and hosts the end-to-end scenario tests and benchmarks.
//! Internal crates (`storyline-core`, `storyline-index`,
//! `storyline-engine`) are not meant to be depended on directly by
//! callers outside this workspace.

#![warn(clippy::all)]

pub use storyline_core::{
    FieldValue, IndexId, Isolation, Psn, Result, SpaceId, StorylineError, Tuple, TxnId, TxnStatus,
};
pub use storyline_engine::{
    Clarified, Engine, GapItem, GapKind, GapLocation, IndexSlot, Link, MvccConfig, ReadTracker,
    Space, SpaceStats, Stmt, StmtMode, Story, StoryStatus, Transaction,
};
pub use storyline_index::{
    FunctionalIndex, HashIndex, Index, IndexDef, IteratorType, Key, OrderedIndex, ReplaceMode,
    ReplaceOutcome,
};

use storyline_engine::keys::{GapKey, StmtKey};
use storyline_engine::{gap, gc, lifecycle, visibility};

/// A snapshot-scoped visibility view, returned by [`Storyline::snapshot_cleaner_create`].
///
/// Used when a dirty tuple is handed out of the engine's scope (e.g. for
/// an on-disk snapshot walk) and the caller needs the version actually
/// committed as of a frozen read-view PSN rather than whatever the live
/// chain head happens to be right now.
pub struct SnapshotCleaner {
    space: SpaceId,
    index: usize,
    /// The PSN ceiling this cleaner is scoped to: only versions with
    /// `add_psn <= at_psn` and no earlier-or-equal `del_psn` are visible
    /// through it. `None` means "everything committed so far" (no
    /// snapshot in progress yet).
    at_psn: Option<Psn>,
}

impl SnapshotCleaner {
    /// The space this cleaner resolves versions for.
    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// The index this cleaner resolves versions for.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// The MVCC engine driver: owns an [`Engine`] and exposes the operations
/// a caller drives toward transactions, wiring the physical index
/// lookup this engine treats as an external collaborator to the
/// visibility resolver, tracker installation, and statement lifecycle.
pub struct Storyline {
    engine: Engine,
}

impl Default for Storyline {
    fn default() -> Self {
        Storyline::new(MvccConfig::default())
    }
}

impl Storyline {
    /// Construct a fresh driver with the given configuration.
    pub fn new(config: MvccConfig) -> Self {
        Storyline { engine: Engine::new(config) }
    }

    /// Borrow the underlying engine. Exposed for callers (and this
    /// crate's own tests) that need lower-level access than the
    /// convenience methods below provide.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Mutably borrow the underlying engine.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Register a new space, attaching a per-space story list. Index 0
    /// is always the primary index.
    pub fn register_space(&mut self, id: SpaceId, indexes: Vec<Box<dyn Index>>) {
        self.engine.register_space(id, indexes);
    }

    /// Begin a new transaction.
    pub fn begin(&mut self, isolation: Isolation) -> TxnId {
        self.engine.begin(isolation)
    }

    /// Whether `txn` is currently allowed to see prepared-but-unconfirmed
    /// versions. `is_system_space` always answers `true`: system spaces
    /// always see prepared versions. `txn = None` models an autocommit
    /// read, which behaves like `READ_COMMITTED` (sees anything already
    /// assigned a PSN).
    pub fn is_prepared_ok(&self, txn: Option<TxnId>, is_system_space: bool) -> bool {
        if is_system_space {
            return true;
        }
        match txn {
            None => true,
            Some(t) => self.engine.txn_isolation_sees_prepared(t),
        }
    }

    /// Clarify a physical tuple the index layer already handed back.
    /// Prefer [`Self::read`] when the caller does not already hold the
    /// physical lookup result.
    pub fn clarify(
        &mut self,
        txn: Option<TxnId>,
        space: SpaceId,
        index: usize,
        head: &Tuple,
        is_prepared_ok: bool,
    ) -> Clarified {
        visibility::clarify(&mut self.engine, txn, space, index, head, is_prepared_ok)
    }

    /// Perform a full key lookup: physically look up `key` in `index`,
    /// then clarify the result against `txn`'s viewpoint, installing the
    /// appropriate read or gap tracker as a side effect. If the physical
    /// lookup itself returns nothing, installs a point-hole tracker for a
    /// full key on a unique index, else a nearby gap.
    pub fn read(&mut self, txn: Option<TxnId>, space: SpaceId, index: usize, key: &Key) -> Clarified {
        let is_ok = self.is_prepared_ok(txn, false);
        let head = self.engine.index_mut(space, index).lookup(key);
        match head {
            Some(tuple) => self.clarify(txn, space, index, &tuple, is_ok),
            None => {
                if let Some(t) = txn {
                    let def = self.engine.index_def(space, index).clone();
                    if def.unique && key.len() == def.part_count() {
                        gap::track_point(&mut self.engine, t, space, index, key.clone());
                    } else {
                        let successor = self.engine.index_mut(space, index).successor_of(key);
                        gap::track_gap(
                            &mut self.engine,
                            t,
                            space,
                            index,
                            successor.as_ref(),
                            IteratorType::Eq,
                            key.clone(),
                            key.len(),
                        );
                    }
                }
                Clarified { tuple: None, is_own_change: false }
            }
        }
    }

    /// Record a full-key miss in a unique index.
    pub fn track_point(&mut self, txn: TxnId, space: SpaceId, index: usize, key: Key) -> GapKey {
        gap::track_point(&mut self.engine, txn, space, index, key)
    }

    /// Record a near miss during an ordered scan.
    pub fn track_gap(
        &mut self,
        txn: TxnId,
        space: SpaceId,
        index: usize,
        successor: Option<&Tuple>,
        iterator_type: IteratorType,
        key: Key,
        part_count: usize,
    ) -> GapKey {
        gap::track_gap(&mut self.engine, txn, space, index, successor, iterator_type, key, part_count)
    }

    /// Record a count observation and return the number of currently
    /// invisible matching tuples.
    #[allow(clippy::too_many_arguments)]
    pub fn track_count_until(
        &mut self,
        txn: TxnId,
        space: SpaceId,
        index: usize,
        iterator_type: IteratorType,
        key: Key,
        part_count: usize,
        until: Option<Tuple>,
    ) -> usize {
        let is_ok = self.is_prepared_ok(Some(txn), false);
        let is_visible = |engine: &Engine, t: &Tuple| visibility::is_visible_for_count(engine, txn, space, index, t, is_ok);
        gap::track_count_until(&mut self.engine, txn, space, index, iterator_type, key, part_count, until, is_visible)
    }

    /// Record a full unordered enumeration.
    pub fn track_full_scan(&mut self, txn: TxnId, space: SpaceId, index: usize) -> GapKey {
        gap::track_full_scan(&mut self.engine, txn, space, index)
    }

    /// Add an insert statement to history.
    pub fn insert(&mut self, txn: TxnId, space: SpaceId, tuple: Tuple, mode: StmtMode) -> Result<StmtKey> {
        lifecycle::add_stmt(&mut self.engine, txn, space, None, Some(tuple), mode)
    }

    /// Add a delete statement to history. `old` must already be
    /// clarified and dirty.
    pub fn delete(&mut self, txn: TxnId, space: SpaceId, old: Tuple) -> Result<StmtKey> {
        lifecycle::add_stmt(&mut self.engine, txn, space, Some(old), None, StmtMode::Delete)
    }

    /// Add an update-shaped replace to history in one statement: `old`
    /// must already be clarified and dirty, `new` is the version
    /// replacing it.
    pub fn replace(&mut self, txn: TxnId, space: SpaceId, old: Tuple, new: Tuple) -> Result<StmtKey> {
        lifecycle::add_stmt(&mut self.engine, txn, space, Some(old), Some(new), StmtMode::Update)
    }

    /// Assign a PSN and cascade conflicts.
    pub fn prepare(&mut self, stmt: StmtKey) -> Result<()> {
        lifecycle::prepare_stmt(&mut self.engine, stmt)
    }

    /// Commit a prepared statement.
    pub fn commit(&mut self, stmt: StmtKey) {
        lifecycle::commit_stmt(&mut self.engine, stmt);
    }

    /// Roll back a statement, prepared or not.
    pub fn rollback(&mut self, stmt: StmtKey) {
        lifecycle::rollback_stmt(&mut self.engine, stmt);
    }

    /// Idempotently abort `txn`.
    pub fn abort(&mut self, txn: TxnId) {
        lifecycle::abort_with_conflict(&mut self.engine, txn);
    }

    /// Whether `txn` has been marked for abort by the conflict cascade
    /// and should be rejected at its next control return.
    pub fn is_aborted(&self, txn: TxnId) -> bool {
        self.engine.txn_status(txn) == TxnStatus::Aborted
    }

    /// DDL hook: invalidate a space, aborting every dependent transaction
    /// first, then baking `ddl_owner`'s visible versions into the
    /// physical indexes and destroying every story.
    pub fn invalidate_space(&mut self, space: SpaceId, ddl_owner: TxnId) {
        lifecycle::invalidate_space(&mut self.engine, space, ddl_owner);
    }

    /// Run `iterations` garbage-collection classification steps. Also
    /// run opportunistically after every commit/rollback; exposed here
    /// for callers that want to drive GC explicitly (e.g. benchmarks, or
    /// a background tick).
    pub fn gc_step(&mut self, iterations: usize) {
        gc::gc_step(&mut self.engine, iterations);
    }

    /// Create a snapshot-scoped cleaner frozen at the lowest currently
    /// active read-view PSN, or unfrozen ("everything committed so far")
    /// if no transaction is currently in a read view.
    pub fn snapshot_cleaner_create(&self, space: SpaceId, index: usize) -> SnapshotCleaner {
        SnapshotCleaner {
            space,
            index,
            at_psn: self.engine.lowest_rv_psn(),
        }
    }

    /// Resolve the version of `head` visible at `cleaner`'s frozen PSN.
    /// Unlike [`Self::clarify`], this never installs a read or gap
    /// tracker: the caller is a snapshot walk, not a transaction.
    pub fn snapshot_cleaner_clarify(&self, cleaner: &SnapshotCleaner, head: &Tuple) -> Option<Tuple> {
        visibility::clarify_at_psn(&self.engine, cleaner.index, head, cleaner.at_psn)
    }

    /// Release a snapshot cleaner. No-op in this implementation, since
    /// the cleaner owns no arena state; kept to round out the
    /// `snapshot_cleaner_*` facility's three operations.
    pub fn snapshot_cleaner_destroy(&mut self, _cleaner: SnapshotCleaner) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_space(id: u32) -> SpaceId {
        SpaceId::new(id)
    }

    #[test]
    fn read_of_nothing_installs_point_hole() {
        let mut db = Storyline::default();
        let space = hash_space(1);
        db.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0)))]);
        let txn = db.begin(Isolation::ReadCommitted);
        let out = db.read(Some(txn), space, 0, &Key::new([FieldValue::Int(1)]));
        assert!(out.tuple.is_none());
        assert_eq!(db.engine().point_hole_count(), 1);
    }

    #[test]
    fn insert_then_read_own_change() {
        let mut db = Storyline::default();
        let space = hash_space(1);
        db.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0)))]);
        let txn = db.begin(Isolation::ReadCommitted);
        let tuple = Tuple::new([FieldValue::Int(1)]);
        db.insert(txn, space, tuple.clone(), StmtMode::Insert).unwrap();
        let out = db.clarify(Some(txn), space, 0, &tuple, true);
        assert!(out.is_own_change);
    }

    #[test]
    fn commit_makes_tuple_visible_to_others() {
        let mut db = Storyline::default();
        let space = hash_space(1);
        db.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0)))]);
        let writer = db.begin(Isolation::ReadCommitted);
        let tuple = Tuple::new([FieldValue::Int(1)]);
        let stmt = db.insert(writer, space, tuple.clone(), StmtMode::Insert).unwrap();
        db.prepare(stmt).unwrap();
        db.commit(stmt);

        let reader = db.begin(Isolation::ReadConfirmed);
        let out = db.read(Some(reader), space, 0, &Key::new([FieldValue::Int(1)]));
        assert!(out.tuple.is_some());
    }
}
