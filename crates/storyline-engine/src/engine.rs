//! The process-wide `Engine` singleton: owns the arenas, registries, and
//! per-space index slots that the six cooperating modules in this crate
//! all operate on.

use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use storyline_core::{IndexId, Psn, SpaceId, StorylineError, Tuple, TxnId, TxnStatus};
use storyline_index::{Index, Key};

use crate::gap::GapItem;
use crate::keys::{GapKey, ReaderKey, StmtKey, StoryKey};
use crate::story::Story;
use crate::tracker::ReadTracker;
use crate::transaction::{Stmt, Transaction};

/// Tunable engine configuration.
#[derive(Debug, Clone)]
pub struct MvccConfig {
    /// When `false`, `clarify` is the identity function, all trackers
    /// are no-ops, and stories exist only to exclude uncommitted DDL
    /// from snapshots.
    pub enabled: bool,
    /// Base number of `gc_step` iterations to run per driver tick,
    /// before the "plus backlog" term.
    pub gc_steps_base: usize,
    /// Additional `gc_step` iterations to run per story created since
    /// the last GC tick.
    pub gc_steps_per_story: usize,
    /// Capacity hint for the global read-view list.
    pub read_view_list_reserve: usize,
}

impl Default for MvccConfig {
    fn default() -> Self {
        MvccConfig {
            enabled: true,
            gc_steps_base: 2,
            gc_steps_per_story: 2,
            read_view_list_reserve: 16,
        }
    }
}

/// Per-space tuple statistics, updated by `commit_stmt`.
#[derive(Debug, Clone, Default)]
pub struct SpaceStats {
    /// Number of tuples currently visible in the primary index.
    pub tuple_count: u64,
    /// Number of stories currently dirty (referencing a tuple not yet
    /// retired) for this space.
    pub dirty_count: u64,
}

/// One index attached to a space, plus the gap trackers attached
/// directly to the index rather than to any story: the
/// anywhere/no-successor region.
pub struct IndexSlot {
    /// The physical index.
    pub index: Box<dyn Index>,
    /// Gap trackers (nearby/count/full-scan) with no story to attach to.
    pub global_gaps: Vec<GapKey>,
    /// The tail full-index, no-bound count item, kept for O(1) amortized
    /// duplicate detection on repeated full counts.
    pub count_tail: Option<GapKey>,
}

impl IndexSlot {
    fn new(index: Box<dyn Index>) -> Self {
        IndexSlot {
            index,
            global_gaps: Vec::new(),
            count_tail: None,
        }
    }
}

/// A typed table: a primary index and zero or more secondary indexes,
/// attached to the engine.
pub struct Space {
    /// Stable identity.
    pub id: SpaceId,
    /// Index 0 is always the primary index.
    pub indexes: Vec<IndexSlot>,
    /// Statistics `commit_stmt` updates.
    pub stats: SpaceStats,
    /// Cleared by `invalidate_space`; once `false`, no further
    /// statement or tracker may reference this space.
    pub valid: bool,
}

impl Space {
    /// Number of indexes at creation time.
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }
}

/// The engine singleton: arenas for every arena-allocated record type,
/// the per-tuple story hash, the point-hole hash, the global read-view
/// list, and the space/transaction registries.
pub struct Engine {
    pub(crate) config: MvccConfig,
    pub(crate) stories: SlotMap<StoryKey, Story>,
    pub(crate) readers: SlotMap<ReaderKey, ReadTracker>,
    pub(crate) gaps: SlotMap<GapKey, GapItem>,
    pub(crate) stmts: SlotMap<StmtKey, Stmt>,
    pub(crate) spaces: FxHashMap<SpaceId, Space>,
    pub(crate) txns: FxHashMap<TxnId, Transaction>,
    /// Per-tuple hash: `Tuple::key()` -> the story wrapping it, published
    /// by `story_new`.
    pub(crate) tuple_story: FxHashMap<storyline_core::tuple::TupleKey, StoryKey>,
    /// Point-hole hash table, keyed by (space, index, key bytes); the
    /// `Vec<GapKey>` is the collision list for multiple waiters on the
    /// same key.
    pub(crate) point_holes: FxHashMap<(SpaceId, IndexId, Key), Vec<GapKey>>,
    /// Global read-view list in ascending `rv_psn` order, maintained by
    /// `send_to_read_view`.
    pub(crate) read_view_list: Vec<TxnId>,
    /// All stories ever created, in creation order, for `gc_step`'s
    /// round-robin cursor. Entries whose story has already been
    /// collected are skipped lazily.
    pub(crate) story_list: Vec<StoryKey>,
    pub(crate) gc_cursor: usize,
    next_psn: u64,
    next_txn_id: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(MvccConfig::default())
    }
}

impl Engine {
    /// Construct a fresh engine with the given configuration.
    pub fn new(config: MvccConfig) -> Self {
        let read_view_list = Vec::with_capacity(config.read_view_list_reserve);
        Engine {
            config,
            stories: SlotMap::with_key(),
            readers: SlotMap::with_key(),
            gaps: SlotMap::with_key(),
            stmts: SlotMap::with_key(),
            spaces: FxHashMap::default(),
            txns: FxHashMap::default(),
            tuple_story: FxHashMap::default(),
            point_holes: FxHashMap::default(),
            read_view_list,
            story_list: Vec::new(),
            gc_cursor: 0,
            next_psn: 1,
            next_txn_id: 1,
        }
    }

    /// Whether MVCC bookkeeping is active.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Register a new space, attaching its indexes (index 0 primary).
    pub fn register_space(&mut self, id: SpaceId, indexes: Vec<Box<dyn Index>>) {
        let space = Space {
            id,
            indexes: indexes.into_iter().map(IndexSlot::new).collect(),
            stats: SpaceStats::default(),
            valid: true,
        };
        self.spaces.insert(id, space);
    }

    /// Begin a new transaction and return its id.
    pub fn begin(&mut self, isolation: storyline_core::Isolation) -> TxnId {
        let id = TxnId::new(self.next_txn_id);
        self.next_txn_id += 1;
        self.txns.insert(id, Transaction::new(id, isolation));
        id
    }

    /// Allocate the next monotonic PSN; PSNs are strictly increasing
    /// across prepared transactions.
    pub(crate) fn alloc_psn(&mut self) -> Psn {
        let p = Psn::new(self.next_psn);
        self.next_psn += 1;
        p
    }

    pub(crate) fn space(&self, id: SpaceId) -> &Space {
        self.spaces
            .get(&id)
            .expect("space id must be registered before use")
    }

    pub(crate) fn space_mut(&mut self, id: SpaceId) -> &mut Space {
        self.spaces
            .get_mut(&id)
            .expect("space id must be registered before use")
    }

    pub(crate) fn txn(&self, id: TxnId) -> &Transaction {
        self.txns.get(&id).expect("unknown transaction id")
    }

    pub(crate) fn txn_mut(&mut self, id: TxnId) -> &mut Transaction {
        self.txns.get_mut(&id).expect("unknown transaction id")
    }

    /// Look up a transaction's current PSN-based read-view ceiling.
    pub fn rv_psn(&self, id: TxnId) -> Option<Psn> {
        self.txns.get(&id).and_then(|t| t.rv_psn)
    }

    /// A transaction's own PSN, `Psn::UNPREPARED` until `prepare_stmt`
    /// assigns one.
    pub fn txn_psn(&self, id: TxnId) -> Psn {
        self.txn(id).psn
    }

    /// The lowest `rv_psn` across all currently read-view transactions,
    /// used by `gc_step`'s classification rule 2. `None` if no
    /// transaction is currently in a read view.
    pub fn lowest_rv_psn(&self) -> Option<Psn> {
        self.txns
            .values()
            .filter_map(|t| t.rv_psn)
            .min()
    }

    /// Require that `space` has not been invalidated, surfacing a
    /// space-invalidated error otherwise.
    pub(crate) fn require_valid_space(&self, id: SpaceId) -> Result<(), StorylineError> {
        if self.space(id).valid {
            Ok(())
        } else {
            Err(StorylineError::SpaceInvalidated(id))
        }
    }

    /// Borrow the physical index `index` of `space` mutably. The index
    /// layer is an external collaborator the embedding database already
    /// holds a handle to; this accessor is that handle for callers
    /// (including this crate's own facade) that drive a full
    /// lookup-then-`clarify` read cycle from outside `storyline-engine`.
    pub fn index_mut(&mut self, space: SpaceId, index: usize) -> &mut dyn Index {
        self.space_mut(space).indexes[index].index.as_mut()
    }

    /// This space's index definition (field positions, uniqueness),
    /// needed by callers to build a [`Key`] before calling [`Self::index_mut`].
    pub fn index_def(&self, space: SpaceId, index: usize) -> &storyline_index::IndexDef {
        self.space(space).indexes[index].index.def()
    }

    /// Current tuple/dirty-story statistics for `space`, updated by
    /// `commit_stmt`.
    pub fn stats(&self, space: SpaceId) -> &SpaceStats {
        &self.space(space).stats
    }

    /// Number of indexes attached to `space`.
    pub fn index_count(&self, space: SpaceId) -> usize {
        self.space(space).index_count()
    }

    /// Whether `id` may currently see prepared-but-unconfirmed versions,
    /// the `is_prepared_ok` input `clarify` needs for a non-system space.
    /// Use this from outside the crate instead of reaching into
    /// `Transaction` directly; `Transaction` itself stays `pub(crate)`.
    pub fn txn_isolation_sees_prepared(&self, id: TxnId) -> bool {
        self.txn(id).sees_prepared()
    }

    /// `id`'s current lifecycle state.
    pub fn txn_status(&self, id: TxnId) -> TxnStatus {
        self.txn(id).status
    }

    /// Total number of point-hole trackers currently installed across
    /// every space, for tests and diagnostics.
    pub fn point_hole_count(&self) -> usize {
        self.point_holes.values().map(|v| v.len()).sum()
    }

    /// Find or create the story wrapping `tuple` in `space`, used by
    /// trackers that must attach to a clean (story-less) tuple.
    pub(crate) fn story_for_tuple(&mut self, space: SpaceId, tuple: &Tuple) -> StoryKey {
        if let Some(&key) = self.tuple_story.get(&tuple.key()) {
            return key;
        }
        crate::story::story_new(self, space, tuple.clone(), false)
    }
}
