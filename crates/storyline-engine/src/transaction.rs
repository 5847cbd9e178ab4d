//! Transaction and statement records.
//!
//! The transaction object itself is out of this engine's scope; what's
//! modeled here is exactly the slice of fields the engine reads and
//! writes plus the bookkeeping (`stmts`, arena keys) needed to drive the
//! lifecycle from tests and from an embedding database.

use storyline_core::{Isolation, Psn, SpaceId, TxnId, TxnStatus};

use crate::keys::{GapKey, ReaderKey, StmtKey, StoryKey};

/// What a statement does to the chain it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtMode {
    /// Inserts a new version only.
    Insert,
    /// Deletes a version only (caller has already clarified `old`).
    Delete,
    /// Deletes the old version and inserts a new one (an update/replace).
    Update,
}

/// A single write within a transaction.
#[derive(Debug, Clone)]
pub struct Stmt {
    /// This statement's own arena key (set once inserted).
    pub key: StmtKey,
    /// Owning transaction.
    pub txn: TxnId,
    /// Space this statement wrote to.
    pub space: SpaceId,
    /// What kind of write this is.
    pub mode: StmtMode,
    /// The story this statement introduces, if any (`add_stmt` owner).
    pub add_story: Option<StoryKey>,
    /// The story this statement marks for deletion, if any (`del_stmt`
    /// owner). Concurrent deleters of the same story form a list — here
    /// realized as a `Vec<StmtKey>` on
    /// the [`crate::story::Story`] itself rather than an intrusive
    /// `next` pointer on `Stmt`, which is functionally equivalent and
    /// simpler to garbage-collect; see `DESIGN.md`.
    pub del_story: Option<StoryKey>,
}

/// The fields the engine reads and writes on a transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Stable identity.
    pub id: TxnId,
    /// Assigned by `prepare_stmt`; `Psn::UNPREPARED` until then.
    pub psn: Psn,
    /// `Some(p)` iff this transaction has been sent to a read view; `p`
    /// is the PSN ceiling beyond which it must not observe changes.
    pub rv_psn: Option<Psn>,
    /// The PSN that most recently caused a read-view demotion, tracked
    /// so `rollback_stmt` can decide whether to re-promote (see
    /// `DESIGN.md`).
    pub rv_cause: Option<Psn>,
    /// Requested isolation level.
    pub isolation: Isolation,
    /// Lifecycle state.
    pub status: TxnStatus,
    /// Read trackers pinning stories this transaction has observed,
    /// front = most recently touched.
    pub read_set: Vec<ReaderKey>,
    /// Gap trackers (inplace/nearby/count/full-scan) this transaction
    /// holds.
    pub gap_list: Vec<GapKey>,
    /// Point-hole trackers this transaction holds.
    pub point_holes: Vec<GapKey>,
    /// This transaction's own statements, in issue order.
    pub stmts: Vec<StmtKey>,
    /// Whether this transaction has performed DDL (not interpreted by
    /// this engine beyond being a field it carries).
    pub is_schema_changed: bool,
    /// Whether this transaction has issued at least one write statement
    /// yet; drives `Isolation::BestEffort::sees_prepared`.
    pub has_written: bool,
}

impl Transaction {
    /// A freshly begun, in-progress transaction.
    pub fn new(id: TxnId, isolation: Isolation) -> Self {
        Transaction {
            id,
            psn: Psn::UNPREPARED,
            rv_psn: None,
            rv_cause: None,
            isolation,
            status: TxnStatus::InProgress,
            read_set: Vec::new(),
            gap_list: Vec::new(),
            point_holes: Vec::new(),
            stmts: Vec::new(),
            is_schema_changed: false,
            has_written: false,
        }
    }

    /// Whether this transaction is currently demoted to a read view.
    pub fn in_read_view(&self) -> bool {
        self.rv_psn.is_some()
    }

    /// The `is_prepared_ok` input to the visibility resolver, for a
    /// non-system space.
    pub fn sees_prepared(&self) -> bool {
        self.isolation.sees_prepared(self.has_written)
    }
}
