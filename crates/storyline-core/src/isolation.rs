//! Isolation levels and transaction lifecycle states.

use std::fmt;

/// Isolation level a transaction requests. Drives `is_prepared_ok` in the
/// visibility resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Isolation {
    /// Sees prepared-but-unconfirmed writes unconditionally.
    ReadCommitted,
    /// Never sees prepared-but-unconfirmed writes.
    ReadConfirmed,
    /// Never sees prepared-but-unconfirmed writes; in addition requires
    /// the strictest serialization ordering the engine offers.
    Linearizable,
    /// Sees prepared writes only until its first own write statement;
    /// after that, behaves like `ReadConfirmed` to avoid trivial
    /// write-write conflicts against its own in-progress peers.
    BestEffort,
}

impl Isolation {
    /// Whether a transaction at this isolation level may see a prepared
    /// (not yet committed) version, given whether it has already issued
    /// a write statement. System spaces always answer `true` via a
    /// separate caller-side check.
    pub fn sees_prepared(self, has_written: bool) -> bool {
        match self {
            Isolation::ReadCommitted => true,
            Isolation::ReadConfirmed | Isolation::Linearizable => false,
            Isolation::BestEffort => has_written,
        }
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Isolation::ReadCommitted => "read-committed",
            Isolation::ReadConfirmed => "read-confirmed",
            Isolation::Linearizable => "linearizable",
            Isolation::BestEffort => "best-effort",
        };
        f.write_str(s)
    }
}

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnStatus {
    /// Executing; may read and write, not yet assigned a PSN.
    InProgress,
    /// Demoted: continues to execute but is pinned to a snapshot frozen
    /// at `rv_psn`, its read view.
    InReadView,
    /// Assigned a PSN by `prepare_stmt`; durability (WAL ack) pending
    /// above this engine.
    Prepared,
    /// Terminally failed; no further statements may be added.
    Aborted,
    /// Terminally succeeded; all of its stories have been unlinked from
    /// `add_stmt`/`del_stmt` fields.
    Committed,
}

impl TxnStatus {
    /// Whether the transaction may still accept new statements.
    pub fn is_active(self) -> bool {
        matches!(self, TxnStatus::InProgress | TxnStatus::InReadView)
    }

    /// Whether the transaction has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnStatus::Aborted | TxnStatus::Committed)
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnStatus::InProgress => "in-progress",
            TxnStatus::InReadView => "in-read-view",
            TxnStatus::Prepared => "prepared",
            TxnStatus::Aborted => "aborted",
            TxnStatus::Committed => "committed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_committed_always_sees_prepared() {
        assert!(Isolation::ReadCommitted.sees_prepared(false));
        assert!(Isolation::ReadCommitted.sees_prepared(true));
    }

    #[test]
    fn read_confirmed_never_sees_prepared() {
        assert!(!Isolation::ReadConfirmed.sees_prepared(false));
        assert!(!Isolation::ReadConfirmed.sees_prepared(true));
    }

    #[test]
    fn linearizable_never_sees_prepared() {
        assert!(!Isolation::Linearizable.sees_prepared(true));
    }

    #[test]
    fn best_effort_depends_on_own_writes() {
        assert!(Isolation::BestEffort.sees_prepared(true));
        assert!(!Isolation::BestEffort.sees_prepared(false));
    }

    #[test]
    fn status_active_and_terminal() {
        assert!(TxnStatus::InProgress.is_active());
        assert!(TxnStatus::InReadView.is_active());
        assert!(!TxnStatus::Prepared.is_active());
        assert!(TxnStatus::Aborted.is_terminal());
        assert!(TxnStatus::Committed.is_terminal());
        assert!(!TxnStatus::InProgress.is_terminal());
    }
}
