//! The crate-wide error type.
//!
//! The engine's error taxonomy has exactly two *recoverable* members —
//! duplicate-key violation and conflict/abort — everything else
//! (allocation failure, functional-index computation failure) is a panic,
//! because the engine's contract assumes those paths are infallible (see
//! `Story::new` and the functional-key cache). `StorylineError` therefore
//! only needs variants for the recoverable half.

use thiserror::Error;

use crate::ids::{IndexId, SpaceId, TxnId};

/// Result type alias for storyline engine operations.
pub type Result<T> = std::result::Result<T, StorylineError>;

/// Errors the engine can return to a caller.
///
/// One variant per recoverable condition, `#[error("...")]` messages, no
/// variant that wraps an opaque `String` when a structured field will do.
#[derive(Debug, Error)]
pub enum StorylineError {
    /// `add_stmt`'s insert path found a visible version already occupying
    /// the key in a unique index.
    #[error("duplicate key in {index} for space {space}")]
    DuplicateKey {
        /// The space the insert targeted.
        space: SpaceId,
        /// The index whose duplicate-key check failed.
        index: IndexId,
    },

    /// The transaction has been marked for abort by the conflict cascade;
    /// surfaced to the caller on the next statement or at commit time.
    #[error("transaction {0} has been aborted by conflict")]
    AbortedByConflict(TxnId),

    /// A statement or tracker was issued against a space that has been
    /// invalidated by a concurrent DDL operation.
    #[error("space {0} has been invalidated")]
    SpaceInvalidated(SpaceId),

    /// An index definition the engine cannot support was attached to a
    /// space.
    #[error("index {index} on space {space} is unsupported: {reason}")]
    UnsupportedIndex {
        /// The space the index was attached to.
        space: SpaceId,
        /// The index that was rejected.
        index: IndexId,
        /// Why the index was rejected.
        reason: &'static str,
    },

    /// A statement referenced a story, index, or transaction that the
    /// caller should have already clarified/validated; surfacing this
    /// indicates a caller bug rather than a concurrency outcome.
    #[error("invalid engine usage: {0}")]
    InvalidUsage(&'static str),
}

impl StorylineError {
    /// True for the two conflict-shaped variants a transaction driver
    /// should treat as "retry the transaction."
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorylineError::AbortedByConflict(_) | StorylineError::DuplicateKey { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_is_conflict() {
        let err = StorylineError::DuplicateKey {
            space: SpaceId::new(1),
            index: IndexId::PRIMARY,
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("duplicate key"));
    }

    #[test]
    fn aborted_by_conflict_is_conflict() {
        let err = StorylineError::AbortedByConflict(TxnId::new(5));
        assert!(err.is_conflict());
    }

    #[test]
    fn space_invalidated_is_not_conflict() {
        let err = StorylineError::SpaceInvalidated(SpaceId::new(2));
        assert!(!err.is_conflict());
    }
}
