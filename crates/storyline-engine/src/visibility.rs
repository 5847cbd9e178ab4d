//! The visibility resolver (`clarify`).

use storyline_core::{Psn, SpaceId, Tuple, TxnId};
use tracing::trace;

use crate::engine::Engine;
use crate::gap;
use crate::keys::StoryKey;
use crate::lifecycle::send_to_read_view;
use crate::story;
use crate::tracker;

/// Result of resolving a physical tuple against a transaction's
/// viewpoint.
#[derive(Debug, Clone)]
pub struct Clarified {
    /// The version visible to the caller, if any.
    pub tuple: Option<Tuple>,
    /// Whether the visible (or deleted) version is the caller's own
    /// change.
    pub is_own_change: bool,
}

/// Whether a PSN that has actually been assigned (prepared or
/// committed) falls within `txn`'s current read-view ceiling. A
/// transaction with no read-view ceiling (`rv_psn = None`) sees
/// anything already assigned a PSN.
fn within_ceiling(engine: &Engine, txn: Option<TxnId>, psn: Psn) -> bool {
    match txn.and_then(|t| engine.txns.get(&t)) {
        Some(t) => match t.rv_psn {
            Some(ceiling) => psn <= ceiling,
            None => true,
        },
        None => true,
    }
}

/// Resolve visibility of the chain starting at `head` (the tuple the
/// index physically handed back) in `index`, for `txn` (`None` for
/// autocommit reads). `is_prepared_ok` is computed per call by the
/// caller from isolation level.
pub fn clarify(
    engine: &mut Engine,
    txn: Option<TxnId>,
    space: SpaceId,
    index: usize,
    head: &Tuple,
    is_prepared_ok: bool,
) -> Clarified {
    if !engine.is_enabled() {
        return Clarified {
            tuple: Some(head.clone()),
            is_own_change: false,
        };
    }

    let head_story = engine.story_for_tuple(space, head);
    let mut cursor = Some(head_story);
    let mut own_change = false;
    let mut found_at: Option<StoryKey> = None;
    let mut result_tuple: Option<Tuple> = None;

    while let Some(story_key) = cursor {
        let (add_stmt_txn, add_psn, del_owners, del_stmt_present, del_psn, tuple, older) = {
            let s = &engine.stories[story_key];
            let add_stmt_txn = s.add_stmt.and_then(|sk| engine.stmts.get(sk)).map(|st| st.txn);
            let del_owners: Vec<TxnId> = s
                .del_stmts
                .iter()
                .filter_map(|&sk| engine.stmts.get(sk).map(|st| st.txn))
                .collect();
            (
                add_stmt_txn,
                s.add_psn,
                del_owners.clone(),
                !s.del_stmts.is_empty(),
                s.del_psn,
                s.tuple.clone(),
                s.links[index].older_story,
            )
        };

        // --- delete visibility ---
        if del_owners.iter().any(|&t| Some(t) == txn) {
            own_change = true;
            result_tuple = None;
            found_at = Some(story_key);
            break;
        }
        if del_stmt_present && del_psn.is_prepared() {
            // Prepared-but-not-committed delete from someone else.
            if is_prepared_ok && within_ceiling(engine, txn, del_psn) {
                result_tuple = None;
                found_at = Some(story_key);
                break;
            }
            if let Some(t) = txn {
                send_to_read_view(engine, t, del_psn);
            }
            trace!(?story_key, index, "skipped prepared delete, demoted if necessary");
        } else if !del_stmt_present && del_psn.is_prepared() {
            // Committed delete.
            if within_ceiling(engine, txn, del_psn) {
                result_tuple = None;
                found_at = Some(story_key);
                break;
            }
            // Delete happened after our snapshot: invisible to us, we
            // still see this story's own insert (fall through).
        }
        // in-progress delete (not ours, no PSN yet): never masks the
        // tuple for this resolver; we fall through to the insert check
        // below — an undecided delete does not hide the current version
        // from other readers.

        // --- insert visibility ---
        if add_stmt_txn == txn && add_stmt_txn.is_some() {
            own_change = true;
            result_tuple = Some(tuple);
            found_at = Some(story_key);
            break;
        }
        let add_stmt_present = add_stmt_txn.is_some();
        if add_stmt_present && add_psn.is_prepared() {
            if is_prepared_ok && within_ceiling(engine, txn, add_psn) {
                result_tuple = Some(tuple);
                found_at = Some(story_key);
                break;
            }
            if let Some(t) = txn {
                send_to_read_view(engine, t, add_psn);
            }
        } else if !add_stmt_present && add_psn.is_prepared() {
            if within_ceiling(engine, txn, add_psn) {
                result_tuple = Some(tuple);
                found_at = Some(story_key);
                break;
            }
            // Committed, but after our snapshot: invisible, keep
            // walking to an older version.
        } else if !add_stmt_present {
            // Committed/ancient base with no PSN at all: either a story
            // that predates PSN tracking or a degenerate story lazily
            // created by `story_for_tuple` for an already-clean tuple.
            // Always visible.
            result_tuple = Some(tuple);
            found_at = Some(story_key);
            break;
        }
        // in-progress add (not ours): not visible yet, keep walking;
        // the side effect below installs the inplace gap at chain top.

        cursor = older;
    }

    if let Some(t) = txn {
        let top = story::find_top(engine, head_story, index);
        match (&result_tuple, found_at) {
            (Some(_), Some(at)) if !own_change => {
                tracker::track_read_story(engine, t, at);
            }
            (None, _) if !own_change => {
                gap::track_inplace(engine, t, space, top, index);
            }
            _ => {}
        }
    }

    Clarified {
        tuple: result_tuple,
        is_own_change: own_change,
    }
}

/// Read-only visibility check used by count-gap installation: mirrors
/// `clarify`'s own-change/prepared/committed decision for a single
/// candidate tuple without installing a tracker or
/// demoting the caller. The caller's single count-gap tracker (installed
/// by [`crate::gap::track_count_until`]) is this observation's only
/// side effect; per-candidate visibility itself is not.
pub fn is_visible_for_count(
    engine: &Engine,
    txn: TxnId,
    space: SpaceId,
    index: usize,
    head: &Tuple,
    is_prepared_ok: bool,
) -> bool {
    let _ = space;
    let Some(&head_story) = engine.tuple_story.get(&head.key()) else {
        return true;
    };
    let mut cursor = Some(head_story);
    while let Some(story_key) = cursor {
        let s = &engine.stories[story_key];
        let del_is_own = s
            .del_stmts
            .iter()
            .any(|&sk| engine.stmts.get(sk).map(|st| st.txn) == Some(txn));
        if del_is_own {
            return false;
        }
        if s.del_psn.is_prepared() {
            let del_stmt_present = !s.del_stmts.is_empty();
            let visible_delete = if del_stmt_present {
                is_prepared_ok && within_ceiling(engine, Some(txn), s.del_psn)
            } else {
                within_ceiling(engine, Some(txn), s.del_psn)
            };
            if visible_delete {
                return false;
            }
        }

        let add_stmt_txn = s.add_stmt.and_then(|sk| engine.stmts.get(sk)).map(|st| st.txn);
        if add_stmt_txn == Some(txn) {
            return true;
        }
        if let Some(_owner) = add_stmt_txn {
            if s.add_psn.is_prepared() && is_prepared_ok && within_ceiling(engine, Some(txn), s.add_psn) {
                return true;
            }
        } else if s.add_psn.is_prepared() {
            if within_ceiling(engine, Some(txn), s.add_psn) {
                return true;
            }
        } else {
            return true;
        }
        cursor = s.links[index].older_story;
    }
    false
}

/// Resolve the version of `head`'s chain visible at a frozen PSN
/// ceiling rather than a live transaction's viewpoint: a snapshot walk
/// has no reader/gap-tracker semantics of its own, only a ceiling to
/// resolve against. `ceiling = None` means "everything committed so far."
pub fn clarify_at_psn(engine: &Engine, index: usize, head: &Tuple, ceiling: Option<Psn>) -> Option<Tuple> {
    let Some(&head_story) = engine.tuple_story.get(&head.key()) else {
        return Some(head.clone());
    };
    let mut cursor = Some(head_story);
    while let Some(story_key) = cursor {
        let s = &engine.stories[story_key];
        let del_visible = s.del_psn.is_prepared() && ceiling.map(|c| s.del_psn <= c).unwrap_or(true);
        if del_visible {
            return None;
        }
        let add_visible = !s.add_psn.is_prepared() || ceiling.map(|c| s.add_psn <= c).unwrap_or(true);
        if add_visible {
            return Some(s.tuple.clone());
        }
        cursor = s.links[index].older_story;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MvccConfig;
    use crate::lifecycle;
    use crate::transaction::StmtMode;
    use storyline_core::{FieldValue, Isolation};
    use storyline_index::{HashIndex, IndexDef};

    fn setup() -> (Engine, SpaceId) {
        let mut engine = Engine::new(MvccConfig::default());
        let space = SpaceId::new(1);
        engine.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0)))]);
        (engine, space)
    }

    #[test]
    fn clean_tuple_is_visible_to_everyone() {
        let (mut engine, space) = setup();
        let txn = engine.begin(Isolation::ReadCommitted);
        let tuple = Tuple::new([FieldValue::Int(1)]);
        let out = clarify(&mut engine, Some(txn), space, 0, &tuple, true);
        assert!(out.tuple.is_some());
        assert!(!out.is_own_change);
    }

    #[test]
    fn own_uncommitted_insert_is_visible_to_writer() {
        let (mut engine, space) = setup();
        let writer = engine.begin(Isolation::ReadCommitted);
        let tuple = Tuple::new([FieldValue::Int(1)]);
        lifecycle::add_stmt(&mut engine, writer, space, None, Some(tuple.clone()), StmtMode::Insert).unwrap();
        let out = clarify(&mut engine, Some(writer), space, 0, &tuple, true);
        assert!(out.is_own_change);
        assert!(out.tuple.is_some());
    }

    #[test]
    fn in_progress_insert_invisible_to_other_reader_before_prepare() {
        let (mut engine, space) = setup();
        let writer = engine.begin(Isolation::ReadCommitted);
        let reader = engine.begin(Isolation::ReadCommitted);
        let tuple = Tuple::new([FieldValue::Int(1)]);
        lifecycle::add_stmt(&mut engine, writer, space, None, Some(tuple.clone()), StmtMode::Insert).unwrap();
        let out = clarify(&mut engine, Some(reader), space, 0, &tuple, true);
        assert!(out.tuple.is_none());
        assert!(!out.is_own_change);
    }
}
