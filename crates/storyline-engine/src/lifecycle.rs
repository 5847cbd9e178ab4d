//! Statement lifecycle and conflict cascade.

use storyline_core::{IndexId, Psn, SpaceId, StorylineError, Tuple, TxnId, TxnStatus};
use storyline_index::{Index, ReplaceMode};
use tracing::{debug, trace, warn};

use crate::engine::Engine;
use crate::gap;
use crate::gc;
use crate::keys::{GapKey, StmtKey, StoryKey};
use crate::story;
use crate::tracker;
use crate::transaction::{Stmt, StmtMode};
use crate::visibility;

type Result<T> = std::result::Result<T, StorylineError>;

/// Add a statement to history.
///
/// `new` selects the path: `Some` dispatches to the insert path
/// (covering both pure inserts and update-shaped replaces), `None` to
/// the delete path, in which case `old` must be the caller's already
/// clarified, dirty old version.
pub fn add_stmt(
    engine: &mut Engine,
    txn: TxnId,
    space: SpaceId,
    old: Option<Tuple>,
    new: Option<Tuple>,
    mode: StmtMode,
) -> Result<StmtKey> {
    engine.require_valid_space(space)?;
    engine.txn_mut(txn).has_written = true;
    match new {
        Some(new_tuple) => insert_path(engine, txn, space, new_tuple, mode, old),
        None => {
            let old = old.expect("delete path requires an already-clarified dirty old tuple");
            delete_path(engine, txn, space, old)
        }
    }
}

fn insert_path(
    engine: &mut Engine,
    txn: TxnId,
    space: SpaceId,
    new_tuple: Tuple,
    mode: StmtMode,
    asserted_old: Option<Tuple>,
) -> Result<StmtKey> {
    let index_count = engine.space(space).index_count();
    let new_story = story::story_new(engine, space, new_tuple.clone(), false);

    // (a) physically replace in every index, remembering what came back.
    let mut displaced: Vec<Option<Tuple>> = Vec::with_capacity(index_count);
    for i in 0..index_count {
        let def = engine.space(space).indexes[i].index.def().clone();
        let key = def.key_of(&new_tuple);
        let outcome = engine.space_mut(space).indexes[i]
            .index
            .replace(&key, Some(new_tuple.clone()), ReplaceMode::ReplaceOrInsert);
        displaced.push(outcome.displaced);
    }

    // (b) duplicate-key checks against dirty displacements (primary
    // first, since its result also becomes this statement's old value).
    // A visible version the caller already named as its `old` (an
    // update-shaped replace covering both pure inserts and update-shaped
    // replaces in one statement) is the caller's own to retire, not a
    // foreign occupant to reject, even if another in-progress writer sits
    // physically above it in the chain.
    let asserted_old_key = asserted_old.as_ref().map(|t| t.key());
    let is_prepared_ok = engine.txn(txn).sees_prepared();
    let mut resolved_old: Option<Tuple> = None;
    for i in 0..index_count {
        let Some(victim) = displaced[i].clone() else {
            continue;
        };
        let unique = engine.space(space).indexes[i].index.def().unique;
        if !unique {
            continue;
        }
        let clarified = visibility::clarify(engine, Some(txn), space, i, &victim, is_prepared_ok);
        let matches_asserted_old = match (&clarified.tuple, &asserted_old_key) {
            (Some(visible), Some(old_key)) => visible.key() == *old_key,
            _ => false,
        };
        if let Some(visible) = clarified.tuple {
            if !clarified.is_own_change && !matches_asserted_old {
                undo_applied(engine, space, &new_tuple, &displaced, index_count);
                engine.stories.remove(new_story);
                return Err(StorylineError::DuplicateKey {
                    space,
                    index: IndexId::new(i as u32),
                });
            }
            if i == 0 {
                resolved_old = Some(visible);
            }
        }
    }

    // (c)/(d) link the new story into every chain and run the
    // writer-side gap scan.
    for i in 0..index_count {
        let def = engine.space(space).indexes[i].index.def().clone();
        let key = def.key_of(&new_tuple);
        match displaced[i].clone() {
            Some(victim) => {
                let displaced_story = engine.story_for_tuple(space, &victim);
                story::link_top(engine, new_story, Some(displaced_story), i, false);
            }
            None => {
                story::link_top(engine, new_story, None, i, true);
            }
        }
        gap::scan_on_write(engine, space, i, &key, new_story, &new_tuple, true);
    }

    // (e) record the statement and delete linkage.
    let stmt_key = engine.stmts.insert_with_key(|key| Stmt {
        key,
        txn,
        space,
        mode,
        add_story: Some(new_story),
        del_story: None,
    });
    engine.stories[new_story].add_stmt = Some(stmt_key);
    engine.txn_mut(txn).stmts.push(stmt_key);

    if let Some(old_tuple) = resolved_old {
        let old_story = engine.story_for_tuple(space, &old_tuple);
        engine.stmts[stmt_key].del_story = Some(old_story);
        engine.stories[old_story].del_stmts.push(stmt_key);
        engine.stories[old_story].tuple_is_retained = true;
        // Defend the observed precondition: an UPDATE/REPLACE read its
        // own old value, so pin a reader rather than let a later
        // writer silently invalidate it out from under this statement.
        if matches!(mode, StmtMode::Update) {
            tracker::track_read_story(engine, txn, old_story);
        }
    }

    trace!(?txn, ?space, ?stmt_key, "add_stmt (insert path)");
    Ok(stmt_key)
}

fn undo_applied(engine: &mut Engine, space: SpaceId, new_tuple: &Tuple, displaced: &[Option<Tuple>], upto: usize) {
    for i in 0..upto {
        let def = engine.space(space).indexes[i].index.def().clone();
        let key = def.key_of(new_tuple);
        let restore = displaced[i].clone();
        engine.space_mut(space).indexes[i]
            .index
            .replace(&key, restore, ReplaceMode::ReplaceOrInsert);
    }
}

fn delete_path(engine: &mut Engine, txn: TxnId, space: SpaceId, old: Tuple) -> Result<StmtKey> {
    let old_story = engine.story_for_tuple(space, &old);
    let stmt_key = engine.stmts.insert_with_key(|key| Stmt {
        key,
        txn,
        space,
        mode: StmtMode::Delete,
        add_story: None,
        del_story: Some(old_story),
    });
    engine.stories[old_story].del_stmts.push(stmt_key);
    engine.txn_mut(txn).stmts.push(stmt_key);
    engine.stories[old_story].tuple_is_retained = true;

    let index_count = engine.space(space).index_count();
    for i in 0..index_count {
        gap::notify_count_gaps_of_delete(engine, space, i, &old, old_story);
    }

    trace!(?txn, ?space, ?stmt_key, "add_stmt (delete path)");
    Ok(stmt_key)
}

/// Assign a PSN and cascade conflicts.
pub fn prepare_stmt(engine: &mut Engine, stmt: StmtKey) -> Result<()> {
    let (txn, space, add_story, del_story, mode) = {
        let s = &engine.stmts[stmt];
        (s.txn, s.space, s.add_story, s.del_story, s.mode)
    };
    engine.require_valid_space(space)?;

    if !engine.txn(txn).psn.is_prepared() {
        let psn = engine.alloc_psn();
        engine.txn_mut(txn).psn = psn;
        engine.txn_mut(txn).status = TxnStatus::Prepared;
    }
    let psn = engine.txn(txn).psn;
    let index_count = engine.space(space).index_count();

    if let Some(add) = add_story {
        if !engine.stories[add].add_psn.is_prepared() {
            engine.stories[add].add_psn = psn;
        }
        for i in 0..index_count {
            sink(engine, add, i);
        }
        // Rewire in-progress deleters of the story we displaced onto `add`.
        if let Some(older_of_primary) = engine.stories[add].links[0].older_story {
            rewire_inprogress_deleters(engine, older_of_primary, add, txn);
        }
        demote_colliding_secondary_inserters(engine, add, psn, index_count);
        cascade_from_story(engine, add, txn, psn, index_count);
    }

    if let Some(del) = del_story {
        if !engine.stories[del].del_psn.is_prepared() {
            engine.stories[del].del_psn = psn;
        }
        if mode == StmtMode::Delete {
            // Pure delete: competing in-progress deleters of the same
            // story are doomed to conflict once we commit; unlink them
            // now.
            let competitors: Vec<StmtKey> = engine.stories[del]
                .del_stmts
                .iter()
                .copied()
                .filter(|&k| k != stmt)
                .collect();
            for c in competitors {
                story::unlink_deleted_by(engine, del, c);
            }
        }
        cascade_from_story(engine, del, txn, psn, index_count);
    }

    debug!(?txn, ?stmt, %psn, "prepare_stmt");
    Ok(())
}

/// Sink `story` below every older, still-unprepared in-progress sibling
/// in chain `index`, so prepared stories never sit newer than
/// in-progress ones.
fn sink(engine: &mut Engine, story: StoryKey, index: usize) {
    loop {
        let Some(older) = engine.stories[story].links[index].older_story else {
            break;
        };
        let older_unprepared_inprogress = {
            let o = &engine.stories[older];
            o.add_stmt.is_some() && !o.add_psn.is_prepared()
        };
        if !older_unprepared_inprogress {
            break;
        }
        crate::story::reorder(engine, story, older, index);
    }
}

fn rewire_inprogress_deleters(engine: &mut Engine, old_story: StoryKey, new_story: StoryKey, except_txn: TxnId) {
    if engine.stories[old_story].del_psn.is_prepared() {
        return;
    }
    let movers: Vec<StmtKey> = engine.stories[old_story]
        .del_stmts
        .iter()
        .copied()
        .filter(|&sk| engine.stmts.get(sk).map(|s| s.txn) != Some(except_txn))
        .collect();
    for sk in movers {
        engine.stories[old_story].del_stmts.retain(|&k| k != sk);
        engine.stories[new_story].del_stmts.push(sk);
        if let Some(s) = engine.stmts.get_mut(sk) {
            s.del_story = Some(new_story);
        }
    }
}

/// Walk upward through every secondary chain `add` now sits in, demoting
/// in-progress inserters whose secondary key collides with `add`'s but
/// whose primary key differs: once `add` commits, such an inserter would
/// be writing a duplicate into that secondary index unless it is itself
/// replacing the very same row `add` is.
fn demote_colliding_secondary_inserters(engine: &mut Engine, add: StoryKey, psn: Psn, index_count: usize) {
    if index_count < 2 {
        return;
    }
    let space = engine.stories[add].space;
    let primary_def = engine.space(space).indexes[0].index.def().clone();
    let primary_key = primary_def.key_of(&engine.stories[add].tuple.clone());

    for i in 1..index_count {
        let mut cursor = engine.stories[add].links[i].newer_story;
        while let Some(candidate) = cursor {
            let (add_stmt, add_psn, tuple, next) = {
                let s = &engine.stories[candidate];
                (s.add_stmt, s.add_psn, s.tuple.clone(), s.links[i].newer_story)
            };
            if let Some(stmt_key) = add_stmt {
                if !add_psn.is_prepared() && primary_def.key_of(&tuple) != primary_key {
                    if let Some(owner) = engine.stmts.get(stmt_key).map(|s| s.txn) {
                        send_to_read_view(engine, owner, psn);
                    }
                }
            }
            cursor = next;
        }
    }
}

/// Send every reader and inplace-gap holder of `story` (other than
/// `except`) to a read view at `psn`.
fn cascade_from_story(engine: &mut Engine, story: StoryKey, except: TxnId, psn: Psn, index_count: usize) {
    let readers: Vec<TxnId> = engine.stories[story]
        .reader_list
        .iter()
        .filter_map(|&rk| engine.readers.get(rk).map(|r| r.reader))
        .filter(|&t| t != except)
        .collect();
    for reader in readers {
        send_to_read_view(engine, reader, psn);
    }
    for i in 0..index_count {
        let holders: Vec<TxnId> = engine.stories[story].links[i]
            .read_gaps
            .iter()
            .filter_map(|&gk| engine.gaps.get(gk).map(|g| g.txn))
            .filter(|&t| t != except)
            .collect();
        for holder in holders {
            send_to_read_view(engine, holder, psn);
        }
    }
}

/// Demote a transaction to a read view capped at `psn`, or lower its
/// existing cap. Idempotent.
pub fn send_to_read_view(engine: &mut Engine, txn: TxnId, psn: Psn) {
    let t = engine.txn_mut(txn);
    if !t.status.is_active() {
        return;
    }
    let should_update = match t.rv_psn {
        Some(current) => psn < current,
        None => true,
    };
    if !should_update {
        return;
    }
    t.rv_psn = Some(psn);
    t.rv_cause = Some(psn);
    t.status = TxnStatus::InReadView;
    warn!(?txn, %psn, "send_to_read_view");
    reinsert_read_view_list(engine, txn);
}

fn reinsert_read_view_list(engine: &mut Engine, txn: TxnId) {
    engine.read_view_list.retain(|&t| t != txn);
    let psn = engine.txn(txn).rv_psn.expect("just demoted");
    let mut i = engine.read_view_list.len();
    while i > 0 && engine.txn(engine.read_view_list[i - 1]).rv_psn.unwrap_or(Psn::UNPREPARED) > psn {
        i -= 1;
    }
    engine.read_view_list.insert(i, txn);
}

/// Idempotently transition `txn` to `Aborted`.
pub fn abort_with_conflict(engine: &mut Engine, txn: TxnId) {
    engine.read_view_list.retain(|&t| t != txn);
    let t = engine.txn_mut(txn);
    if t.status == TxnStatus::Aborted {
        return;
    }
    t.status = TxnStatus::Aborted;
    warn!(?txn, "abort_with_conflict");
}

/// Commit a statement: update stats, unlink it from its stories,
/// schedule GC.
pub fn commit_stmt(engine: &mut Engine, stmt: StmtKey) {
    let (space, add_story, del_story) = {
        let s = &engine.stmts[stmt];
        (s.space, s.add_story, s.del_story)
    };
    if let Some(add) = add_story {
        story::unlink_added_by(engine, add, stmt);
        engine.space_mut(space).stats.tuple_count += 1;
    }
    if let Some(del) = del_story {
        story::unlink_deleted_by(engine, del, stmt);
        engine.space_mut(space).stats.tuple_count = engine.space(space).stats.tuple_count.saturating_sub(1);
    }
    engine.stmts.remove(stmt);
    let gc_steps = engine.config.gc_steps_base;
    gc::gc_step(engine, gc_steps);
    trace!(?stmt, "commit_stmt");
}

/// Roll back a statement.
pub fn rollback_stmt(engine: &mut Engine, stmt: StmtKey) {
    let (txn, space, add_story, del_story) = {
        let s = &engine.stmts[stmt];
        (s.txn, s.space, s.add_story, s.del_story)
    };
    let was_prepared = add_story.map(|s| engine.stories[s].add_psn.is_prepared()).unwrap_or(false)
        || del_story.map(|s| engine.stories[s].del_psn.is_prepared()).unwrap_or(false);

    if !was_prepared {
        rollback_unprepared(engine, stmt, space, add_story, del_story);
    } else {
        rollback_prepared(engine, stmt, txn, space, add_story, del_story);
    }

    engine.stmts.remove(stmt);
    let gc_steps = engine.config.gc_steps_base;
    gc::gc_step(engine, gc_steps);
    trace!(?stmt, was_prepared, "rollback_stmt");
}

fn rollback_unprepared(
    engine: &mut Engine,
    stmt: StmtKey,
    space: SpaceId,
    add_story: Option<StoryKey>,
    del_story: Option<StoryKey>,
) {
    if let Some(add) = add_story {
        let index_count = engine.space(space).index_count();
        for i in 0..index_count {
            let def = engine.space(space).indexes[i].index.def().clone();
            let key = def.key_of(&engine.stories[add].tuple.clone());
            let older = engine.stories[add].links[i].older_story;
            let restore = older.map(|o| engine.stories[o].tuple.clone());
            engine.space_mut(space).indexes[i]
                .index
                .replace(&key, restore, ReplaceMode::ReplaceOrInsert);
            if let Some(o) = older {
                let gaps = std::mem::take(&mut engine.stories[add].links[i].read_gaps);
                let s = &mut engine.stories[o];
                s.links[i].in_index = true;
                s.links[i].newer_story = None;
                s.links[i].read_gaps = gaps;
            }
        }
        // Any remaining gap holders on `add` (installed after the
        // older-story transfer above, e.g. point-hole conversions) are
        // now moot; they simply get dropped along with the story.
        engine.stories.remove(add);
    }
    if let Some(del) = del_story {
        story::unlink_deleted_by(engine, del, stmt);
        if engine.stories[del].del_stmts.is_empty() {
            engine.stories[del].tuple_is_retained = false;
        }
    }
}

fn rollback_prepared(
    engine: &mut Engine,
    stmt: StmtKey,
    _txn: TxnId,
    space: SpaceId,
    add_story: Option<StoryKey>,
    del_story: Option<StoryKey>,
) {
    let index_count = engine.space(space).index_count();
    if let Some(add) = add_story {
        let add_psn = engine.stories[add].add_psn;
        // Every reader of the added story must be aborted: they raced
        // an in-progress-turned-failed transaction.
        let readers: Vec<TxnId> = engine.stories[add]
            .reader_list
            .iter()
            .filter_map(|&rk| engine.readers.get(rk).map(|r| r.reader))
            .collect();
        for r in readers {
            abort_with_conflict(engine, r);
        }
        // Holders of inplace gaps attached to `add` itself were merely
        // *demoted* by this statement's own prepare cascade — they never
        // saw the value, they just stopped being able to prove its
        // absence past this PSN. Since the insert never happens, that
        // constraint is moot; re-promote them if this was their only
        // reason to be in a read view (see `DESIGN.md`).
        let gap_holders: Vec<TxnId> = engine.stories[add]
            .links
            .iter()
            .flat_map(|l| l.read_gaps.iter())
            .filter_map(|&gk| engine.gaps.get(gk).map(|g| g.txn))
            .collect();
        for holder in gap_holders {
            maybe_repromote(engine, holder, add_psn);
        }
        engine.stories[add].add_psn = story::Story::ROLLED_BACK_DEL_PSN;
        engine.stories[add].add_stmt = None;
        // Rewire any deleters we stole from our displaced predecessor
        // back to it (or to nothing).
        if let Some(older) = engine.stories[add].links[0].older_story {
            let movers: Vec<StmtKey> = engine.stories[add].del_stmts.drain(..).collect();
            for sk in movers {
                engine.stories[older].del_stmts.push(sk);
                if let Some(s) = engine.stmts.get_mut(sk) {
                    s.del_story = Some(older);
                }
            }
        }
        for i in 0..index_count {
            if engine.stories[add].links[i].in_index {
                if let Some(older) = engine.stories[add].links[i].older_story {
                    let def = engine.space(space).indexes[i].index.def().clone();
                    let key = def.key_of(&engine.stories[add].tuple.clone());
                    let restore = Some(engine.stories[older].tuple.clone());
                    engine.space_mut(space).indexes[i]
                        .index
                        .replace(&key, restore, ReplaceMode::ReplaceOrInsert);
                    let gaps = std::mem::take(&mut engine.stories[add].links[i].read_gaps);
                    engine.stories[older].links[i].in_index = true;
                    engine.stories[older].links[i].read_gaps = gaps;
                }
            }
        }
    }
    if let Some(del) = del_story {
        let del_psn = engine.stories[del].del_psn;
        // Every inplace-gap holder on the story being deleted must be
        // aborted:
        // they raced an in-progress delete that is now failing, the same
        // way readers of a failed `add` are aborted above.
        let mut gap_keys: Vec<GapKey> = Vec::new();
        for link in &engine.stories[del].links {
            gap_keys.extend(link.read_gaps.iter().copied());
        }
        let gap_holders: Vec<TxnId> = gap_keys
            .iter()
            .filter_map(|&gk| engine.gaps.get(gk).map(|g| g.txn))
            .collect();
        for h in gap_holders {
            abort_with_conflict(engine, h);
        }
        // Readers of `del` itself were only demoted (not aborted) by
        // this statement's prepare cascade. Since the delete never
        // commits, the version never actually ends; re-promote them if
        // they retain no other reason to be in a read view.
        let readers: Vec<TxnId> = engine.stories[del]
            .reader_list
            .iter()
            .filter_map(|&rk| engine.readers.get(rk).map(|r| r.reader))
            .collect();
        for r in readers {
            maybe_repromote(engine, r, del_psn);
        }
        story::unlink_deleted_by(engine, del, stmt);
        engine.stories[del].del_psn = story::Story::ROLLED_BACK_DEL_PSN;
        if engine.stories[del].del_stmts.is_empty() {
            engine.stories[del].tuple_is_retained = false;
        }
    }
}

/// Re-promote `txn` from a read view back to `InProgress` if it was
/// demoted *solely* by the now-rolled-back prepare that assigned `psn`,
/// and it retains no other gap/reader constraint (see `DESIGN.md`).
///
/// This tracks only the single most recent (tightest) demotion cause per
/// transaction (`Transaction::rv_cause`), not a full history of every
/// cascade that ever touched it — a transaction demoted by an earlier,
/// looser PSN and then re-demoted by a tighter one here forgets the
/// looser cause once the tighter one resolves. This is a pragmatic
/// single-cause approximation, not exact multi-cause tracking.
fn maybe_repromote(engine: &mut Engine, txn: TxnId, caused_by: Psn) {
    let Some(t) = engine.txns.get(&txn) else {
        return;
    };
    if t.status != TxnStatus::InReadView || t.rv_cause != Some(caused_by) {
        return;
    }
    let t = engine.txn_mut(txn);
    t.status = TxnStatus::InProgress;
    t.rv_psn = None;
    t.rv_cause = None;
    engine.read_view_list.retain(|&x| x != txn);
    debug!(?txn, %caused_by, "re-promoted after rollback of sole demotion cause");
}

/// Space invalidation (DDL hook).
///
/// Aborts every concurrent reader, gap holder, writer, and point-hole
/// waiter that references the space *first* (their primitives are about
/// to disappear), then bakes the DDL owner's visible versions into the
/// physical indexes and destroys every story of the space.
pub fn invalidate_space(engine: &mut Engine, space: SpaceId, ddl_owner: TxnId) {
    let index_count = engine.space(space).index_count();

    let mut affected: Vec<TxnId> = Vec::new();
    for story in engine.stories.values().filter(|s| s.space == space) {
        affected.extend(story.reader_list.iter().filter_map(|&rk| engine.readers.get(rk).map(|r| r.reader)));
        for link in &story.links {
            affected.extend(link.read_gaps.iter().filter_map(|&gk| engine.gaps.get(gk).map(|g| g.txn)));
        }
    }
    for i in 0..index_count {
        affected.extend(
            engine.space(space).indexes[i]
                .global_gaps
                .iter()
                .filter_map(|&gk| engine.gaps.get(gk).map(|g| g.txn)),
        );
    }
    affected.sort_by_key(|t| t.raw());
    affected.dedup();
    for t in affected {
        if t != ddl_owner {
            abort_with_conflict(engine, t);
        }
    }

    // Bake in the DDL owner's visible versions.
    let story_keys: Vec<StoryKey> = engine
        .stories
        .iter()
        .filter(|(_, s)| s.space == space)
        .map(|(k, _)| k)
        .collect();
    for i in 0..index_count {
        let heads: Vec<StoryKey> = story_keys
            .iter()
            .copied()
            .filter(|&k| engine.stories[k].links[i].in_index)
            .collect();
        for head in heads {
            let tuple = engine.stories[head].tuple.clone();
            let clarified = visibility::clarify(engine, Some(ddl_owner), space, i, &tuple, true);
            let def = engine.space(space).indexes[i].index.def().clone();
            let key = def.key_of(&tuple);
            engine.space_mut(space).indexes[i]
                .index
                .replace(&key, clarified.tuple, ReplaceMode::ReplaceOrInsert);
        }
    }

    for key in story_keys {
        engine.stories.remove(key);
    }
    engine.story_list.retain(|k| engine.stories.contains_key(*k));
    engine.space_mut(space).valid = false;
    debug!(?space, ?ddl_owner, "invalidate_space");
}
