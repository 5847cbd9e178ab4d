//! Gap trackers: four flavors recording "I looked and found nothing
//! matching" so a later write landing in that gap can conflict the
//! transaction that looked.
//!
//! All four flavors share a header (txn, location) and are kept in one
//! arena as a tagged variant, since the set of flavors is closed and
//! small enough that open virtual dispatch would only add indirection.

use storyline_core::{SpaceId, Tuple, TxnId};
use storyline_index::{Index, IteratorType, Key};
use tracing::trace;

use crate::engine::Engine;
use crate::keys::{GapKey, StoryKey};
use crate::story;

/// Where a gap tracker is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapLocation {
    /// Attached to the top story of a chain ("between this successor
    /// and its predecessor").
    Story { story: StoryKey, index: usize },
    /// Attached directly to an index ("anywhere / no-successor
    /// region").
    IndexGlobal { space: SpaceId, index: usize },
}

/// The per-flavor state a gap tracker memoizes.
#[derive(Debug, Clone)]
pub enum GapKind {
    /// Skipped an in-progress version while walking a chain.
    Inplace,
    /// Crossed an inter-tuple interval during an ordered scan.
    Nearby {
        iter_type: IteratorType,
        key: Key,
        part_count: usize,
    },
    /// Computed a count over a range.
    Count {
        iter_type: IteratorType,
        key: Key,
        part_count: usize,
        until: Option<Tuple>,
    },
    /// Enumerated an entire unordered index.
    FullScan,
    /// A full-key lookup in a unique index returned nothing.
    PointHole { key: Key },
}

/// One gap tracker.
#[derive(Debug, Clone)]
pub struct GapItem {
    pub(crate) key: GapKey,
    /// The transaction holding this tracker.
    pub txn: TxnId,
    /// The space this observation was made in.
    pub space: SpaceId,
    /// Where it is attached.
    pub location: GapLocation,
    /// What flavor it is and its memoized scan state.
    pub kind: GapKind,
}

fn attach(engine: &mut Engine, item: GapItem) -> GapKey {
    let location = item.location;
    let txn = item.txn;
    let is_point_hole = matches!(item.kind, GapKind::PointHole { .. });
    let key = engine.gaps.insert_with_key(|key| GapItem { key, ..item });
    match location {
        GapLocation::Story { story, index } => {
            engine.stories[story].links[index].read_gaps.push(key);
        }
        GapLocation::IndexGlobal { space, index } => {
            engine.space_mut(space).indexes[index].global_gaps.push(key);
        }
    }
    if is_point_hole {
        engine.txn_mut(txn).point_holes.push(key);
    } else {
        engine.txn_mut(txn).gap_list.push(key);
    }
    key
}

/// Detach and free a gap tracker. Used when a write resolves it into a
/// conflict, when its holder's transaction ends, or by GC.
pub fn untrack(engine: &mut Engine, gap: GapKey) {
    let Some(item) = engine.gaps.remove(gap) else {
        return;
    };
    match item.location {
        GapLocation::Story { story, index } => {
            if let Some(s) = engine.stories.get_mut(story) {
                s.links[index].read_gaps.retain(|&g| g != gap);
            }
        }
        GapLocation::IndexGlobal { space, index } => {
            if let Some(space) = engine.spaces.get_mut(&space) {
                if let Some(slot) = space.indexes.get_mut(index) {
                    slot.global_gaps.retain(|&g| g != gap);
                    if slot.count_tail == Some(gap) {
                        slot.count_tail = None;
                    }
                }
            }
        }
    }
    if let Some(txn) = engine.txns.get_mut(&item.txn) {
        txn.gap_list.retain(|&g| g != gap);
        txn.point_holes.retain(|&g| g != gap);
    }
}

/// Record that `txn` skipped an in-progress version while walking the
/// chain at `story` in `index` (an "inplace gap"). Called by the
/// visibility resolver.
pub fn track_inplace(engine: &mut Engine, txn: TxnId, space: SpaceId, story: StoryKey, index: usize) -> GapKey {
    // find_top so the gap always lands on the chain's current head,
    // matching invariant 5.
    let top = story::find_top(engine, story, index);
    attach(
        engine,
        GapItem {
            key: GapKey::default(),
            txn,
            space,
            location: GapLocation::Story { story: top, index },
            kind: GapKind::Inplace,
        },
    )
}

/// Record a near miss during an ordered scan.
/// Attaches to `successor`'s top story if given, else to the index
/// global list.
pub fn track_gap(
    engine: &mut Engine,
    txn: TxnId,
    space: SpaceId,
    index: usize,
    successor: Option<&Tuple>,
    iter_type: IteratorType,
    key: Key,
    part_count: usize,
) -> GapKey {
    let location = match successor {
        Some(tuple) => {
            let story = engine.story_for_tuple(space, tuple);
            let top = story::find_top(engine, story, index);
            GapLocation::Story { story: top, index }
        }
        None => GapLocation::IndexGlobal { space, index },
    };
    attach(
        engine,
        GapItem {
            key: GapKey::default(),
            txn,
            space,
            location,
            kind: GapKind::Nearby {
                iter_type,
                key,
                part_count,
            },
        },
    )
}

/// Record a full-key miss against a unique index (a "point-hole tracker").
pub fn track_point(engine: &mut Engine, txn: TxnId, space: SpaceId, index: usize, key: Key) -> GapKey {
    let gap_key = attach(
        engine,
        GapItem {
            key: GapKey::default(),
            txn,
            space,
            location: GapLocation::IndexGlobal { space, index },
            kind: GapKind::PointHole { key: key.clone() },
        },
    );
    engine
        .point_holes
        .entry((space, storyline_core::IndexId::new(index as u32), key))
        .or_default()
        .push(gap_key);
    gap_key
}

/// Record a count observation and return the number of tuples matching
/// `(iter_type, key)` that are *not yet visible* to `txn`.
///
/// A full-index, no-bound count gets appended as the index's
/// `count_tail` so a subsequent identical full count can detect it has
/// already been recorded in O(1).
#[allow(clippy::too_many_arguments)]
pub fn track_count_until(
    engine: &mut Engine,
    txn: TxnId,
    space: SpaceId,
    index: usize,
    iter_type: IteratorType,
    key: Key,
    part_count: usize,
    until: Option<Tuple>,
    is_visible: impl Fn(&Engine, &Tuple) -> bool,
) -> usize {
    let is_full_no_bound = matches!(iter_type, IteratorType::All) && until.is_none();
    if is_full_no_bound {
        if let Some(existing) = engine.space(space).indexes[index].count_tail {
            if engine.gaps[existing].txn == txn {
                return count_invisible(engine, space, index, iter_type, &key, &until, &is_visible);
            }
        }
    }
    let invisible = count_invisible(engine, space, index, iter_type, &key, &until, &is_visible);
    let gap_key = attach(
        engine,
        GapItem {
            key: GapKey::default(),
            txn,
            space,
            location: GapLocation::IndexGlobal { space, index },
            kind: GapKind::Count {
                iter_type,
                key,
                part_count,
                until,
            },
        },
    );
    if is_full_no_bound {
        engine.space_mut(space).indexes[index].count_tail = Some(gap_key);
    }
    invisible
}

fn count_invisible(
    engine: &Engine,
    space: SpaceId,
    index: usize,
    iter_type: IteratorType,
    key: &Key,
    until: &Option<Tuple>,
    is_visible: &impl Fn(&Engine, &Tuple) -> bool,
) -> usize {
    let slot = &engine.space(space).indexes[index];
    let candidates = slot.index.iter_range(iter_type, key);
    candidates
        .iter()
        .take_while(|t| match until {
            Some(bound) => slot.index.compare(t, bound) != std::cmp::Ordering::Equal,
            None => true,
        })
        .filter(|t| !is_visible(engine, t))
        .count()
}

/// Record a full unordered enumeration.
pub fn track_full_scan(engine: &mut Engine, txn: TxnId, space: SpaceId, index: usize) -> GapKey {
    attach(
        engine,
        GapItem {
            key: GapKey::default(),
            txn,
            space,
            location: GapLocation::IndexGlobal { space, index },
            kind: GapKind::FullScan,
        },
    )
}

/// Writer-side scan run when a statement installs `new_story` at
/// position `new_key` in `index`.
///
/// Runs all four sub-scans in order: full-scan gaps, the point-hole
/// hash, nearby gaps (with the tie-break table), then count gaps.
pub fn scan_on_write(
    engine: &mut Engine,
    space: SpaceId,
    index: usize,
    new_key: &Key,
    new_story: StoryKey,
    new_tuple: &Tuple,
    is_insert: bool,
) {
    scan_full_scan_gaps(engine, space, index, new_story);
    scan_point_holes(engine, space, index, new_key, new_story);
    scan_nearby_gaps(engine, space, index, new_key, new_story);
    scan_count_gaps(engine, space, index, new_tuple, new_story, is_insert);
}

fn scan_full_scan_gaps(engine: &mut Engine, space: SpaceId, index: usize, new_story: StoryKey) {
    let gaps: Vec<GapKey> = engine.space(space).indexes[index]
        .global_gaps
        .iter()
        .copied()
        .filter(|&g| matches!(engine.gaps[g].kind, GapKind::FullScan))
        .collect();
    for g in gaps {
        let txn = engine.gaps[g].txn;
        trace!(?txn, index, "full-scan gap hit by write, converting to inplace");
        attach(
            engine,
            GapItem {
                key: GapKey::default(),
                txn,
                space,
                location: GapLocation::Story { story: new_story, index },
                kind: GapKind::Inplace,
            },
        );
    }
}

fn scan_point_holes(engine: &mut Engine, space: SpaceId, index: usize, new_key: &Key, new_story: StoryKey) {
    let index_id = storyline_core::IndexId::new(index as u32);
    let waiters = engine
        .point_holes
        .remove(&(space, index_id, new_key.clone()))
        .unwrap_or_default();
    for g in waiters {
        let txn = engine.gaps.get(g).map(|i| i.txn);
        untrack(engine, g);
        if let Some(txn) = txn {
            trace!(?txn, index, "point hole hit by write, converting to inplace");
            attach(
                engine,
                GapItem {
                    key: GapKey::default(),
                    txn,
                    space,
                    location: GapLocation::Story { story: new_story, index },
                    kind: GapKind::Inplace,
                },
            );
        }
    }
}

/// Tie-break behavior for a nearby gap crossed by a write. Three
/// actions are possible; `Split` is realized as
/// "attach an inplace gap to the new story *and* leave the original
/// nearby gap in place" — the new story's story-owner is now a hard
/// conflict for the original holder, while anything still outside the
/// remaining range stays tracked by the untouched original tracker, so
/// callers see the same set of future conflicts a literal range split
/// would produce without needing to duplicate/fragment the tracker's
/// key range bookkeeping (see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TieBreak {
    Leave,
    Split,
    Move,
}

fn tie_break(iter_type: IteratorType, cmp: std::cmp::Ordering, partial_key: bool) -> TieBreak {
    use std::cmp::Ordering::*;
    match iter_type {
        IteratorType::Eq | IteratorType::ReverseEq => {
            if cmp != Equal {
                TieBreak::Leave
            } else if partial_key {
                TieBreak::Split
            } else {
                TieBreak::Move
            }
        }
        IteratorType::Gt | IteratorType::Ge => match cmp {
            Less => TieBreak::Leave,
            Equal => TieBreak::Move,
            Greater => TieBreak::Split,
        },
        IteratorType::Lt | IteratorType::Le => match cmp {
            Greater => TieBreak::Leave,
            Equal => TieBreak::Move,
            Less => TieBreak::Split,
        },
        IteratorType::All => TieBreak::Move,
    }
}

fn scan_nearby_gaps(engine: &mut Engine, space: SpaceId, index: usize, new_key: &Key, new_story: StoryKey) {
    let successor = engine.space(space).indexes[index].index.successor_of(new_key);
    let mut candidates: Vec<GapKey> = engine.space(space).indexes[index]
        .global_gaps
        .iter()
        .copied()
        .collect();
    if let Some(succ) = &successor {
        let succ_story = engine.story_for_tuple(space, succ);
        let succ_top = story::find_top(engine, succ_story, index);
        candidates.extend(engine.stories[succ_top].links[index].read_gaps.iter().copied());
    }

    for g in candidates {
        let Some(item) = engine.gaps.get(g).cloned() else {
            continue;
        };
        let GapKind::Nearby { iter_type, key, part_count } = item.kind.clone() else {
            continue;
        };
        let cmp = new_key
            .0
            .iter()
            .zip(key.0.iter())
            .map(|(a, b)| a.cmp(b))
            .find(|o| *o != std::cmp::Ordering::Equal)
            .unwrap_or(std::cmp::Ordering::Equal);
        let partial = part_count < new_key.len();
        match tie_break(iter_type, cmp, partial) {
            TieBreak::Leave => {}
            TieBreak::Move => {
                untrack(engine, g);
                attach(
                    engine,
                    GapItem {
                        key: GapKey::default(),
                        txn: item.txn,
                        space,
                        location: GapLocation::Story { story: new_story, index },
                        kind: GapKind::Nearby { iter_type, key, part_count },
                    },
                );
            }
            TieBreak::Split => {
                attach(
                    engine,
                    GapItem {
                        key: GapKey::default(),
                        txn: item.txn,
                        space,
                        location: GapLocation::Story { story: new_story, index },
                        kind: GapKind::Inplace,
                    },
                );
            }
        }
    }
}

/// Notify count gaps of a delete that did not displace anything
/// physically: a pure delete still has to conflict any counter its
/// removed tuple fell within. Unlike `scan_on_write`, a delete never
/// moves the physical index entry at `add_stmt` time, so only the count
/// sub-scan applies.
pub fn notify_count_gaps_of_delete(engine: &mut Engine, space: SpaceId, index: usize, tuple: &Tuple, story: StoryKey) {
    scan_count_gaps(engine, space, index, tuple, story, false);
}

fn scan_count_gaps(engine: &mut Engine, space: SpaceId, index: usize, tuple: &Tuple, new_story: StoryKey, is_insert: bool) {
    let gaps: Vec<GapKey> = engine.space(space).indexes[index]
        .global_gaps
        .iter()
        .copied()
        .filter(|&g| matches!(engine.gaps[g].kind, GapKind::Count { .. }))
        .collect();
    for g in gaps {
        let Some(item) = engine.gaps.get(g).cloned() else {
            continue;
        };
        let GapKind::Count { iter_type, key, until, .. } = item.kind.clone() else {
            continue;
        };
        let slot = &engine.space(space).indexes[index];
        let cmp = slot.index.compare_with_key(tuple, &key);
        let in_range = iter_type.matches(cmp)
            && until
                .as_ref()
                .map(|u| slot.index.compare(tuple, u) != std::cmp::Ordering::Equal)
                .unwrap_or(true);
        if !in_range {
            continue;
        }
        if is_insert {
            crate::tracker::track_read_story(engine, item.txn, new_story);
        } else {
            // Delete of a matching tuple also invalidates the counter:
            // promote to a reader of the story being removed so the
            // normal commit/prepare cascade conflicts it.
            crate::tracker::track_read_story(engine, item.txn, new_story);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MvccConfig;
    use storyline_core::{FieldValue, Isolation};
    use storyline_index::{HashIndex, IndexDef, OrderedIndex};

    fn setup_ordered() -> (Engine, SpaceId) {
        let mut engine = Engine::new(MvccConfig::default());
        let space = SpaceId::new(1);
        engine.register_space(space, vec![Box::new(OrderedIndex::new(IndexDef::single(0)))]);
        (engine, space)
    }

    #[test]
    fn full_scan_gap_converts_on_insert() {
        let mut engine = Engine::new(MvccConfig::default());
        let space = SpaceId::new(1);
        engine.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0)))]);
        let txn = engine.begin(Isolation::ReadCommitted);
        track_full_scan(&mut engine, txn, space, 0);
        assert_eq!(engine.txn(txn).gap_list.len(), 1);

        let new_tuple = Tuple::new([FieldValue::Int(1)]);
        let new_story = story::story_new(&mut engine, space, new_tuple.clone(), true);
        scan_full_scan_gaps(&mut engine, space, 0, new_story);
        // Original full-scan gap untouched; new inplace gap recorded on
        // txn (attached to the new story).
        assert_eq!(engine.txn(txn).gap_list.len(), 2);
    }

    #[test]
    fn point_hole_resolved_by_matching_insert() {
        let mut engine = Engine::new(MvccConfig::default());
        let space = SpaceId::new(1);
        engine.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0)))]);
        let txn = engine.begin(Isolation::ReadCommitted);
        let key = Key::new([FieldValue::Int(1)]);
        track_point(&mut engine, txn, space, 0, key.clone());
        assert!(engine.point_holes.contains_key(&(space, storyline_core::IndexId::new(0), key.clone())));

        let new_tuple = Tuple::new([FieldValue::Int(1)]);
        let new_story = story::story_new(&mut engine, space, new_tuple, true);
        scan_point_holes(&mut engine, space, 0, &key, new_story);
        assert!(!engine.point_holes.contains_key(&(space, storyline_core::IndexId::new(0), key)));
    }

    #[test]
    fn nearby_gap_moves_when_direction_matches() {
        let (mut engine, space) = setup_ordered();
        let txn = engine.begin(Isolation::ReadCommitted);
        let scan_key = Key::new([FieldValue::Int(2)]);
        track_gap(&mut engine, txn, space, 0, None, IteratorType::Ge, scan_key, 1);
        let new_tuple = Tuple::new([FieldValue::Int(3)]);
        let new_story = story::story_new(&mut engine, space, new_tuple, true);
        scan_nearby_gaps(&mut engine, space, 0, &Key::new([FieldValue::Int(3)]), new_story);
        assert_eq!(engine.stories[new_story].links[0].read_gaps.len(), 1);
    }
}
