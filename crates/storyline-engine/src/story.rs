//! Story chains: per-tuple version records and the per-index doubly
//! linked chains that order them newest-to-oldest.

use smallvec::SmallVec;
use storyline_core::{Psn, SpaceId, Tuple};
use tracing::trace;

use crate::engine::Engine;
use crate::keys::{GapKey, ReaderKey, StmtKey, StoryKey};

/// Classification kept for statistics and GC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryStatus {
    /// Referenced by a live statement or reader; GC must not touch it.
    Used,
    /// Not directly referenced, but may still be needed by an active
    /// read-view transaction.
    ReadView,
    /// Not directly referenced, but a gap tracker is still attached.
    TrackGap,
}

/// Per-index linkage for one story.
#[derive(Debug, Default)]
pub struct Link {
    /// The next-newer story in this index's chain.
    pub newer_story: Option<StoryKey>,
    /// The next-older story in this index's chain.
    pub older_story: Option<StoryKey>,
    /// Gap trackers whose "location" is this story in this index: only
    /// ever populated on the chain's top story.
    pub read_gaps: Vec<GapKey>,
    /// True iff this story is the top of its chain *and* its tuple is
    /// what index `i` physically stores at this key (the
    /// top-of-chain invariant).
    pub in_index: bool,
}

/// A version record for a tuple in a specific space.
#[derive(Debug)]
pub struct Story {
    pub(crate) key: StoryKey,
    /// The space this story belongs to.
    pub space: SpaceId,
    /// The versioned tuple this story wraps.
    pub tuple: Tuple,
    /// The statement currently introducing this version, if in progress
    /// or prepared; `None` once committed or if this story was never
    /// the target of an insert (e.g. a tracker-created degenerate
    /// story for an already-clean tuple).
    pub add_stmt: Option<StmtKey>,
    /// Statements that currently intend to delete this version. Spec
    /// §3 describes this as a singly linked list; realized here as a
    /// `Vec` for simpler GC bookkeeping (functionally equivalent, see
    /// `DESIGN.md`).
    pub del_stmts: Vec<StmtKey>,
    /// PSN assigned to `add_stmt`'s transaction at preparation;
    /// `Psn::UNPREPARED` until then.
    pub add_psn: Psn,
    /// PSN assigned to the (first) deleting transaction at preparation.
    /// A rolled-back deleter synthesizes a PSN below every real PSN
    /// via [`Story::rollback_del_psn`].
    pub del_psn: Psn,
    /// Every read tracker currently pinning this story.
    pub reader_list: Vec<ReaderKey>,
    /// One entry per index the owning space had at creation time.
    pub links: SmallVec<[Link; 4]>,
    /// GC/statistics classification, refreshed by `gc_step`.
    pub status: StoryStatus,
    /// True iff the tuple is no longer in the primary index but this
    /// story still holds the only strong reference.
    pub tuple_is_retained: bool,
    /// True iff auxiliary functional-index keys are cached for this
    /// tuple.
    pub has_func_key: bool,
}

impl Story {
    /// The synthetic `del_psn` a rolled-back-while-prepared statement
    /// installs: lower than every real PSN, so the story is invisible to
    /// every viewpoint without needing its own sentinel comparison.
    pub const ROLLED_BACK_DEL_PSN: Psn = Psn::UNPREPARED;

    fn link(&self, index: usize) -> &Link {
        &self.links[index]
    }

    fn link_mut(&mut self, index: usize) -> &mut Link {
        &mut self.links[index]
    }

    /// Whether this story is currently the top of chain `index`.
    pub fn is_top(&self, index: usize) -> bool {
        self.links[index].in_index
    }
}

/// Allocate a story, publish it in the per-tuple hash, mark the tuple
/// dirty, and link it into the global story list.
///
/// `physically_present` is true when every index will hold this story's
/// tuple as a solo chain head immediately (a fresh insert that
/// displaced nothing anywhere); in that case every `link[i].in_index` is
/// initialized `true` up front. When false, the caller (the insert
/// algorithm in `lifecycle.rs`) links this story above a displaced
/// story itself via [`link_top`].
pub fn story_new(engine: &mut Engine, space: SpaceId, tuple: Tuple, physically_present: bool) -> StoryKey {
    let index_count = engine.space(space).index_count();
    let mut links: SmallVec<[Link; 4]> = SmallVec::with_capacity(index_count);
    for _ in 0..index_count {
        links.push(Link {
            in_index: physically_present,
            ..Default::default()
        });
    }
    let tuple_key = tuple.key();
    tuple.mark_dirty();
    let story_key = engine.stories.insert_with_key(|key| Story {
        key,
        space,
        tuple,
        add_stmt: None,
        del_stmts: Vec::new(),
        add_psn: Psn::UNPREPARED,
        del_psn: Psn::UNPREPARED,
        reader_list: Vec::new(),
        links,
        status: StoryStatus::Used,
        tuple_is_retained: false,
        has_func_key: false,
    });
    engine.tuple_story.insert(tuple_key, story_key);
    engine.story_list.push(story_key);
    trace!(?space, ?story_key, "story_new");
    story_key
}

/// Attach `new` as the head of chain `index`, either as a freshly
/// created solo head (`is_new_tuple`) or by reordering an existing story
/// up from wherever it was (used by `prepare_stmt`'s sink).
///
/// Moves `in_index` and `read_gaps` from `old`'s link (when `old` is
/// given) to `new`'s link; for the primary index (`index == 0`) the
/// caller is responsible for the physical `tuple` reference transfer,
/// since that is a `Rc` clone/drop the story arena does not itself
/// model explicitly (tuples are reference counted by `Rc` already).
pub fn link_top(
    engine: &mut Engine,
    new: StoryKey,
    old: Option<StoryKey>,
    index: usize,
    is_new_tuple: bool,
) {
    if let Some(old_key) = old {
        let (gaps, was_top) = {
            let old_story = &mut engine.stories[old_key];
            let link = old_story.link_mut(index);
            let gaps = std::mem::take(&mut link.read_gaps);
            let was_top = link.in_index;
            link.in_index = false;
            (gaps, was_top)
        };
        {
            let old_story = &mut engine.stories[old_key];
            old_story.link_mut(index).newer_story = Some(new);
        }
        {
            let new_story = &mut engine.stories[new];
            new_story.link_mut(index).older_story = Some(old_key);
            new_story.link_mut(index).read_gaps = gaps;
            new_story.link_mut(index).in_index = was_top || is_new_tuple;
        }
    } else {
        let new_story = &mut engine.stories[new];
        new_story.link_mut(index).in_index = true;
    }
    trace!(index, ?new, ?old, is_new_tuple, "link_top");
}

/// Swap `story` and its current older neighbor `older` in chain
/// `index`, without touching what the physical index points to (spec
/// §4.1 `reorder`; used by `prepare_stmt` to sink in-progress versions
/// below newly prepared ones).
pub fn reorder(engine: &mut Engine, story: StoryKey, older: StoryKey, index: usize) {
    let grandparent_newer = engine.stories[older].link(index).newer_story;
    debug_assert_eq!(grandparent_newer, Some(story), "older must be story's immediate predecessor");
    let grandchild_older = engine.stories[story].link(index).older_story;
    debug_assert_eq!(grandchild_older, Some(older), "story must be older's immediate successor");

    let above = engine.stories[story].link(index).newer_story;
    let below = engine.stories[older].link(index).older_story;
    let story_was_top = engine.stories[story].link(index).in_index;

    if let Some(above_key) = above {
        engine.stories[above_key].link_mut(index).older_story = Some(older);
    }
    if let Some(below_key) = below {
        engine.stories[below_key].link_mut(index).newer_story = Some(story);
    }

    {
        let older_story = &mut engine.stories[older];
        older_story.link_mut(index).newer_story = above;
        older_story.link_mut(index).older_story = Some(story);
        older_story.link_mut(index).in_index = story_was_top;
    }
    {
        let new_story = &mut engine.stories[story];
        new_story.link_mut(index).newer_story = Some(older);
        new_story.link_mut(index).older_story = below;
        new_story.link_mut(index).in_index = false;
    }
    trace!(index, ?story, ?older, "reorder");
}

/// Walk `newer_story` links from `story` until the chain's top (spec
/// §4.1 `find_top`).
pub fn find_top(engine: &Engine, mut story: StoryKey, index: usize) -> StoryKey {
    while let Some(newer) = engine.stories[story].link(index).newer_story {
        story = newer;
    }
    story
}

/// Detach `stmt` as the `add_stmt` owner of `story`.
pub fn unlink_added_by(engine: &mut Engine, story: StoryKey, stmt: StmtKey) {
    let s = &mut engine.stories[story];
    if s.add_stmt == Some(stmt) {
        s.add_stmt = None;
    }
}

/// Remove `stmt` from `story`'s deleter list.
pub fn unlink_deleted_by(engine: &mut Engine, story: StoryKey, stmt: StmtKey) {
    let s = &mut engine.stories[story];
    s.del_stmts.retain(|&d| d != stmt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MvccConfig;
    use storyline_core::FieldValue;
    use storyline_index::{HashIndex, IndexDef};

    fn setup() -> (Engine, SpaceId) {
        let mut engine = Engine::new(MvccConfig::default());
        let space = SpaceId::new(1);
        engine.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0)))]);
        (engine, space)
    }

    #[test]
    fn story_new_marks_tuple_dirty_and_registers_hash() {
        let (mut engine, space) = setup();
        let tuple = Tuple::new([FieldValue::Int(1)]);
        let key = story_new(&mut engine, space, tuple.clone(), true);
        assert!(tuple.is_dirty());
        assert!(engine.stories[key].is_top(0));
        assert_eq!(engine.tuple_story.get(&tuple.key()), Some(&key));
    }

    #[test]
    fn link_top_moves_in_index_and_gaps() {
        let (mut engine, space) = setup();
        let old_tuple = Tuple::new([FieldValue::Int(1)]);
        let old = story_new(&mut engine, space, old_tuple, true);
        let new_tuple = Tuple::new([FieldValue::Int(1)]);
        let new = story_new(&mut engine, space, new_tuple, false);
        link_top(&mut engine, new, Some(old), 0, false);
        assert!(!engine.stories[old].is_top(0));
        assert!(engine.stories[new].is_top(0));
        assert_eq!(engine.stories[new].link(0).older_story, Some(old));
        assert_eq!(engine.stories[old].link(0).newer_story, Some(new));
    }

    #[test]
    fn find_top_walks_to_head() {
        let (mut engine, space) = setup();
        let t1 = story_new(&mut engine, space, Tuple::new([FieldValue::Int(1)]), true);
        let t2 = story_new(&mut engine, space, Tuple::new([FieldValue::Int(1)]), false);
        link_top(&mut engine, t2, Some(t1), 0, false);
        assert_eq!(find_top(&engine, t1, 0), t2);
        assert_eq!(find_top(&engine, t2, 0), t2);
    }
}
