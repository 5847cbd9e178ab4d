//! The garbage collector (`gc_step`).
//!
//! Runs opportunistically after every commit/rollback, advancing a
//! round-robin cursor through the global story list and unlinking
//! stories no transaction can possibly reach anymore.

use storyline_index::ReplaceMode;
use tracing::trace;

use crate::engine::Engine;
use crate::gap;
use crate::keys::StoryKey;
use crate::story;
use crate::tracker;

/// Run `iterations` classification steps, advancing `engine.gc_cursor`
/// through `engine.story_list`. Scaling the iteration count to story
/// creation rate plus backlog is the caller's responsibility via
/// `gc_steps_per_story`; this function just runs the count it's given.
pub fn gc_step(engine: &mut Engine, iterations: usize) {
    if !engine.is_enabled() {
        return;
    }
    for _ in 0..iterations {
        if engine.story_list.is_empty() {
            return;
        }
        if engine.gc_cursor >= engine.story_list.len() {
            engine.gc_cursor = 0;
        }
        let story = engine.story_list[engine.gc_cursor];
        if !engine.stories.contains_key(story) {
            // Already collected or never materialized; drop it from the
            // list and don't advance the cursor past the shrink.
            engine.story_list.remove(engine.gc_cursor);
            continue;
        }
        if classify_and_maybe_collect(engine, story) {
            engine.story_list.remove(engine.gc_cursor);
        } else {
            engine.gc_cursor += 1;
        }
    }
}

fn classify_and_maybe_collect(engine: &mut Engine, story: StoryKey) -> bool {
    // 1. Referenced by a live statement or reader.
    let referenced = {
        let s = &engine.stories[story];
        s.add_stmt.is_some() || !s.del_stmts.is_empty() || !s.reader_list.is_empty()
    };
    if referenced {
        return false;
    }

    // 2. Its add/del PSN is >= the lowest rv_psn among read-view txns.
    let lowest_rv = engine.lowest_rv_psn();
    if let Some(floor) = lowest_rv {
        let s = &engine.stories[story];
        if s.add_psn >= floor || s.del_psn >= floor {
            return false;
        }
    }

    // 3. Structural: unlinking a head that still has an older neighbor
    //    would leave the chain's successor logically head without
    //    being physically present in the index; and (secondary index)
    //    a still in-progress-inserting newer neighbor might roll back
    //    and need this story resurrected.
    let index_count = engine.stories[story].links.len();
    for i in 0..index_count {
        let link = &engine.stories[story].links[i];
        if link.in_index && link.older_story.is_some() {
            return false;
        }
        if i != 0 {
            if let Some(newer) = link.newer_story {
                let newer_in_progress_insert = {
                    let n = &engine.stories[newer];
                    n.add_stmt.is_some() && !n.add_psn.is_prepared()
                };
                if newer_in_progress_insert {
                    return false;
                }
            }
        }
    }

    // 4. Any read_gaps attached anywhere.
    let has_gaps = engine.stories[story].links.iter().any(|l| !l.read_gaps.is_empty());
    if has_gaps {
        return false;
    }

    // 5. Unlink from every chain, physically clearing a still-indexed
    //    deleted head, then deallocate.
    collect(engine, story, index_count);
    true
}

fn collect(engine: &mut Engine, story: StoryKey, index_count: usize) {
    let space = engine.stories[story].space;
    let del_psn = engine.stories[story].del_psn;

    for i in 0..index_count {
        let (older, newer, was_head) = {
            let link = &engine.stories[story].links[i];
            (link.older_story, link.newer_story, link.in_index)
        };
        if let Some(o) = older {
            engine.stories[o].links[i].newer_story = newer;
        }
        if let Some(n) = newer {
            engine.stories[n].links[i].older_story = older;
        }
        if was_head {
            debug_assert!(older.is_none(), "gc must never unlink a head with an older neighbor");
            if del_psn.is_prepared() {
                let def = engine.space(space).indexes[i].index.def().clone();
                let key = def.key_of(&engine.stories[story].tuple.clone());
                engine.space_mut(space).indexes[i]
                    .index
                    .replace(&key, None, ReplaceMode::ReplaceOrInsert);
            } else if let Some(n) = newer {
                engine.stories[n].links[i].in_index = true;
            }
        }
        let gaps: Vec<_> = std::mem::take(&mut engine.stories[story].links[i].read_gaps);
        for g in gaps {
            gap::untrack(engine, g);
        }
    }

    let readers: Vec<_> = std::mem::take(&mut engine.stories[story].reader_list);
    for r in readers {
        tracker::untrack(engine, r);
    }

    let tuple_key = engine.stories[story].tuple.key();
    if engine.tuple_story.get(&tuple_key) == Some(&story) {
        engine.tuple_story.remove(&tuple_key);
    }
    engine.stories.remove(story);
    trace!(?story, "gc collected story");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MvccConfig;
    use crate::lifecycle;
    use crate::transaction::StmtMode;
    use storyline_core::{FieldValue, Isolation, SpaceId, Tuple};
    use storyline_index::{HashIndex, IndexDef};

    fn setup() -> (Engine, SpaceId) {
        let mut engine = Engine::new(MvccConfig::default());
        let space = SpaceId::new(1);
        engine.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0)))]);
        (engine, space)
    }

    #[test]
    fn committed_unreferenced_story_is_collected() {
        let (mut engine, space) = setup();
        let txn = engine.begin(Isolation::ReadCommitted);
        let tuple = Tuple::new([FieldValue::Int(1)]);
        let stmt = lifecycle::add_stmt(&mut engine, txn, space, None, Some(tuple), StmtMode::Insert).unwrap();
        lifecycle::prepare_stmt(&mut engine, stmt).unwrap();
        lifecycle::commit_stmt(&mut engine, stmt);
        gc_step(&mut engine, 10);
        assert!(engine.story_list.is_empty());
    }

    #[test]
    fn story_with_active_reader_is_not_collected() {
        let (mut engine, space) = setup();
        let reader = engine.begin(Isolation::ReadCommitted);
        let tuple = Tuple::new([FieldValue::Int(1)]);
        let story = crate::story::story_new(&mut engine, space, tuple, true);
        tracker::track_read_story(&mut engine, reader, story);
        gc_step(&mut engine, 10);
        assert!(engine.stories.contains_key(story));
    }
}
