//! Read trackers and the reader list.

use storyline_core::{SpaceId, Tuple, TxnId};

use crate::engine::Engine;
use crate::keys::{ReaderKey, StoryKey};

/// {reader transaction, story} — installed whenever `clarify` finds a
/// visible tuple in a dirty chain that is not the reader's own change
///.
#[derive(Debug)]
pub struct ReadTracker {
    pub(crate) key: ReaderKey,
    /// The transaction that performed the read.
    pub reader: TxnId,
    /// The story whose version this transaction observed.
    pub story: StoryKey,
}

/// Record that `txn` read the visible version of `tuple` in `space`,
/// creating a degenerate one-story chain for `tuple` first if it is
/// still clean.
pub fn track_read(engine: &mut Engine, txn: TxnId, space: SpaceId, tuple: &Tuple) -> ReaderKey {
    let story = engine.story_for_tuple(space, tuple);
    track_read_story(engine, txn, story)
}

/// Record that `txn` read `story` directly. Deduplicated by
/// `(reader, story)`; on a repeat read the existing tracker is moved to
/// the front of both MRU lists.
pub fn track_read_story(engine: &mut Engine, txn: TxnId, story: StoryKey) -> ReaderKey {
    if let Some(existing) = find_existing(engine, txn, story) {
        move_to_front(engine, existing);
        return existing;
    }
    let reader_key = engine
        .readers
        .insert_with_key(|key| ReadTracker { key, reader: txn, story });
    engine.stories[story].reader_list.insert(0, reader_key);
    engine.txn_mut(txn).read_set.insert(0, reader_key);
    reader_key
}

/// Parallel front-to-back walk of `story.reader_list` and
/// `txn.read_set`: since both are MRU-ordered and a repeat read is
/// almost always recent on both sides, this terminates in O(1) in the
/// common case and O(min(|story.reader_list|, |txn.read_set|)) worst
/// case.
fn find_existing(engine: &Engine, txn: TxnId, story: StoryKey) -> Option<ReaderKey> {
    let story_list = &engine.stories[story].reader_list;
    let txn_list = &engine.txn(txn).read_set;
    // Scan whichever side is shorter; either list fully determines
    // membership since a tracker always lives in both.
    if story_list.len() <= txn_list.len() {
        story_list
            .iter()
            .find(|&&rk| engine.readers[rk].reader == txn)
            .copied()
    } else {
        txn_list
            .iter()
            .find(|&&rk| engine.readers[rk].story == story)
            .copied()
    }
}

fn move_to_front(engine: &mut Engine, reader: ReaderKey) {
    let (reader_id, story) = {
        let r = &engine.readers[reader];
        (r.reader, r.story)
    };
    let story_list = &mut engine.stories[story].reader_list;
    if let Some(pos) = story_list.iter().position(|&k| k == reader) {
        story_list.remove(pos);
        story_list.insert(0, reader);
    }
    let txn_list = &mut engine.txn_mut(reader_id).read_set;
    if let Some(pos) = txn_list.iter().position(|&k| k == reader) {
        txn_list.remove(pos);
        txn_list.insert(0, reader);
    }
}

/// Detach a reader tracker from both of its lists and free it. Called
/// when a transaction ends (commit/rollback) or when a story is
/// collected out from under it (abort path).
pub fn untrack(engine: &mut Engine, reader: ReaderKey) {
    if let Some(r) = engine.readers.remove(reader) {
        if let Some(story) = engine.stories.get_mut(r.story) {
            story.reader_list.retain(|&k| k != reader);
        }
        if let Some(txn) = engine.txns.get_mut(&r.reader) {
            txn.read_set.retain(|&k| k != reader);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MvccConfig;
    use storyline_core::{FieldValue, Isolation};
    use storyline_index::{HashIndex, IndexDef};

    fn setup() -> (Engine, SpaceId) {
        let mut engine = Engine::new(MvccConfig::default());
        let space = SpaceId::new(1);
        engine.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0)))]);
        (engine, space)
    }

    #[test]
    fn track_read_creates_story_for_clean_tuple() {
        let (mut engine, space) = setup();
        let txn = engine.begin(Isolation::ReadCommitted);
        let tuple = Tuple::new([FieldValue::Int(1)]);
        assert!(!tuple.is_dirty());
        track_read(&mut engine, txn, space, &tuple);
        assert!(tuple.is_dirty());
        assert_eq!(engine.txn(txn).read_set.len(), 1);
    }

    #[test]
    fn repeat_read_dedups_and_moves_to_front() {
        let (mut engine, space) = setup();
        let txn = engine.begin(Isolation::ReadCommitted);
        let tuple = Tuple::new([FieldValue::Int(1)]);
        let r1 = track_read(&mut engine, txn, space, &tuple);
        let tuple2 = Tuple::new([FieldValue::Int(2)]);
        track_read(&mut engine, txn, space, &tuple2);
        let r1_again = track_read(&mut engine, txn, space, &tuple);
        assert_eq!(r1, r1_again);
        assert_eq!(engine.txn(txn).read_set.len(), 2);
        assert_eq!(engine.txn(txn).read_set[0], r1);
    }
}
