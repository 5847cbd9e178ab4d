//! End-to-end MVCC scenarios.
//!
//! Each test below drives the public `Storyline` facade the way an
//! embedding database would: begin transactions, read/insert/replace,
//! prepare, commit or roll back, and observe the resulting transaction
//! states and visibility outcomes.

use storyline::{
    FieldValue, HashIndex, Index, IndexDef, Isolation, IteratorType, Key, OrderedIndex,
    SpaceId, StmtMode, Storyline, Tuple, TxnStatus,
};

fn hash_space() -> (Storyline, SpaceId) {
    let mut db = Storyline::default();
    let space = SpaceId::new(1);
    db.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0))) as Box<dyn Index>]);
    (db, space)
}

fn ordered_space() -> (Storyline, SpaceId) {
    let mut db = Storyline::default();
    let space = SpaceId::new(1);
    db.register_space(space, vec![Box::new(OrderedIndex::new(IndexDef::single(0))) as Box<dyn Index>]);
    (db, space)
}

fn key(n: i64) -> Key {
    Key::new([FieldValue::Int(n)])
}

/// Write-skew prevention, READ_COMMITTED branch: T2's insert collides
/// with T1's now-visible prepared version and is rejected outright.
#[test]
fn write_skew_read_committed_duplicate_key() {
    let (mut db, space) = hash_space();

    let t1 = db.begin(Isolation::ReadCommitted);
    let out = db.read(Some(t1), space, 0, &key(1));
    assert!(out.tuple.is_none(), "key 1 must be absent before T1 writes it");

    let t2 = db.begin(Isolation::ReadCommitted);
    let out2 = db.read(Some(t2), space, 0, &key(1));
    assert!(out2.tuple.is_none());
    assert_eq!(db.engine().point_hole_count(), 2, "both T1 and T2 hold a point hole on key 1");

    let stmt1 = db
        .insert(t1, space, Tuple::new([FieldValue::Int(1), FieldValue::Str("a".into())]), StmtMode::Insert)
        .unwrap();
    // T1's insert converts both point holes (its own and T2's) into
    // inplace gaps on its own new story.
    assert_eq!(db.engine().point_hole_count(), 0);

    db.prepare(stmt1).unwrap();
    assert_eq!(db.engine().txn_status(t2), TxnStatus::InReadView);

    // READ_COMMITTED sees prepared data, so T2's insert now collides
    // with T1's visible-but-unconfirmed 'a'.
    let err = db
        .insert(t2, space, Tuple::new([FieldValue::Int(1), FieldValue::Str("b".into())]), StmtMode::Insert)
        .unwrap_err();
    assert!(err.is_conflict());
}

/// Write-skew prevention, READ_CONFIRMED branch: T2 is sent to a read
/// view by T1's prepare before it ever attempts its own insert, so its
/// insert silently succeeds into the version chain instead of hitting a
/// duplicate-key error.
#[test]
fn write_skew_read_confirmed_demotes_before_conflict() {
    let (mut db, space) = hash_space();

    let t1 = db.begin(Isolation::ReadCommitted);
    db.read(Some(t1), space, 0, &key(1));

    let t2 = db.begin(Isolation::ReadConfirmed);
    db.read(Some(t2), space, 0, &key(1));

    let stmt1 = db
        .insert(t1, space, Tuple::new([FieldValue::Int(1), FieldValue::Str("a".into())]), StmtMode::Insert)
        .unwrap();
    db.prepare(stmt1).unwrap();
    assert_eq!(db.engine().txn_status(t2), TxnStatus::InReadView);
    let t1_psn = db.engine().txn_psn(t1);
    assert_eq!(db.engine().rv_psn(t2), Some(t1_psn));

    // READ_CONFIRMED never treats a prepared-but-unconfirmed version as
    // visible, so the duplicate-key check does not fire.
    let stmt2 = db
        .insert(t2, space, Tuple::new([FieldValue::Int(1), FieldValue::Str("b".into())]), StmtMode::Insert)
        .expect("insert behind T1's prepared version must succeed");

    db.commit(stmt1);
    // T2 is still demoted: it must not observe anything past T1's PSN.
    assert_eq!(db.engine().txn_status(t2), TxnStatus::InReadView);
    let _ = stmt2;
}

/// Count gap: a transaction's range count must be conflicted by a later
/// insert that falls inside the counted range.
#[test]
fn count_gap_conflicts_on_matching_insert() {
    let (mut db, space) = ordered_space();
    for v in [1i64, 2, 3] {
        let txn = db.begin(Isolation::ReadCommitted);
        let stmt = db.insert(txn, space, Tuple::new([FieldValue::Int(v)]), StmtMode::Insert).unwrap();
        db.prepare(stmt).unwrap();
        db.commit(stmt);
    }

    let t1 = db.begin(Isolation::ReadCommitted);
    let invisible = db.track_count_until(t1, space, 0, IteratorType::Ge, key(1), 1, None);
    assert_eq!(invisible, 0, "all three committed tuples are already visible to T1");

    let t2 = db.begin(Isolation::ReadCommitted);
    let stmt2 = db.insert(t2, space, Tuple::new([FieldValue::Int(4)]), StmtMode::Insert).unwrap();
    assert_eq!(db.engine().txn_status(t1), TxnStatus::InProgress, "count gap not yet cascaded before prepare");

    db.prepare(stmt2).unwrap();
    assert_eq!(
        db.engine().txn_status(t1),
        TxnStatus::InReadView,
        "T1's count gap must match {{4}} and demote it before T2 commits"
    );
}

/// Nearby gap split: an insert strictly between a scan's key and its
/// recorded successor must conflict the scan, while the scan's own
/// tracker keeps covering the remaining interval.
#[test]
fn nearby_gap_split_on_insert_between() {
    let (mut db, space) = ordered_space();
    for v in [1i64, 5] {
        let txn = db.begin(Isolation::ReadCommitted);
        let stmt = db.insert(txn, space, Tuple::new([FieldValue::Int(v)]), StmtMode::Insert).unwrap();
        db.prepare(stmt).unwrap();
        db.commit(stmt);
    }

    let t1 = db.begin(Isolation::ReadCommitted);
    let five = Tuple::new([FieldValue::Int(5)]);
    db.track_gap(t1, space, 0, Some(&five), IteratorType::Ge, key(2), 1);

    let t2 = db.begin(Isolation::ReadCommitted);
    let stmt2 = db.insert(t2, space, Tuple::new([FieldValue::Int(3)]), StmtMode::Insert).unwrap();
    assert_eq!(db.engine().txn_status(t1), TxnStatus::InProgress);

    db.prepare(stmt2).unwrap();
    assert_eq!(
        db.engine().txn_status(t1),
        TxnStatus::InReadView,
        "3 falls strictly inside T1's recorded GE 2 scan and must conflict it"
    );
}

/// Rollback of a prepared sink: a concurrent replace whose delete
/// pointer was rewired onto the sinking story during preparation must
/// have it rewired back, and transparently continue, on rollback.
#[test]
fn rollback_of_prepared_sink_rewires_deleter_back() {
    let (mut db, space) = hash_space();

    let seed = db.begin(Isolation::ReadCommitted);
    let stmt0 = db
        .insert(seed, space, Tuple::new([FieldValue::Int(1), FieldValue::Str("a".into())]), StmtMode::Insert)
        .unwrap();
    db.prepare(stmt0).unwrap();
    db.commit(stmt0);

    let t1 = db.begin(Isolation::ReadCommitted);
    let a = db.read(Some(t1), space, 0, &key(1)).tuple.expect("'a' is committed and visible");
    let b = Tuple::new([FieldValue::Int(1), FieldValue::Str("b".into())]);
    let stmt1 = db.replace(t1, space, a.clone(), b.clone()).unwrap();

    let t2 = db.begin(Isolation::ReadCommitted);
    let a_for_t2 = db.read(Some(t2), space, 0, &key(1)).tuple.expect("'b' is still in-progress, invisible to T2");
    assert!(a_for_t2.is_same_allocation(&a), "T2 must see the same committed 'a' story T1 based its replace on");
    let c = Tuple::new([FieldValue::Int(1), FieldValue::Str("c".into())]);
    let stmt2 = db.replace(t2, space, a_for_t2, c).unwrap();

    // T1 preparing its delete-of-'a' demotes T2, which also read 'a'.
    db.prepare(stmt1).unwrap();
    assert_eq!(db.engine().txn_status(t2), TxnStatus::InReadView);

    // T1 rolls back: T2's delete pointer (rewired onto 'b' during
    // T1's prepare) is rewired back to 'a', and T2 is transparently
    // re-promoted since that demotion had no other cause.
    db.rollback(stmt1);
    assert_eq!(db.engine().txn_status(t2), TxnStatus::InProgress);

    // T2 continues unaffected: it can still prepare and commit.
    db.prepare(stmt2).unwrap();
    db.commit(stmt2);

    let fresh = db.begin(Isolation::ReadCommitted);
    let final_tuple = db.read(Some(fresh), space, 0, &key(1)).tuple.unwrap();
    assert_eq!(final_tuple.field(1), Some(&FieldValue::Str("c".into())));
}

/// Full-scan gap: enumerating an entire hash index and then having a
/// concurrent insert land must conflict the scanning transaction.
#[test]
fn full_scan_gap_conflicts_on_any_insert() {
    let (mut db, space) = hash_space();

    let t1 = db.begin(Isolation::ReadCommitted);
    db.track_full_scan(t1, space, 0);

    let t2 = db.begin(Isolation::ReadCommitted);
    let stmt2 = db.insert(t2, space, Tuple::new([FieldValue::Int(9)]), StmtMode::Insert).unwrap();
    assert_eq!(db.engine().txn_status(t1), TxnStatus::InProgress);

    db.prepare(stmt2).unwrap();
    assert_eq!(db.engine().txn_status(t1), TxnStatus::InReadView);
}

/// DDL invalidation: every dependent transaction is aborted before the
/// space's indexes are rewritten to the DDL owner's visible versions,
/// and the space rejects further statements afterward.
#[test]
fn ddl_invalidation_aborts_dependents_and_locks_space() {
    let (mut db, space) = hash_space();

    let seed = db.begin(Isolation::ReadCommitted);
    let stmt0 = db.insert(seed, space, Tuple::new([FieldValue::Int(1)]), StmtMode::Insert).unwrap();
    db.prepare(stmt0).unwrap();
    db.commit(stmt0);

    let reader = db.begin(Isolation::ReadCommitted);
    db.read(Some(reader), space, 0, &key(1));
    db.read(Some(reader), space, 0, &key(2));

    let ddl_owner = db.begin(Isolation::ReadCommitted);
    db.invalidate_space(space, ddl_owner);

    assert!(db.is_aborted(reader));
    let err = db.insert(ddl_owner, space, Tuple::new([FieldValue::Int(3)]), StmtMode::Insert).unwrap_err();
    matches!(err, storyline::StorylineError::SpaceInvalidated(_));
}
