//! Arena key types.
//!
//! Cyclic references between linked records are realized with
//! arena-allocated records and doubly linked intrusive lists so that
//! removal is O(1) and no ownership cycle requires reference cycles:
//! every record the engine links into chains or lists is stored in a
//! `slotmap::SlotMap` and referenced by a generation-checked key rather
//! than `Rc`/`RefCell`.
//! A stale key (the record it named was freed by GC) is simply absent
//! from the map, never a dangling pointer.

slotmap::new_key_type! {
    /// Key for a [`crate::story::Story`] in the engine's story arena.
    pub struct StoryKey;
    /// Key for a [`crate::tracker::ReadTracker`] in the reader arena.
    pub struct ReaderKey;
    /// Key for a [`crate::gap::GapItem`] in the gap arena.
    pub struct GapKey;
    /// Key for a [`crate::transaction::Stmt`] in the statement arena.
    pub struct StmtKey;
}
