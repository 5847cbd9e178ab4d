//! The index-layer contract the storyline MVCC engine consumes, plus two
//! concrete implementations good enough to drive and test the engine.
//!
//! The indexes themselves (tree, hash, r-tree) are out of scope for the
//! engine; this crate is the minimal external collaborator the engine
//! expects, not a general-purpose index library.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod hash;
pub mod index;
pub mod iterator_type;
pub mod key;
pub mod ordered;

pub use hash::HashIndex;
pub use index::{FunctionalIndex, Index, ReplaceMode, ReplaceOutcome};
pub use iterator_type::IteratorType;
pub use key::{IndexDef, Key};
pub use ordered::OrderedIndex;
