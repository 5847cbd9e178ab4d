//! The in-memory MVCC transaction-history engine.
//!
//! Six cooperating components: story chains (`story`), read
//! trackers (`tracker`), gap trackers (`gap`), the visibility resolver
//! (`visibility`), statement lifecycle and conflict cascade
//! (`lifecycle`), and the garbage collector (`gc`). `engine` owns the
//! arenas and registries all of them operate on.

#![warn(clippy::all)]

pub mod engine;
pub mod gap;
pub mod gc;
pub mod keys;
pub mod lifecycle;
pub mod story;
pub mod tracker;
pub mod transaction;
pub mod visibility;

pub use engine::{Engine, IndexSlot, MvccConfig, Space, SpaceStats};
pub use gap::{GapItem, GapKind, GapLocation};
pub use keys::{GapKey, ReaderKey, StmtKey, StoryKey};
pub use story::{Link, Story, StoryStatus};
pub use tracker::ReadTracker;
pub use transaction::{Stmt, StmtMode, Transaction};
pub use visibility::Clarified;
