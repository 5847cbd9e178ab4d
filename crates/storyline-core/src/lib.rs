//! Foundational types shared by the storyline MVCC engine and the index
//! layer it sits on top of.
//!
//! This crate defines:
//! - [`SpaceId`] / [`IndexId`]: identifiers for spaces (tables) and the
//!   indexes attached to them.
//! - [`TxnId`] / [`Psn`]: transaction identity and the monotonic prepare
//!   sequence number that orders prepared writes.
//! - [`Tuple`]: the immutable, reference-counted row type stories version.
//! - [`Isolation`] / [`TxnStatus`]: the isolation levels and transaction
//!   lifecycle states the engine reasons about.
//! - [`StorylineError`] / [`Result`]: the crate-wide error type.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ids;
pub mod isolation;
pub mod tuple;

pub use error::{Result, StorylineError};
pub use ids::{IndexId, Psn, SpaceId, TxnId};
pub use isolation::{Isolation, TxnStatus};
pub use tuple::{FieldValue, Tuple};
