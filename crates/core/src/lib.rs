//! # habsync-core
//!
//! Shared vocabulary of the habsync crates: the error taxonomy every
//! collaborator speaks, the two-variant [`Outcome`] returned by idempotent
//! mutations, and the typed identifiers of both administered systems.

pub mod error;
pub mod ids;
pub mod outcome;
pub mod result;

pub use error::{EntityKind, Error};
pub use ids::{BoardId, BoardSlug, CardId, ClientId, LabelId, RuleId, UserId, Username};
pub use outcome::Outcome;
pub use result::{Result, ResultExt};
