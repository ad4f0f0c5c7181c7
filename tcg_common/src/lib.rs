//! Shared types for trading card operations
//!
//! Used by the marketplace core and by anything else that has to speak to the
//! remote card catalog: the normalized card record, condition tiers, and the
//! remote lookup error type.

pub mod card;
pub mod condition;
pub mod error;

pub use card::{CardRecord, CardSource, RemoteCard, RemoteCardPage, RemoteImages, RemoteSet};
pub use condition::Condition;
pub use error::LookupError;
