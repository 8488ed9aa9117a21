//! Domain layer types and invariants.

pub mod comments;
pub mod error;
