//! Shared foundation for the Hearth connectivity engine.
//!
//! Every connectivity crate reports failures as data rather than panics, so
//! the one thing they all share is the error type defined here.

pub mod errors;

pub use errors::{HearthError, Result};
