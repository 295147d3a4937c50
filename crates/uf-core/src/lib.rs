//! # uf-core
//!
//! Shared error type and result records for the unfolding input preparation
//! workspace. Every other crate reports failures through [`Error`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{EnsembleResult, LinearityResult, UnfoldedParameter};

/// Crate version, shared by the `unfold` binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
