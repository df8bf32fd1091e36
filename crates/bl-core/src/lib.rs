//! # bl-core
//!
//! Core types, traits, and error handling for binlimit.
//!
//! This crate provides:
//! - Common error types
//! - Core traits (`PoiLikelihood`, `PreparedNll`, `FixedPoiModel`)
//! - Shared data structures (`FitResult`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{FixedPoiModel, PoiLikelihood, PreparedNll, PreparedPoiRef};
pub use types::FitResult;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
