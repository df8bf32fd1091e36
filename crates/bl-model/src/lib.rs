//! # bl-model
//!
//! The binned Poisson signal-plus-background model.
//!
//! - [`BinnedDataset`]: validated, immutable per-bin observations and yields
//! - [`PoissonLikelihood`]: `log L(mu)` with `lambda_i(mu) = mu * s_i + b_i`
//! - [`ModelSpec`]: JSON description used by file-based front ends

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dataset;
pub mod likelihood;
pub mod schema;

pub use dataset::BinnedDataset;
pub use likelihood::{ModelConfig, PoissonLikelihood, PreparedPoisson};
pub use schema::ModelSpec;
