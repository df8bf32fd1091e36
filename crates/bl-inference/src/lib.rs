//! # bl-inference
//!
//! Statistical inference for the binned Poisson model.
//!
//! This crate provides:
//! - Maximum likelihood estimation of the signal strength
//! - The one-sided profile likelihood ratio `q_mu` / `qtilde_mu`
//! - Asymptotic CLs, expected bands and upper limits
//! - A host-facing backend trait and a name-keyed registry
//!
//! ## Architecture
//!
//! The optimizer and MLE only see the `PoiLikelihood` trait from bl-core; the
//! asymptotic calculator is specialised to `bl_model::PoissonLikelihood`
//! because it needs to build Asimov data.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Host-facing backend trait and the Poisson backend.
pub mod backend;
/// Frequentist hypothesis testing (asymptotic CLs).
pub mod hypotest;
/// Maximum-likelihood estimation of the POI.
pub mod mle;
/// Bounded one-dimensional minimizer (Brent root of the NLL derivative).
pub mod optimizer;
/// Profile likelihood test statistic and scans.
pub mod profile_likelihood;
/// Backend discovery by name.
pub mod registry;
/// Asimov and Poisson pseudo-data.
pub mod toys;

pub use backend::{BackendInfo, Convention, ExpectationType, PoissonBackend, StatisticalModel};
pub use hypotest::{AsymptoticCLsContext, AsymptoticConfig, HypotestExpectedSet, HypotestResult};
pub use mle::MaximumLikelihoodEstimator;
pub use optimizer::{BoundedScalarOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use profile_likelihood::{ProfileLikelihoodScan, ProfilePoint, TestStatistic};
pub use registry::{BackendFactory, Registry};
