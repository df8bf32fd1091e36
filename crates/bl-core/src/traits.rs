//! Core traits for binlimit
//!
//! Inference code (`bl-inference`) is written against these traits, not against
//! the concrete Poisson model in `bl-model`. Every model here has exactly one
//! free parameter: the signal strength `mu`.

use crate::Result;

/// Prepared negative log-likelihood evaluator.
///
/// Models can precompute constants (observations, `ln n!` terms) to speed up
/// repeated evaluations during a fit.
pub trait PreparedNll: Send + Sync {
    /// Compute negative log-likelihood at `mu`.
    fn nll(&self, mu: f64) -> Result<f64>;
}

/// Default prepared wrapper that forwards to the model's `nll`.
#[derive(Debug, Clone, Copy)]
pub struct PreparedPoiRef<'a, M: PoiLikelihood + ?Sized> {
    model: &'a M,
}

impl<'a, M: PoiLikelihood + ?Sized> PreparedPoiRef<'a, M> {
    /// Create a new prepared wrapper that forwards `nll` to the model.
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }
}

impl<M: PoiLikelihood + ?Sized> PreparedNll for PreparedPoiRef<'_, M> {
    fn nll(&self, mu: f64) -> Result<f64> {
        self.model.nll(mu)
    }
}

/// Likelihood of a single parameter of interest.
///
/// `nll` is `-log L` and may be `+inf` at infeasible points; it must never be NaN
/// for a finite `mu`.
pub trait PoiLikelihood: Send + Sync {
    /// Prepared evaluator type (can cache constants).
    type Prepared<'a>: PreparedNll + 'a
    where
        Self: 'a;

    /// POI name.
    fn poi_name(&self) -> &str {
        "mu"
    }

    /// POI bounds (min, max).
    fn poi_bounds(&self) -> (f64, f64);

    /// Suggested initial value.
    fn poi_init(&self) -> f64;

    /// Negative log-likelihood.
    fn nll(&self, mu: f64) -> Result<f64>;

    /// Derivative of the NLL with respect to `mu`.
    fn grad_nll(&self, mu: f64) -> Result<f64>;

    /// Create a prepared evaluator.
    fn prepared(&self) -> Self::Prepared<'_>;
}

/// Create a copy of the model with the POI fixed.
///
/// Used by profile likelihood and hypotest workflows.
pub trait FixedPoiModel: Sized + Send + Sync {
    /// Return a copy with the POI fixed at `value` (bounds collapsed to `(value, value)`).
    fn with_fixed_poi(&self, value: f64) -> Self;
}
