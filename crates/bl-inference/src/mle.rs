//! Maximum Likelihood Estimation

use crate::optimizer::{BoundedScalarOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
use bl_core::traits::{PoiLikelihood, PreparedNll};
use bl_core::{Error, FitResult, Result};

/// NLL objective that evaluates through the model's prepared evaluator.
struct NllObjective<'a, M: PoiLikelihood + ?Sized + 'a> {
    model: &'a M,
    prepared: M::Prepared<'a>,
}

impl<'a, M: PoiLikelihood + ?Sized + 'a> ObjectiveFunction for NllObjective<'a, M> {
    fn eval(&self, mu: f64) -> Result<f64> {
        self.prepared.nll(mu)
    }

    fn gradient(&self, mu: f64) -> Result<f64> {
        self.model.grad_nll(mu)
    }
}

fn fit_result_from_opt(opt: OptimizationResult) -> FitResult {
    FitResult {
        mu_hat: opt.x,
        uncertainty: None,
        nll: opt.fval,
        converged: opt.converged,
        n_iter: opt.n_iter,
        n_fev: opt.n_fev,
        n_gev: opt.n_gev,
        message: opt.message,
    }
}

/// Maximum Likelihood Estimator
///
/// Fits single-POI models by minimizing the negative log-likelihood.
#[derive(Debug, Clone)]
pub struct MaximumLikelihoodEstimator {
    config: OptimizerConfig,
}

impl MaximumLikelihoodEstimator {
    /// Create a new MLE with default configuration
    pub fn new() -> Self {
        Self { config: OptimizerConfig::default() }
    }

    /// Create MLE with custom optimizer configuration
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Access the optimizer configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Minimize NLL above the model's lower POI bound.
    ///
    /// The model's upper bound is only the starting bracket: it is extended while
    /// the NLL keeps decreasing, so `mu_hat` is never capped below the true minimum.
    pub fn fit_minimum<M: PoiLikelihood + ?Sized>(&self, model: &M) -> Result<OptimizationResult> {
        let objective = NllObjective { model, prepared: model.prepared() };
        let optimizer = BoundedScalarOptimizer::new(self.config.clone());
        optimizer.minimize_open_above(&objective, model.poi_bounds())
    }

    /// Unconstrained fit with a curvature-based uncertainty on `mu_hat`.
    ///
    /// A non-converged fit is returned with `converged = false`; callers decide
    /// whether that is fatal.
    pub fn fit<M: PoiLikelihood + ?Sized>(&self, model: &M) -> Result<FitResult> {
        let opt = self.fit_minimum(model)?;
        if !opt.converged {
            log::warn!("MLE fit did not converge: {} ({})", opt.message, opt);
        } else {
            log::debug!("MLE fit: {}", opt);
        }
        let mu_hat = opt.x;
        let fr = fit_result_from_opt(opt);

        let curvature = self.compute_curvature(model, mu_hat)?;
        if curvature.is_finite() && curvature > 0.0 {
            Ok(fr.with_uncertainty(1.0 / curvature.sqrt()))
        } else {
            log::debug!("non-positive NLL curvature {} at mu_hat={}", curvature, mu_hat);
            Ok(fr)
        }
    }

    /// "Fit" with the POI held at `mu`: no search, same result shape as [`Self::fit`].
    pub fn fit_fixed<M: PoiLikelihood + ?Sized>(&self, model: &M, mu: f64) -> Result<FitResult> {
        if !mu.is_finite() {
            return Err(Error::InvalidInput(format!("fixed POI must be finite, got {mu}")));
        }
        let nll = model.prepared().nll(mu)?;
        Ok(FitResult::fixed(mu, nll))
    }

    /// Run independent fits in parallel using Rayon.
    ///
    /// Returns one `FitResult` per model, in input order.
    pub fn fit_batch<M: PoiLikelihood + Sync>(&self, models: &[M]) -> Vec<Result<FitResult>> {
        use rayon::prelude::*;

        models.par_iter().map(|model| self.fit(model)).collect()
    }

    /// `d²NLL/dmu²` from a forward difference of the analytic gradient.
    fn compute_curvature<M: PoiLikelihood + ?Sized>(&self, model: &M, mu: f64) -> Result<f64> {
        let eps = 1e-4 * mu.abs().max(1.0);
        let g0 = model.grad_nll(mu)?;
        let g1 = model.grad_nll(mu + eps)?;
        Ok((g1 - g0) / eps)
    }
}

impl Default for MaximumLikelihoodEstimator {
    fn default() -> Self {
        Self::new()
    }
}
