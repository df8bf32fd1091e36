//! Profile likelihood utilities (frequentist).
//!
//! Implements the one-sided profile likelihood test statistic for upper-limit
//! workflows: `q_mu` / `qtilde_mu` (Cowan et al., arXiv:1007.1727).
//!
//! NLLs here are `-log L`, so `q_mu = 2 * (nll(mu) - nll_hat)`, clipped at 0,
//! and `q_mu = 0` whenever `mu_hat > mu`.

use crate::MaximumLikelihoodEstimator;
use bl_core::traits::PoiLikelihood;
use bl_core::{Error, FitResult, Result};
use bl_model::ModelConfig;
use serde::Serialize;

/// Which profile likelihood ratio to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatistic {
    /// `qtilde_mu`: a negative `mu_hat` is replaced by 0 (physical signal).
    #[default]
    QMuTilde,
    /// `q_mu`: the unconstrained `mu_hat` is used as is.
    QMu,
}

/// Reference point of the likelihood ratio denominator.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceFit {
    /// POI in the denominator (`mu_hat`, or 0 for `qtilde` when `mu_hat < 0`).
    pub mu: f64,
    /// NLL at `mu`.
    pub nll: f64,
}

impl TestStatistic {
    /// `q_mu` when the model admits negative signal strengths, `qtilde_mu` otherwise.
    pub fn for_config(config: &ModelConfig) -> Self {
        if config.allow_negative_signal { TestStatistic::QMu } else { TestStatistic::QMuTilde }
    }

    /// Denominator of the ratio for a given unconstrained fit.
    pub fn reference<M: PoiLikelihood + ?Sized>(
        &self,
        mle: &MaximumLikelihoodEstimator,
        model: &M,
        free: &FitResult,
    ) -> Result<ReferenceFit> {
        match self {
            TestStatistic::QMuTilde if free.mu_hat < 0.0 => {
                let at_zero = mle.fit_fixed(model, 0.0)?;
                Ok(ReferenceFit { mu: 0.0, nll: at_zero.nll })
            }
            _ => Ok(ReferenceFit { mu: free.mu_hat, nll: free.nll }),
        }
    }
}

/// One-sided `q_mu` from a conditional NLL and the reference fit.
#[inline]
pub fn qmu_from_nll(nll_mu: f64, reference: ReferenceFit, mu_test: f64) -> f64 {
    if reference.mu > mu_test {
        return 0.0;
    }
    (2.0 * (nll_mu - reference.nll)).max(0.0)
}

/// Unconstrained fit that must converge before any test statistic is derived.
pub fn free_fit<M: PoiLikelihood + ?Sized>(
    mle: &MaximumLikelihoodEstimator,
    model: &M,
) -> Result<FitResult> {
    let free = mle.fit(model)?;
    if !free.converged {
        return Err(Error::FitFailure { mu: None, message: free.message });
    }
    Ok(free)
}

/// Single point in a profile likelihood scan.
#[derive(Debug, Clone, Serialize)]
pub struct ProfilePoint {
    /// Tested POI value.
    pub mu: f64,
    /// Test statistic value.
    pub q_mu: f64,
    /// Conditional NLL at `mu`.
    pub nll_mu: f64,
    /// Conditional fit convergence.
    pub converged: bool,
}

/// Profile likelihood scan result.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileLikelihoodScan {
    /// Test statistic used for every point.
    pub test_statistic: TestStatistic,
    /// Unconditional best-fit POI value.
    pub mu_hat: f64,
    /// Unconditional NLL at the global minimum.
    pub nll_hat: f64,
    /// Per-point results.
    pub points: Vec<ProfilePoint>,
}

/// Compute `q_mu`/`qtilde_mu` for a single `mu_test`.
pub fn qmu_like<M: PoiLikelihood + ?Sized>(
    mle: &MaximumLikelihoodEstimator,
    model: &M,
    mu_test: f64,
    test_statistic: TestStatistic,
) -> Result<f64> {
    let free = free_fit(mle, model)?;
    let reference = test_statistic.reference(mle, model, &free)?;
    let fixed = mle.fit_fixed(model, mu_test)?;
    Ok(qmu_from_nll(fixed.nll, reference, mu_test))
}

/// Run a profile likelihood scan over the provided POI values.
pub fn scan<M: PoiLikelihood + ?Sized>(
    mle: &MaximumLikelihoodEstimator,
    model: &M,
    mu_values: &[f64],
    test_statistic: TestStatistic,
) -> Result<ProfileLikelihoodScan> {
    let free = free_fit(mle, model)?;
    let reference = test_statistic.reference(mle, model, &free)?;

    let mut points = Vec::with_capacity(mu_values.len());
    for &mu in mu_values {
        let fixed = mle.fit_fixed(model, mu)?;
        points.push(ProfilePoint {
            mu,
            q_mu: qmu_from_nll(fixed.nll, reference, mu),
            nll_mu: fixed.nll,
            converged: fixed.converged,
        });
    }

    Ok(ProfileLikelihoodScan { test_statistic, mu_hat: free.mu_hat, nll_hat: free.nll, points })
}
