//! Binned Poisson likelihood of the signal strength.
//!
//! `log L(mu) = Σ_i [ n_i ln λ_i(mu) − λ_i(mu) − ln Γ(n_i + 1) ]`, `λ_i(mu) = mu·s_i + b_i`.
//!
//! Any bin with `λ_i < 0`, or `λ_i = 0` with `n_i > 0`, makes the point infeasible:
//! `log L = -inf` (NLL `+inf`). An empty bin with `λ_i = 0` contributes 0.

use crate::BinnedDataset;
use bl_core::traits::{FixedPoiModel, PoiLikelihood, PreparedNll};
use bl_core::{Error, Result};
use bl_prob::poisson;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Floor applied to `λ_i` in the gradient only, so the optimizer sees a large
/// finite slope at the barrier instead of `±inf`.
const LAMBDA_FLOOR: f64 = 1e-10;

/// Relative offset moving the negative-signal lower bound inside the feasible region.
const LOWER_BOUND_NUDGE: f64 = 1e-9;

/// POI configuration of the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Allow `mu_hat < 0` down to `-min(b_i/s_i)`.
    pub allow_negative_signal: bool,
    /// Upper bound for the POI.
    pub poi_upper_bound: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { allow_negative_signal: false, poi_upper_bound: 10.0 }
    }
}

impl ModelConfig {
    /// POI bounds implied by this configuration for `dataset`.
    pub fn poi_bounds(&self, dataset: &BinnedDataset) -> Result<(f64, f64)> {
        if !self.poi_upper_bound.is_finite() {
            return Err(Error::InvalidInput(format!(
                "poi_upper_bound must be finite, got {}",
                self.poi_upper_bound
            )));
        }
        let lo = match (self.allow_negative_signal, dataset.min_poi()) {
            (true, Some(m)) => m + LOWER_BOUND_NUDGE * m.abs().max(1.0),
            _ => 0.0,
        };
        if self.poi_upper_bound <= lo {
            return Err(Error::InvalidInput(format!(
                "poi_upper_bound ({}) must exceed the lower bound ({lo})",
                self.poi_upper_bound
            )));
        }
        Ok((lo, self.poi_upper_bound))
    }
}

/// Poisson likelihood of `mu` over a [`BinnedDataset`].
///
/// Cheap to clone: the dataset and the data the likelihood is evaluated against
/// are shared. Fixing the POI or swapping in Asimov data returns a new value and
/// never mutates the original.
#[derive(Debug, Clone)]
pub struct PoissonLikelihood {
    dataset: Arc<BinnedDataset>,
    data: Arc<[f64]>,
    ln_factorials: Arc<[f64]>,
    config: ModelConfig,
    bounds: (f64, f64),
}

fn check_mu(mu: f64) -> Result<()> {
    if mu.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("mu must be finite, got {mu}")))
    }
}

impl PoissonLikelihood {
    /// Build the likelihood of `dataset`'s observations.
    pub fn new(dataset: BinnedDataset, config: ModelConfig) -> Result<Self> {
        let bounds = config.poi_bounds(&dataset)?;
        let data: Arc<[f64]> = dataset.observed().into();
        let ln_factorials = data.iter().map(|&n| poisson::ln_factorial(n)).collect();
        Ok(Self { dataset: Arc::new(dataset), data, ln_factorials, config, bounds })
    }

    /// Validate the three sequences and build the likelihood with the default config.
    pub fn from_yields(signal: Vec<f64>, background: Vec<f64>, data: Vec<f64>) -> Result<Self> {
        Self::new(BinnedDataset::new(signal, background, data)?, ModelConfig::default())
    }

    /// Underlying dataset.
    pub fn dataset(&self) -> &BinnedDataset {
        &self.dataset
    }

    /// POI configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Data the likelihood is evaluated against (observed or Asimov).
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// `true` if at least one bin has a non-zero signal yield.
    pub fn is_alive(&self) -> bool {
        self.dataset.has_signal()
    }

    /// Expected yields `mu * s_i + b_i`.
    pub fn expected_data(&self, mu: f64) -> Result<Vec<f64>> {
        check_mu(mu)?;
        Ok(self.dataset.expected(mu))
    }

    /// Copy evaluated against other (possibly non-integral) data, e.g. an Asimov dataset.
    pub fn with_data(&self, data: &[f64]) -> Result<Self> {
        if data.len() != self.dataset.n_bins() {
            return Err(Error::InvalidInput(format!(
                "data length mismatch: expected {}, got {}",
                self.dataset.n_bins(),
                data.len()
            )));
        }
        if let Some((i, &v)) = data.iter().enumerate().find(|(_, v)| !v.is_finite() || **v < 0.0) {
            return Err(Error::InvalidInput(format!("data[{i}] must be finite and >= 0, got {v}")));
        }
        let mut out = self.clone();
        out.data = data.into();
        out.ln_factorials = data.iter().map(|&n| poisson::ln_factorial(n)).collect();
        Ok(out)
    }

    /// Copy whose data is the expectation at `mu` (Asimov dataset).
    pub fn asimov(&self, mu: f64) -> Result<Self> {
        let expected = self.expected_data(mu)?;
        log::debug!("building Asimov data at mu={mu}: {expected:?}");
        self.with_data(&expected)
    }

    /// `log L(mu)` including the `ln n!` constant. `-inf` at infeasible points.
    pub fn log_likelihood(&self, mu: f64) -> Result<f64> {
        check_mu(mu)?;
        Ok(-self.prepare().nll_unchecked(mu))
    }

    /// `d log L / d mu = Σ_i s_i (n_i / λ_i − 1)`.
    pub fn grad_log_likelihood(&self, mu: f64) -> Result<f64> {
        check_mu(mu)?;
        let g = self
            .dataset
            .signal()
            .iter()
            .zip(self.dataset.background())
            .zip(self.data.iter())
            .map(|((&s, &b), &n)| {
                if n == 0.0 {
                    return -s;
                }
                let lam = (mu * s + b).max(LAMBDA_FLOOR);
                s * (n / lam - 1.0)
            })
            .sum();
        Ok(g)
    }

    /// Prepared evaluator borrowing the cached `ln n!` terms.
    pub fn prepare(&self) -> PreparedPoisson<'_> {
        PreparedPoisson {
            signal: self.dataset.signal(),
            background: self.dataset.background(),
            data: &self.data,
            ln_factorials: &self.ln_factorials,
        }
    }
}

/// Prepared NLL evaluator for [`PoissonLikelihood`].
#[derive(Debug, Clone, Copy)]
pub struct PreparedPoisson<'a> {
    signal: &'a [f64],
    background: &'a [f64],
    data: &'a [f64],
    ln_factorials: &'a [f64],
}

impl PreparedPoisson<'_> {
    fn nll_unchecked(&self, mu: f64) -> f64 {
        let mut logl = 0.0;
        for i in 0..self.data.len() {
            let lam = mu * self.signal[i] + self.background[i];
            let term = poisson::logpmf_with_ln_factorial(self.data[i], lam, self.ln_factorials[i]);
            if term == f64::NEG_INFINITY {
                return f64::INFINITY;
            }
            logl += term;
        }
        -logl
    }
}

impl PreparedNll for PreparedPoisson<'_> {
    fn nll(&self, mu: f64) -> Result<f64> {
        check_mu(mu)?;
        Ok(self.nll_unchecked(mu))
    }
}

impl PoiLikelihood for PoissonLikelihood {
    type Prepared<'a>
        = PreparedPoisson<'a>
    where
        Self: 'a;

    fn poi_bounds(&self) -> (f64, f64) {
        self.bounds
    }

    fn poi_init(&self) -> f64 {
        0.0_f64.clamp(self.bounds.0, self.bounds.1)
    }

    fn nll(&self, mu: f64) -> Result<f64> {
        Ok(-self.log_likelihood(mu)?)
    }

    fn grad_nll(&self, mu: f64) -> Result<f64> {
        Ok(-self.grad_log_likelihood(mu)?)
    }

    fn prepared(&self) -> Self::Prepared<'_> {
        self.prepare()
    }
}

impl FixedPoiModel for PoissonLikelihood {
    fn with_fixed_poi(&self, value: f64) -> Self {
        let mut out = self.clone();
        out.bounds = (value, value);
        out
    }
}
