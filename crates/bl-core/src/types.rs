//! Common data types for binlimit

use serde::{Deserialize, Serialize};

/// Fit result for a single-POI likelihood.
///
/// Unconstrained and fixed-POI fits share this shape so downstream code treats
/// both uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Best-fit signal strength.
    pub mu_hat: f64,

    /// `1/sqrt(d²NLL/dmu²)` at `mu_hat`. `None` for fixed fits or non-positive curvature.
    pub uncertainty: Option<f64>,

    /// Negative log-likelihood at the minimum (absolute, including `ln n!`).
    pub nll: f64,

    /// Convergence status
    pub converged: bool,

    /// Number of solver iterations
    pub n_iter: u64,

    /// Number of objective (cost) evaluations.
    pub n_fev: usize,

    /// Number of gradient evaluations.
    pub n_gev: usize,

    /// Termination message
    pub message: String,
}

impl FitResult {
    /// Result of a fit where the POI was held fixed: no search was performed.
    pub fn fixed(mu: f64, nll: f64) -> Self {
        Self {
            mu_hat: mu,
            uncertainty: None,
            nll,
            converged: true,
            n_iter: 0,
            n_fev: 1,
            n_gev: 0,
            message: "POI fixed".to_string(),
        }
    }

    /// Maximized log-likelihood, `-nll`.
    pub fn log_likelihood(&self) -> f64 {
        -self.nll
    }

    /// Attach a curvature-based uncertainty.
    pub fn with_uncertainty(mut self, sigma: f64) -> Self {
        self.uncertainty = Some(sigma);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_fit_result() {
        let r = FitResult::fixed(1.0, 12.5);
        assert_eq!(r.mu_hat, 1.0);
        assert_eq!(r.log_likelihood(), -12.5);
        assert!(r.converged);
        assert!(r.uncertainty.is_none());
    }

    #[test]
    fn test_fit_result_json_roundtrip_keeps_status() {
        let r = FitResult::fixed(0.5, 3.0).with_uncertainty(0.25);
        let s = serde_json::to_string(&r).unwrap();
        let back: FitResult = serde_json::from_str(&s).unwrap();
        assert_eq!(back.uncertainty, Some(0.25));
        assert_eq!(back.message, "POI fixed");
    }
}
