//! Poisson distribution utilities.
//!
//! Counts are `f64` so the same code evaluates integer observations and
//! non-integral Asimov pseudo-data; `ln k!` is generalised to `ln Γ(k+1)`.

use bl_core::{Error, Result};
use statrs::function::gamma::ln_gamma;

/// `ln Γ(k + 1)`, i.e. `ln k!` for integral `k`.
#[inline]
pub fn ln_factorial(k: f64) -> f64 {
    if k == 0.0 || k == 1.0 { 0.0 } else { ln_gamma(k + 1.0) }
}

/// Log-PMF of Poisson(k | lambda) given a precomputed `ln Γ(k+1)`.
///
/// `P(0 | 0) = 1`, so an empty bin with zero expectation contributes 0.
/// Otherwise non-positive `lambda` is an infeasible point and yields `-inf`, never NaN.
#[inline]
pub fn logpmf_with_ln_factorial(k: f64, lambda: f64, ln_k_factorial: f64) -> f64 {
    if k == 0.0 && lambda == 0.0 {
        return 0.0;
    }
    if !(lambda > 0.0) || lambda.is_infinite() {
        return f64::NEG_INFINITY;
    }
    if k == 0.0 {
        return -lambda;
    }
    k * lambda.ln() - lambda - ln_k_factorial
}

/// Log-PMF of Poisson(k | lambda).
pub fn logpmf(k: f64, lambda: f64) -> Result<f64> {
    if !k.is_finite() || k < 0.0 {
        return Err(Error::InvalidInput(format!("k must be finite and >= 0, got {}", k)));
    }
    if lambda.is_nan() {
        return Err(Error::InvalidInput("lambda must not be NaN".to_string()));
    }
    Ok(logpmf_with_ln_factorial(k, lambda, ln_factorial(k)))
}
