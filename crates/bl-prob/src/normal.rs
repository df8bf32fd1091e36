//! Standard normal tail functions.

use std::f64::consts::SQRT_2;

/// Standard normal CDF `Φ(x)`.
///
/// Uses `erfc` for better numerical behavior in the tails:
/// `Φ(x) = 0.5 * erfc(-x / sqrt(2))`.
#[inline]
pub fn cdf(x: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(-x / SQRT_2)
}

/// Standard normal survival function `1 - Φ(x)`, accurate in the right tail.
#[inline]
pub fn sf(x: f64) -> f64 {
    cdf(-x)
}
