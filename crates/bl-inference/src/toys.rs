//! Toy data generation utilities (Asimov + Poisson).
//!
//! Toys are observed-count vectors for a [`PoissonLikelihood`]; feed them back
//! through [`PoissonLikelihood::with_data`] to fit them.

use bl_core::{Error, Result};
use bl_model::PoissonLikelihood;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};

/// Asimov (deterministic expected) dataset `mu * s + b`.
pub fn asimov_data(model: &PoissonLikelihood, mu: f64) -> Result<Vec<f64>> {
    model.expected_data(mu)
}

/// Sample one Poisson-fluctuated dataset from a vector of expectations.
///
/// Non-positive or non-finite expectations sample as 0.
pub fn poisson_from_expected(expected: &[f64], seed: u64) -> Result<Vec<f64>> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    expected
        .iter()
        .map(|&lam| {
            if !lam.is_finite() || lam <= 0.0 {
                return Ok(0.0);
            }
            let pois = Poisson::new(lam)
                .map_err(|e| Error::Computation(format!("Poisson({lam}) sampler: {e}")))?;
            Ok(pois.sample(&mut rng))
        })
        .collect()
}

/// Generate Poisson toy datasets at signal strength `mu`.
///
/// Sampling is deterministic: toy `i` uses seed `seed + i`.
pub fn poisson_toys(
    model: &PoissonLikelihood,
    mu: f64,
    n_toys: usize,
    seed: u64,
) -> Result<Vec<Vec<f64>>> {
    let expected = model.expected_data(mu)?;
    (0..n_toys)
        .map(|toy_idx| poisson_from_expected(&expected, seed.wrapping_add(toy_idx as u64)))
        .collect()
}
