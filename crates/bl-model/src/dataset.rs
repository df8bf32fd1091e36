//! Validated per-bin observations and yields.

use bl_core::{Error, Result};

/// Per-bin observed counts, signal yields and background yields.
///
/// Built once from caller-supplied sequences and immutable afterwards.
/// Invariants (checked by [`BinnedDataset::new`]):
/// - all three sequences have the same, positive length
/// - signal and background are finite and `>= 0`
/// - observations are finite, `>= 0` and integral
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedDataset {
    observed: Vec<f64>,
    signal: Vec<f64>,
    background: Vec<f64>,
}

fn validate_yields(name: &str, values: &[f64]) -> Result<()> {
    for (i, &v) in values.iter().enumerate() {
        if !v.is_finite() || v < 0.0 {
            return Err(Error::InvalidInput(format!(
                "{name}[{i}] must be finite and >= 0, got {v}"
            )));
        }
    }
    Ok(())
}

impl BinnedDataset {
    /// Validate and build a dataset.
    pub fn new(signal: Vec<f64>, background: Vec<f64>, observed: Vec<f64>) -> Result<Self> {
        if signal.is_empty() {
            return Err(Error::InvalidInput("dataset must have at least one bin".to_string()));
        }
        if signal.len() != background.len() || signal.len() != observed.len() {
            return Err(Error::InvalidInput(format!(
                "length mismatch: signal={}, background={}, data={}",
                signal.len(),
                background.len(),
                observed.len()
            )));
        }
        validate_yields("signal", &signal)?;
        validate_yields("background", &background)?;
        validate_yields("data", &observed)?;
        if let Some((i, &n)) = observed.iter().enumerate().find(|(_, n)| n.fract() != 0.0) {
            return Err(Error::InvalidInput(format!("data[{i}] must be an integer count, got {n}")));
        }
        Ok(Self { observed, signal, background })
    }

    /// Convenience constructor from integer observations.
    pub fn from_counts(signal: Vec<f64>, background: Vec<f64>, observed: &[u64]) -> Result<Self> {
        Self::new(signal, background, observed.iter().map(|&n| n as f64).collect())
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.signal.len()
    }

    /// Observed counts.
    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    /// Expected signal yields at `mu = 1`.
    pub fn signal(&self) -> &[f64] {
        &self.signal
    }

    /// Expected background yields.
    pub fn background(&self) -> &[f64] {
        &self.background
    }

    /// `true` if at least one bin has a non-zero signal yield.
    pub fn has_signal(&self) -> bool {
        self.signal.iter().any(|&s| s > 0.0)
    }

    /// Smallest `mu` keeping every expected yield non-negative:
    /// `-min(b_i / s_i)` over bins with `s_i > 0`. `None` without signal.
    pub fn min_poi(&self) -> Option<f64> {
        self.signal
            .iter()
            .zip(&self.background)
            .filter(|(s, _)| **s > 0.0)
            .map(|(s, b)| -b / s)
            .reduce(f64::max)
    }

    /// Expected yields `mu * s_i + b_i`.
    pub fn expected(&self, mu: f64) -> Vec<f64> {
        self.signal.iter().zip(&self.background).map(|(s, b)| mu * s + b).collect()
    }
}
