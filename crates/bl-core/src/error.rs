//! Error types for binlimit

use thiserror::Error;

/// binlimit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rejected input: mismatched lengths, negative or non-finite yields, bad configuration.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The unconstrained fit did not converge, so no confidence level can be derived.
    #[error("Fit failure{}: {message}", .mu.map(|m| format!(" at mu={m}")).unwrap_or_default())]
    FitFailure {
        /// Tested signal strength the failure belongs to, if any.
        mu: Option<f64>,
        /// Optimizer termination message.
        message: String,
    },

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// Returns `true` for [`Error::FitFailure`].
    pub fn is_fit_failure(&self) -> bool {
        matches!(self, Error::FitFailure { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
