//! JSON model description.
//!
//! ```json
//! {
//!   "signal_yields": [12.0, 15.0],
//!   "background_yields": [50.0, 48.0],
//!   "data": [36, 33],
//!   "config": { "allow_negative_signal": false, "poi_upper_bound": 10.0 }
//! }
//! ```
//!
//! `config` and each of its fields are optional.

use crate::{BinnedDataset, ModelConfig, PoissonLikelihood};
use bl_core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serialized form of a binned Poisson model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    /// Expected signal yields per bin at `mu = 1`.
    pub signal_yields: Vec<f64>,
    /// Expected background yields per bin.
    pub background_yields: Vec<f64>,
    /// Observed counts per bin.
    pub data: Vec<f64>,
    /// POI configuration.
    #[serde(default)]
    pub config: ModelConfig,
}

impl ModelSpec {
    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Validate into a dataset.
    pub fn dataset(&self) -> Result<BinnedDataset> {
        BinnedDataset::new(
            self.signal_yields.clone(),
            self.background_yields.clone(),
            self.data.clone(),
        )
    }

    /// Validate and build the likelihood.
    pub fn build(&self) -> Result<PoissonLikelihood> {
        PoissonLikelihood::new(self.dataset()?, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bl_core::Error;

    #[test]
    fn test_parse_minimal() {
        let spec = ModelSpec::from_json_str(
            r#"{"signal_yields":[1.0],"background_yields":[2.0],"data":[3]}"#,
        )
        .unwrap();
        assert_eq!(spec.config, ModelConfig::default());
        let m = spec.build().unwrap();
        assert_eq!(m.dataset().n_bins(), 1);
    }

    #[test]
    fn test_parse_partial_config() {
        let spec = ModelSpec::from_json_str(
            r#"{"signal_yields":[1.0],"background_yields":[2.0],"data":[3],
                "config":{"allow_negative_signal":true}}"#,
        )
        .unwrap();
        assert!(spec.config.allow_negative_signal);
        assert_eq!(spec.config.poi_upper_bound, 10.0);
    }

    #[test]
    fn test_unknown_field_is_json_error() {
        let err = ModelSpec::from_json_str(
            r#"{"signal_yields":[1.0],"background_yields":[2.0],"data":[3],"foo":1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_build_validates() {
        let spec = ModelSpec {
            signal_yields: vec![1.0, 2.0],
            background_yields: vec![1.0],
            data: vec![1.0, 1.0],
            config: ModelConfig::default(),
        };
        assert!(matches!(spec.build().unwrap_err(), Error::InvalidInput(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ModelSpec::from_path("/nonexistent/binlimit/model.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
