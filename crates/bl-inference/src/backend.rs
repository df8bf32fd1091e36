//! Host-facing statistical model backends.
//!
//! A host framework only sees [`StatisticalModel`]: a name, a version and the
//! exclusion confidence level entry points. [`PoissonBackend`] is the binned
//! Poisson implementation registered as `"example.poisson"`.

use crate::hypotest::{
    AsymptoticCLsContext, HypotestResult, expected_cls_band_from_sqrtq_a,
    expected_clsb_band_from_sqrtq_a,
};
use crate::{MaximumLikelihoodEstimator, OptimizerConfig, TestStatistic};
use bl_core::{Error, FitResult, Result};
use bl_model::{ModelSpec, PoissonLikelihood};
use serde::{Deserialize, Serialize};

/// Which data the confidence level is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectationType {
    /// Observed data; a single value.
    #[default]
    Observed,
    /// Expected band around the post-fit (observed-data) model.
    Aposteriori,
    /// Expected band around the pre-fit model, with the background as data.
    Apriori,
}

/// Quantity reported as the exclusion confidence level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Convention {
    /// `1 - CLs`.
    #[default]
    Cls,
    /// `1 - CL_{s+b}`.
    Clsb,
}

/// Static description of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    /// Discovery key.
    pub name: &'static str,
    /// Backend version.
    pub version: &'static str,
    /// Author.
    pub author: &'static str,
    /// Citable DOI.
    pub doi: &'static str,
    /// arXiv reference.
    pub arxiv: &'static str,
}

/// Capability trait a host framework calls.
pub trait StatisticalModel: Send + Sync {
    /// Static backend description.
    fn info(&self) -> BackendInfo;

    /// Discovery key.
    fn name(&self) -> &'static str {
        self.info().name
    }

    /// Backend version.
    fn version(&self) -> &'static str {
        self.info().version
    }

    /// `true` if the model can exclude anything (some signal yield is non-zero).
    fn is_alive(&self) -> bool;

    /// One exclusion confidence level per `mu`, same order; independent entries.
    fn exclusion_confidence_levels(&self, mu_values: &[f64]) -> Vec<Result<f64>>;

    /// One exclusion confidence level per `mu`, same order; fails on the first error.
    fn exclusion_confidence_level(&self, mu_values: &[f64]) -> Result<Vec<f64>> {
        self.exclusion_confidence_levels(mu_values).into_iter().collect()
    }

    /// Observed value (`Observed`) or the five-point expected band for each `mu`,
    /// same order; fails on the first error.
    fn expected_exclusion_confidence_levels(
        &self,
        mu_values: &[f64],
        expected: ExpectationType,
    ) -> Result<Vec<Vec<f64>>>;

    /// Observed value (`Observed`) or the five-point expected band at `mu`.
    fn expected_exclusion_confidence_level(
        &self,
        mu: f64,
        expected: ExpectationType,
    ) -> Result<Vec<f64>> {
        let mut levels = self.expected_exclusion_confidence_levels(&[mu], expected)?;
        levels
            .pop()
            .ok_or_else(|| Error::Computation(format!("no confidence level produced at mu={mu}")))
    }
}

/// Copy of `err` for one entry of a batch whose shared setup failed.
fn error_for_entry(err: &Error, mu: f64) -> Error {
    match err {
        Error::FitFailure { message, .. } => {
            Error::FitFailure { mu: Some(mu), message: message.clone() }
        }
        Error::InvalidInput(m) => Error::InvalidInput(m.clone()),
        other => Error::Computation(other.to_string()),
    }
}

/// Binned Poisson backend: `n_i ~ Poisson(mu * s_i + b_i)`, no nuisance parameters.
#[derive(Debug, Clone)]
pub struct PoissonBackend {
    model: PoissonLikelihood,
    mle: MaximumLikelihoodEstimator,
    test_statistic: TestStatistic,
    convention: Convention,
}

impl PoissonBackend {
    /// Registry name.
    pub const NAME: &'static str = "example.poisson";
    /// Backend version.
    pub const VERSION: &'static str = "1.0.0";

    /// Static description.
    pub const INFO: BackendInfo = BackendInfo {
        name: Self::NAME,
        version: Self::VERSION,
        author: "John Smith",
        doi: "doi/address",
        arxiv: "abcd.xyzw",
    };

    /// Wrap a likelihood. The test statistic follows the model's negative-signal setting.
    pub fn new(model: PoissonLikelihood) -> Self {
        let test_statistic = TestStatistic::for_config(model.config());
        Self {
            model,
            mle: MaximumLikelihoodEstimator::new(),
            test_statistic,
            convention: Convention::default(),
        }
    }

    /// Validate the three sequences and build with the default configuration.
    pub fn from_yields(signal: Vec<f64>, background: Vec<f64>, data: Vec<f64>) -> Result<Self> {
        Ok(Self::new(PoissonLikelihood::from_yields(signal, background, data)?))
    }

    /// Build from a parsed model file.
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        Ok(Self::new(spec.build()?))
    }

    /// Report `1 - CL_{s+b}` instead of `1 - CLs` (or back).
    pub fn with_convention(mut self, convention: Convention) -> Self {
        self.convention = convention;
        self
    }

    /// Use a different optimizer configuration for every fit.
    pub fn with_optimizer(mut self, config: OptimizerConfig) -> Self {
        self.mle = MaximumLikelihoodEstimator::with_config(config);
        self
    }

    /// Override the test statistic.
    pub fn with_test_statistic(mut self, test_statistic: TestStatistic) -> Self {
        self.test_statistic = test_statistic;
        self
    }

    /// Underlying likelihood.
    pub fn model(&self) -> &PoissonLikelihood {
        &self.model
    }

    /// Estimator used for all fits.
    pub fn mle(&self) -> &MaximumLikelihoodEstimator {
        &self.mle
    }

    /// Reported convention.
    pub fn convention(&self) -> Convention {
        self.convention
    }

    /// Test statistic used by the asymptotic calculator.
    pub fn test_statistic(&self) -> TestStatistic {
        self.test_statistic
    }

    /// Unconstrained fit on observed data.
    pub fn fit(&self) -> Result<FitResult> {
        self.mle.fit(&self.model)
    }

    /// Observed `q_mu` (or `qtilde_mu`) at `mu`.
    pub fn qmu(&self, mu: f64) -> Result<f64> {
        crate::profile_likelihood::qmu_like(&self.mle, &self.model, mu, self.test_statistic)
    }

    /// Asymptotic calculator over observed data.
    pub fn context(&self) -> Result<AsymptoticCLsContext> {
        AsymptoticCLsContext::new(&self.mle, &self.model, self.test_statistic)
    }

    /// Full asymptotic hypothesis test at `mu`.
    pub fn hypotest(&self, mu: f64) -> Result<HypotestResult> {
        self.context()?.hypotest(&self.mle, mu)
    }

    fn confidence_level(&self, r: &HypotestResult) -> f64 {
        match self.convention {
            Convention::Cls => 1.0 - r.cls,
            Convention::Clsb => 1.0 - r.clsb,
        }
    }

    fn band(&self, sqrtq_a: f64) -> Vec<f64> {
        let band = match self.convention {
            Convention::Cls => expected_cls_band_from_sqrtq_a(sqrtq_a),
            Convention::Clsb => expected_clsb_band_from_sqrtq_a(sqrtq_a),
        };
        band.iter().map(|p| 1.0 - p).collect()
    }
}

impl StatisticalModel for PoissonBackend {
    fn info(&self) -> BackendInfo {
        Self::INFO
    }

    fn is_alive(&self) -> bool {
        self.model.is_alive()
    }

    fn exclusion_confidence_levels(&self, mu_values: &[f64]) -> Vec<Result<f64>> {
        let ctx = match self.context() {
            Ok(ctx) => ctx,
            Err(e) => {
                log::warn!("{}: {}", Self::NAME, e);
                return mu_values.iter().map(|&mu| Err(error_for_entry(&e, mu))).collect();
            }
        };
        ctx.hypotest_batch(&self.mle, mu_values)
            .into_iter()
            .map(|r| r.map(|r| self.confidence_level(&r)))
            .collect()
    }

    fn expected_exclusion_confidence_levels(
        &self,
        mu_values: &[f64],
        expected: ExpectationType,
    ) -> Result<Vec<Vec<f64>>> {
        // One context per call: the free fits are shared by every mu.
        let ctx = match expected {
            ExpectationType::Observed | ExpectationType::Aposteriori => self.context()?,
            ExpectationType::Apriori => {
                let prefit = self.model.with_data(self.model.dataset().background())?;
                AsymptoticCLsContext::new(&self.mle, &prefit, self.test_statistic)?
            }
        };
        ctx.hypotest_batch(&self.mle, mu_values)
            .into_iter()
            .map(|r| {
                let r = r?;
                Ok(match expected {
                    ExpectationType::Observed => vec![self.confidence_level(&r)],
                    ExpectationType::Aposteriori | ExpectationType::Apriori => {
                        self.band(r.q_mu_a.sqrt())
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn backend() -> PoissonBackend {
        PoissonBackend::from_yields(vec![12.0, 15.0], vec![50.0, 48.0], vec![36.0, 33.0]).unwrap()
    }

    #[test]
    fn test_documented_example() {
        let cl = backend().exclusion_confidence_level(&[1.0]).unwrap();
        assert_eq!(cl.len(), 1);
        assert_relative_eq!(cl[0], 0.999_980_710_522_86, max_relative = 1e-4);
    }

    #[test]
    fn test_background_only_point_excludes_nothing() {
        let cl = backend().exclusion_confidence_level(&[0.0]).unwrap();
        assert_eq!(cl, vec![0.0]);
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let b = backend();
        let first = b.exclusion_confidence_level(&[0.3, 1.0]).unwrap();
        let second = b.exclusion_confidence_level(&[0.3, 1.0]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_batch_matches_single_calls() {
        let b = backend();
        let batch = b.exclusion_confidence_level(&[1.0, 2.0]).unwrap();
        let one = b.exclusion_confidence_level(&[1.0]).unwrap();
        let two = b.exclusion_confidence_level(&[2.0]).unwrap();
        assert_eq!(batch, vec![one[0], two[0]]);
    }

    #[test]
    fn test_clsb_convention() {
        let b = backend();
        let cls = b.exclusion_confidence_level(&[0.3]).unwrap()[0];
        let clsb = b.clone().with_convention(Convention::Clsb).exclusion_confidence_level(&[0.3]).unwrap()[0];
        // CL_{s+b} <= CLs, so 1 - CL_{s+b} is the more aggressive exclusion.
        assert!(clsb >= cls);
        let r = b.hypotest(0.3).unwrap();
        assert_relative_eq!(clsb, 1.0 - r.clsb, epsilon = 1e-15);
    }

    #[test]
    fn test_expectation_types() {
        let b = backend();
        let observed = b.expected_exclusion_confidence_level(1.0, ExpectationType::Observed).unwrap();
        assert_eq!(observed, b.exclusion_confidence_level(&[1.0]).unwrap());

        let post = b.expected_exclusion_confidence_level(0.5, ExpectationType::Aposteriori).unwrap();
        let pre = b.expected_exclusion_confidence_level(0.5, ExpectationType::Apriori).unwrap();
        assert_eq!(post.len(), 5);
        assert_eq!(pre.len(), 5);
        // Exclusion grows from the -2 sigma to the +2 sigma side of the band.
        assert!(post.windows(2).all(|w| w[0] >= w[1]), "{post:?}");
        // Without nuisance parameters both bands share the background-only Asimov data.
        for (a, p) in post.iter().zip(pre.iter()) {
            assert_relative_eq!(*a, *p, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_expected_levels_batch_matches_single_calls() {
        let b = backend();
        let mus = [0.3, 1.0];
        for expected in [ExpectationType::Observed, ExpectationType::Aposteriori, ExpectationType::Apriori] {
            let batch = b.expected_exclusion_confidence_levels(&mus, expected).unwrap();
            assert_eq!(batch.len(), mus.len());
            for (levels, &mu) in batch.iter().zip(&mus) {
                assert_eq!(*levels, b.expected_exclusion_confidence_level(mu, expected).unwrap());
            }
        }
        assert_eq!(
            b.expected_exclusion_confidence_levels(&mus, ExpectationType::Observed).unwrap(),
            b.exclusion_confidence_level(&mus).unwrap().into_iter().map(|v| vec![v]).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_zero_background_bins() {
        // P(0 | 0) = 1: the empty, background-free bin still constrains mu.
        let b = PoissonBackend::from_yields(vec![1.0], vec![0.0], vec![0.0]).unwrap();
        let fit = b.fit().unwrap();
        assert_eq!(fit.mu_hat, 0.0);
        assert_eq!(fit.nll, 0.0);
        assert_relative_eq!(b.qmu(1.0).unwrap(), 2.0, epsilon = 1e-12);
        let r = b.hypotest(1.0).unwrap();
        assert_relative_eq!(r.q_mu_a, 2.0, epsilon = 1e-12);
        let cl = b.exclusion_confidence_level(&[1.0]).unwrap();
        assert_relative_eq!(cl[0], 0.842_700_792_949_714_9, max_relative = 1e-8);

        let b = PoissonBackend::from_yields(vec![5.0, 5.0], vec![0.0, 5.0], vec![0.0, 5.0]).unwrap();
        assert!(b.fit().unwrap().nll.is_finite());
        assert_relative_eq!(b.qmu(1.0).unwrap(), 13.068_528_194_400_546, max_relative = 1e-10);
        let cl = b.exclusion_confidence_level(&[1.0]).unwrap();
        assert_relative_eq!(cl[0], 0.999_699_700_992_002_9, max_relative = 1e-8);
    }

    #[test]
    fn test_excess_beyond_default_upper_bound() {
        // mu_hat = 99 lies far above the default POI upper bound of 10.
        let b = PoissonBackend::from_yields(vec![1.0], vec![1.0], vec![100.0]).unwrap();
        let fit = b.fit().unwrap();
        assert!(fit.converged, "{}", fit.message);
        assert_relative_eq!(fit.mu_hat, 99.0, max_relative = 1e-8);
        assert_relative_eq!(b.qmu(200.0).unwrap(), 62.373_055_585_803_144, max_relative = 1e-8);
        assert_eq!(b.qmu(50.0).unwrap(), 0.0);
        let cl = b.exclusion_confidence_level(&[200.0]).unwrap();
        assert!(cl[0] > 1.0 - 1e-9, "{cl:?}");
    }

    #[test]
    fn test_fit_failure_is_reported_per_entry() {
        let b = PoissonBackend::from_yields(vec![12.0, 15.0], vec![50.0, 48.0], vec![70.0, 72.0])
            .unwrap()
            .with_optimizer(OptimizerConfig { max_iter: 1, tol: 1e-14 });
        let per_entry = b.exclusion_confidence_levels(&[1.0, 2.0]);
        assert_eq!(per_entry.len(), 2);
        for (r, mu) in per_entry.iter().zip([1.0, 2.0]) {
            match r {
                Err(Error::FitFailure { mu: Some(m), .. }) => assert_eq!(*m, mu),
                other => panic!("expected FitFailure, got {other:?}"),
            }
        }
        assert!(b.exclusion_confidence_level(&[1.0]).unwrap_err().is_fit_failure());
    }

    #[test]
    fn test_metadata() {
        let b = backend();
        assert_eq!(b.name(), "example.poisson");
        assert_eq!(b.version(), "1.0.0");
        assert!(b.is_alive());
        let dead = PoissonBackend::from_yields(vec![0.0], vec![5.0], vec![5.0]).unwrap();
        assert!(!dead.is_alive());
        assert_eq!(dead.exclusion_confidence_level(&[1.0, 5.0]).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_negative_signal_uses_qmu() {
        let spec = ModelSpec::from_json_str(
            r#"{"signal_yields":[12,15],"background_yields":[50,48],"data":[36,33],
                "config":{"allow_negative_signal":true}}"#,
        )
        .unwrap();
        let b = PoissonBackend::from_spec(&spec).unwrap();
        assert_eq!(b.test_statistic(), TestStatistic::QMu);
        assert!(b.fit().unwrap().mu_hat < 0.0);
        assert!(b.qmu(1.0).unwrap() > backend().qmu(1.0).unwrap());
    }
}
