//! Asymptotic CLs hypothesis tests (frequentist).
//!
//! Follows the asymptotic calculator of Cowan et al. (arXiv:1007.1727): the
//! observed `qtilde_mu` and the Asimov `q_mu,A` are mapped into `-muhat/sigma`
//! space, where the signal+background and background-only distributions are
//! unit normals shifted by `-sqrt(q_mu,A)` and 0.

use crate::MaximumLikelihoodEstimator;
use crate::profile_likelihood::{ReferenceFit, TestStatistic, free_fit, qmu_from_nll};
use bl_core::{Error, Result};
use bl_model::PoissonLikelihood;
use bl_prob::normal;
use serde::Serialize;

/// Canonical expected-set ordering in `-muhat/sigma` space: `n_sigma = [2, 1, 0, -1, -2]`.
pub const NSIGMA_ORDER: [f64; 5] = [2.0, 1.0, 0.0, -1.0, -2.0];

/// POI at which the Asimov (background-only) dataset is built.
pub const ASIMOV_MU: f64 = 0.0;

const CLB_MIN: f64 = 1e-300;

/// Maximum number of bracket doublings in the limit search.
const MAX_BRACKET_EXPANSIONS: usize = 50;

#[inline]
fn safe_cls(clsb: f64, clb: f64) -> f64 {
    // CLb can underflow to 0 in the far tails; CLsb then underflows too and the ratio tends to 0.
    if !(clsb.is_finite() && clb.is_finite()) {
        return 0.0;
    }
    if clb <= CLB_MIN {
        return if clsb <= CLB_MIN { 0.0 } else { 1.0 };
    }
    (clsb / clb).clamp(0.0, 1.0)
}

/// `CL_{s+b} = 1 - Phi(sqrt(q_mu))`, the simple-asymptotics p-value of a `q_mu` value.
pub fn clsb_from_qmu(q_mu: f64) -> f64 {
    normal::sf(q_mu.max(0.0).sqrt())
}

/// Map `(q_mu, q_mu,A)` to the test statistic in `-muhat/sigma` space.
pub fn teststat_from_qmu(q_mu: f64, q_mu_a: f64) -> f64 {
    let sqrtq = q_mu.sqrt();
    let sqrtq_a = q_mu_a.sqrt();
    if sqrtq <= sqrtq_a { sqrtq - sqrtq_a } else { (q_mu - q_mu_a) / (2.0 * sqrtq_a.max(1e-16)) }
}

fn interp_limit(alpha: f64, xs: &[f64], ys: &[f64]) -> Result<f64> {
    // Linear interpolation of the first crossing of alpha, clamped to the scan range.
    if xs.len() != ys.len() {
        return Err(Error::InvalidInput("interp input length mismatch".to_string()));
    }
    let n = xs.len();
    if n < 2 {
        return Err(Error::InvalidInput("interp requires >=2 points".to_string()));
    }

    let decreasing = ys[0] >= ys[n - 1];
    let (first, last) = (ys[0], ys[n - 1]);
    if decreasing {
        if alpha >= first {
            return Ok(xs[0]);
        }
        if alpha <= last {
            return Ok(xs[n - 1]);
        }
    } else {
        if alpha <= first {
            return Ok(xs[0]);
        }
        if alpha >= last {
            return Ok(xs[n - 1]);
        }
    }

    for i in 0..(n - 1) {
        let (y0, y1) = (ys[i], ys[i + 1]);
        if (y0 - alpha).abs() < 1e-18 {
            return Ok(xs[i]);
        }
        let crosses = if decreasing { y0 >= alpha && y1 <= alpha } else { y0 <= alpha && y1 >= alpha };
        if crosses && (y1 - y0).abs() >= 1e-18 {
            let t = (alpha - y0) / (y1 - y0);
            return Ok(xs[i] + t * (xs[i + 1] - xs[i]));
        }
    }

    log::warn!("hypotest: no bracketing interval in CLs scan; using closest point");
    let best = ys
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - alpha).abs().total_cmp(&(b.1 - alpha).abs()))
        .map(|(i, _)| i)
        .unwrap_or(0);
    Ok(xs[best])
}

/// Compute the expected CLs band for a given Asimov `sqrt(q_mu,A)`.
///
/// Output ordering is [`NSIGMA_ORDER`].
pub fn expected_cls_band_from_sqrtq_a(sqrtq_a: f64) -> [f64; 5] {
    let mut out = [0.0; 5];
    for (i, t) in NSIGMA_ORDER.into_iter().enumerate() {
        let clsb = normal::cdf(-(t + sqrtq_a));
        let clb = normal::cdf(-t);
        out[i] = safe_cls(clsb, clb);
    }
    out
}

/// Expected CLs+b values for a given Asimov `sqrt(q_mu,A)`, ordered as [`NSIGMA_ORDER`].
pub fn expected_clsb_band_from_sqrtq_a(sqrtq_a: f64) -> [f64; 5] {
    NSIGMA_ORDER.map(|t| normal::cdf(-(t + sqrtq_a)))
}

/// Result of an asymptotic `hypotest` at a single tested POI value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HypotestResult {
    /// Tested POI value.
    pub mu_test: f64,
    /// Observed CLs value.
    pub cls: f64,
    /// Observed CLs+b value.
    pub clsb: f64,
    /// Observed CLb value.
    pub clb: f64,
    /// The test statistic in `-muhat/sigma` space.
    pub teststat: f64,
    /// Observed `q_mu`/`qtilde_mu` value.
    pub q_mu: f64,
    /// Asimov `q_mu,A` value.
    pub q_mu_a: f64,
    /// Unconditional best-fit POI on observed data.
    pub mu_hat: f64,
}

/// Observed and expected CLs values for a fixed tested POI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HypotestExpectedSet {
    /// Observed CLs.
    pub observed: f64,
    /// Expected CLs at `n_sigma = [2, 1, 0, -1, -2]`.
    pub expected: [f64; 5],
}

/// Settings of an upper-limit search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AsymptoticConfig {
    /// CLs level defining the limit (`CLs(mu_up) = alpha`).
    pub alpha: f64,
    /// Initial bisection bracket; `hi` is doubled until it brackets the limit.
    pub bracket: (f64, f64),
    /// Relative width at which bisection stops.
    pub rtol: f64,
    /// Maximum bisection steps.
    pub max_iter: usize,
}

impl Default for AsymptoticConfig {
    fn default() -> Self {
        Self { alpha: 0.05, bracket: (0.0, 10.0), rtol: 1e-4, max_iter: 100 }
    }
}

fn check_alpha(alpha: f64) -> Result<()> {
    if 0.0 < alpha && alpha < 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("alpha must be in (0,1), got {alpha}")))
    }
}

fn annotate_fit_failure(err: Error, data: &str) -> Error {
    match err {
        Error::FitFailure { mu, message } => Error::FitFailure {
            mu,
            message: format!("free fit on {data} data did not converge: {message}"),
        },
        other => other,
    }
}

/// Context for repeated asymptotic CLs evaluations (caches free fits and the Asimov model).
#[derive(Debug, Clone)]
pub struct AsymptoticCLsContext {
    test_statistic: TestStatistic,
    data_model: PoissonLikelihood,
    asimov_model: PoissonLikelihood,
    data_ref: ReferenceFit,
    asimov_ref: ReferenceFit,
    mu_hat: f64,
}

impl AsymptoticCLsContext {
    /// Build an asymptotic calculator context.
    ///
    /// - Free fit to observed data is cached.
    /// - Asimov dataset is the expectation at [`ASIMOV_MU`] (background only).
    /// - Free fit to the Asimov dataset is cached.
    ///
    /// Fails with [`Error::FitFailure`] if either free fit does not converge.
    pub fn new(
        mle: &MaximumLikelihoodEstimator,
        model: &PoissonLikelihood,
        test_statistic: TestStatistic,
    ) -> Result<Self> {
        let free_data = free_fit(mle, model).map_err(|e| annotate_fit_failure(e, "observed"))?;
        let data_ref = test_statistic.reference(mle, model, &free_data)?;

        let asimov_model = model.asimov(ASIMOV_MU)?;
        let free_asimov = free_fit(mle, &asimov_model).map_err(|e| annotate_fit_failure(e, "Asimov"))?;
        let asimov_ref = test_statistic.reference(mle, &asimov_model, &free_asimov)?;

        log::debug!(
            "asymptotic context: mu_hat={} nll_hat={} asimov mu_hat={}",
            free_data.mu_hat,
            free_data.nll,
            free_asimov.mu_hat
        );

        Ok(Self {
            test_statistic,
            data_model: model.clone(),
            asimov_model,
            data_ref,
            asimov_ref,
            mu_hat: free_data.mu_hat,
        })
    }

    /// Unconditional best-fit POI on observed data.
    pub fn mu_hat(&self) -> f64 {
        self.mu_hat
    }

    /// Test statistic this context evaluates.
    pub fn test_statistic(&self) -> TestStatistic {
        self.test_statistic
    }

    fn q_pair(&self, mle: &MaximumLikelihoodEstimator, mu_test: f64) -> Result<(f64, f64)> {
        let fixed = mle.fit_fixed(&self.data_model, mu_test)?;
        let fixed_a = mle.fit_fixed(&self.asimov_model, mu_test)?;
        Ok((
            qmu_from_nll(fixed.nll, self.data_ref, mu_test),
            qmu_from_nll(fixed_a.nll, self.asimov_ref, mu_test),
        ))
    }

    /// Evaluate the asymptotic hypothesis test at `mu_test`.
    pub fn hypotest(&self, mle: &MaximumLikelihoodEstimator, mu_test: f64) -> Result<HypotestResult> {
        let (q_mu, q_mu_a) = self.q_pair(mle, mu_test)?;
        let teststat = teststat_from_qmu(q_mu, q_mu_a);
        let sqrtq_a = q_mu_a.sqrt();

        let clsb = normal::cdf(-(teststat + sqrtq_a));
        let clb = normal::cdf(-teststat);
        let cls = safe_cls(clsb, clb);

        Ok(HypotestResult { mu_test, cls, clsb, clb, teststat, q_mu, q_mu_a, mu_hat: self.mu_hat })
    }

    /// Compute observed CLs and the expected CLs band for a single `mu_test`.
    pub fn hypotest_expected_set(
        &self,
        mle: &MaximumLikelihoodEstimator,
        mu_test: f64,
    ) -> Result<HypotestExpectedSet> {
        let r = self.hypotest(mle, mu_test)?;
        let expected = expected_cls_band_from_sqrtq_a(r.q_mu_a.sqrt());
        Ok(HypotestExpectedSet { observed: r.cls, expected })
    }

    /// Sequential hypothesis tests; fails on the first error.
    pub fn hypotest_many(
        &self,
        mle: &MaximumLikelihoodEstimator,
        mu_values: &[f64],
    ) -> Result<Vec<HypotestResult>> {
        mu_values.iter().map(|&mu| self.hypotest(mle, mu)).collect()
    }

    /// Hypothesis tests evaluated in parallel using Rayon, one result per input in order.
    pub fn hypotest_batch(
        &self,
        mle: &MaximumLikelihoodEstimator,
        mu_values: &[f64],
    ) -> Vec<Result<HypotestResult>> {
        use rayon::prelude::*;

        mu_values.par_iter().map(|&mu| self.hypotest(mle, mu)).collect()
    }

    fn cls_expected_at(
        &self,
        mle: &MaximumLikelihoodEstimator,
        mu_test: f64,
        expected_idx: usize,
    ) -> Result<f64> {
        if expected_idx >= NSIGMA_ORDER.len() {
            return Err(Error::InvalidInput(format!("expected_idx out of range: {expected_idx}")));
        }
        let fixed_a = mle.fit_fixed(&self.asimov_model, mu_test)?;
        let q_mu_a = qmu_from_nll(fixed_a.nll, self.asimov_ref, mu_test);
        Ok(expected_cls_band_from_sqrtq_a(q_mu_a.sqrt())[expected_idx])
    }

    fn bisection_limit<F: Fn(f64) -> Result<f64>>(config: &AsymptoticConfig, f: F) -> Result<f64> {
        check_alpha(config.alpha)?;
        let alpha = config.alpha;
        let (mut lo, mut hi) = config.bracket;
        if lo < 0.0 {
            lo = 0.0;
        }
        if !(hi > lo && hi.is_finite()) {
            return Err(Error::InvalidInput(format!("Invalid bracket: lo={lo} hi={hi}")));
        }

        let flo = f(lo)? - alpha;
        if flo < 0.0 {
            return Err(Error::Computation(format!(
                "Lower bracket does not satisfy CLs(lo) >= alpha: CLs({})={} < {}",
                lo,
                flo + alpha,
                alpha
            )));
        }

        let mut fhi = f(hi)? - alpha;
        let mut expand = 0usize;
        while fhi > 0.0 && expand < MAX_BRACKET_EXPANSIONS {
            hi *= 2.0;
            fhi = f(hi)? - alpha;
            expand += 1;
        }
        if fhi > 0.0 {
            return Err(Error::Computation(format!(
                "Failed to bracket limit: CLs(hi)={} still > alpha={} after expansions",
                fhi + alpha,
                alpha
            )));
        }

        for _ in 0..config.max_iter {
            let mid = 0.5 * (lo + hi);
            if f(mid)? - alpha > 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
            if (hi - lo).abs() / hi.abs().max(1.0) < config.rtol {
                break;
            }
        }

        Ok(0.5 * (lo + hi))
    }

    /// Observed upper limit `mu_up` with `CLs(mu_up) = alpha`, found by bisection.
    pub fn upper_limit(&self, mle: &MaximumLikelihoodEstimator, config: &AsymptoticConfig) -> Result<f64> {
        Self::bisection_limit(config, |mu| Ok(self.hypotest(mle, mu)?.cls))
    }

    /// Observed and expected (band ordered as [`NSIGMA_ORDER`]) upper limits by bisection.
    pub fn upper_limits_bisection(
        &self,
        mle: &MaximumLikelihoodEstimator,
        config: &AsymptoticConfig,
    ) -> Result<(f64, [f64; 5])> {
        let obs = self.upper_limit(mle, config)?;
        let mut exp = [0.0; 5];
        for (idx, slot) in exp.iter_mut().enumerate() {
            *slot = Self::bisection_limit(config, |mu| self.cls_expected_at(mle, mu, idx))?;
        }
        Ok((obs, exp))
    }

    /// Observed and expected upper limits from a linear scan plus interpolation.
    pub fn upper_limits_linear_scan(
        &self,
        mle: &MaximumLikelihoodEstimator,
        alpha: f64,
        scan: &[f64],
    ) -> Result<(f64, [f64; 5])> {
        if scan.len() < 2 {
            return Err(Error::InvalidInput("scan must have at least 2 points".to_string()));
        }
        check_alpha(alpha)?;

        let mut observed_cls = Vec::with_capacity(scan.len());
        let mut expected_cls: Vec<[f64; 5]> = Vec::with_capacity(scan.len());
        for &mu in scan {
            let set = self.hypotest_expected_set(mle, mu)?;
            observed_cls.push(set.observed);
            expected_cls.push(set.expected);
        }

        let obs_limit = interp_limit(alpha, scan, &observed_cls)?;
        let mut exp_limits = [0.0; 5];
        for (j, slot) in exp_limits.iter_mut().enumerate() {
            let band: Vec<f64> = expected_cls.iter().map(|v| v[j]).collect();
            *slot = interp_limit(alpha, scan, &band)?;
        }
        Ok((obs_limit, exp_limits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OptimizerConfig;
    use approx::assert_relative_eq;
    use bl_model::{BinnedDataset, ModelConfig};

    fn deficit() -> PoissonLikelihood {
        PoissonLikelihood::from_yields(vec![12.0, 15.0], vec![50.0, 48.0], vec![36.0, 33.0])
            .unwrap()
    }

    fn context(model: &PoissonLikelihood) -> AsymptoticCLsContext {
        let mle = MaximumLikelihoodEstimator::new();
        AsymptoticCLsContext::new(&mle, model, TestStatistic::QMuTilde).unwrap()
    }

    #[test]
    fn test_hypotest_deficit_golden() {
        let model = deficit();
        let mle = MaximumLikelihoodEstimator::new();
        let ctx = context(&model);
        let r = ctx.hypotest(&mle, 1.0).unwrap();
        assert_eq!(r.mu_hat, 0.0);
        assert_relative_eq!(r.q_mu, 20.564_355_445_659_57, epsilon = 1e-9);
        assert_relative_eq!(1.0 - r.cls, 0.999_980_710_522_86, max_relative = 1e-6);
    }

    #[test]
    fn test_hypotest_background_only_point() {
        let model = deficit();
        let mle = MaximumLikelihoodEstimator::new();
        let r = context(&model).hypotest(&mle, 0.0).unwrap();
        assert_eq!(r.q_mu, 0.0);
        assert_eq!(r.q_mu_a, 0.0);
        assert_eq!(r.cls, 1.0);
    }

    #[test]
    fn test_cls_decreases_with_mu() {
        let model = deficit();
        let mle = MaximumLikelihoodEstimator::new();
        let ctx = context(&model);
        let cls: Vec<f64> = ctx
            .hypotest_many(&mle, &[0.0, 0.25, 0.5, 1.0, 2.0])
            .unwrap()
            .into_iter()
            .map(|r| r.cls)
            .collect();
        assert!(cls.windows(2).all(|w| w[1] <= w[0]), "{cls:?}");
    }

    #[test]
    fn test_hypotest_batch_matches_sequential() {
        let model = deficit();
        let mle = MaximumLikelihoodEstimator::new();
        let ctx = context(&model);
        let mus = [0.1, 0.5, 1.0, 2.0];
        let seq = ctx.hypotest_many(&mle, &mus).unwrap();
        let par: Vec<HypotestResult> =
            ctx.hypotest_batch(&mle, &mus).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(seq, par);
    }

    #[test]
    fn test_expected_band_is_ordered() {
        let model = deficit();
        let mle = MaximumLikelihoodEstimator::new();
        let set = context(&model).hypotest_expected_set(&mle, 0.5).unwrap();
        // n_sigma = 2 is the most signal-like background fluctuation: smallest CLs.
        assert!(set.expected.windows(2).all(|w| w[0] <= w[1]), "{:?}", set.expected);
        assert!(set.expected.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_upper_limit_hits_alpha() {
        let model = deficit();
        let mle = MaximumLikelihoodEstimator::new();
        let ctx = context(&model);
        let config = AsymptoticConfig { rtol: 1e-8, ..AsymptoticConfig::default() };
        let mu_up = ctx.upper_limit(&mle, &config).unwrap();
        let cls = ctx.hypotest(&mle, mu_up).unwrap().cls;
        assert_relative_eq!(cls, 0.05, epsilon = 1e-5);
        assert!(mu_up > 0.0 && mu_up < 1.0);
    }

    #[test]
    fn test_upper_limits_scan_agrees_with_bisection() {
        let model = deficit();
        let mle = MaximumLikelihoodEstimator::new();
        let ctx = context(&model);
        let (obs_b, exp_b) =
            ctx.upper_limits_bisection(&mle, &AsymptoticConfig::default()).unwrap();
        let scan: Vec<f64> = (0..=200).map(|i| i as f64 * 0.01).collect();
        let (obs_s, exp_s) = ctx.upper_limits_linear_scan(&mle, 0.05, &scan).unwrap();
        assert_relative_eq!(obs_b, obs_s, epsilon = 5e-3);
        for (b, s) in exp_b.iter().zip(exp_s.iter()) {
            assert_relative_eq!(*b, *s, epsilon = 5e-3);
        }
        // Expected limits grow from +2 sigma to -2 sigma.
        assert!(exp_b.windows(2).all(|w| w[0] <= w[1]), "{exp_b:?}");
    }

    #[test]
    fn test_upper_limit_rejects_bad_alpha() {
        let model = deficit();
        let mle = MaximumLikelihoodEstimator::new();
        let config = AsymptoticConfig { alpha: 1.5, ..AsymptoticConfig::default() };
        let err = context(&model).upper_limit(&mle, &config).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_context_fit_failure() {
        let model =
            PoissonLikelihood::from_yields(vec![12.0, 15.0], vec![50.0, 48.0], vec![70.0, 72.0])
                .unwrap();
        let mle = MaximumLikelihoodEstimator::with_config(OptimizerConfig { max_iter: 1, tol: 1e-14 });
        let err = AsymptoticCLsContext::new(&mle, &model, TestStatistic::QMuTilde).unwrap_err();
        assert!(err.is_fit_failure(), "{err}");
    }

    #[test]
    fn test_negative_signal_context_uses_qmu() {
        let d = BinnedDataset::new(vec![12.0, 15.0], vec![50.0, 48.0], vec![36.0, 33.0]).unwrap();
        let config = ModelConfig { allow_negative_signal: true, ..ModelConfig::default() };
        let model = PoissonLikelihood::new(d, config).unwrap();
        let mle = MaximumLikelihoodEstimator::new();
        let ctx = AsymptoticCLsContext::new(&mle, &model, TestStatistic::QMu).unwrap();
        assert!(ctx.mu_hat() < 0.0);
        let r = ctx.hypotest(&mle, 1.0).unwrap();
        assert!(r.q_mu > 20.564_355_445_659_57);
        assert!(r.cls < 1e-4);
    }

    #[test]
    fn test_clsb_from_qmu() {
        assert_relative_eq!(clsb_from_qmu(0.0), 0.5, max_relative = 1e-9);
        assert_relative_eq!(clsb_from_qmu(1.0), 0.158_655_253_931_457_05, max_relative = 1e-9);
        assert_eq!(clsb_from_qmu(-1.0), 0.5);
    }

    #[test]
    fn test_safe_cls_underflow_is_finite() {
        let clb = normal::cdf(-1e6);
        let clsb = normal::cdf(-1e6 - 1.0);
        assert_eq!(clb, 0.0);
        assert_eq!(clsb, 0.0);
        let cls = safe_cls(clsb, clb);
        assert!(cls.is_finite());
        assert_eq!(cls, 0.0);
    }

    #[test]
    fn test_interp_limit_nonmonotonic_picks_first_crossing() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [1.0, 0.2, 0.8, 0.0];
        let alpha = 0.5;
        let x = interp_limit(alpha, &xs, &ys).unwrap();
        let expected = (alpha - 1.0) / (0.2 - 1.0);
        assert!((x - expected).abs() < 1e-12, "x={x} expected={expected}");
    }

    #[test]
    fn test_interp_limit_clamps_to_range() {
        let xs = [0.0, 1.0];
        assert_eq!(interp_limit(0.9, &xs, &[0.8, 0.3]).unwrap(), 0.0);
        assert_eq!(interp_limit(0.1, &xs, &[0.8, 0.3]).unwrap(), 1.0);
        assert!(interp_limit(0.1, &xs, &[0.8]).is_err());
    }
}
