//! Optimization algorithms
//!
//! The NLL of a single POI is convex on its bounds, so its minimum is either a
//! bound or the unique zero of the derivative. The interior case is solved with
//! argmin's Brent root finder applied to the derivative.

use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::brent::BrentRoot;
use bl_core::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Doublings of the bracket width allowed when the upper bound is open.
const MAX_UPPER_EXPANSIONS: usize = 50;

/// Configuration for the bounded scalar optimizer
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of solver iterations
    pub max_iter: u64,
    /// Absolute tolerance on the POI
    pub tol: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 500, tol: 1e-10 }
    }
}

/// Result of optimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best-fit POI
    pub x: f64,
    /// Function value at minimum
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective (cost) evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Convergence status
    pub converged: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(x={:.8}, fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.x, self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Objective function trait for optimization
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate function at `x`
    fn eval(&self, x: f64) -> Result<f64>;

    /// Derivative at `x` (numerical if not overridden)
    fn gradient(&self, x: f64) -> Result<f64> {
        // Central difference with adaptive step: eps = sqrt(machine_epsilon) * max(|x|, 1)
        let eps = 1e-8 * x.abs().max(1.0);
        let f_plus = self.eval(x + eps)?;
        let f_minus = self.eval(x - eps)?;
        Ok((f_plus - f_minus) / (2.0 * eps))
    }
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

/// Wrapper exposing the objective's derivative as the function whose root argmin finds.
struct DerivativeRoot<'a> {
    objective: &'a dyn ObjectiveFunction,
    counts: Arc<FuncCounts>,
}

impl CostFunction for DerivativeRoot<'_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        self.objective.gradient(*x).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

/// Bounded minimizer for convex one-dimensional objectives.
pub struct BoundedScalarOptimizer {
    config: OptimizerConfig,
}

impl BoundedScalarOptimizer {
    /// Create new optimizer with given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    fn finish(
        &self,
        objective: &dyn ObjectiveFunction,
        counts: &FuncCounts,
        x: f64,
        n_iter: u64,
        converged: bool,
        message: String,
    ) -> Result<OptimizationResult> {
        let fval = objective.eval(x)?;
        counts.cost.fetch_add(1, Ordering::Relaxed);
        Ok(OptimizationResult {
            x,
            fval,
            n_iter,
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged,
            message,
        })
    }

    /// Minimize `objective` on `[lo, hi]`.
    ///
    /// Bound saturation (derivative pointing outwards at a bound) counts as converged.
    /// Running out of iterations is reported through `converged = false`, not as an error.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        bounds: (f64, f64),
    ) -> Result<OptimizationResult> {
        let (lo, hi) = bounds;
        if !(lo.is_finite() && hi.is_finite()) || lo > hi {
            return Err(Error::InvalidInput(format!("Invalid bounds: ({lo}, {hi})")));
        }
        if self.config.max_iter == 0 {
            return Err(Error::InvalidInput("max_iter must be > 0".to_string()));
        }

        let counts = Arc::new(FuncCounts::default());

        if lo == hi {
            return self.finish(objective, &counts, lo, 0, true, "parameter fixed".to_string());
        }

        let g_lo = objective.gradient(lo)?;
        counts.grad.fetch_add(1, Ordering::Relaxed);
        if g_lo >= 0.0 {
            return self.finish(objective, &counts, lo, 0, true, "at lower bound".to_string());
        }
        let g_hi = objective.gradient(hi)?;
        counts.grad.fetch_add(1, Ordering::Relaxed);
        if g_hi <= 0.0 {
            return self.finish(objective, &counts, hi, 0, true, "at upper bound".to_string());
        }
        if g_lo.is_nan() || g_hi.is_nan() {
            return Err(Error::Computation(format!(
                "Non-finite derivative at bounds: f'({lo})={g_lo}, f'({hi})={g_hi}"
            )));
        }

        let problem = DerivativeRoot { objective, counts: counts.clone() };
        let solver = BrentRoot::new(lo, hi, self.config.tol);

        let res = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("Optimization failed: {}", e)))?;

        // Cost is the signed derivative: the current iterate is the root estimate,
        // not the lowest-cost parameter.
        let state = res.state();
        let x = state
            .get_param()
            .or_else(|| state.get_best_param())
            .copied()
            .ok_or_else(|| Error::Computation("No best parameter found".to_string()))?
            .clamp(lo, hi);
        let n_iter = state.get_iter();

        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );
        let message = termination.to_string();

        self.finish(objective, &counts, x, n_iter, converged, message)
    }

    /// Minimize `objective` on `[lo, +inf)`, starting from the bracket `[lo, hi]`.
    ///
    /// While the derivative at `hi` is still negative the bracket width is doubled,
    /// at most `MAX_UPPER_EXPANSIONS` times. A degenerate bracket (`lo == hi`) is
    /// a fixed parameter and is never widened.
    pub fn minimize_open_above(
        &self,
        objective: &dyn ObjectiveFunction,
        bounds: (f64, f64),
    ) -> Result<OptimizationResult> {
        let (lo, mut hi) = bounds;
        if lo.is_finite() && hi.is_finite() && lo < hi {
            for _ in 0..MAX_UPPER_EXPANSIONS {
                if !(objective.gradient(hi)? < 0.0) {
                    break;
                }
                let next = lo + 2.0 * (hi - lo);
                log::debug!("objective still decreasing at x={hi}, extending upper bound to {next}");
                hi = next;
            }
        }
        self.minimize(objective, (lo, hi))
    }
}

impl Default for BoundedScalarOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x) = (x - 2)^2, minimum at 2 with f = 0
    struct Quadratic;

    impl ObjectiveFunction for Quadratic {
        fn eval(&self, x: f64) -> Result<f64> {
            Ok((x - 2.0).powi(2))
        }

        fn gradient(&self, x: f64) -> Result<f64> {
            Ok(2.0 * (x - 2.0))
        }
    }

    #[test]
    fn test_optimizer_quadratic() {
        let optimizer = BoundedScalarOptimizer::default();
        let result = optimizer.minimize(&Quadratic, (-10.0, 10.0)).unwrap();

        println!("{}", result);

        assert!(result.converged, "Optimizer should converge: {}", result.message);
        assert_relative_eq!(result.x, 2.0, epsilon = 1e-8);
        assert_relative_eq!(result.fval, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_optimizer_pinned_at_lower_bound() {
        let optimizer = BoundedScalarOptimizer::default();
        let result = optimizer.minimize(&Quadratic, (3.0, 5.0)).unwrap();

        assert_eq!(result.x, 3.0);
        assert_relative_eq!(result.fval, 1.0, epsilon = 1e-12);
        assert!(result.converged);
        assert_eq!(result.n_iter, 0);
    }

    #[test]
    fn test_optimizer_pinned_at_upper_bound() {
        let optimizer = BoundedScalarOptimizer::default();
        let result = optimizer.minimize(&Quadratic, (-5.0, 1.0)).unwrap();

        assert_eq!(result.x, 1.0);
        assert!(result.converged);
        assert_eq!(result.message, "at upper bound");
    }

    #[test]
    fn test_optimizer_open_above_extends_past_bracket() {
        let optimizer = BoundedScalarOptimizer::default();
        let result = optimizer.minimize_open_above(&Quadratic, (-5.0, 1.0)).unwrap();

        assert!(result.converged, "{}", result.message);
        assert_relative_eq!(result.x, 2.0, epsilon = 1e-8);

        // Interior minimum: same answer as the closed bracket.
        let closed = optimizer.minimize(&Quadratic, (-10.0, 10.0)).unwrap();
        let open = optimizer.minimize_open_above(&Quadratic, (-10.0, 10.0)).unwrap();
        assert_eq!(closed.x, open.x);

        // Lower bound saturation is untouched.
        let pinned = optimizer.minimize_open_above(&Quadratic, (3.0, 5.0)).unwrap();
        assert_eq!(pinned.x, 3.0);
    }

    #[test]
    fn test_optimizer_fixed_parameter() {
        let optimizer = BoundedScalarOptimizer::default();
        let result = optimizer.minimize(&Quadratic, (4.0, 4.0)).unwrap();

        assert_eq!(result.x, 4.0);
        assert_relative_eq!(result.fval, 4.0, epsilon = 1e-12);
        assert!(result.converged);
        assert_eq!(result.n_gev, 0);
    }

    // Numerical gradient path: f(x) = exp(x) - 3x, minimum at ln 3.
    struct ExpLinear;

    impl ObjectiveFunction for ExpLinear {
        fn eval(&self, x: f64) -> Result<f64> {
            Ok(x.exp() - 3.0 * x)
        }
    }

    #[test]
    fn test_optimizer_numerical_gradient() {
        let optimizer = BoundedScalarOptimizer::default();
        let result = optimizer.minimize(&ExpLinear, (-5.0, 5.0)).unwrap();

        assert!(result.converged);
        assert_relative_eq!(result.x, 3f64.ln(), epsilon = 1e-6);
    }

    #[test]
    fn test_optimizer_reports_iteration_budget() {
        let config = OptimizerConfig { max_iter: 1, tol: 1e-14 };
        let optimizer = BoundedScalarOptimizer::new(config);
        let result = optimizer.minimize(&ExpLinear, (-50.0, 50.0)).unwrap();

        assert!(!result.converged, "one iteration cannot reach tol: {}", result);
        assert!(result.fval.is_finite());
    }

    #[test]
    fn test_optimizer_rejects_bad_bounds() {
        let optimizer = BoundedScalarOptimizer::default();
        assert!(optimizer.minimize(&Quadratic, (1.0, 0.0)).is_err());
        assert!(optimizer.minimize(&Quadratic, (f64::NEG_INFINITY, 0.0)).is_err());
    }
}
