//! binlimit CLI

use anyhow::Result;
use bl_core::PoiLikelihood;
use bl_inference::{
    AsymptoticCLsContext, AsymptoticConfig, Convention, ExpectationType,
    MaximumLikelihoodEstimator, PoissonBackend, Registry, StatisticalModel, TestStatistic,
};
use bl_model::{ModelSpec, PoissonLikelihood};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "binlimit")]
#[command(about = "binlimit - Exclusion limits for binned Poisson counting experiments")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Maximum likelihood fit of the signal strength
    Fit {
        /// Input model (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Evaluate at a fixed signal strength instead of fitting
        #[arg(long)]
        fixed_mu: Option<f64>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Asymptotic CLs hypotest
    Hypotest {
        /// Input model (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Tested POI value (mu)
        #[arg(long)]
        mu: f64,

        /// Also return the expected CLs set.
        #[arg(long)]
        expected_set: bool,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Exclusion confidence level for one or more signal strengths
    Ecl {
        /// Input model (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Tested POI values (comma separated)
        #[arg(long, value_delimiter = ',', default_value = "1.0")]
        mu: Vec<f64>,

        /// Observed value or expected band
        #[arg(long, value_enum, default_value_t = ExpectedArg::Observed)]
        expected: ExpectedArg,

        /// Report 1 - CLs or 1 - CLs+b
        #[arg(long, value_enum, default_value_t = ConventionArg::Cls)]
        convention: ConventionArg,

        /// Registered backend name
        #[arg(long, default_value = PoissonBackend::NAME)]
        backend: String,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto). Use 1 for deterministic parity.
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// CLs upper limit via bisection or a linear scan (asymptotics)
    UpperLimit {
        /// Input model (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Target CLs level (alpha), typically 0.05
        #[arg(long, default_value = "0.05")]
        alpha: f64,

        /// Also compute expected limits (always available in scan mode).
        #[arg(long)]
        expected: bool,

        /// Use scan mode: scan start (mu). Requires `--scan-stop` and `--scan-points`.
        #[arg(long, requires_all = ["scan_stop", "scan_points"])]
        scan_start: Option<f64>,

        /// Use scan mode: scan stop (mu). Requires `--scan-start` and `--scan-points`.
        #[arg(long, requires_all = ["scan_start", "scan_points"])]
        scan_stop: Option<f64>,

        /// Use scan mode: number of scan points (inclusive).
        #[arg(long, requires_all = ["scan_start", "scan_stop"])]
        scan_points: Option<usize>,

        /// Lower bracket (mu)
        #[arg(long, default_value = "0.0")]
        lo: f64,

        /// Upper bracket (mu). If omitted, uses the model's POI upper bound.
        #[arg(long)]
        hi: Option<f64>,

        /// Relative tolerance for bisection
        #[arg(long, default_value = "0.0001")]
        rtol: f64,

        /// Max bisection iterations
        #[arg(long, default_value = "80")]
        max_iter: usize,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Profile likelihood scan over POI values (q_mu)
    Scan {
        /// Input model (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Scan start (mu)
        #[arg(long, default_value = "0.0")]
        start: f64,

        /// Scan stop (mu)
        #[arg(long, default_value = "5.0")]
        stop: f64,

        /// Number of points (inclusive)
        #[arg(long, default_value = "21")]
        points: usize,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Poisson pseudo-data at a signal strength
    Toys {
        /// Input model (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Signal strength the toys are drawn at
        #[arg(long, default_value = "0.0")]
        mu: f64,

        /// Number of toys
        #[arg(long, default_value = "100")]
        n_toys: usize,

        /// RNG seed (toy i uses seed + i)
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Also fit every toy and report mu_hat
        #[arg(long)]
        fit: bool,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto). Use 1 for deterministic parity.
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// List registered backends
    Backends,

    /// Print version
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExpectedArg {
    Observed,
    Aposteriori,
    Apriori,
}

impl From<ExpectedArg> for ExpectationType {
    fn from(v: ExpectedArg) -> Self {
        match v {
            ExpectedArg::Observed => ExpectationType::Observed,
            ExpectedArg::Aposteriori => ExpectationType::Aposteriori,
            ExpectedArg::Apriori => ExpectationType::Apriori,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ConventionArg {
    Cls,
    Clsb,
}

impl From<ConventionArg> for Convention {
    fn from(v: ConventionArg) -> Self {
        match v {
            ConventionArg::Cls => Convention::Cls,
            ConventionArg::Clsb => Convention::Clsb,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON result.
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Fit { input, fixed_mu, output } => cmd_fit(&input, fixed_mu, output.as_deref()),
        Commands::Hypotest { input, mu, expected_set, output } => {
            cmd_hypotest(&input, mu, expected_set, output.as_deref())
        }
        Commands::Ecl { input, mu, expected, convention, backend, output, threads } => cmd_ecl(
            &input,
            &mu,
            expected.into(),
            convention.into(),
            &backend,
            output.as_deref(),
            threads,
        ),
        Commands::UpperLimit {
            input,
            alpha,
            expected,
            scan_start,
            scan_stop,
            scan_points,
            lo,
            hi,
            rtol,
            max_iter,
            output,
        } => cmd_upper_limit(
            &input,
            alpha,
            expected,
            scan_start.zip(scan_stop).zip(scan_points).map(|((a, b), n)| (a, b, n)),
            (lo, hi),
            rtol,
            max_iter,
            output.as_deref(),
        ),
        Commands::Scan { input, start, stop, points, output } => {
            cmd_scan(&input, start, stop, points, output.as_deref())
        }
        Commands::Toys { input, mu, n_toys, seed, fit, output, threads } => {
            cmd_toys(&input, mu, n_toys, seed, fit, output.as_deref(), threads)
        }
        Commands::Backends => cmd_backends(),
        Commands::Version => {
            println!("binlimit {}", bl_core::VERSION);
            Ok(())
        }
    }
}

fn setup_threads(threads: usize) {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
}

fn load_spec(input: &Path) -> Result<ModelSpec> {
    tracing::info!(path = %input.display(), "loading model");
    let spec = ModelSpec::from_path(input)?;
    tracing::info!(bins = spec.data.len(), "model loaded");
    Ok(spec)
}

fn load_model(input: &Path) -> Result<PoissonLikelihood> {
    Ok(load_spec(input)?.build()?)
}

fn write_json(output: Option<&Path>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

fn linspace(start: f64, stop: f64, points: usize) -> Result<Vec<f64>> {
    if points < 2 {
        anyhow::bail!("points must be >= 2");
    }
    if !(stop > start) {
        anyhow::bail!("stop must be > start");
    }
    let step = (stop - start) / (points as f64 - 1.0);
    Ok((0..points).map(|i| start + step * i as f64).collect())
}

fn cmd_fit(input: &Path, fixed_mu: Option<f64>, output: Option<&Path>) -> Result<()> {
    let model = load_model(input)?;
    let mle = MaximumLikelihoodEstimator::new();
    let result = match fixed_mu {
        Some(mu) => mle.fit_fixed(&model, mu)?,
        None => mle.fit(&model)?,
    };
    tracing::info!(nll = result.nll, converged = result.converged, "fit complete");

    let mut output_json = serde_json::to_value(&result)?;
    output_json["twice_nll"] = serde_json::json!(2.0 * result.nll);
    output_json["poi_bounds"] = serde_json::json!(model.poi_bounds());
    write_json(output, output_json)
}

fn cmd_hypotest(input: &Path, mu: f64, expected_set: bool, output: Option<&Path>) -> Result<()> {
    let backend = PoissonBackend::from_spec(&load_spec(input)?)?;
    let mle = backend.mle();
    let ctx = backend.context()?;
    let r = ctx.hypotest(mle, mu)?;
    tracing::debug!(mu_test = r.mu_test, cls = r.cls, mu_hat = r.mu_hat, "hypotest result");

    let mut output_json = serde_json::to_value(&r)?;
    output_json["test_statistic"] = serde_json::to_value(ctx.test_statistic())?;
    output_json["expected_set"] = if expected_set {
        let s = ctx.hypotest_expected_set(mle, mu)?;
        serde_json::json!({
            "nsigma_order": [2, 1, 0, -1, -2],
            "cls": s.expected,
        })
    } else {
        serde_json::Value::Null
    };

    write_json(output, output_json)
}

fn cmd_ecl(
    input: &Path,
    mu_values: &[f64],
    expected: ExpectationType,
    convention: Convention,
    backend: &str,
    output: Option<&Path>,
    threads: usize,
) -> Result<()> {
    setup_threads(threads);
    let spec = load_spec(input)?;
    let model: Box<dyn StatisticalModel> = match convention {
        Convention::Cls => Registry::with_defaults().build(backend, &spec)?,
        Convention::Clsb => {
            if backend != PoissonBackend::NAME {
                anyhow::bail!("--convention clsb is only supported by {}", PoissonBackend::NAME);
            }
            Box::new(PoissonBackend::from_spec(&spec)?.with_convention(convention))
        }
    };
    if !model.is_alive() {
        tracing::warn!("no bin has a non-zero signal yield; nothing can be excluded");
    }

    let output_json = match expected {
        ExpectationType::Observed => {
            let cl = model.exclusion_confidence_level(mu_values)?;
            serde_json::json!({
                "backend": model.name(),
                "expected": expected,
                "convention": convention,
                "mu": mu_values,
                "exclusion_cl": cl,
            })
        }
        ExpectationType::Aposteriori | ExpectationType::Apriori => {
            let bands = model.expected_exclusion_confidence_levels(mu_values, expected)?;
            serde_json::json!({
                "backend": model.name(),
                "expected": expected,
                "convention": convention,
                "mu": mu_values,
                "nsigma_order": [2, 1, 0, -1, -2],
                "exclusion_cl": bands,
            })
        }
    };

    write_json(output, output_json)
}

fn cmd_upper_limit(
    input: &Path,
    alpha: f64,
    expected: bool,
    scan: Option<(f64, f64, usize)>,
    (lo, hi): (f64, Option<f64>),
    rtol: f64,
    max_iter: usize,
    output: Option<&Path>,
) -> Result<()> {
    let model = load_model(input)?;
    let mle = MaximumLikelihoodEstimator::new();
    let ctx = AsymptoticCLsContext::new(&mle, &model, TestStatistic::for_config(model.config()))?;
    let config = AsymptoticConfig {
        alpha,
        bracket: (lo, hi.unwrap_or(model.config().poi_upper_bound)),
        rtol,
        max_iter,
    };

    let output_json = if let Some((start, stop, points)) = scan {
        let scan = linspace(start, stop, points)?;
        let (obs, exp) = ctx.upper_limits_linear_scan(&mle, alpha, &scan)?;
        serde_json::json!({
            "mode": "scan",
            "alpha": alpha,
            "obs_limit": obs,
            "mu_up": obs,
            "exp_limits": exp,
            "scan": { "start": start, "stop": stop, "points": points },
        })
    } else {
        let (obs, exp_limits) = if expected {
            let (obs, exp) = ctx.upper_limits_bisection(&mle, &config)?;
            (obs, Some(exp))
        } else {
            (ctx.upper_limit(&mle, &config)?, None)
        };
        serde_json::json!({
            "mode": "bisection",
            "alpha": alpha,
            "obs_limit": obs,
            "mu_up": obs,
            "exp_limits": exp_limits,
            "bracket": { "lo": config.bracket.0, "hi": config.bracket.1 },
            "rtol": config.rtol,
            "max_iter": config.max_iter,
        })
    };
    tracing::info!(mu_up = %output_json["mu_up"], "upper limit complete");

    write_json(output, output_json)
}

fn cmd_scan(input: &Path, start: f64, stop: f64, points: usize, output: Option<&Path>) -> Result<()> {
    let mu_values = linspace(start, stop, points)?;
    let model = load_model(input)?;
    let mle = MaximumLikelihoodEstimator::new();
    let stat = TestStatistic::for_config(model.config());
    let scan = bl_inference::profile_likelihood::scan(&mle, &model, &mu_values, stat)?;

    write_json(output, serde_json::to_value(&scan)?)
}

fn cmd_toys(
    input: &Path,
    mu: f64,
    n_toys: usize,
    seed: u64,
    fit: bool,
    output: Option<&Path>,
    threads: usize,
) -> Result<()> {
    setup_threads(threads);
    let model = load_model(input)?;
    let toys = bl_inference::toys::poisson_toys(&model, mu, n_toys, seed)?;
    tracing::info!(n_toys, seed, "toys generated");

    let mu_hat = if fit {
        let models = toys.iter().map(|d| model.with_data(d)).collect::<bl_core::Result<Vec<_>>>()?;
        let fits = MaximumLikelihoodEstimator::new().fit_batch(&models);
        let mu_hat = fits
            .into_iter()
            .map(|r| r.map(|f| if f.converged { Some(f.mu_hat) } else { None }))
            .collect::<bl_core::Result<Vec<_>>>()?;
        serde_json::json!(mu_hat)
    } else {
        serde_json::Value::Null
    };

    let output_json = serde_json::json!({
        "mu": mu,
        "seed": seed,
        "n_toys": n_toys,
        "expected": model.expected_data(mu)?,
        "toys": toys,
        "mu_hat": mu_hat,
    });

    write_json(output, output_json)
}

fn cmd_backends() -> Result<()> {
    let registry = Registry::with_defaults();
    write_json(None, serde_json::to_value(registry.infos())?)
}
