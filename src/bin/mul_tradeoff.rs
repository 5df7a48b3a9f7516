//! Performance analysis of the elementwise-product operator.
//!
//! Measures `(A ⊙ B) X` for low-rank PSD `A` and `B` of growing size through the two
//! code paths of [`MulLinearOperator`]: the root path, which multiplies `B` by an
//! `n × (r·m)` block built from the root of `A`, and the dense fallback, which forms
//! `A ⊙ B` explicitly. Each path runs in its own worker process so the peak RSS of one
//! does not leak into the other.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use linear_operator::{
    MulLinearOperator, Operator, RootLinearOperator, Settings, Tensor, to_operator,
    utils::perf::{get_peak_rss_kb, time_mean},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};

/// Environment variable used for orchestrator/worker process differentiation.
const PATH_ENV_VAR: &str = "LINEAR_OPERATOR_MUL_EXPERIMENT_PATH";

/// The code path of the product to measure in a worker process.
#[derive(ValueEnum, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
enum ProductPath {
    Root,
    Dense,
}

#[derive(Parser, Debug)]
#[clap(
    name = "mul-tradeoff-runner",
    about = "Compares the root and dense code paths of elementwise operator products."
)]
struct MulTradeoffArgs {
    /// The smallest matrix dimension.
    #[clap(long, default_value_t = 100)]
    n_start: usize,
    /// The largest matrix dimension.
    #[clap(long, default_value_t = 1000)]
    n_end: usize,
    /// The step between matrix dimensions.
    #[clap(long, default_value_t = 100)]
    n_step: usize,
    /// Rank of the roots of both factors.
    #[clap(long, default_value_t = 5)]
    rank: usize,
    /// Number of right-hand side columns.
    #[clap(long, default_value_t = 1)]
    columns: usize,
    /// Timed repetitions per size.
    #[clap(long, default_value_t = 3)]
    repeats: usize,
    /// Path to the output CSV file where results will be written.
    #[clap(long)]
    output: String,
}

/// A single row of data produced by a worker process.
#[derive(Debug, Serialize, Deserialize)]
struct MulTradeoffResult {
    path: ProductPath,
    n: usize,
    rank: usize,
    columns: usize,
    time_s: f64,
    rss_kb: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    if let Ok(path_str) = std::env::var(PATH_ENV_VAR) {
        let path = ProductPath::from_str(&path_str, true)
            .map_err(|_| anyhow!("Invalid path string in env var: {}", path_str))?;
        run_worker(&path)
    } else {
        run_orchestrator()
    }
}

/// Spawns one worker per code path and merges their rows into the output CSV.
fn run_orchestrator() -> Result<()> {
    let args = MulTradeoffArgs::parse();
    log::info!("Orchestrator starting elementwise product experiment...");

    let mut child_handles = Vec::new();
    for path in [ProductPath::Root, ProductPath::Dense] {
        let name = path
            .to_possible_value()
            .ok_or_else(|| anyhow!("No command-line name for path {path:?}"))?;
        log::info!("Spawning worker for path: {path:?}");
        let child = Command::new(std::env::current_exe()?)
            .args(std::env::args_os().skip(1))
            .env(PATH_ENV_VAR, name.get_name())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn worker for path {path:?}"))?;
        child_handles.push((path, child));
    }

    let mut all_results = Vec::new();
    for (path, handle) in child_handles {
        log::info!("Waiting for worker {path:?} to complete...");
        let output = handle.wait_with_output()?;
        if !output.status.success() {
            return Err(anyhow!(
                "Worker process for path {:?} failed with status: {}",
                path,
                output.status
            ));
        }

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(output.stdout.as_slice());
        for result in rdr.deserialize() {
            let record: MulTradeoffResult = result?;
            all_results.push(record);
        }
    }

    log::info!("All workers finished. Writing results to {}...", &args.output);
    let mut writer = csv::Writer::from_path(&args.output)?;
    for record in all_results {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn random_root(rng: &mut StdRng, n: usize, rank: usize) -> Tensor {
    Tensor::from_fn(&[n, rank], |_| rng.random::<f64>() - 0.5)
}

/// Times one code path over every size and streams rows to stdout.
fn run_worker(path: &ProductPath) -> Result<()> {
    let args = MulTradeoffArgs::parse();
    if args.n_step == 0 {
        return Err(anyhow!("--n-step must be positive"));
    }
    log::info!("Worker for {path:?} started.");

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(std::io::stdout());
    let mut rng = StdRng::seed_from_u64(42);

    for n in (args.n_start..=args.n_end).step_by(args.n_step) {
        let root_a = random_root(&mut rng, n, args.rank);
        let root_b = random_root(&mut rng, n, args.rank);
        let rhs = Tensor::from_fn(&[n, args.columns], |_| rng.random::<f64>());

        let (left, right, settings) = match path {
            ProductPath::Root => (
                Operator::new(RootLinearOperator::new(root_a)?),
                Operator::new(RootLinearOperator::new(root_b)?),
                Settings::default(),
            ),
            ProductPath::Dense => (
                to_operator(root_a.matmul(&root_a.transpose()?)?)?,
                to_operator(root_b.matmul(&root_b.transpose()?)?)?,
                Settings::default().with_dense_fallback_size(usize::MAX),
            ),
        };

        // The product is rebuilt per repetition so its memoized materialization is not reused.
        let (_, time_s) = time_mean(args.repeats, || {
            MulLinearOperator::with_settings(left.clone(), right.clone(), &settings)
                .map(Operator::new)
                .and_then(|product| product.matmul(&rhs))
        })?;
        log::info!("Worker {path:?}: n = {n} took {time_s:.6}s");

        writer.serialize(MulTradeoffResult {
            path: path.clone(),
            n,
            rank: args.rank,
            columns: args.columns,
            time_s,
            rss_kb: get_peak_rss_kb(),
        })?;
    }

    writer.flush()?;
    log::info!("Worker for {path:?} finished.");
    Ok(())
}
