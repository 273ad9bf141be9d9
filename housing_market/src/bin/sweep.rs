//! Bid-up sweep
//!
//! Runs the baseline (or the given) configuration over several bid-up factors
//! and seeds in parallel, and prints price index and bid-up statistics per
//! factor.
//!
//! Usage:
//!   cargo run --release --bin sweep -- [config.toml] [runs]

use std::env;
use std::panic::{AssertUnwindSafe, catch_unwind};

use housing_market::output::RunSummary;
use housing_market::{SimulationConfig, Simulation, SimulationOutput};
use rayon::prelude::*;

const BID_UP_FACTORS: [f64; 5] = [1.0, 1.0025, 1.005, 1.0075, 1.01];
const DEFAULT_RUNS: usize = 20;

fn run_once(base: &SimulationConfig, bid_up_factor: f64, seed: u64) -> Result<RunSummary, String> {
    let mut config = base.clone();
    config.market.bid_up_factor = bid_up_factor;
    config.simulation.seed = seed;
    config.output.write_transactions = false;

    let mut simulation = Simulation::new(&config).map_err(|err| err.to_string())?;
    simulation.run();
    SimulationOutput::from_stats(simulation.stats(), &config)
        .map(|output| output.summary)
        .map_err(|err| err.to_string())
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let mut args = env::args().skip(1);
    let base = match args.next() {
        Some(path) => match SimulationConfig::from_path(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        },
        None => SimulationConfig::default(),
    };
    let runs = args
        .next()
        .and_then(|runs| runs.parse().ok())
        .unwrap_or(DEFAULT_RUNS);

    println!("Bid-up sweep: {} runs per factor, {} months", runs, base.simulation.months);
    println!(
        "{:>8} | {:>6} | {:>14} | {:>14} | {:>10}",
        "Factor", "Runs", "HPI (sd)", "Bid-up (sd)", "Sales"
    );
    println!("{:-<8}-+-{:-<6}-+-{:-<14}-+-{:-<14}-+-{:-<10}", "", "", "", "", "");

    for factor in BID_UP_FACTORS {
        let results: Vec<Result<RunSummary, String>> = (0..runs)
            .into_par_iter()
            .map(|run| {
                let seed = base.simulation.seed.wrapping_add(run as u64);
                catch_unwind(AssertUnwindSafe(|| run_once(&base, factor, seed)))
                    .unwrap_or_else(|_| Err(format!("run {run} panicked")))
            })
            .collect();

        let summaries: Vec<RunSummary> = results
            .into_iter()
            .filter_map(|result| match result {
                Ok(summary) => Some(summary),
                Err(err) => {
                    eprintln!("  Warning: skipping failed run - {err}");
                    None
                }
            })
            .collect();

        let hpi: Vec<f64> = summaries.iter().map(|s| s.final_house_price_index).collect();
        let bid_up: Vec<f64> = summaries.iter().map(|s| s.mean_bid_up).collect();
        let sales: Vec<f64> = summaries.iter().map(|s| s.total_sales as f64).collect();
        let (hpi_mean, hpi_sd) = mean_and_std(&hpi);
        let (bid_up_mean, bid_up_sd) = mean_and_std(&bid_up);
        let (sales_mean, _) = mean_and_std(&sales);

        println!(
            "{:>8.4} | {:>6} | {:>6.4} ({:.4}) | {:>6.4} ({:.4}) | {:>10.1}",
            factor,
            summaries.len(),
            hpi_mean,
            hpi_sd,
            bid_up_mean,
            bid_up_sd,
            sales_mean
        );
    }
}
