//! Housing market simulation
//!
//! Usage:
//!   cargo run --release --bin housing_market -- [config.toml]
//!
//! Without a config path the baseline configuration is used. `RUST_LOG`
//! overrides the default `info` log level.

use std::env;
use std::process::ExitCode;
use std::time::Instant;

use housing_market::{SimulationConfig, Simulation, SimulationOutput};

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match env::args().nth(1) {
        Some(path) => {
            println!("Loading configuration from {path}");
            SimulationConfig::from_path(&path)?
        }
        None => SimulationConfig::default(),
    };

    println!("Regional Housing Market Simulation");
    println!("==================================");
    println!(
        "Households: {}, dwellings: {}, months: {}, seed: {}",
        config.simulation.households,
        config.simulation.dwellings,
        config.simulation.months,
        config.simulation.seed
    );
    println!(
        "Bid-up factor: {}, quality bands: {}\n",
        config.market.bid_up_factor, config.market.n_quality_bands
    );

    let start = Instant::now();
    let mut simulation = Simulation::new(&config)?;
    simulation.run();
    let output = SimulationOutput::from_stats(simulation.stats(), &config)?;
    let elapsed = start.elapsed();

    let summary = &output.summary;
    println!("Completed in {:.2}s", elapsed.as_secs_f64());
    println!("{}", "=".repeat(50));
    println!("{:<28} {:>12}", "Sales", summary.total_sales);
    println!("{:<28} {:>12}", "Lettings", summary.total_lettings);
    println!("{:<28} {:>12.4}", "House price index", summary.final_house_price_index);
    println!("{:<28} {:>12.4}", "Rent index", summary.final_rent_index);
    println!("{:<28} {:>12.4}", "Mean bid-up (sale/list)", summary.mean_bid_up);
    println!("{:<28} {:>12.4}", "Expected flow yield", summary.final_exp_av_flow_yield);
    println!("{:<28} {:>12}", "Owner-occupiers", summary.owner_occupiers);
    println!("{:<28} {:>12}", "Renters", summary.renters);
    println!("{:<28} {:>12}", "Homeless", summary.homeless);
    println!("{:<28} {:>12}", "Landlords", summary.landlords);
    println!("{:<28} {:>12}", "Vacant dwellings", summary.vacant_dwellings);
    let unsold = format!("{} / {}", summary.unsold_offers, summary.unlet_offers);
    println!("{:<28} {:>12}", "Unsold / unlet offers", unsold);
    if summary.rejected_requests > 0 {
        println!("{:<28} {:>12}", "Rejected requests", summary.rejected_requests);
    }

    let written = output.write_all(&config.output)?;
    if !written.is_empty() {
        println!("\nOutput:");
        for path in written {
            println!("  {}", path.display());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    init_logging("info");
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
