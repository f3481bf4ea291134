use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use train_pool::simulation::SimWorld;

#[derive(Parser)]
#[command(name = "train_pool")]
#[command(about = "Storage pool and turntable simulation")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value = "3000")]
    ticks: u32,

    /// Time delta per tick in seconds
    #[arg(long, default_value = "0.1")]
    delta: f32,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Write a pool snapshot to this file when the run ends
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,train_pool=info"),
    )
    .init();

    let cli = Cli::parse();
    run_headless(&cli)
}

/// Run the simulation without any front end
fn run_headless(cli: &Cli) -> Result<()> {
    if cli.delta <= 0.0 {
        anyhow::bail!("--delta must be positive, got {}", cli.delta);
    }
    info!("Running pool simulation: {} ticks of {}s", cli.ticks, cli.delta);

    let mut world = match cli.seed {
        Some(seed) => SimWorld::create_test_world_with_seed(seed),
        None => SimWorld::create_test_world(),
    }
    .context("Failed to build the test world")?;

    info!("Initial state:");
    world.log_pools();

    // Report once per simulated minute
    let ticks_per_report = (60.0 / cli.delta).ceil().max(1.0) as u32;
    for tick in 1..=cli.ticks {
        world.tick(cli.delta);
        if tick % ticks_per_report == 0 {
            info!(
                "--- After tick {} ({:.1}s simulated time): {} trains, {} controls ---",
                tick,
                world.time,
                world.trains.len(),
                world.controls.len()
            );
        }
    }

    world.log_summary();

    if let Some(path) = &cli.snapshot {
        std::fs::write(path, world.snapshot())
            .with_context(|| format!("Failed to write snapshot to {}", path.display()))?;
        info!("Snapshot written to {}", path.display());
    }
    Ok(())
}
