// baseline_main.rs
use adaptive_signals::cli::SimulationArgs;
use adaptive_signals::control_system::run_baseline;
use adaptive_signals::simulation_engine::MicroSimulation;
use adaptive_signals::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "baseline")]
#[command(version, about = "Runs the network on its fixed-time signal programs")]
struct Cli {
    #[command(flatten)]
    simulation: SimulationArgs,

    /// Directory for trip info, summary and detector files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

fn run(cli: Cli) -> Result<()> {
    let mut sim_config = cli.simulation.simulation_config()?;
    sim_config.output_dir = Some(cli.output_dir.clone());
    let mut engine = MicroSimulation::new(cli.simulation.network()?, cli.simulation.trips()?, sim_config)?;
    let dropped = engine.dropped_trips();
    let summary = run_baseline(&mut engine)?;
    println!(
        "{} steps, finished at t={:.0}s, {} trips completed, {} dropped",
        summary.steps,
        summary.final_time,
        engine.trip_infos().len(),
        dropped
    );
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error in baseline run: {}", e);
        process::exit(1);
    }
}
