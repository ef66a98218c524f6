// adaptive_controller_main.rs
use adaptive_signals::cli::{ControllerArgs, SimulationArgs};
use adaptive_signals::control_system::run_loop::{run_adaptive, SystemClock};
use adaptive_signals::global_variables::{AMQP_URL, DECISION_LOG_PATH};
use adaptive_signals::monitoring::decision_log::{AmqpDecisionPublisher, CsvDecisionLog, FanoutSink};
use adaptive_signals::simulation_engine::MicroSimulation;
use adaptive_signals::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "adaptive_controller")]
#[command(version, about = "Max-pressure signal control on the built-in micro-simulation")]
struct Cli {
    #[command(flatten)]
    simulation: SimulationArgs,

    #[command(flatten)]
    controller: ControllerArgs,

    /// Decision log (CSV)
    #[arg(long, default_value = DECISION_LOG_PATH)]
    log: PathBuf,

    /// Directory for trip info, summary and detector files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Also publish actuations to the light_adjustments queue
    #[arg(long, num_args = 0..=1, default_missing_value = AMQP_URL)]
    amqp_url: Option<String>,
}

fn run(cli: Cli) -> Result<()> {
    let mut sim_config = cli.simulation.simulation_config()?;
    sim_config.output_dir = Some(cli.output_dir.clone());
    let controller = cli
        .controller
        .controller_config(sim_config.real_time_factor.is_some())?;

    let network = cli.simulation.network()?;
    let trips = cli.simulation.trips()?;
    let mut engine = MicroSimulation::new(network, trips, sim_config)?;

    let mut sink = FanoutSink::new();
    sink.push(Box::new(CsvDecisionLog::create(&cli.log)?));
    if let Some(url) = &cli.amqp_url {
        sink.push_optional(Box::new(AmqpDecisionPublisher::connect(url)?));
    }

    let summary = run_adaptive(&mut engine, controller, &mut sink, &SystemClock::new())?;
    println!(
        "t={:.0}s: {} evaluations, {} switches, {} extensions, {} fallback extensions",
        summary.final_time,
        summary.evaluations,
        summary.switches,
        summary.extensions,
        summary.fallback_extensions
    );
    println!("Decisions logged to {}", cli.log.display());
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error in adaptive controller: {}", e);
        process::exit(1);
    }
}
