// run_scenarios_main.rs
use adaptive_signals::cli::{ControllerArgs, SimulationArgs};
use adaptive_signals::control_system::ControlStrategy;
use adaptive_signals::global_variables::{DECISION_LOG_PATH, OUTPUTS_DIR};
use adaptive_signals::scenarios::{run_scenarios, ScenarioPlan};
use adaptive_signals::{ControlError, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "run_scenarios")]
#[command(version, about = "Runs the fixed-time baseline and the adaptive controller side by side")]
struct Cli {
    #[command(flatten)]
    simulation: SimulationArgs,

    #[command(flatten)]
    controller: ControllerArgs,

    /// Scenario outputs land in <outputs>/<scenario>/
    #[arg(long, default_value = OUTPUTS_DIR)]
    outputs: PathBuf,

    /// Decision log of the adaptive run (CSV)
    #[arg(long, default_value = DECISION_LOG_PATH)]
    log: PathBuf,

    /// Run only the adaptive scenario
    #[arg(long)]
    adaptive_only: bool,
}

async fn run(cli: Cli) -> Result<()> {
    let simulation = cli.simulation.simulation_config()?;
    let controller = cli
        .controller
        .controller_config(simulation.real_time_factor.is_some())?;

    let mut plan = ScenarioPlan::new(cli.simulation.network()?, cli.simulation.trips()?);
    plan.simulation = simulation;
    plan.controller = controller;
    plan.outputs_dir = cli.outputs;
    plan.decision_log = Some(cli.log);

    let strategies: &[ControlStrategy] = if cli.adaptive_only {
        &[ControlStrategy::Adaptive]
    } else {
        &[ControlStrategy::Baseline, ControlStrategy::Adaptive]
    };
    for outcome in run_scenarios(plan, strategies).await? {
        log::info!(
            "{}: {} steps, {} actuations",
            outcome.strategy.tag(),
            outcome.summary.steps,
            outcome.summary.actuations()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();
    match run(Cli::parse()).await {
        Ok(()) => {}
        Err(ControlError::Scenario { scenario, reason }) => {
            eprintln!("[ERR] {} failed: {}", scenario, reason);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error running scenarios: {}", e);
            process::exit(1);
        }
    }
}
