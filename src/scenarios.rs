// scenarios.rs
//
// Runs the fixed-time and the adaptive strategy on the same network and
// demand. Each run writes into its own staging directory on a blocking
// worker; finished runs are moved to outputs/<scenario>/.

use crate::config::ControllerConfig;
use crate::control_system::run_loop::{run_adaptive, run_baseline, ControlStrategy, RunSummary, SystemClock};
use crate::demand::Trip;
use crate::errors::{ControlError, Result};
use crate::global_variables::{
    DECISION_LOG_PATH, OUTPUTS_DIR, QUEUE_DETECTOR_PREFIX, SPEED_DETECTOR_PREFIX, SUMMARY_FILE,
    TRIPINFO_FILE,
};
use crate::monitoring::decision_log::{CsvDecisionLog, MemorySink};
use crate::simulation_engine::network::NetworkDefinition;
use crate::simulation_engine::simulation::{MicroSimulation, SimulationConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything a scenario run needs. Cloned once per scenario.
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub network: NetworkDefinition,
    pub trips: Vec<Trip>,
    pub simulation: SimulationConfig,
    pub controller: ControllerConfig,
    pub outputs_dir: PathBuf,
    /// Decision log of the adaptive run. Kept in memory when unset.
    pub decision_log: Option<PathBuf>,
}

impl ScenarioPlan {
    pub fn new(network: NetworkDefinition, trips: Vec<Trip>) -> Self {
        Self {
            network,
            trips,
            simulation: SimulationConfig::default(),
            controller: ControllerConfig::default(),
            outputs_dir: PathBuf::from(OUTPUTS_DIR),
            decision_log: Some(PathBuf::from(DECISION_LOG_PATH)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub strategy: ControlStrategy,
    pub summary: RunSummary,
    pub output_dir: PathBuf,
}

/// Runs one strategy to completion, writing engine outputs to `output_dir`.
pub fn run_strategy(plan: ScenarioPlan, strategy: ControlStrategy, output_dir: &Path) -> Result<RunSummary> {
    let simulation = SimulationConfig {
        output_dir: Some(output_dir.to_path_buf()),
        ..plan.simulation
    };
    let mut engine = MicroSimulation::new(plan.network, plan.trips, simulation)?;
    match strategy {
        ControlStrategy::Baseline => run_baseline(&mut engine),
        ControlStrategy::Adaptive => {
            let clock = SystemClock::new();
            match plan.decision_log {
                Some(path) => {
                    let mut sink = CsvDecisionLog::create(&path)?;
                    run_adaptive(&mut engine, plan.controller, &mut sink, &clock)
                }
                None => {
                    let mut sink = MemorySink::default();
                    run_adaptive(&mut engine, plan.controller, &mut sink, &clock)
                }
            }
        }
    }
}

fn is_run_output(name: &str) -> bool {
    name == TRIPINFO_FILE
        || name == SUMMARY_FILE
        || ((name.starts_with(QUEUE_DETECTOR_PREFIX) || name.starts_with(SPEED_DETECTOR_PREFIX))
            && name.ends_with(".csv"))
}

/// Moves trip info, summary and detector files from `from` to `to`,
/// replacing files of an earlier run. Returns the moved file names.
pub fn relocate_outputs(from: &Path, to: &Path) -> Result<Vec<String>> {
    fs::create_dir_all(to)?;
    let mut moved = Vec::new();
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_run_output(&name) {
            continue;
        }
        fs::rename(entry.path(), to.join(&name))?;
        moved.push(name);
    }
    moved.sort();
    Ok(moved)
}

fn scenario_error(strategy: ControlStrategy, reason: impl ToString) -> ControlError {
    ControlError::Scenario {
        scenario: strategy.tag().to_string(),
        reason: reason.to_string(),
    }
}

/// Runs every strategy concurrently and collects their outputs under
/// `plan.outputs_dir/<tag>/`. The first failing scenario aborts the batch.
pub async fn run_scenarios(plan: ScenarioPlan, strategies: &[ControlStrategy]) -> Result<Vec<ScenarioOutcome>> {
    fs::create_dir_all(&plan.outputs_dir)?;

    let mut handles = Vec::with_capacity(strategies.len());
    for &strategy in strategies {
        let staging = plan.outputs_dir.join(format!(".staging_{}", strategy.tag()));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        println!("[run] {}", strategy.tag());

        let job_plan = plan.clone();
        let job_staging = staging.clone();
        let handle = tokio::task::spawn_blocking(move || run_strategy(job_plan, strategy, &job_staging));
        handles.push((strategy, staging, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (strategy, staging, handle) in handles {
        let summary = handle
            .await
            .map_err(|e| scenario_error(strategy, e))?
            .map_err(|e| scenario_error(strategy, e))?;
        let output_dir = plan.outputs_dir.join(strategy.tag());
        let moved = relocate_outputs(&staging, &output_dir)?;
        fs::remove_dir_all(&staging)?;
        log::info!(
            "{}: moved {} files to {}",
            strategy.tag(),
            moved.len(),
            output_dir.display()
        );
        println!("[ok] saved to {}", output_dir.display());
        outcomes.push(ScenarioOutcome {
            strategy,
            summary,
            output_dir,
        });
    }
    println!("[done] {} scenarios finished", outcomes.len());
    Ok(outcomes)
}
