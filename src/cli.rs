// cli.rs
//
// Command-line options shared by the binaries that drive a simulation.

use crate::config::{Cadence, ControllerConfig};
use crate::demand::trip_generation::{default_od_rows, generate_trips, TripGenerationOptions};
use crate::demand::{read_trips, Trip};
use crate::errors::Result;
use crate::simulation_engine::network::NetworkDefinition;
use crate::simulation_engine::simulation::SimulationConfig;
use clap::{Args, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CadenceArg {
    WallClock,
    SimTime,
}

impl From<CadenceArg> for Cadence {
    fn from(arg: CadenceArg) -> Self {
        match arg {
            CadenceArg::WallClock => Cadence::WallClock,
            CadenceArg::SimTime => Cadence::SimTime,
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct SimulationArgs {
    /// Network definition (JSON). Defaults to the built-in three-junction corridor
    #[arg(long)]
    pub network: Option<PathBuf>,

    /// Trips CSV (id,depart,from,to). Defaults to the built-in morning peak
    #[arg(long)]
    pub trips: Option<PathBuf>,

    /// Simulation settings (JSON)
    #[arg(long)]
    pub sim_config: Option<PathBuf>,

    /// Random seed for routing and vehicle types
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop at this simulation time
    #[arg(long)]
    pub end: Option<f64>,

    /// Simulated seconds per real second (unpaced when omitted)
    #[arg(long)]
    pub real_time_factor: Option<f64>,
}

impl SimulationArgs {
    pub fn network(&self) -> Result<NetworkDefinition> {
        match &self.network {
            Some(path) => NetworkDefinition::from_json_file(path),
            None => Ok(NetworkDefinition::corridor()),
        }
    }

    pub fn trips(&self) -> Result<Vec<Trip>> {
        match &self.trips {
            Some(path) => read_trips(path),
            None => generate_trips(&default_od_rows(), &TripGenerationOptions::default()),
        }
    }

    /// Settings file first, then the flags on top.
    pub fn simulation_config(&self) -> Result<SimulationConfig> {
        let mut config = match &self.sim_config {
            Some(path) => SimulationConfig::from_json_file(path)?,
            None => SimulationConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.end.is_some() {
            config.end = self.end;
        }
        if self.real_time_factor.is_some() {
            config.real_time_factor = self.real_time_factor;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct ControllerArgs {
    /// Controller tunables (JSON)
    #[arg(long)]
    pub controller_config: Option<PathBuf>,

    /// Decision clock. Without a flag or config file: wall-clock for paced
    /// runs, simulation time otherwise
    #[arg(long, value_enum)]
    pub cadence: Option<CadenceArg>,
}

impl ControllerArgs {
    pub fn controller_config(&self, paced: bool) -> Result<ControllerConfig> {
        let mut config = match &self.controller_config {
            Some(path) => ControllerConfig::from_json_file(path)?,
            None if paced => ControllerConfig::default(),
            None => ControllerConfig {
                cadence: Cadence::SimTime,
                ..ControllerConfig::default()
            },
        };
        if let Some(cadence) = self.cadence {
            config.cadence = cadence.into();
        }
        config.validate()?;
        Ok(config)
    }
}
