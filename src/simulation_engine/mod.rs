// simulation_engine/mod.rs
pub mod detectors;
pub mod interface;
pub mod lane;
pub mod network;
pub mod route_generation;
pub mod scripted;
pub mod simulation;
pub mod vehicles;

pub use interface::SimulationEngine;
pub use network::NetworkDefinition;
pub use simulation::{MicroSimulation, SimulationConfig};
