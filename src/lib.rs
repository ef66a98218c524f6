// lib.rs
pub mod cli;
pub mod config;
pub mod control_system;
pub mod demand;
pub mod errors;
pub mod flow_analyzer;
pub mod global_variables;
pub mod monitoring;
pub mod scenarios;
pub mod simulation_engine;

pub use errors::{ControlError, EngineError, Result};
