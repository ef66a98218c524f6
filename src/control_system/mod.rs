pub mod pressure;
pub mod run_loop;
pub mod topology;
pub mod traffic_light_controller;

pub use run_loop::{run_adaptive, run_baseline, ControlStrategy, RunSummary};
pub use traffic_light_controller::{Action, DecisionRecord, TrafficLightController};
