// interface.rs
//
// The boundary between the signal controller and whatever simulator runs the
// traffic. The controller only ever talks to a `SimulationEngine`; the
// in-process `MicroSimulation` is one implementation, test doubles are others.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};

/// One controlled connection: vehicles leave `incoming`, cross the junction
/// on `via` and continue on `outgoing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub incoming: String,
    #[serde(default)]
    pub via: String,
    pub outgoing: String,
}

impl LinkEntry {
    pub fn new(incoming: &str, via: &str, outgoing: &str) -> Self {
        Self {
            incoming: incoming.to_string(),
            via: via.to_string(),
            outgoing: outgoing.to_string(),
        }
    }
}

/// All links gated by one signal-state position. Empty when the position is
/// unused.
pub type LinkGroup = Vec<LinkEntry>;

/// One phase of a signal program: a per-position colour string plus its
/// nominal duration in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPhase {
    pub state: String,
    pub duration: f64,
}

impl SignalPhase {
    pub fn new(state: &str, duration: f64) -> Self {
        Self {
            state: state.to_string(),
            duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalProgram {
    pub program_id: String,
    pub phases: Vec<SignalPhase>,
}

impl SignalProgram {
    /// Length of the longest phase-state string.
    pub fn max_state_len(&self) -> usize {
        self.phases
            .iter()
            .map(|phase| phase.state.chars().count())
            .max()
            .unwrap_or(0)
    }
}

/// Internal (junction-interior) lanes cannot be queued on and are never
/// scored. Their ids start with ':'.
pub fn is_internal_lane(lane_id: &str) -> bool {
    lane_id.starts_with(':')
}

/// True for lane ids that can carry a queue.
pub fn is_traversable_lane(lane_id: &str) -> bool {
    !lane_id.is_empty() && !is_internal_lane(lane_id)
}

/// Signal-state characters that let traffic through (protected or permissive).
pub fn is_green(signal: char) -> bool {
    matches!(signal, 'G' | 'g')
}

/// Queries and mutations the controller needs from a running simulation.
///
/// Every method takes `&mut self` because remote engines answer over a
/// socket. Lane and signal queries may fail transiently; `step` failures are
/// fatal for the run.
pub trait SimulationEngine {
    /// Advances the simulation by one step. Blocks until the step is done.
    fn step(&mut self) -> Result<(), EngineError>;

    /// Vehicles still running or waiting to be inserted.
    fn min_expected_number(&mut self) -> Result<usize, EngineError>;

    /// Current simulated time in seconds.
    fn time(&mut self) -> Result<f64, EngineError>;

    fn close(&mut self) -> Result<(), EngineError>;

    fn traffic_light_ids(&mut self) -> Result<Vec<String>, EngineError>;

    /// Link groups in signal-state order.
    fn controlled_links(&mut self, tls_id: &str) -> Result<Vec<LinkGroup>, EngineError>;

    /// The active program with every phase.
    fn program(&mut self, tls_id: &str) -> Result<SignalProgram, EngineError>;

    fn phase(&mut self, tls_id: &str) -> Result<usize, EngineError>;

    /// Jumps to `phase`; its remaining time becomes the phase's nominal duration.
    fn set_phase(&mut self, tls_id: &str, phase: usize) -> Result<(), EngineError>;

    /// Sets the remaining time of the current phase.
    fn set_phase_duration(&mut self, tls_id: &str, remaining: f64) -> Result<(), EngineError>;

    /// Simulated time of the next programmed phase change.
    fn next_switch(&mut self, tls_id: &str) -> Result<f64, EngineError>;

    fn lane_vehicle_count(&mut self, lane_id: &str) -> Result<usize, EngineError>;

    /// Summed waiting time of the vehicles currently on the lane.
    fn lane_waiting_time(&mut self, lane_id: &str) -> Result<f64, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_and_empty_lanes_are_not_traversable() {
        assert!(is_internal_lane(":J1_0_0"));
        assert!(!is_traversable_lane(":J1_0_0"));
        assert!(!is_traversable_lane(""));
        assert!(is_traversable_lane("E_A_J1_0"));
    }

    #[test]
    fn green_accepts_both_cases_only() {
        assert!(is_green('G'));
        assert!(is_green('g'));
        assert!(!is_green('y'));
        assert!(!is_green('r'));
        assert!(!is_green('O'));
    }

    #[test]
    fn max_state_len_of_empty_program_is_zero() {
        assert_eq!(SignalProgram::default().max_state_len(), 0);
        let program = SignalProgram {
            program_id: "0".to_string(),
            phases: vec![SignalPhase::new("GGr", 10.0), SignalPhase::new("rrGGy", 5.0)],
        };
        assert_eq!(program.max_state_len(), 5);
    }
}
