// pressure.rs
//
// Max-pressure scoring. A phase's pressure is the sum, over the lane pairs it
// serves, of inbound queue strength minus a discounted outbound occupancy.

use crate::config::ControllerConfig;
use crate::control_system::topology::IntersectionTopology;
use crate::errors::EngineError;
use crate::simulation_engine::interface::SimulationEngine;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureWeights {
    /// Outbound discount (β).
    pub beta_out: f64,
    /// Weight of accumulated waiting seconds on inbound lanes.
    pub wait_weight: f64,
}

impl From<&ControllerConfig> for PressureWeights {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            beta_out: config.beta_out,
            wait_weight: config.wait_weight,
        }
    }
}

fn or_zero(lane_id: &str, value: Result<f64, EngineError>) -> f64 {
    value.unwrap_or_else(|e| {
        log::debug!("Lane {} query failed, scoring it as 0: {}", lane_id, e);
        0.0
    })
}

/// Vehicle count plus a small waiting-time term, so a stale queue outranks an
/// equally long fresh one.
pub fn lane_pressure_in<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    lane_id: &str,
    wait_weight: f64,
) -> f64 {
    let measured = engine.lane_vehicle_count(lane_id).and_then(|count| {
        let waiting = engine.lane_waiting_time(lane_id)?;
        Ok(count as f64 + wait_weight * waiting)
    });
    or_zero(lane_id, measured)
}

/// Downstream occupancy, approximated by the vehicle count.
pub fn lane_pressure_out<E: SimulationEngine + ?Sized>(engine: &mut E, lane_id: &str) -> f64 {
    let measured = engine.lane_vehicle_count(lane_id).map(|count| count as f64);
    or_zero(lane_id, measured)
}

/// Pressure of `phase`. Phases without green positions score 0.
pub fn phase_pressure<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    topology: &IntersectionTopology,
    phase: usize,
    weights: PressureWeights,
) -> f64 {
    let mut pressure = 0.0;
    for pair in topology.served_lane_pairs(phase) {
        pressure += lane_pressure_in(engine, &pair.incoming, weights.wait_weight);
        if weights.beta_out != 0.0 {
            pressure -= weights.beta_out * lane_pressure_out(engine, &pair.outgoing);
        }
    }
    pressure
}

/// Pressure of every scorable phase, in phase-index order.
pub fn score_phases<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    topology: &IntersectionTopology,
    weights: PressureWeights,
) -> Vec<(usize, f64)> {
    topology
        .scored_phases()
        .map(|phase| (phase, phase_pressure(engine, topology, phase, weights)))
        .collect()
}
