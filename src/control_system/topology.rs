// topology.rs
//
// Static layout of one signalized intersection, derived once at startup:
// which lanes each signal-state position gates, and which positions are green
// in each phase. Nothing here changes after the controller is built.

use crate::errors::EngineError;
use crate::simulation_engine::interface::{
    is_green, is_traversable_lane, LinkGroup, SignalProgram, SimulationEngine,
};
use std::collections::{BTreeMap, BTreeSet};

/// Inbound and outbound lane gated by one aligned position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanePair {
    pub incoming: String,
    pub outgoing: String,
}

/// Number of signal-state positions usable for this intersection: the shorter
/// of the link table and the longest phase state.
pub fn alignment_length(links: &[LinkGroup], program: &SignalProgram) -> usize {
    links.len().min(program.max_state_len())
}

/// Maps every aligned position to the lane pair of its first link. Positions
/// with no link, or with an internal lane on either side, are left out.
pub fn align_lane_pairs(links: &[LinkGroup], alignment_len: usize) -> BTreeMap<usize, LanePair> {
    links
        .iter()
        .take(alignment_len)
        .enumerate()
        .filter_map(|(position, group)| {
            let link = group.first()?;
            if is_traversable_lane(&link.incoming) && is_traversable_lane(&link.outgoing) {
                Some((
                    position,
                    LanePair {
                        incoming: link.incoming.clone(),
                        outgoing: link.outgoing.clone(),
                    },
                ))
            } else {
                None
            }
        })
        .collect()
}

/// For each phase, the aligned positions whose signal is green.
pub fn phase_green_index(program: &SignalProgram, alignment_len: usize) -> Vec<BTreeSet<usize>> {
    program
        .phases
        .iter()
        .map(|phase| {
            phase
                .state
                .chars()
                .take(alignment_len)
                .enumerate()
                .filter(|(_, signal)| is_green(*signal))
                .map(|(position, _)| position)
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct IntersectionTopology {
    pub id: String,
    pub alignment_len: usize,
    pub lane_pairs: BTreeMap<usize, LanePair>,
    pub phase_greens: Vec<BTreeSet<usize>>,
    pub base_durations: Vec<f64>,
}

impl IntersectionTopology {
    pub fn build(id: &str, links: &[LinkGroup], program: &SignalProgram) -> Self {
        let alignment_len = alignment_length(links, program);
        Self {
            id: id.to_string(),
            alignment_len,
            lane_pairs: align_lane_pairs(links, alignment_len),
            phase_greens: phase_green_index(program, alignment_len),
            base_durations: program.phases.iter().map(|phase| phase.duration).collect(),
        }
    }

    /// Reads links and program from the engine. A transient failure leaves
    /// the intersection without phases, so it is logged but never actuated.
    pub fn from_engine<E: SimulationEngine + ?Sized>(
        engine: &mut E,
        id: &str,
    ) -> Result<Self, EngineError> {
        let links = match engine.controlled_links(id) {
            Ok(links) => links,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("Could not read controlled links of {}: {}", id, e);
                Vec::new()
            }
        };
        let program = match engine.program(id) {
            Ok(program) => program,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("Could not read signal program of {}: {}", id, e);
                SignalProgram::default()
            }
        };
        let topology = Self::build(id, &links, &program);
        log::info!(
            "Aligned {}: {} positions, {} lane pairs, {} phases ({} scorable)",
            id,
            topology.alignment_len,
            topology.lane_pairs.len(),
            topology.phase_count(),
            topology.scored_phases().count()
        );
        Ok(topology)
    }

    pub fn phase_count(&self) -> usize {
        self.phase_greens.len()
    }

    pub fn green_positions(&self, phase: usize) -> Option<&BTreeSet<usize>> {
        self.phase_greens.get(phase)
    }

    /// Phases with at least one green position, in index order.
    pub fn scored_phases(&self) -> impl Iterator<Item = usize> + '_ {
        self.phase_greens
            .iter()
            .enumerate()
            .filter(|(_, greens)| !greens.is_empty())
            .map(|(phase, _)| phase)
    }

    pub fn base_duration(&self, phase: usize) -> Option<f64> {
        self.base_durations.get(phase).copied()
    }

    /// Lane pairs served by `phase`. Green positions without a lane pair
    /// (internal or unused links) are skipped.
    pub fn served_lane_pairs(&self, phase: usize) -> impl Iterator<Item = &LanePair> + '_ {
        self.phase_greens
            .get(phase)
            .into_iter()
            .flat_map(|greens| greens.iter())
            .filter_map(move |position| self.lane_pairs.get(position))
    }
}
