// traffic_light_controller.rs
//
// Max-pressure decision policy. Each intersection is re-evaluated from the raw
// simulation state on every control tick: current phase, time to the next
// programmed switch and the pressure of every phase. The only memory carried
// between ticks is the phase-entry clock and the time of the last actuation.

use crate::config::ControllerConfig;
use crate::control_system::pressure::{score_phases, PressureWeights};
use crate::control_system::topology::IntersectionTopology;
use crate::errors::EngineError;
use crate::global_variables::SCORE_SENTINEL;
use crate::simulation_engine::interface::SimulationEngine;
use std::collections::BTreeMap;
use std::fmt;

/// What the controller did to an intersection on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    None,
    Switch { to: usize },
    Extend { by: f64 },
    FallbackExtend { by: f64 },
    /// No phase has a green position, so nothing was scored.
    NoPressure,
}

impl Action {
    pub fn is_actuation(&self) -> bool {
        matches!(
            self,
            Action::Switch { .. } | Action::Extend { .. } | Action::FallbackExtend { .. }
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::None => write!(f, "none"),
            Action::Switch { to } => write!(f, "switch->{}", to),
            Action::Extend { by } => write!(f, "extend+{:.1}", by),
            Action::FallbackExtend { by } => write!(f, "fallback_extend+{:.1}", by),
            Action::NoPressure => write!(f, "no-pres"),
        }
    }
}

/// One evaluated intersection on one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub time: f64,
    pub tls: String,
    pub current_phase: usize,
    pub best_phase: usize,
    pub best_score: f64,
    pub current_score: f64,
    pub gap_best_second: f64,
    pub gap_best_current: f64,
    pub remaining: f64,
    pub served: f64,
    pub action: Action,
}

/// Best phase, runner-up and the current phase's standing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseRanking {
    pub best: usize,
    pub best_score: f64,
    pub current_score: f64,
    pub second_score: f64,
}

impl PhaseRanking {
    /// Ranks scored phases. The first maximum in phase order wins ties.
    /// Returns `None` when nothing was scored.
    pub fn rank(scores: &[(usize, f64)], current: usize) -> Option<Self> {
        let (mut best, mut best_score) = *scores.first()?;
        for &(phase, score) in &scores[1..] {
            if score > best_score {
                best = phase;
                best_score = score;
            }
        }

        let current_score = scores
            .iter()
            .find(|(phase, _)| *phase == current)
            .map_or(SCORE_SENTINEL, |(_, score)| *score);

        let mut sorted: Vec<f64> = scores.iter().map(|(_, score)| *score).collect();
        sorted.sort_by(|a, b| b.total_cmp(a));
        let second_score = sorted.get(1).copied().unwrap_or(SCORE_SENTINEL);

        Some(Self {
            best,
            best_score,
            current_score,
            second_score,
        })
    }

    pub fn gap_switch(&self) -> f64 {
        self.best_score - self.current_score
    }

    pub fn gap_extend(&self) -> f64 {
        self.best_score - self.second_score
    }
}

/// Per-intersection memory that survives between ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub last_phase_seen: usize,
    pub phase_entered_at: f64,
    pub last_actuation: Option<f64>,
}

impl ControllerState {
    pub fn new(initial_phase: usize, start_time: f64) -> Self {
        Self {
            last_phase_seen: initial_phase,
            phase_entered_at: start_time,
            last_actuation: None,
        }
    }

    /// Restarts the served clock when the phase changed since the last look.
    pub fn observe_phase(&mut self, phase: usize, time: f64) {
        if phase != self.last_phase_seen {
            self.last_phase_seen = phase;
            self.phase_entered_at = time;
        }
    }

    pub fn served(&self, time: f64) -> f64 {
        time - self.phase_entered_at
    }

    pub fn has_actuated(&self) -> bool {
        self.last_actuation.is_some()
    }

    pub fn cooling_down(&self, time: f64, cooldown: f64) -> bool {
        self.last_actuation
            .is_some_and(|last| time - last < cooldown)
    }
}

/// Picks switch, extend or nothing. Cooldown and fallback are handled by
/// the caller.
pub fn choose_action(
    config: &ControllerConfig,
    current: usize,
    ranking: &PhaseRanking,
    remaining: f64,
    served: f64,
) -> Action {
    if current != ranking.best
        && remaining <= config.switch_window
        && served >= config.min_serve
        && ranking.gap_switch() >= config.gap_switch_threshold
    {
        Action::Switch { to: ranking.best }
    } else if current == ranking.best
        && ranking.gap_extend() >= config.gap_extend_threshold
        && config.extension_window_contains(remaining)
    {
        Action::Extend {
            by: config.ext_step,
        }
    } else {
        Action::None
    }
}

pub struct IntersectionController {
    pub topology: IntersectionTopology,
    pub state: ControllerState,
}

impl IntersectionController {
    pub fn new(topology: IntersectionTopology, initial_phase: usize, start_time: f64) -> Self {
        Self {
            topology,
            state: ControllerState::new(initial_phase, start_time),
        }
    }

    pub fn id(&self) -> &str {
        &self.topology.id
    }

    /// Evaluates this intersection at sim time `time`, applies the chosen
    /// action and returns the record of what happened.
    pub fn tick<E: SimulationEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        config: &ControllerConfig,
        time: f64,
    ) -> DecisionRecord {
        let id = self.topology.id.clone();
        let current = engine.phase(&id).unwrap_or_else(|e| {
            log::debug!(
                "Phase of {} unavailable, keeping {}: {}",
                id,
                self.state.last_phase_seen,
                e
            );
            self.state.last_phase_seen
        });
        self.state.observe_phase(current, time);

        // Unknown time to the boundary: infinite, so every timing gate stays shut.
        let remaining = match engine.next_switch(&id) {
            Ok(next_switch) => next_switch - time,
            Err(e) => {
                log::debug!("Next switch of {} unavailable, holding: {}", id, e);
                f64::INFINITY
            }
        };
        let served = self.state.served(time);

        let scores = score_phases(engine, &self.topology, PressureWeights::from(config));
        let Some(ranking) = PhaseRanking::rank(&scores, current) else {
            return DecisionRecord {
                time,
                tls: id,
                current_phase: current,
                best_phase: current,
                best_score: 0.0,
                current_score: 0.0,
                gap_best_second: 0.0,
                gap_best_current: 0.0,
                remaining,
                served,
                action: Action::NoPressure,
            };
        };

        let mut action = Action::None;
        if !self.state.cooling_down(time, config.cooldown) {
            let chosen = choose_action(config, current, &ranking, remaining, served);
            action = self.apply(engine, config, chosen, remaining, time);
        }

        if !self.state.has_actuated()
            && time >= config.fallback_after
            && config.extension_window_contains(remaining)
        {
            let fallback = Action::FallbackExtend {
                by: config.ext_step,
            };
            let applied = self.apply(engine, config, fallback, remaining, time);
            if applied.is_actuation() {
                action = applied;
            }
        }

        let record = DecisionRecord {
            time,
            tls: id,
            current_phase: current,
            best_phase: ranking.best,
            best_score: ranking.best_score,
            current_score: ranking.current_score,
            gap_best_second: ranking.gap_extend(),
            gap_best_current: ranking.gap_switch(),
            remaining,
            served,
            action,
        };
        log::debug!(
            "[{:.1}] {} cur={} best={} rem={:.1} served={:.1} -> {}",
            time,
            record.tls,
            current,
            ranking.best,
            remaining,
            served,
            action
        );
        record
    }

    /// Writes an action to the engine. A failed write is logged and reported
    /// as `Action::None`; the actuation clock only moves on success.
    fn apply<E: SimulationEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        config: &ControllerConfig,
        action: Action,
        remaining: f64,
        time: f64,
    ) -> Action {
        let id = self.topology.id.as_str();
        let written: Result<(), EngineError> = match action {
            Action::Switch { to } => {
                let duration = self
                    .topology
                    .base_duration(to)
                    .unwrap_or(config.min_serve)
                    .max(config.min_serve);
                if let Err(e) = engine.set_phase(id, to) {
                    log::warn!("Could not apply {} to {}: {}", action, id, e);
                    return Action::None;
                }
                // The phase changed; a lost duration write leaves its nominal length.
                if let Err(e) = engine.set_phase_duration(id, duration) {
                    log::warn!(
                        "{} switched to {} but its duration {:.1} was not set: {}",
                        id,
                        to,
                        duration,
                        e
                    );
                }
                Ok(())
            }
            Action::Extend { by } | Action::FallbackExtend { by } => {
                engine.set_phase_duration(id, remaining + by)
            }
            Action::None | Action::NoPressure => return action,
        };

        match written {
            Ok(()) => {
                self.state.last_actuation = Some(time);
                log::info!("[{:.1}] {} {}", time, id, action);
                action
            }
            Err(e) => {
                log::warn!("Could not apply {} to {}: {}", action, id, e);
                Action::None
            }
        }
    }
}

/// Every controlled intersection of one simulation, keyed by id.
pub struct TrafficLightController {
    pub controllers: BTreeMap<String, IntersectionController>,
    pub config: ControllerConfig,
}

impl TrafficLightController {
    /// Aligns every traffic light the engine reports. Only fatal engine
    /// errors abort; a light whose layout cannot be read is kept but never
    /// actuated.
    pub fn initialize<E: SimulationEngine + ?Sized>(
        engine: &mut E,
        config: ControllerConfig,
    ) -> Result<Self, EngineError> {
        let start_time = engine.time()?;
        let mut controllers = BTreeMap::new();
        for id in engine.traffic_light_ids()? {
            let topology = IntersectionTopology::from_engine(engine, &id)?;
            let initial_phase = match engine.phase(&id) {
                Ok(phase) => phase,
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => 0,
            };
            controllers.insert(
                id.clone(),
                IntersectionController::new(topology, initial_phase, start_time),
            );
        }
        Ok(Self {
            controllers,
            config,
        })
    }

    /// Runs one control tick over every intersection.
    pub fn update_all<E: SimulationEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        time: f64,
    ) -> Vec<DecisionRecord> {
        let config = &self.config;
        self.controllers
            .values_mut()
            .map(|controller| controller.tick(engine, config, time))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&IntersectionController> {
        self.controllers.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::interface::{LinkEntry, SignalPhase, SignalProgram};
    use crate::simulation_engine::scripted::{Actuation, ScriptedEngine};

    fn links() -> Vec<Vec<LinkEntry>> {
        vec![
            vec![LinkEntry::new("main_in", ":J_0", "main_out")],
            vec![LinkEntry::new("side_in", ":J_1", "side_out")],
        ]
    }

    fn program() -> SignalProgram {
        SignalProgram {
            program_id: "0".to_string(),
            phases: vec![SignalPhase::new("Gr", 30.0), SignalPhase::new("rG", 20.0)],
        }
    }

    fn engine_at(phase: usize, time: f64, next_switch: f64) -> ScriptedEngine {
        let mut engine = ScriptedEngine::new();
        engine.add_signal("J", links(), program());
        engine.set_time(time);
        engine.set_signal_state("J", phase, next_switch);
        engine
    }

    fn controller(engine: &mut ScriptedEngine, phase: usize, entered: f64) -> IntersectionController {
        let topology = IntersectionTopology::from_engine(engine, "J").unwrap();
        IntersectionController::new(topology, phase, entered)
    }

    #[test]
    fn ranking_breaks_ties_on_lowest_phase() {
        let ranking = PhaseRanking::rank(&[(0, 3.0), (2, 5.0), (4, 5.0)], 4).unwrap();
        assert_eq!(ranking.best, 2);
        assert_eq!(ranking.second_score, 5.0);
        assert_eq!(ranking.gap_extend(), 0.0);
        assert_eq!(ranking.gap_switch(), 0.0);

        let single = PhaseRanking::rank(&[(1, 2.0)], 0).unwrap();
        assert_eq!(single.current_score, SCORE_SENTINEL);
        assert_eq!(single.second_score, SCORE_SENTINEL);
        assert!(PhaseRanking::rank(&[], 0).is_none());
    }

    #[test]
    fn action_labels_match_the_log_format() {
        assert_eq!(Action::None.to_string(), "none");
        assert_eq!(Action::Switch { to: 3 }.to_string(), "switch->3");
        assert_eq!(Action::Extend { by: 3.0 }.to_string(), "extend+3.0");
        assert_eq!(
            Action::FallbackExtend { by: 3.0 }.to_string(),
            "fallback_extend+3.0"
        );
        assert_eq!(Action::NoPressure.to_string(), "no-pres");
    }

    #[test]
    fn already_best_phase_is_extended() {
        // Phase 0 scores 10, phase 1 scores 2; 4 s left, served 5 s.
        let mut engine = engine_at(0, 100.0, 104.0);
        engine.set_lane("main_in", 10, 0.0);
        engine.set_lane("side_in", 2, 0.0);
        let mut ctrl = controller(&mut engine, 0, 95.0);

        let record = ctrl.tick(&mut engine, &ControllerConfig::default(), 100.0);
        assert_eq!(record.best_phase, 0);
        assert_eq!(record.gap_best_second, 8.0);
        assert_eq!(record.action, Action::Extend { by: 3.0 });
        assert_eq!(engine.next_switch("J").unwrap(), 107.0);
        assert_eq!(ctrl.state.last_actuation, Some(100.0));
    }

    #[test]
    fn already_best_phase_below_extension_window_is_left_alone() {
        let mut engine = engine_at(0, 100.0, 101.5);
        engine.set_lane("main_in", 10, 0.0);
        engine.set_lane("side_in", 2, 0.0);
        let mut ctrl = controller(&mut engine, 0, 95.0);

        let record = ctrl.tick(&mut engine, &ControllerConfig::default(), 100.0);
        assert_eq!(record.action, Action::None);
        assert!(engine.actuations().is_empty());
    }

    #[test]
    fn busier_phase_takes_over_near_the_boundary() {
        let mut engine = engine_at(0, 100.0, 101.0);
        engine.set_lane("main_in", 2, 0.0);
        engine.set_lane("side_in", 10, 0.0);
        let mut ctrl = controller(&mut engine, 0, 94.0);

        let record = ctrl.tick(&mut engine, &ControllerConfig::default(), 100.0);
        assert_eq!(record.action, Action::Switch { to: 1 });
        assert_eq!(record.remaining, 1.0);
        assert_eq!(record.served, 6.0);
        assert_eq!(
            engine.actuations(),
            &[
                Actuation::SetPhase {
                    tls: "J".to_string(),
                    time: 100.0,
                    phase: 1
                },
                Actuation::SetDuration {
                    tls: "J".to_string(),
                    time: 100.0,
                    remaining: 20.0
                },
            ]
        );
    }

    #[test]
    fn switch_duration_never_drops_below_min_serve() {
        let mut engine = ScriptedEngine::new();
        engine.add_signal(
            "J",
            links(),
            SignalProgram {
                program_id: "0".to_string(),
                phases: vec![SignalPhase::new("Gr", 30.0), SignalPhase::new("rG", 1.0)],
            },
        );
        engine.set_time(50.0);
        engine.set_signal_state("J", 0, 51.0);
        engine.set_lane("side_in", 4, 0.0);
        let mut ctrl = controller(&mut engine, 0, 0.0);

        let record = ctrl.tick(&mut engine, &ControllerConfig::default(), 50.0);
        assert_eq!(record.action, Action::Switch { to: 1 });
        assert_eq!(engine.next_switch("J").unwrap(), 54.0);
    }

    #[test]
    fn no_switch_mid_phase_or_before_min_serve() {
        let config = ControllerConfig {
            fallback_after: 1e9,
            ..ControllerConfig::default()
        };
        let mut engine = engine_at(0, 100.0, 110.0);
        engine.set_lane("side_in", 10, 0.0);
        let mut ctrl = controller(&mut engine, 0, 90.0);
        assert_eq!(ctrl.tick(&mut engine, &config, 100.0).action, Action::None);

        let mut engine = engine_at(0, 100.0, 101.0);
        engine.set_lane("side_in", 10, 0.0);
        let mut ctrl = controller(&mut engine, 0, 97.0);
        assert_eq!(ctrl.tick(&mut engine, &config, 100.0).action, Action::None);
    }

    #[test]
    fn cooldown_blocks_back_to_back_actuations() {
        let config = ControllerConfig::default();
        let mut engine = engine_at(0, 100.0, 104.0);
        engine.set_lane("main_in", 10, 0.0);
        let mut ctrl = controller(&mut engine, 0, 90.0);

        assert!(ctrl.tick(&mut engine, &config, 100.0).action.is_actuation());
        engine.set_time(102.0);
        assert_eq!(ctrl.tick(&mut engine, &config, 102.0).action, Action::None);
        engine.set_time(103.0);
        assert!(ctrl.tick(&mut engine, &config, 103.0).action.is_actuation());
    }

    #[test]
    fn phase_change_restarts_served_clock() {
        let config = ControllerConfig::default();
        let mut engine = engine_at(1, 40.0, 60.0);
        let mut ctrl = controller(&mut engine, 0, 0.0);
        let record = ctrl.tick(&mut engine, &config, 40.0);
        assert_eq!(record.served, 0.0);
        engine.set_time(45.0);
        assert_eq!(ctrl.tick(&mut engine, &config, 45.0).served, 5.0);
    }

    #[test]
    fn degenerate_program_reports_no_pressure() {
        let mut engine = ScriptedEngine::new();
        engine.add_signal(
            "J",
            links(),
            SignalProgram {
                program_id: "0".to_string(),
                phases: vec![SignalPhase::new("yy", 3.0), SignalPhase::new("rr", 3.0)],
            },
        );
        let mut ctrl = controller(&mut engine, 0, 0.0);
        let config = ControllerConfig {
            fallback_after: 0.0,
            ..ControllerConfig::default()
        };
        let record = ctrl.tick(&mut engine, &config, 0.0);
        assert_eq!(record.action, Action::NoPressure);
        assert_eq!(record.best_phase, record.current_phase);
        assert!(engine.actuations().is_empty());
    }

    #[test]
    fn failing_lanes_leave_only_timing_gates() {
        let config = ControllerConfig::default();
        let mut engine = engine_at(1, 100.0, 101.0);
        engine.fail_lane("main_in");
        engine.fail_lane("side_in");
        let mut ctrl = controller(&mut engine, 1, 90.0);

        let record = ctrl.tick(&mut engine, &config, 100.0);
        assert_eq!(record.best_phase, 0);
        assert_eq!(record.best_score, 0.0);
        assert_eq!(record.current_score, 0.0);
        // Zero gap still meets the default zero threshold.
        assert_eq!(record.action, Action::Switch { to: 0 });
    }

    #[test]
    fn fallback_fires_once_after_deadline() {
        // Thresholds too high for the regular policy to ever act.
        let config = ControllerConfig {
            gap_switch_threshold: 1e6,
            gap_extend_threshold: 1e6,
            ..ControllerConfig::default()
        };
        let mut engine = engine_at(0, 59.0, 70.0);
        let mut ctrl = controller(&mut engine, 0, 0.0);

        assert_eq!(ctrl.tick(&mut engine, &config, 59.0).action, Action::None);
        engine.set_time(60.0);
        let record = ctrl.tick(&mut engine, &config, 60.0);
        assert_eq!(record.action, Action::FallbackExtend { by: 3.0 });
        assert_eq!(engine.next_switch("J").unwrap(), 73.0);
        engine.set_time(65.0);
        assert_eq!(ctrl.tick(&mut engine, &config, 65.0).action, Action::None);
    }

    #[test]
    fn fallback_waits_for_the_extension_window() {
        let config = ControllerConfig {
            gap_switch_threshold: 1e6,
            gap_extend_threshold: 1e6,
            ..ControllerConfig::default()
        };
        let mut engine = engine_at(0, 61.0, 90.0);
        let mut ctrl = controller(&mut engine, 0, 0.0);
        assert_eq!(ctrl.tick(&mut engine, &config, 61.0).action, Action::None);

        engine.set_time(75.0);
        assert_eq!(
            ctrl.tick(&mut engine, &config, 75.0).action,
            Action::FallbackExtend { by: 3.0 }
        );
    }

    #[test]
    fn failed_write_is_not_counted_as_actuation() {
        let mut engine = engine_at(0, 100.0, 104.0);
        engine.set_lane("main_in", 10, 0.0);
        let mut ctrl = controller(&mut engine, 0, 90.0);
        engine.reject_writes("J");

        let record = ctrl.tick(&mut engine, &ControllerConfig::default(), 100.0);
        assert_eq!(record.action, Action::None);
        assert!(!ctrl.state.has_actuated());
        assert!(engine.actuations().is_empty());
    }

    #[test]
    fn unknown_next_switch_never_cuts_a_green_short() {
        // Phase 0 still has 25 s; the side street is far busier.
        let mut engine = engine_at(0, 100.0, 125.0);
        engine.set_lane("main_in", 1, 0.0);
        engine.set_lane("side_in", 10, 0.0);
        engine.fail_next_switch("J");
        let config = ControllerConfig {
            fallback_after: 0.0,
            ..ControllerConfig::default()
        };
        let mut ctrl = controller(&mut engine, 0, 90.0);

        let record = ctrl.tick(&mut engine, &config, 100.0);
        assert_eq!(record.best_phase, 1);
        assert_eq!(record.action, Action::None);
        assert!(record.remaining.is_infinite());
        assert!(engine.actuations().is_empty());
        assert_eq!(engine.phase("J").unwrap(), 0);

        // Same for an already-best phase: no extension, no fallback.
        engine.set_lane("main_in", 20, 0.0);
        engine.set_time(101.0);
        assert_eq!(ctrl.tick(&mut engine, &config, 101.0).action, Action::None);
        assert!(!ctrl.state.has_actuated());
    }

    #[test]
    fn switch_counts_even_when_its_duration_write_fails() {
        let mut engine = engine_at(0, 100.0, 101.0);
        engine.set_lane("main_in", 2, 0.0);
        engine.set_lane("side_in", 10, 0.0);
        engine.reject_duration_writes("J");
        let config = ControllerConfig::default();
        let mut ctrl = controller(&mut engine, 0, 94.0);

        let record = ctrl.tick(&mut engine, &config, 100.0);
        assert_eq!(record.action, Action::Switch { to: 1 });
        assert_eq!(engine.phase("J").unwrap(), 1);
        assert_eq!(ctrl.state.last_actuation, Some(100.0));
        assert_eq!(
            engine.actuations(),
            &[Actuation::SetPhase {
                tls: "J".to_string(),
                time: 100.0,
                phase: 1
            }]
        );

        // The switch arms the cooldown.
        engine.set_time(101.0);
        assert_eq!(ctrl.tick(&mut engine, &config, 101.0).action, Action::None);
    }

    #[test]
    fn initialize_aligns_every_light() {
        let mut engine = ScriptedEngine::new();
        engine.add_signal("J1", links(), program());
        engine.add_signal("J2", Vec::new(), program());
        engine.set_time(5.0);
        let controller =
            TrafficLightController::initialize(&mut engine, ControllerConfig::default()).unwrap();
        assert_eq!(controller.controllers.len(), 2);
        let j1 = controller.get("J1").unwrap();
        assert_eq!(j1.topology.alignment_len, 2);
        assert_eq!(j1.state.phase_entered_at, 5.0);
        assert_eq!(controller.get("J2").unwrap().topology.alignment_len, 0);
    }
}
