// scripted.rs
//
// An engine whose lane readings are set by hand. Signal programs still run
// on their own clock, so controller behaviour can be replayed tick by tick
// without a traffic model behind it.

use crate::errors::EngineError;
use crate::simulation_engine::interface::{LinkGroup, SignalProgram, SimulationEngine};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A write the controller made, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum Actuation {
    SetPhase { tls: String, time: f64, phase: usize },
    SetDuration { tls: String, time: f64, remaining: f64 },
}

#[derive(Debug, Clone)]
struct ScriptedSignal {
    links: Vec<LinkGroup>,
    program: SignalProgram,
    phase: usize,
    next_switch: f64,
}

#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    time: f64,
    step_length: f64,
    steps_left: usize,
    fail_step_at: Option<usize>,
    steps_taken: usize,
    closed: bool,
    lanes: HashMap<String, (usize, f64)>,
    failing_lanes: HashSet<String>,
    failing_signals: HashSet<String>,
    rejected_writes: HashSet<String>,
    failing_next_switch: HashSet<String>,
    rejected_duration_writes: HashSet<String>,
    signals: BTreeMap<String, ScriptedSignal>,
    actuations: Vec<Actuation>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            time: 0.0,
            step_length: 1.0,
            steps_left: 0,
            fail_step_at: None,
            steps_taken: 0,
            closed: false,
            lanes: HashMap::new(),
            failing_lanes: HashSet::new(),
            failing_signals: HashSet::new(),
            rejected_writes: HashSet::new(),
            failing_next_switch: HashSet::new(),
            rejected_duration_writes: HashSet::new(),
            signals: BTreeMap::new(),
            actuations: Vec::new(),
        }
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn set_step_length(&mut self, step_length: f64) {
        self.step_length = step_length;
    }

    /// Number of steps before `min_expected_number` drops to zero.
    pub fn run_for(&mut self, steps: usize) {
        self.steps_left = steps;
    }

    /// Makes the `step`-th call to `step` (1-based) fail fatally.
    pub fn fail_step_at(&mut self, step: usize) {
        self.fail_step_at = Some(step);
    }

    /// Adds a signal starting at phase 0, switching after that phase's duration.
    pub fn add_signal(&mut self, id: &str, links: Vec<LinkGroup>, program: SignalProgram) {
        let next_switch = self.time + program.phases.first().map_or(0.0, |p| p.duration);
        self.signals.insert(
            id.to_string(),
            ScriptedSignal {
                links,
                program,
                phase: 0,
                next_switch,
            },
        );
    }

    /// Forces the active phase and the time of its natural end.
    pub fn set_signal_state(&mut self, id: &str, phase: usize, next_switch: f64) {
        if let Some(signal) = self.signals.get_mut(id) {
            signal.phase = phase;
            signal.next_switch = next_switch;
        }
    }

    pub fn set_lane(&mut self, id: &str, vehicles: usize, waiting_time: f64) {
        self.lanes.insert(id.to_string(), (vehicles, waiting_time));
    }

    pub fn fail_lane(&mut self, id: &str) {
        self.failing_lanes.insert(id.to_string());
    }

    pub fn fail_signal(&mut self, id: &str) {
        self.failing_signals.insert(id.to_string());
    }

    /// Reads keep working, but phase and duration writes fail.
    pub fn reject_writes(&mut self, id: &str) {
        self.rejected_writes.insert(id.to_string());
    }

    /// Only the next-switch query fails; phase and lane reads still work.
    pub fn fail_next_switch(&mut self, id: &str) {
        self.failing_next_switch.insert(id.to_string());
    }

    /// Phase jumps go through, duration writes fail.
    pub fn reject_duration_writes(&mut self, id: &str) {
        self.rejected_duration_writes.insert(id.to_string());
    }

    pub fn actuations(&self) -> &[Actuation] {
        &self.actuations
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn signal(&self, id: &str) -> Result<&ScriptedSignal, EngineError> {
        if self.failing_signals.contains(id) {
            return Err(EngineError::Query(format!("signal {} unavailable", id)));
        }
        self.signals
            .get(id)
            .ok_or_else(|| EngineError::UnknownSignal(id.to_string()))
    }

    fn signal_mut(&mut self, id: &str) -> Result<&mut ScriptedSignal, EngineError> {
        if self.failing_signals.contains(id) || self.rejected_writes.contains(id) {
            return Err(EngineError::Query(format!("signal {} unavailable", id)));
        }
        self.signals
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownSignal(id.to_string()))
    }

    fn lane(&self, id: &str) -> Result<(usize, f64), EngineError> {
        if self.failing_lanes.contains(id) {
            return Err(EngineError::Query(format!("lane {} unavailable", id)));
        }
        Ok(self.lanes.get(id).copied().unwrap_or((0, 0.0)))
    }
}

impl SimulationEngine for ScriptedEngine {
    fn step(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.steps_taken += 1;
        if self.fail_step_at == Some(self.steps_taken) {
            return Err(EngineError::Fatal("scripted step failure".to_string()));
        }
        self.time += self.step_length;
        self.steps_left = self.steps_left.saturating_sub(1);

        let now = self.time;
        for signal in self.signals.values_mut() {
            let phase_count = signal.program.phases.len();
            if phase_count == 0 {
                continue;
            }
            while now >= signal.next_switch {
                signal.phase = (signal.phase + 1) % phase_count;
                let duration = signal.program.phases[signal.phase].duration;
                signal.next_switch += duration.max(self.step_length);
            }
        }
        Ok(())
    }

    fn min_expected_number(&mut self) -> Result<usize, EngineError> {
        Ok(self.steps_left)
    }

    fn time(&mut self) -> Result<f64, EngineError> {
        Ok(self.time)
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.closed = true;
        Ok(())
    }

    fn traffic_light_ids(&mut self) -> Result<Vec<String>, EngineError> {
        Ok(self.signals.keys().cloned().collect())
    }

    fn controlled_links(&mut self, tls_id: &str) -> Result<Vec<LinkGroup>, EngineError> {
        Ok(self.signal(tls_id)?.links.clone())
    }

    fn program(&mut self, tls_id: &str) -> Result<SignalProgram, EngineError> {
        Ok(self.signal(tls_id)?.program.clone())
    }

    fn phase(&mut self, tls_id: &str) -> Result<usize, EngineError> {
        Ok(self.signal(tls_id)?.phase)
    }

    fn set_phase(&mut self, tls_id: &str, phase: usize) -> Result<(), EngineError> {
        let now = self.time;
        let signal = self.signal_mut(tls_id)?;
        let duration = signal
            .program
            .phases
            .get(phase)
            .map(|p| p.duration)
            .ok_or_else(|| EngineError::Query(format!("phase {} out of range", phase)))?;
        signal.phase = phase;
        signal.next_switch = now + duration;
        self.actuations.push(Actuation::SetPhase {
            tls: tls_id.to_string(),
            time: now,
            phase,
        });
        Ok(())
    }

    fn set_phase_duration(&mut self, tls_id: &str, remaining: f64) -> Result<(), EngineError> {
        if self.rejected_duration_writes.contains(tls_id) {
            return Err(EngineError::Query(format!("duration of {} is read-only", tls_id)));
        }
        let now = self.time;
        let signal = self.signal_mut(tls_id)?;
        signal.next_switch = now + remaining;
        self.actuations.push(Actuation::SetDuration {
            tls: tls_id.to_string(),
            time: now,
            remaining,
        });
        Ok(())
    }

    fn next_switch(&mut self, tls_id: &str) -> Result<f64, EngineError> {
        if self.failing_next_switch.contains(tls_id) {
            return Err(EngineError::Query(format!("next switch of {} unavailable", tls_id)));
        }
        Ok(self.signal(tls_id)?.next_switch)
    }

    fn lane_vehicle_count(&mut self, lane_id: &str) -> Result<usize, EngineError> {
        Ok(self.lane(lane_id)?.0)
    }

    fn lane_waiting_time(&mut self, lane_id: &str) -> Result<f64, EngineError> {
        Ok(self.lane(lane_id)?.1)
    }
}
