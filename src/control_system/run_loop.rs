// run_loop.rs
//
// Drives a simulation to completion. The adaptive loop evaluates every
// intersection at most once per `check_every` seconds; the baseline loop
// only steps and leaves the fixed programs alone.

use crate::config::{Cadence, ControllerConfig};
use crate::control_system::traffic_light_controller::{Action, TrafficLightController};
use crate::errors::Result;
use crate::monitoring::decision_log::DecisionSink;
use crate::simulation_engine::interface::SimulationEngine;
use std::cell::Cell;
use std::time::Instant;

/// Source of real time, in seconds since an arbitrary origin.
pub trait Clock {
    fn now(&self) -> f64;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A clock that moves a fixed amount every time it is read.
pub struct ManualClock {
    now: Cell<f64>,
    tick: f64,
}

impl ManualClock {
    pub fn new(tick: f64) -> Self {
        Self {
            now: Cell::new(0.0),
            tick,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        let now = self.now.get();
        self.now.set(now + self.tick);
        now
    }
}

/// Decides whether enough time passed since the last evaluation.
#[derive(Debug, Clone)]
pub struct DecisionThrottle {
    cadence: Cadence,
    check_every: f64,
    last: Option<f64>,
}

impl DecisionThrottle {
    pub fn new(cadence: Cadence, check_every: f64) -> Self {
        Self {
            cadence,
            check_every,
            last: None,
        }
    }

    /// The first call always passes.
    pub fn ready(&mut self, wall_now: f64, sim_now: f64) -> bool {
        let now = match self.cadence {
            Cadence::WallClock => wall_now,
            Cadence::SimTime => sim_now,
        };
        match self.last {
            Some(last) if now - last < self.check_every => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStrategy {
    /// Fixed-time programs, never actuated.
    Baseline,
    /// Max-pressure switching and extension.
    Adaptive,
}

impl ControlStrategy {
    pub fn tag(&self) -> &'static str {
        match self {
            ControlStrategy::Baseline => "baseline",
            ControlStrategy::Adaptive => "adaptive",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    pub evaluations: u64,
    pub records: u64,
    pub switches: u64,
    pub extensions: u64,
    pub fallback_extensions: u64,
    pub final_time: f64,
}

impl RunSummary {
    fn count(&mut self, action: Action) {
        self.records += 1;
        match action {
            Action::Switch { .. } => self.switches += 1,
            Action::Extend { .. } => self.extensions += 1,
            Action::FallbackExtend { .. } => self.fallback_extensions += 1,
            Action::None | Action::NoPressure => {}
        }
    }

    pub fn actuations(&self) -> u64 {
        self.switches + self.extensions + self.fallback_extensions
    }
}

/// Steps until the engine expects no more vehicles. Step failures end the run.
pub fn run_baseline<E: SimulationEngine + ?Sized>(engine: &mut E) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    while engine.min_expected_number()? > 0 {
        engine.step()?;
        summary.steps += 1;
    }
    summary.final_time = engine.time()?;
    engine.close()?;
    println!("[baseline] done");
    Ok(summary)
}

/// Max-pressure control until the engine expects no more vehicles.
pub fn run_adaptive<E, S, C>(
    engine: &mut E,
    config: ControllerConfig,
    sink: &mut S,
    clock: &C,
) -> Result<RunSummary>
where
    E: SimulationEngine + ?Sized,
    S: DecisionSink + ?Sized,
    C: Clock + ?Sized,
{
    config.validate()?;
    let mut throttle = DecisionThrottle::new(config.cadence, config.check_every);
    let mut controller = TrafficLightController::initialize(engine, config)?;
    log::info!(
        "Controlling {} traffic lights",
        controller.controllers.len()
    );

    let mut summary = RunSummary::default();
    while engine.min_expected_number()? > 0 {
        engine.step()?;
        summary.steps += 1;
        let sim_time = engine.time()?;

        if !throttle.ready(clock.now(), sim_time) {
            continue;
        }
        summary.evaluations += 1;

        for record in controller.update_all(engine, sim_time) {
            summary.count(record.action);
            sink.record(&record)?;
        }
        sink.flush()?;
    }

    summary.final_time = engine.time()?;
    engine.close()?;
    sink.close()?;
    log::info!(
        "Adaptive run finished at t={:.1}: {} switches, {} extensions, {} fallbacks",
        summary.final_time,
        summary.switches,
        summary.extensions,
        summary.fallback_extensions
    );
    println!("[adaptive-maxp] done");
    Ok(summary)
}
