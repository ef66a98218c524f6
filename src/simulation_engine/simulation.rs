// simulation.rs
//
// In-process queue micro-simulation behind `SimulationEngine`. Vehicles drive
// along their lane route at free speed, stop behind the vehicle in front or
// at the stop line, and leave the stop line one per saturation headway while
// their movement is green and the next lane has room.

use crate::demand::Trip;
use crate::errors::{ControlError, EngineError, Result};
use crate::global_variables::{SUMMARY_FILE, TRIPINFO_FILE};
use crate::simulation_engine::detectors::{round2, DetectorSet};
use crate::simulation_engine::interface::{
    is_green, LinkGroup, SignalProgram, SimulationEngine,
};
use crate::simulation_engine::lane::Lane;
use crate::simulation_engine::network::NetworkDefinition;
use crate::simulation_engine::route_generation::shortest_lane_route;
use crate::simulation_engine::vehicles::{Vehicle, VehicleMix};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Vehicles slower than this are halting, m/s.
const HALTING_SPEED: f64 = 0.1;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seconds per step.
    pub step_length: f64,
    pub begin: f64,
    /// Stop once simulation time reaches this, even with vehicles left.
    pub end: Option<f64>,
    pub seed: u64,
    /// Minimum time between two vehicles leaving the same stop line.
    pub saturation_headway: f64,
    /// Aggregation period of the detector series.
    pub detector_period: f64,
    /// Where trip info, summary and detector files go. Nothing is written
    /// when unset.
    pub output_dir: Option<PathBuf>,
    /// Simulated seconds per wall-clock second. Runs unpaced when unset.
    pub real_time_factor: Option<f64>,
    pub vehicle_mix: VehicleMix,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_length: 1.0,
            begin: 0.0,
            end: None,
            seed: 42,
            saturation_headway: 2.0,
            detector_period: 60.0,
            output_dir: None,
            real_time_factor: None,
            vehicle_mix: VehicleMix::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: SimulationConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.step_length > 0.0 && self.step_length.is_finite()) {
            return Err(ControlError::Config(format!(
                "step_length must be positive, got {}",
                self.step_length
            )));
        }
        if !(self.saturation_headway >= 0.0 && self.detector_period > 0.0) {
            return Err(ControlError::Config(
                "saturation_headway must be >= 0 and detector_period > 0".to_string(),
            ));
        }
        if let Some(factor) = self.real_time_factor {
            if !(factor > 0.0) {
                return Err(ControlError::Config(format!(
                    "real_time_factor must be positive, got {}",
                    factor
                )));
            }
        }
        Ok(())
    }
}

/// One completed trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripInfo {
    pub id: String,
    pub depart: f64,
    pub arrival: f64,
    pub duration: f64,
    pub route_length: f64,
    pub time_loss: f64,
    pub waiting_time: f64,
}

/// Network-wide state after one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub time: f64,
    pub loaded: usize,
    pub running: usize,
    pub halting: usize,
    pub arrived: usize,
    pub mean_waiting_time: f64,
}

#[derive(Debug, Clone)]
struct SignalState {
    links: Vec<LinkGroup>,
    program: SignalProgram,
    phase: usize,
    next_switch: f64,
}

impl SignalState {
    /// Vehicles may enter the junction on green or when the signal is off.
    fn passes(&self, position: usize) -> bool {
        self.program
            .phases
            .get(self.phase)
            .and_then(|phase| phase.state.chars().nth(position))
            .is_some_and(|c| is_green(c) || c == 'o' || c == 'O')
    }
}

#[derive(Debug, Clone)]
struct PendingTrip {
    id: String,
    depart: f64,
    route: Vec<String>,
}

struct OutputFiles {
    tripinfo: csv::Writer<File>,
    summary: csv::Writer<File>,
}

pub struct MicroSimulation {
    config: SimulationConfig,
    steps: u64,
    time: f64,
    lanes: BTreeMap<String, Lane>,
    signals: BTreeMap<String, SignalState>,
    /// (incoming, outgoing) lane pair -> signal positions gating it.
    gates: HashMap<(String, String), Vec<(String, usize)>>,
    pending: VecDeque<PendingTrip>,
    backlog: VecDeque<Vehicle>,
    /// Induction-loop crossings of the current step: lane -> (from, to, speed).
    moves: HashMap<String, Vec<(f64, f64, f64)>>,
    loaded: usize,
    arrived: usize,
    dropped_trips: usize,
    trip_infos: Vec<TripInfo>,
    rng: SmallRng,
    detectors: DetectorSet,
    outputs: Option<OutputFiles>,
    wall_origin: Instant,
    closed: bool,
}

impl MicroSimulation {
    pub fn new(network: NetworkDefinition, trips: Vec<Trip>, config: SimulationConfig) -> Result<Self> {
        network.validate()?;
        config.validate()?;

        let lanes: BTreeMap<String, Lane> = network
            .lanes
            .iter()
            .map(|definition| (definition.id.clone(), Lane::new(definition)))
            .collect();

        let mut signals = BTreeMap::new();
        let mut gates: HashMap<(String, String), Vec<(String, usize)>> = HashMap::new();
        for signal in &network.signals {
            for (position, group) in signal.links.iter().enumerate() {
                for link in group {
                    gates
                        .entry((link.incoming.clone(), link.outgoing.clone()))
                        .or_default()
                        .push((signal.id.clone(), position));
                }
            }
            let first = signal
                .phases
                .get(signal.initial_phase)
                .map_or(0.0, |phase| phase.duration);
            signals.insert(
                signal.id.clone(),
                SignalState {
                    links: signal.links.clone(),
                    program: SignalProgram {
                        program_id: "0".to_string(),
                        phases: signal.phases.clone(),
                    },
                    phase: signal.initial_phase,
                    next_switch: config.begin + first,
                },
            );
        }

        let mut rng = SmallRng::seed_from_u64(config.seed);
        let successors = network.successors();
        let mut trips = trips;
        trips.sort_by(|a, b| a.depart.total_cmp(&b.depart));
        let mut pending = VecDeque::with_capacity(trips.len());
        let mut dropped_trips = 0;
        for trip in trips {
            let endpoints = (
                resolve_endpoint(&network, &trip.from),
                resolve_endpoint(&network, &trip.to),
            );
            let route = match endpoints {
                (Some(from), Some(to)) => shortest_lane_route(&successors, from, to, &mut rng),
                _ => None,
            };
            match route {
                Some(route) => pending.push_back(PendingTrip {
                    id: trip.id,
                    depart: trip.depart,
                    route,
                }),
                None => {
                    log::warn!(
                        "Dropping trip {}: no route from '{}' to '{}'",
                        trip.id,
                        trip.from,
                        trip.to
                    );
                    dropped_trips += 1;
                }
            }
        }

        let output_dir = config.output_dir.clone();
        let outputs = match output_dir.as_deref() {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Some(OutputFiles {
                    tripinfo: csv::Writer::from_path(dir.join(TRIPINFO_FILE))?,
                    summary: csv::Writer::from_path(dir.join(SUMMARY_FILE))?,
                })
            }
            None => None,
        };
        let detectors = DetectorSet::new(
            &network.detectors,
            |lane| lanes.get(lane).map_or(0.0, |l| l.length_meters),
            config.detector_period,
            config.begin,
            output_dir.as_deref(),
        )?;

        log::info!(
            "Micro-simulation ready: {} lanes, {} signals, {} trips ({} dropped)",
            lanes.len(),
            signals.len(),
            pending.len(),
            dropped_trips
        );

        Ok(Self {
            time: config.begin,
            steps: 0,
            lanes,
            signals,
            gates,
            pending,
            backlog: VecDeque::new(),
            moves: HashMap::new(),
            loaded: 0,
            arrived: 0,
            dropped_trips,
            trip_infos: Vec::new(),
            rng,
            detectors,
            outputs,
            wall_origin: Instant::now(),
            closed: false,
            config,
        })
    }

    pub fn trip_infos(&self) -> &[TripInfo] {
        &self.trip_infos
    }

    pub fn dropped_trips(&self) -> usize {
        self.dropped_trips
    }

    pub fn running(&self) -> usize {
        self.lanes.values().map(Lane::vehicle_count).sum()
    }

    fn advance_signals(&mut self) {
        let now = self.time;
        let step = self.config.step_length;
        for signal in self.signals.values_mut() {
            let phase_count = signal.program.phases.len();
            if phase_count == 0 {
                continue;
            }
            while now >= signal.next_switch - EPS {
                signal.phase = (signal.phase + 1) % phase_count;
                signal.next_switch += signal.program.phases[signal.phase].duration.max(step);
            }
        }
    }

    fn load_departures(&mut self) {
        while self
            .pending
            .front()
            .is_some_and(|trip| trip.depart <= self.time + EPS)
        {
            let Some(trip) = self.pending.pop_front() else {
                break;
            };
            let vehicle_type = self.config.vehicle_mix.sample(&mut self.rng);
            self.backlog
                .push_back(Vehicle::new(&trip.id, vehicle_type, trip.route, trip.depart));
            self.loaded += 1;
        }
    }

    /// Inserts waiting vehicles at the start of their first lane. A vehicle
    /// that does not fit holds back everything behind it on the same lane.
    fn insert_backlog(&mut self) {
        let now = self.time;
        let mut blocked: HashSet<String> = HashSet::new();
        let mut still_waiting = VecDeque::new();
        while let Some(mut vehicle) = self.backlog.pop_front() {
            let Some(lane_id) = vehicle.current_lane().map(str::to_string) else {
                continue;
            };
            let lane = match self.lanes.get_mut(&lane_id) {
                Some(lane) if !blocked.contains(&lane_id) && lane.can_insert(&vehicle) => lane,
                _ => {
                    blocked.insert(lane_id);
                    still_waiting.push_back(vehicle);
                    continue;
                }
            };
            vehicle.depart = now;
            if let Err(vehicle) = lane.add_vehicle(vehicle) {
                blocked.insert(lane_id);
                still_waiting.push_back(vehicle);
            }
        }
        self.backlog = still_waiting;
    }

    fn move_vehicles(&mut self) {
        let dt = self.config.step_length;
        self.moves.clear();
        for lane in self.lanes.values_mut() {
            let length = lane.length_meters;
            let speed_limit = lane.speed_limit;
            let mut limit = length;
            let mut moves = Vec::new();
            for vehicle in lane.vehicles.iter_mut() {
                let top_speed = vehicle.vehicle_type.max_speed().min(speed_limit);
                let old = vehicle.position;
                let new = (old + top_speed * dt).min(limit).max(old);
                vehicle.position = new;
                vehicle.speed = (new - old) / dt;
                vehicle.is_queued = vehicle.speed < HALTING_SPEED;
                if vehicle.is_queued {
                    vehicle.waiting_time += dt;
                    vehicle.stopped_for += dt;
                } else {
                    vehicle.stopped_for = 0.0;
                    moves.push((old, new, vehicle.speed));
                }
                limit = new - vehicle.space();
            }
            if !moves.is_empty() {
                self.moves.insert(lane.id.clone(), moves);
            }
        }
    }

    fn movement_open(&self, from: &str, to: &str) -> bool {
        match self.gates.get(&(from.to_string(), to.to_string())) {
            None => true,
            Some(gates) => gates.iter().any(|(tls, position)| {
                self.signals
                    .get(tls)
                    .is_some_and(|signal| signal.passes(*position))
            }),
        }
    }

    fn discharge(&mut self) -> Result<()> {
        let now = self.time;
        let headway = self.config.saturation_headway;
        let lane_ids: Vec<String> = self.lanes.keys().cloned().collect();
        for lane_id in lane_ids {
            let next = {
                let Some(lane) = self.lanes.get(&lane_id) else {
                    continue;
                };
                if !lane.head_at_stop_line() {
                    continue;
                }
                let Some(front) = lane.front() else {
                    continue;
                };
                if front.on_last_lane() {
                    None
                } else {
                    if lane
                        .last_discharge
                        .is_some_and(|last| now - last < headway - EPS)
                    {
                        continue;
                    }
                    let Some(next) = front.next_lane().map(str::to_string) else {
                        continue;
                    };
                    let has_room = self
                        .lanes
                        .get(&next)
                        .is_some_and(|target| target.can_add_vehicle(front));
                    if !has_room || !self.movement_open(&lane_id, &next) {
                        continue;
                    }
                    Some(next)
                }
            };

            let Some(vehicle) = self.lanes.get_mut(&lane_id).and_then(Lane::remove_front) else {
                continue;
            };
            match next {
                None => self.finish_trip(vehicle)?,
                Some(next) => {
                    let mut vehicle = vehicle;
                    vehicle.advance();
                    let rejected = match self.lanes.get_mut(&next) {
                        Some(target) => target.add_vehicle(vehicle).err(),
                        None => Some(vehicle),
                    };
                    if let Some(lane) = self.lanes.get_mut(&lane_id) {
                        match rejected {
                            Some(mut vehicle) => {
                                vehicle.route_index -= 1;
                                vehicle.distance_done -= lane.length_meters;
                                vehicle.position = lane.length_meters;
                                lane.restore_front(vehicle);
                            }
                            None => lane.last_discharge = Some(now),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn finish_trip(&mut self, vehicle: Vehicle) -> Result<()> {
        let top_speed = vehicle.vehicle_type.max_speed();
        let free_flow_time: f64 = vehicle
            .route
            .iter()
            .filter_map(|id| self.lanes.get(id))
            .map(|lane| lane.length_meters / lane.speed_limit.min(top_speed))
            .sum();
        let duration = self.time - vehicle.depart;
        let info = TripInfo {
            id: vehicle.id,
            depart: round2(vehicle.depart),
            arrival: round2(self.time),
            duration: round2(duration),
            route_length: round2(vehicle.distance_done + vehicle.position),
            time_loss: round2((duration - free_flow_time).max(0.0)),
            waiting_time: round2(vehicle.waiting_time),
        };
        if let Some(outputs) = self.outputs.as_mut() {
            outputs.tripinfo.serialize(&info)?;
        }
        self.trip_infos.push(info);
        self.arrived += 1;
        Ok(())
    }

    fn summary_row(&self) -> SummaryRow {
        let vehicles = self.lanes.values().flat_map(|lane| lane.vehicles.iter());
        let (running, halting, waiting) = vehicles.fold((0, 0, 0.0), |(n, h, w), v| {
            (n + 1, h + usize::from(v.is_queued), w + v.waiting_time)
        });
        SummaryRow {
            time: round2(self.time),
            loaded: self.loaded,
            running,
            halting,
            arrived: self.arrived,
            mean_waiting_time: if running > 0 {
                round2(waiting / running as f64)
            } else {
                0.0
            },
        }
    }

    fn record_outputs(&mut self) -> Result<()> {
        let lanes = &self.lanes;
        let moves = &self.moves;
        self.detectors.sample(
            self.time,
            |lane| lanes.get(lane).map_or(0, Lane::vehicle_count),
            |lane, position| {
                moves.get(lane).map_or_else(Vec::new, |moves| {
                    moves
                        .iter()
                        .filter(|(from, to, _)| *from < position && *to >= position)
                        .map(|(_, _, speed)| *speed)
                        .collect()
                })
            },
        )?;
        let row = self.summary_row();
        if let Some(outputs) = self.outputs.as_mut() {
            outputs.summary.serialize(row)?;
        }
        Ok(())
    }

    /// Sleeps until wall-clock time catches up with simulated time.
    fn pace(&self) {
        let Some(factor) = self.config.real_time_factor else {
            return;
        };
        let target = Duration::from_secs_f64(((self.time - self.config.begin) / factor).max(0.0));
        let elapsed = self.wall_origin.elapsed();
        if target > elapsed {
            thread::sleep(target - elapsed);
        }
    }

    fn end_reached(&self) -> bool {
        self.config.end.is_some_and(|end| self.time >= end - EPS)
    }

    fn advance(&mut self) -> Result<()> {
        self.steps += 1;
        self.time = self.config.begin + self.steps as f64 * self.config.step_length;
        self.advance_signals();
        self.move_vehicles();
        self.discharge()?;
        self.load_departures();
        self.insert_backlog();
        self.record_outputs()?;
        self.pace();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.detectors.finish(self.time)?;
        if let Some(outputs) = self.outputs.as_mut() {
            outputs.tripinfo.flush()?;
            outputs.summary.flush()?;
        }
        log::info!(
            "Micro-simulation closed at t={:.1}: {} loaded, {} arrived, {} still running",
            self.time,
            self.loaded,
            self.arrived,
            self.running()
        );
        Ok(())
    }

    fn signal(&self, tls_id: &str) -> std::result::Result<&SignalState, EngineError> {
        self.signals
            .get(tls_id)
            .ok_or_else(|| EngineError::UnknownSignal(tls_id.to_string()))
    }

    fn signal_mut(&mut self, tls_id: &str) -> std::result::Result<&mut SignalState, EngineError> {
        self.signals
            .get_mut(tls_id)
            .ok_or_else(|| EngineError::UnknownSignal(tls_id.to_string()))
    }

    fn lane(&self, lane_id: &str) -> std::result::Result<&Lane, EngineError> {
        self.lanes
            .get(lane_id)
            .ok_or_else(|| EngineError::UnknownLane(lane_id.to_string()))
    }
}

/// A lane id, an edge id, or a traffic zone (its first lane).
fn resolve_endpoint<'a>(network: &'a NetworkDefinition, name: &str) -> Option<&'a str> {
    network.resolve_lane(name).or_else(|| {
        network
            .districts
            .get(name)
            .and_then(|lanes| lanes.first())
            .map(String::as_str)
    })
}

fn fatal(error: ControlError) -> EngineError {
    EngineError::Fatal(error.to_string())
}

impl SimulationEngine for MicroSimulation {
    fn step(&mut self) -> std::result::Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.advance().map_err(fatal)
    }

    fn min_expected_number(&mut self) -> std::result::Result<usize, EngineError> {
        if self.end_reached() {
            return Ok(0);
        }
        Ok(self.pending.len() + self.backlog.len() + self.running())
    }

    fn time(&mut self) -> std::result::Result<f64, EngineError> {
        Ok(self.time)
    }

    fn close(&mut self) -> std::result::Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.finish().map_err(fatal)
    }

    fn traffic_light_ids(&mut self) -> std::result::Result<Vec<String>, EngineError> {
        Ok(self.signals.keys().cloned().collect())
    }

    fn controlled_links(&mut self, tls_id: &str) -> std::result::Result<Vec<LinkGroup>, EngineError> {
        Ok(self.signal(tls_id)?.links.clone())
    }

    fn program(&mut self, tls_id: &str) -> std::result::Result<SignalProgram, EngineError> {
        Ok(self.signal(tls_id)?.program.clone())
    }

    fn phase(&mut self, tls_id: &str) -> std::result::Result<usize, EngineError> {
        Ok(self.signal(tls_id)?.phase)
    }

    fn set_phase(&mut self, tls_id: &str, phase: usize) -> std::result::Result<(), EngineError> {
        let now = self.time;
        let signal = self.signal_mut(tls_id)?;
        let duration = signal
            .program
            .phases
            .get(phase)
            .map(|p| p.duration)
            .ok_or_else(|| EngineError::Query(format!("{} has no phase {}", tls_id, phase)))?;
        signal.phase = phase;
        signal.next_switch = now + duration;
        Ok(())
    }

    fn set_phase_duration(&mut self, tls_id: &str, remaining: f64) -> std::result::Result<(), EngineError> {
        let now = self.time;
        self.signal_mut(tls_id)?.next_switch = now + remaining;
        Ok(())
    }

    fn next_switch(&mut self, tls_id: &str) -> std::result::Result<f64, EngineError> {
        Ok(self.signal(tls_id)?.next_switch)
    }

    fn lane_vehicle_count(&mut self, lane_id: &str) -> std::result::Result<usize, EngineError> {
        Ok(self.lane(lane_id)?.vehicle_count())
    }

    fn lane_waiting_time(&mut self, lane_id: &str) -> std::result::Result<f64, EngineError> {
        Ok(self.lane(lane_id)?.waiting_time())
    }
}
