use crate::errors::{ControlError, Result};
use crate::simulation_engine::interface::{
    is_traversable_lane, LinkEntry, LinkGroup, SignalPhase,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Free-flow speed of the built-in network, m/s (50 km/h).
const URBAN_SPEED: f64 = 13.89;

/// Represents a lane (one direction of a road between two junctions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneDefinition {
    pub id: String,
    /// Road the lane belongs to. Trips may name the edge instead of the lane.
    pub edge: String,
    /// Length of the lane in meters.
    pub length: f64,
    /// Free-flow speed in m/s.
    pub speed: f64,
}

impl LaneDefinition {
    /// Lane 0 of `edge`.
    pub fn new(edge: &str, length: f64, speed: f64) -> Self {
        Self {
            id: format!("{}_0", edge),
            edge: edge.to_string(),
            length,
            speed,
        }
    }
}

/// A signalized junction: link table in signal-state order plus its program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    pub id: String,
    pub links: Vec<LinkGroup>,
    pub phases: Vec<SignalPhase>,
    #[serde(default)]
    pub initial_phase: usize,
}

/// An unsignalized lane-to-lane connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Covers the whole lane, reports the mean number of vehicles on it.
    LaneArea,
    /// Point detector, reports the mean speed of passing traffic.
    InductionLoop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorDefinition {
    pub id: String,
    pub lane: String,
    pub kind: DetectorKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkDefinition {
    pub lanes: Vec<LaneDefinition>,
    #[serde(default)]
    pub signals: Vec<SignalDefinition>,
    #[serde(default)]
    pub connections: Vec<ConnectionDefinition>,
    #[serde(default)]
    pub detectors: Vec<DetectorDefinition>,
    /// Traffic zones: trips naming a zone start on (or end at) its first lane.
    #[serde(default)]
    pub districts: BTreeMap<String, Vec<String>>,
}

impl NetworkDefinition {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let network: NetworkDefinition = serde_json::from_str(&text)?;
        network.validate()?;
        Ok(network)
    }

    pub fn lane(&self, id: &str) -> Option<&LaneDefinition> {
        self.lanes.iter().find(|lane| lane.id == id)
    }

    /// Accepts a lane id or an edge id (first lane of the edge).
    pub fn resolve_lane(&self, lane_or_edge: &str) -> Option<&str> {
        self.lane(lane_or_edge)
            .or_else(|| self.lanes.iter().find(|lane| lane.edge == lane_or_edge))
            .map(|lane| lane.id.as_str())
    }

    /// Lanes a vehicle can continue onto from each lane, signalized or not.
    pub fn successors(&self) -> BTreeMap<String, Vec<String>> {
        let mut successors: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let links = self
            .signals
            .iter()
            .flat_map(|signal| signal.links.iter().flatten())
            .map(|link| (link.incoming.as_str(), link.outgoing.as_str()));
        let connections = self
            .connections
            .iter()
            .map(|c| (c.from.as_str(), c.to.as_str()));
        for (from, to) in links.chain(connections) {
            if is_traversable_lane(from) && is_traversable_lane(to) {
                successors
                    .entry(from.to_string())
                    .or_default()
                    .insert(to.to_string());
            }
        }
        successors
            .into_iter()
            .map(|(from, to)| (from, to.into_iter().collect()))
            .collect()
    }

    /// Checks that every lane referenced anywhere is defined.
    pub fn validate(&self) -> Result<()> {
        let known: BTreeSet<&str> = self.lanes.iter().map(|lane| lane.id.as_str()).collect();
        let require = |lane: &str, context: &str| -> Result<()> {
            if known.contains(lane) {
                Ok(())
            } else {
                Err(ControlError::Network(format!(
                    "{} references unknown lane '{}'",
                    context, lane
                )))
            }
        };

        for lane in &self.lanes {
            if !(lane.length > 0.0 && lane.speed > 0.0) {
                return Err(ControlError::Network(format!(
                    "lane '{}' needs a positive length and speed",
                    lane.id
                )));
            }
        }
        for signal in &self.signals {
            for link in signal.links.iter().flatten() {
                for lane in [&link.incoming, &link.outgoing] {
                    if is_traversable_lane(lane) {
                        require(lane, &format!("signal {}", signal.id))?;
                    }
                }
            }
            if !signal.phases.is_empty() && signal.initial_phase >= signal.phases.len() {
                return Err(ControlError::Network(format!(
                    "signal '{}' starts in phase {} but has {} phases",
                    signal.id,
                    signal.initial_phase,
                    signal.phases.len()
                )));
            }
        }
        for connection in &self.connections {
            require(&connection.from, "connection")?;
            require(&connection.to, "connection")?;
        }
        for detector in &self.detectors {
            require(&detector.lane, &format!("detector {}", detector.id))?;
        }
        for (district, lanes) in &self.districts {
            for lane in lanes {
                require(lane, &format!("district {}", district))?;
            }
        }
        Ok(())
    }

    /// Three signalized junctions on an east-bound arterial. Each junction
    /// has a south-bound side street; traffic zone A feeds the arterial, B the
    /// side streets and C is the arterial's far end.
    pub fn corridor() -> Self {
        let mut lanes = vec![
            LaneDefinition::new("E_A_J1", 300.0, URBAN_SPEED),
            LaneDefinition::new("E_J1_J2", 250.0, URBAN_SPEED),
            LaneDefinition::new("E_J2_J3", 250.0, URBAN_SPEED),
            LaneDefinition::new("E_J3_O", 300.0, URBAN_SPEED),
        ];
        for n in 1..=3 {
            lanes.push(LaneDefinition::new(&format!("E_S{}N_J{}", n, n), 150.0, URBAN_SPEED));
            lanes.push(LaneDefinition::new(&format!("E_J{}_S{}S", n, n), 150.0, URBAN_SPEED));
        }

        let arterial = ["E_A_J1_0", "E_J1_J2_0", "E_J2_J3_0", "E_J3_O_0"];
        let signals = (1..=3)
            .map(|n| {
                corridor_junction(
                    &format!("J{}", n),
                    arterial[n - 1],
                    arterial[n],
                    &format!("E_S{}N_J{}_0", n, n),
                    &format!("E_J{}_S{}S_0", n, n),
                )
            })
            .collect();

        let mut detectors = Vec::new();
        for lane in ["E_A_J1_0", "E_J1_J2_0", "E_J2_J3_0"]
            .into_iter()
            .chain(["E_S1N_J1_0", "E_S2N_J2_0", "E_S3N_J3_0"])
        {
            detectors.push(DetectorDefinition {
                id: lane.trim_end_matches("_0").to_string(),
                lane: lane.to_string(),
                kind: DetectorKind::LaneArea,
            });
        }
        for lane in ["E_J1_J2_0", "E_J2_J3_0", "E_J3_O_0"] {
            detectors.push(DetectorDefinition {
                id: lane.trim_end_matches("_0").to_string(),
                lane: lane.to_string(),
                kind: DetectorKind::InductionLoop,
            });
        }

        let mut districts = BTreeMap::new();
        districts.insert("A".to_string(), vec!["E_A_J1_0".to_string()]);
        districts.insert(
            "B".to_string(),
            vec![
                "E_S1N_J1_0".to_string(),
                "E_S2N_J2_0".to_string(),
                "E_S3N_J3_0".to_string(),
            ],
        );
        districts.insert("C".to_string(), vec!["E_J3_O_0".to_string()]);

        Self {
            lanes,
            signals,
            connections: Vec::new(),
            detectors,
            districts,
        }
    }
}

/// Four-link junction: arterial through and right turn, side-street left
/// turn and through, with a two-phase program and amber in between.
fn corridor_junction(
    id: &str,
    main_in: &str,
    main_out: &str,
    side_in: &str,
    side_out: &str,
) -> SignalDefinition {
    let via = |index: usize| format!(":{}_{}_0", id, index);
    SignalDefinition {
        id: id.to_string(),
        links: vec![
            vec![LinkEntry::new(main_in, &via(0), main_out)],
            vec![LinkEntry::new(main_in, &via(1), side_out)],
            vec![LinkEntry::new(side_in, &via(2), main_out)],
            vec![LinkEntry::new(side_in, &via(3), side_out)],
        ],
        phases: vec![
            SignalPhase::new("GGrr", 31.0),
            SignalPhase::new("yyrr", 4.0),
            SignalPhase::new("rrGG", 20.0),
            SignalPhase::new("rryy", 4.0),
        ],
        initial_phase: 0,
    }
}
