// detectors.rs
//
// Periodic detector series. Lane-area detectors sample the number of
// vehicles on their lane every step; induction loops sit at the middle of
// their lane and record the speed of every vehicle crossing it. Each
// detector writes one row per period to its own CSV file.

use crate::errors::Result;
use crate::global_variables::{QUEUE_DETECTOR_PREFIX, SPEED_DETECTOR_PREFIX};
use crate::simulation_engine::network::{DetectorDefinition, DetectorKind};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// One period of a lane-area detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInterval {
    pub begin: f64,
    pub end: f64,
    pub mean_vehicle_number: f64,
}

/// One period of an induction loop. `speed` is empty when nothing crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedInterval {
    pub begin: f64,
    pub end: f64,
    pub entered: u32,
    pub speed: Option<f64>,
}

/// File a detector writes to, e.g. `Q_E_A_J1.csv`.
pub fn detector_file_name(definition: &DetectorDefinition) -> String {
    let prefix = match definition.kind {
        DetectorKind::LaneArea => QUEUE_DETECTOR_PREFIX,
        DetectorKind::InductionLoop => SPEED_DETECTOR_PREFIX,
    };
    format!("{}{}.csv", prefix, definition.id)
}

#[derive(Debug, Default)]
struct Accumulator {
    samples: u32,
    vehicle_sum: f64,
    entered: u32,
    speed_sum: f64,
}

struct Detector {
    definition: DetectorDefinition,
    position: f64,
    accumulator: Accumulator,
    writer: Option<csv::Writer<File>>,
}

/// All detectors of a network plus the period they aggregate over.
pub struct DetectorSet {
    detectors: Vec<Detector>,
    period: f64,
    period_begin: f64,
}

impl DetectorSet {
    /// `lane_length` resolves a detector's lane to its length. Without an
    /// output directory the series are aggregated but not written.
    pub fn new<F>(
        definitions: &[DetectorDefinition],
        lane_length: F,
        period: f64,
        begin: f64,
        output_dir: Option<&Path>,
    ) -> Result<Self>
    where
        F: Fn(&str) -> f64,
    {
        let mut detectors = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let writer = match output_dir {
                Some(dir) => {
                    let path: PathBuf = dir.join(detector_file_name(definition));
                    Some(csv::Writer::from_path(path)?)
                }
                None => None,
            };
            detectors.push(Detector {
                definition: definition.clone(),
                position: lane_length(&definition.lane) / 2.0,
                accumulator: Accumulator::default(),
                writer,
            });
        }
        Ok(Self {
            detectors,
            period: period.max(f64::EPSILON),
            period_begin: begin,
        })
    }

    /// Feeds one step. `vehicles_on` returns the vehicle count of a lane and
    /// `crossings` the speeds of vehicles that passed `position` on a lane
    /// during the step.
    pub fn sample<C, X>(&mut self, now: f64, vehicles_on: C, crossings: X) -> Result<()>
    where
        C: Fn(&str) -> usize,
        X: Fn(&str, f64) -> Vec<f64>,
    {
        for detector in self.detectors.iter_mut() {
            let lane = detector.definition.lane.as_str();
            match detector.definition.kind {
                DetectorKind::LaneArea => {
                    detector.accumulator.samples += 1;
                    detector.accumulator.vehicle_sum += vehicles_on(lane) as f64;
                }
                DetectorKind::InductionLoop => {
                    for speed in crossings(lane, detector.position) {
                        detector.accumulator.entered += 1;
                        detector.accumulator.speed_sum += speed;
                    }
                }
            }
        }
        if now - self.period_begin >= self.period - 1e-9 {
            self.write_interval(now)?;
        }
        Ok(())
    }

    /// Writes the open period, if it saw any step, and flushes every file.
    pub fn finish(&mut self, now: f64) -> Result<()> {
        if now > self.period_begin {
            self.write_interval(now)?;
        }
        for detector in self.detectors.iter_mut() {
            if let Some(writer) = detector.writer.as_mut() {
                writer.flush()?;
            }
        }
        Ok(())
    }

    fn write_interval(&mut self, end: f64) -> Result<()> {
        let begin = self.period_begin;
        for detector in self.detectors.iter_mut() {
            let accumulator = std::mem::take(&mut detector.accumulator);
            let Some(writer) = detector.writer.as_mut() else {
                continue;
            };
            match detector.definition.kind {
                DetectorKind::LaneArea => {
                    let mean = if accumulator.samples > 0 {
                        accumulator.vehicle_sum / accumulator.samples as f64
                    } else {
                        0.0
                    };
                    writer.serialize(QueueInterval {
                        begin,
                        end,
                        mean_vehicle_number: round2(mean),
                    })?;
                }
                DetectorKind::InductionLoop => {
                    let speed = (accumulator.entered > 0)
                        .then(|| round2(accumulator.speed_sum / accumulator.entered as f64));
                    writer.serialize(SpeedInterval {
                        begin,
                        end,
                        entered: accumulator.entered,
                        speed,
                    })?;
                }
            }
        }
        self.period_begin = end;
        Ok(())
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn definitions() -> Vec<DetectorDefinition> {
        vec![
            DetectorDefinition {
                id: "in".to_string(),
                lane: "in_0".to_string(),
                kind: DetectorKind::LaneArea,
            },
            DetectorDefinition {
                id: "out".to_string(),
                lane: "out_0".to_string(),
                kind: DetectorKind::InductionLoop,
            },
        ]
    }

    #[test]
    fn file_names_carry_the_kind_prefix() {
        let defs = definitions();
        assert_eq!(detector_file_name(&defs[0]), "Q_in.csv");
        assert_eq!(detector_file_name(&defs[1]), "D_out.csv");
    }

    #[test]
    fn series_average_over_each_period() {
        let dir = std::env::temp_dir().join(format!("adaptive_signals_det_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut set = DetectorSet::new(&definitions(), |_| 100.0, 2.0, 0.0, Some(&dir)).unwrap();

        set.sample(1.0, |_| 2, |_, position| {
            assert_eq!(position, 50.0);
            vec![10.0]
        })
        .unwrap();
        set.sample(2.0, |_| 4, |_, _| vec![12.0]).unwrap();
        set.sample(3.0, |_| 1, |_, _| Vec::new()).unwrap();
        set.finish(3.0).unwrap();

        let mut reader = csv::Reader::from_path(dir.join("Q_in.csv")).unwrap();
        let queues: Vec<QueueInterval> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(queues.len(), 2);
        assert_eq!(queues[0].mean_vehicle_number, 3.0);
        assert_eq!(queues[1].mean_vehicle_number, 1.0);

        let mut reader = csv::Reader::from_path(dir.join("D_out.csv")).unwrap();
        let speeds: Vec<SpeedInterval> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(speeds[0].entered, 2);
        assert_eq!(speeds[0].speed, Some(11.0));
        assert_eq!(speeds[1].speed, None);

        fs::remove_dir_all(&dir).unwrap();
    }
}
