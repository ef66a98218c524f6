// kpi.rs
//
// Scenario comparison. Reads the trip info and detector series each run
// leaves in outputs/<scene>/ and condenses them into one row of KPIs per
// scene.

use crate::errors::Result;
use crate::global_variables::{QUEUE_DETECTOR_PREFIX, SPEED_DETECTOR_PREFIX, TRIPINFO_FILE};
use crate::simulation_engine::detectors::{QueueInterval, SpeedInterval};
use crate::simulation_engine::simulation::TripInfo;
use std::fs;
use std::path::{Path, PathBuf};

pub const KPI_HEADER: [&str; 9] = [
    "scene",
    "trips",
    "mean_TT",
    "median_TT",
    "p90_TT",
    "mean_timeLoss",
    "mean_wait",
    "avg_queue",
    "avg_e1_speed",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioKpis {
    pub scene: String,
    pub trips: usize,
    pub mean_travel_time: Option<f64>,
    pub median_travel_time: Option<f64>,
    pub p90_travel_time: Option<f64>,
    pub mean_time_loss: Option<f64>,
    pub mean_waiting_time: Option<f64>,
    /// Mean over lane-area detectors of each detector's mean vehicle count.
    pub avg_queue: Option<f64>,
    /// Mean over every induction-loop interval that saw traffic, m/s.
    pub avg_detector_speed: Option<f64>,
}

impl ScenarioKpis {
    pub fn table_row(&self) -> Vec<String> {
        vec![
            self.scene.clone(),
            self.trips.to_string(),
            format_kpi(self.mean_travel_time),
            format_kpi(self.median_travel_time),
            format_kpi(self.p90_travel_time),
            format_kpi(self.mean_time_loss),
            format_kpi(self.mean_waiting_time),
            format_kpi(self.avg_queue),
            format_kpi(self.avg_detector_speed),
        ]
    }
}

/// Two decimals, `-` when there is no value.
pub fn format_kpi(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Upper median: the element at index n/2 after sorting.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.get(sorted.len() / 2).copied()
}

/// Percentile with linear interpolation between the closest ranks.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let k = (sorted.len() - 1) as f64 * (p / 100.0);
    let f = k.floor() as usize;
    let c = (f + 1).min(sorted.len() - 1);
    if f == c {
        return Some(sorted[f]);
    }
    Some(sorted[f] * (c as f64 - k) + sorted[c] * (k - f as f64))
}

/// Completed trips of a run; a missing file means none.
pub fn read_tripinfo<P: AsRef<Path>>(path: P) -> Result<Vec<TripInfo>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut trips = Vec::new();
    for trip in reader.deserialize() {
        trips.push(trip?);
    }
    Ok(trips)
}

/// Detector files in `dir` starting with `prefix`, sorted by name.
fn detector_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(prefix) && name.ends_with(".csv"));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn average_queue(dir: &Path) -> Result<Option<f64>> {
    let mut per_detector = Vec::new();
    for file in detector_files(dir, QUEUE_DETECTOR_PREFIX)? {
        let mut reader = csv::Reader::from_path(&file)?;
        let mut values = Vec::new();
        for interval in reader.deserialize::<QueueInterval>() {
            values.push(interval?.mean_vehicle_number);
        }
        if let Some(m) = mean(&values) {
            per_detector.push(m);
        }
    }
    Ok(mean(&per_detector))
}

pub fn average_detector_speed(dir: &Path) -> Result<Option<f64>> {
    let mut speeds = Vec::new();
    for file in detector_files(dir, SPEED_DETECTOR_PREFIX)? {
        let mut reader = csv::Reader::from_path(&file)?;
        for interval in reader.deserialize::<SpeedInterval>() {
            match interval {
                Ok(SpeedInterval {
                    speed: Some(speed), ..
                }) => speeds.push(speed),
                Ok(_) => {}
                Err(e) => log::warn!("Skipping unreadable interval in {}: {}", file.display(), e),
            }
        }
    }
    Ok(mean(&speeds))
}

pub fn analyze_scenario(dir: &Path, scene: &str) -> Result<ScenarioKpis> {
    let trips = read_tripinfo(dir.join(TRIPINFO_FILE))?;
    let durations: Vec<f64> = trips.iter().map(|t| t.duration).collect();
    let time_losses: Vec<f64> = trips.iter().map(|t| t.time_loss).collect();
    let waits: Vec<f64> = trips.iter().map(|t| t.waiting_time).collect();
    Ok(ScenarioKpis {
        scene: scene.to_string(),
        trips: trips.len(),
        mean_travel_time: mean(&durations),
        median_travel_time: median(&durations),
        p90_travel_time: percentile(&durations, 90.0),
        mean_time_loss: mean(&time_losses),
        mean_waiting_time: mean(&waits),
        avg_queue: average_queue(dir)?,
        avg_detector_speed: average_detector_speed(dir)?,
    })
}

/// One row per scene, read from `outputs_dir/<scene>/`.
pub fn analyze_outputs(outputs_dir: &Path, scenes: &[&str]) -> Result<Vec<ScenarioKpis>> {
    scenes
        .iter()
        .map(|scene| analyze_scenario(&outputs_dir.join(scene), scene))
        .collect()
}

pub fn write_kpi_table<P: AsRef<Path>>(path: P, kpis: &[ScenarioKpis]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(KPI_HEADER)?;
    for row in kpis {
        writer.write_record(row.table_row())?;
    }
    writer.flush()?;
    Ok(())
}
