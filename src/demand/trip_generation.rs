// trip_generation.rs
//
// Turns origin-destination counts per time slice into individual trips.
// Traffic zones are mapped to entry and exit edges by weighted round robin,
// so each zone's demand is spread evenly across its edges.

use crate::errors::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One trip as consumed by the micro-simulation. `from`/`to` are edge or
/// lane ids, or traffic zone names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub depart: f64,
    pub from: String,
    pub to: String,
}

/// One line of the OD table. Times are clock times (`HH:MM`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdRow {
    pub time_begin: String,
    pub time_end: String,
    pub origin_taz: String,
    pub dest_taz: String,
    pub veh: i64,
}

/// Zone -> {edge: weight}.
pub type TazMap = BTreeMap<String, BTreeMap<String, i64>>;

pub fn default_origin_map() -> TazMap {
    let mut map = TazMap::new();
    map.insert("A".to_string(), BTreeMap::from([("E_A_J1".to_string(), 1)]));
    map.insert(
        "B".to_string(),
        BTreeMap::from([
            ("E_S1N_J1".to_string(), 1),
            ("E_S2N_J2".to_string(), 1),
            ("E_S3N_J3".to_string(), 1),
        ]),
    );
    map
}

pub fn default_dest_map() -> TazMap {
    let mut map = TazMap::new();
    map.insert("C".to_string(), BTreeMap::from([("E_J3_O".to_string(), 1)]));
    map
}

/// Morning peak on the corridor: arterial demand A -> C and side-street
/// demand B -> C in two 15-minute slices.
pub fn default_od_rows() -> Vec<OdRow> {
    [
        ("07:00", "07:15", "A", 150),
        ("07:00", "07:15", "B", 90),
        ("07:15", "07:30", "A", 210),
        ("07:15", "07:30", "B", 120),
    ]
    .into_iter()
    .map(|(begin, end, origin, veh)| OdRow {
        time_begin: begin.to_string(),
        time_end: end.to_string(),
        origin_taz: origin.to_string(),
        dest_taz: "C".to_string(),
        veh,
    })
    .collect()
}

/// Reads a zone map like `{"B": {"E_S1N_J1": 2, "E_S2N_J2": 1}}`.
pub fn load_taz_map<P: AsRef<Path>>(path: P) -> Result<TazMap> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// `"07:15"` -> 26100.
pub fn hhmm_to_sec(hhmm: &str) -> Result<i64> {
    let parse = |part: Option<&str>| -> Result<i64> {
        part.map(str::trim)
            .and_then(|p| p.parse::<i64>().ok())
            .ok_or_else(|| ControlError::Demand(format!("invalid clock time '{}'", hhmm)))
    };
    let mut parts = hhmm.split(':');
    let hours = parse(parts.next())?;
    let minutes = parse(parts.next())?;
    if parts.next().is_some() {
        return Err(ControlError::Demand(format!("invalid clock time '{}'", hhmm)));
    }
    Ok(hours * 3600 + minutes * 60)
}

/// Endless cycle over edges, each repeated `max(1, weight)` times.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    items: Vec<String>,
    next: usize,
}

impl RoundRobin {
    pub fn from_weights(weights: &BTreeMap<String, i64>) -> Self {
        let items = weights
            .iter()
            .flat_map(|(edge, weight)| {
                std::iter::repeat(edge.clone()).take((*weight).max(1) as usize)
            })
            .collect();
        Self { items, next: 0 }
    }
}

impl Iterator for RoundRobin {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let item = self.items.get(self.next)?.clone();
        self.next = (self.next + 1) % self.items.len();
        Some(item)
    }
}

#[derive(Debug, Clone)]
pub struct TripGenerationOptions {
    /// Simulation time of the `time0` clock time.
    pub begin: i64,
    pub veh_per_second_cap: f64,
    /// Keep zone names as endpoints instead of mapping them to edges.
    pub emit_taz: bool,
    pub time0: String,
    pub origin_map: TazMap,
    pub dest_map: TazMap,
}

impl Default for TripGenerationOptions {
    fn default() -> Self {
        Self {
            begin: 0,
            veh_per_second_cap: 50.0,
            emit_taz: false,
            time0: "07:00".to_string(),
            origin_map: default_origin_map(),
            dest_map: default_dest_map(),
        }
    }
}

fn round_robins(map: &TazMap) -> BTreeMap<String, RoundRobin> {
    map.iter()
        .map(|(taz, weights)| (taz.clone(), RoundRobin::from_weights(weights)))
        .collect()
}

/// Evenly spaced departures per OD row, sorted by departure time. Rows with
/// no vehicles or an empty time slice are skipped.
pub fn generate_trips(rows: &[OdRow], options: &TripGenerationOptions) -> Result<Vec<Trip>> {
    if !(options.veh_per_second_cap > 0.0) {
        return Err(ControlError::Demand(
            "veh_per_second_cap must be positive".to_string(),
        ));
    }
    let anchor = hhmm_to_sec(&options.time0)?;
    let mut origins = round_robins(&options.origin_map);
    let mut destinations = round_robins(&options.dest_map);

    let mut endpoints: Vec<(f64, String, String)> = Vec::new();
    for row in rows {
        let t0 = (hhmm_to_sec(&row.time_begin)? - anchor + options.begin) as f64;
        let t1 = (hhmm_to_sec(&row.time_end)? - anchor + options.begin) as f64;
        let n = row.veh;
        if n <= 0 || t1 <= t0 {
            continue;
        }
        let step = ((t1 - t0) / n as f64)
            .max(1.0)
            .max(1.0 / options.veh_per_second_cap);
        let origin_taz = row.origin_taz.trim();
        let dest_taz = row.dest_taz.trim();

        let mut depart = t0;
        let mut generated = 0;
        while depart < t1 && generated < n {
            let (from, to) = if options.emit_taz {
                (origin_taz.to_string(), dest_taz.to_string())
            } else {
                (
                    origins
                        .get_mut(origin_taz)
                        .and_then(Iterator::next)
                        .unwrap_or_else(|| origin_taz.to_string()),
                    destinations
                        .get_mut(dest_taz)
                        .and_then(Iterator::next)
                        .unwrap_or_else(|| dest_taz.to_string()),
                )
            };
            endpoints.push((depart, from, to));
            generated += 1;
            depart += step;
        }
    }

    endpoints.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(endpoints
        .into_iter()
        .enumerate()
        .map(|(index, (depart, from, to))| Trip {
            id: format!("v{}", index),
            depart: (depart * 10.0).round() / 10.0,
            from,
            to,
        })
        .collect())
}

pub fn read_od_csv<P: AsRef<Path>>(path: P) -> Result<Vec<OdRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn read_trips<P: AsRef<Path>>(path: P) -> Result<Vec<Trip>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut trips = Vec::new();
    for trip in reader.deserialize() {
        trips.push(trip?);
    }
    Ok(trips)
}

pub fn write_trips<P: AsRef<Path>>(path: P, trips: &[Trip]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for trip in trips {
        writer.serialize(trip)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(begin: &str, end: &str, origin: &str, dest: &str, veh: i64) -> OdRow {
        OdRow {
            time_begin: begin.to_string(),
            time_end: end.to_string(),
            origin_taz: origin.to_string(),
            dest_taz: dest.to_string(),
            veh,
        }
    }

    #[test]
    fn clock_times_parse_to_seconds() {
        assert_eq!(hhmm_to_sec("07:15").unwrap(), 26_100);
        assert_eq!(hhmm_to_sec("00:00").unwrap(), 0);
        assert!(hhmm_to_sec("7").is_err());
        assert!(hhmm_to_sec("aa:bb").is_err());
    }

    #[test]
    fn weights_repeat_edges_and_clamp_to_one() {
        let weights = BTreeMap::from([("x".to_string(), 0), ("y".to_string(), 2)]);
        let picks: Vec<String> = RoundRobin::from_weights(&weights).take(6).collect();
        assert_eq!(picks, vec!["x", "y", "y", "x", "y", "y"]);
        assert_eq!(RoundRobin::from_weights(&BTreeMap::new()).next(), None);
    }

    #[test]
    fn departures_are_evenly_spaced_from_the_anchor() {
        let trips = generate_trips(
            &[row("07:00", "07:15", "A", "C", 3)],
            &TripGenerationOptions::default(),
        )
        .unwrap();
        let departs: Vec<f64> = trips.iter().map(|t| t.depart).collect();
        assert_eq!(departs, vec![0.0, 300.0, 600.0]);
        assert!(trips.iter().all(|t| t.from == "E_A_J1" && t.to == "E_J3_O"));
    }

    #[test]
    fn side_street_demand_rotates_over_edges() {
        let trips = generate_trips(
            &[row("07:00", "07:01", "B", "C", 4)],
            &TripGenerationOptions::default(),
        )
        .unwrap();
        let origins: Vec<&str> = trips.iter().map(|t| t.from.as_str()).collect();
        assert_eq!(origins, vec!["E_S1N_J1", "E_S2N_J2", "E_S3N_J3", "E_S1N_J1"]);
        assert_eq!(trips[1].depart, 15.0);
    }

    #[test]
    fn rows_merge_sorted_with_sequential_ids() {
        let options = TripGenerationOptions {
            begin: 100,
            ..TripGenerationOptions::default()
        };
        let trips = generate_trips(
            &[
                row("07:10", "07:11", "A", "C", 1),
                row("07:00", "07:01", "Z", "C", 1),
                row("07:00", "07:00", "A", "C", 5),
                row("07:00", "07:05", "A", "C", 0),
            ],
            &options,
        )
        .unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].id, "v0");
        assert_eq!(trips[0].depart, 100.0);
        // unmapped zones stay as they are
        assert_eq!(trips[0].from, "Z");
        assert_eq!(trips[1].depart, 700.0);
    }

    #[test]
    fn default_demand_covers_half_an_hour() {
        let trips = generate_trips(&default_od_rows(), &TripGenerationOptions::default()).unwrap();
        assert_eq!(trips.len(), 570);
        assert!(trips.windows(2).all(|w| w[0].depart <= w[1].depart));
        assert!(trips.iter().all(|t| t.depart < 1800.0));
        assert_eq!(trips.last().map(|t| t.id.as_str()), Some("v569"));
    }

    #[test]
    fn emit_taz_keeps_zone_names() {
        let options = TripGenerationOptions {
            emit_taz: true,
            ..TripGenerationOptions::default()
        };
        let trips = generate_trips(&[row("07:00", "07:02", "B", "C", 2)], &options).unwrap();
        assert!(trips.iter().all(|t| t.from == "B" && t.to == "C"));
    }

    #[test]
    fn trips_survive_a_csv_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "adaptive_signals_trips_{}.csv",
            std::process::id()
        ));
        let trips = generate_trips(
            &[row("07:00", "07:01", "B", "C", 3)],
            &TripGenerationOptions::default(),
        )
        .unwrap();
        write_trips(&path, &trips).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,depart,from,to"));
        assert_eq!(read_trips(&path).unwrap(), trips);
        fs::remove_file(&path).unwrap();
    }
}
