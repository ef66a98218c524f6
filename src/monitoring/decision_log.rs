use crate::control_system::traffic_light_controller::{Action, DecisionRecord};
use crate::errors::Result;
use crate::global_variables::QUEUE_LIGHT_ADJUSTMENTS;
use amiquip::{Channel, Connection, Exchange, Publish, QueueDeclareOptions};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;

/// Where decision records go. One record per intersection per control tick.
pub trait DecisionSink {
    fn record(&mut self, record: &DecisionRecord) -> Result<()>;

    /// Called once per tick after every intersection has been recorded.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the run finishes.
    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Row layout of the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRow {
    pub time: String,
    pub tls: String,
    pub cur: usize,
    pub best: usize,
    pub best_score: String,
    pub cur_score: String,
    #[serde(rename = "gap_best-second")]
    pub gap_best_second: String,
    #[serde(rename = "gap_best-cur")]
    pub gap_best_cur: String,
    pub rem: String,
    pub served: String,
    pub action: String,
}

impl From<&DecisionRecord> for DecisionRow {
    fn from(record: &DecisionRecord) -> Self {
        Self {
            time: format!("{:.1}", record.time),
            tls: record.tls.clone(),
            cur: record.current_phase,
            best: record.best_phase,
            best_score: format!("{:.2}", record.best_score),
            cur_score: format!("{:.2}", record.current_score),
            gap_best_second: format!("{:.2}", record.gap_best_second),
            gap_best_cur: format!("{:.2}", record.gap_best_current),
            rem: format!("{:.1}", record.remaining),
            served: format!("{:.1}", record.served),
            action: record.action.to_string(),
        }
    }
}

const DECISION_HEADER: [&str; 11] = [
    "time",
    "tls",
    "cur",
    "best",
    "best_score",
    "cur_score",
    "gap_best-second",
    "gap_best-cur",
    "rem",
    "served",
    "action",
];

/// Decision log on disk. The file is truncated on open and every tick is
/// flushed, so an aborted run keeps the rows written so far.
pub struct CsvDecisionLog {
    writer: csv::Writer<File>,
}

impl CsvDecisionLog {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(DECISION_HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }
}

impl DecisionSink for CsvDecisionLog {
    fn record(&mut self, record: &DecisionRecord) -> Result<()> {
        self.writer.serialize(DecisionRow::from(record))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<DecisionRecord>,
    pub closed: bool,
}

impl DecisionSink for MemorySink {
    fn record(&mut self, record: &DecisionRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

struct FanoutEntry {
    sink: Box<dyn DecisionSink>,
    optional: bool,
}

impl FanoutEntry {
    /// Errors of optional sinks are logged and dropped.
    fn settle(&self, what: &str, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if self.optional => {
                log::warn!("Optional decision sink failed to {}: {}", what, e);
                Ok(())
            }
            other => other,
        }
    }
}

/// Sends every record to several sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<FanoutEntry>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose failures end the run.
    pub fn push(&mut self, sink: Box<dyn DecisionSink>) {
        self.sinks.push(FanoutEntry {
            sink,
            optional: false,
        });
    }

    /// A side channel: its failures are logged and the run goes on.
    pub fn push_optional(&mut self, sink: Box<dyn DecisionSink>) {
        self.sinks.push(FanoutEntry {
            sink,
            optional: true,
        });
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DecisionSink for FanoutSink {
    fn record(&mut self, record: &DecisionRecord) -> Result<()> {
        for entry in self.sinks.iter_mut() {
            let result = entry.sink.record(record);
            entry.settle("record", result)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for entry in self.sinks.iter_mut() {
            let result = entry.sink.flush();
            entry.settle("flush", result)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        for entry in self.sinks.iter_mut() {
            let result = entry.sink.close();
            entry.settle("close", result)?;
        }
        Ok(())
    }
}

/// Message published for every actuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightAdjustment {
    pub sim_time: f64,
    pub intersection_id: String,
    pub phase: usize,
    pub action: String,
}

impl LightAdjustment {
    /// `None` for records that did not touch the signal.
    pub fn from_record(record: &DecisionRecord) -> Option<Self> {
        if !record.action.is_actuation() {
            return None;
        }
        Some(Self {
            sim_time: record.time,
            intersection_id: record.tls.clone(),
            phase: match record.action {
                Action::Switch { to } => to,
                _ => record.current_phase,
            },
            action: record.action.to_string(),
        })
    }
}

/// Publishes actuations to the `light_adjustments` queue.
pub struct AmqpDecisionPublisher {
    connection: Option<Connection>,
    channel: Channel,
}

impl AmqpDecisionPublisher {
    pub fn connect(url: &str) -> Result<Self> {
        let mut connection = Connection::insecure_open(url)?;
        let channel = connection.open_channel(None)?;
        channel.queue_declare(QUEUE_LIGHT_ADJUSTMENTS, QueueDeclareOptions::default())?;
        log::info!("Publishing light adjustments to '{}'", QUEUE_LIGHT_ADJUSTMENTS);
        Ok(Self {
            connection: Some(connection),
            channel,
        })
    }
}

impl DecisionSink for AmqpDecisionPublisher {
    /// A lost message is logged; the queue is a side channel.
    fn record(&mut self, record: &DecisionRecord) -> Result<()> {
        let Some(adjustment) = LightAdjustment::from_record(record) else {
            return Ok(());
        };
        let payload = serde_json::to_string(&adjustment)?;
        let exchange = Exchange::direct(&self.channel);
        match exchange.publish(Publish::new(payload.as_bytes(), QUEUE_LIGHT_ADJUSTMENTS)) {
            Ok(()) => log::debug!("Published LightAdjustment: {:?}", adjustment),
            Err(e) => log::warn!(
                "Could not publish {} for {}: {}",
                adjustment.action,
                adjustment.intersection_id,
                e
            ),
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection.close()?;
            log::info!("Closed connection to '{}'", QUEUE_LIGHT_ADJUSTMENTS);
        }
        Ok(())
    }
}

/// Reads a decision log back.
pub fn read_decision_log<P: AsRef<Path>>(path: P) -> Result<Vec<DecisionRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ControlError;
    use std::cell::Cell;
    use std::rc::Rc;

    fn record(action: Action) -> DecisionRecord {
        DecisionRecord {
            time: 12.0,
            tls: "J1".to_string(),
            current_phase: 0,
            best_phase: 2,
            best_score: 10.0,
            current_score: 2.5,
            gap_best_second: 1.234,
            gap_best_current: 7.5,
            remaining: 1.24,
            served: 6.0,
            action,
        }
    }

    #[test]
    fn rows_use_fixed_precision() {
        let row = DecisionRow::from(&record(Action::Switch { to: 2 }));
        assert_eq!(row.time, "12.0");
        assert_eq!(row.best_score, "10.00");
        assert_eq!(row.gap_best_second, "1.23");
        assert_eq!(row.rem, "1.2");
        assert_eq!(row.action, "switch->2");
    }

    #[test]
    fn csv_log_writes_header_and_rows() {
        let path = std::env::temp_dir().join(format!(
            "adaptive_signals_decisions_{}.csv",
            std::process::id()
        ));
        {
            let mut log = CsvDecisionLog::create(&path).unwrap();
            log.record(&record(Action::None)).unwrap();
            log.record(&record(Action::Extend { by: 3.0 })).unwrap();
            log.flush().unwrap();
        }
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(
            "time,tls,cur,best,best_score,cur_score,gap_best-second,gap_best-cur,rem,served,action"
        ));
        let rows = read_decision_log(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].action, "extend+3.0");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn only_actuations_become_adjustments() {
        assert!(LightAdjustment::from_record(&record(Action::None)).is_none());
        assert!(LightAdjustment::from_record(&record(Action::NoPressure)).is_none());
        let adjustment =
            LightAdjustment::from_record(&record(Action::FallbackExtend { by: 3.0 })).unwrap();
        assert_eq!(adjustment.action, "fallback_extend+3.0");
        assert_eq!(adjustment.intersection_id, "J1");
        assert_eq!(adjustment.phase, 0);
        let switched = LightAdjustment::from_record(&record(Action::Switch { to: 2 })).unwrap();
        assert_eq!(switched.phase, 2);
    }

    /// Counts calls into shared cells; fails every call when `broken`.
    struct CountingSink {
        records: Rc<Cell<u32>>,
        closes: Rc<Cell<u32>>,
        broken: bool,
    }

    impl DecisionSink for CountingSink {
        fn record(&mut self, _record: &DecisionRecord) -> Result<()> {
            self.records.set(self.records.get() + 1);
            if self.broken {
                return Err(ControlError::Config("sink unavailable".to_string()));
            }
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.set(self.closes.get() + 1);
            if self.broken {
                return Err(ControlError::Config("sink unavailable".to_string()));
            }
            Ok(())
        }
    }

    fn counting(broken: bool) -> (CountingSink, Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let records = Rc::new(Cell::new(0));
        let closes = Rc::new(Cell::new(0));
        let sink = CountingSink {
            records: Rc::clone(&records),
            closes: Rc::clone(&closes),
            broken,
        };
        (sink, records, closes)
    }

    #[test]
    fn fanout_reaches_and_closes_every_sink() {
        let (first, first_records, first_closes) = counting(false);
        let (second, second_records, second_closes) = counting(false);
        let mut fanout = FanoutSink::new();
        fanout.push(Box::new(first));
        fanout.push(Box::new(second));
        fanout.record(&record(Action::None)).unwrap();
        fanout.flush().unwrap();
        fanout.close().unwrap();
        assert_eq!(fanout.len(), 2);
        assert_eq!((first_records.get(), second_records.get()), (1, 1));
        assert_eq!((first_closes.get(), second_closes.get()), (1, 1));
    }

    #[test]
    fn optional_sink_failures_do_not_propagate() {
        let (side, side_records, side_closes) = counting(true);
        let (log, log_records, _) = counting(false);
        let mut fanout = FanoutSink::new();
        fanout.push_optional(Box::new(side));
        fanout.push(Box::new(log));
        fanout.record(&record(Action::Extend { by: 3.0 })).unwrap();
        fanout.record(&record(Action::None)).unwrap();
        fanout.close().unwrap();
        assert_eq!(side_records.get(), 2);
        assert_eq!(side_closes.get(), 1);
        assert_eq!(log_records.get(), 2);

        let (broken, _, _) = counting(true);
        let mut strict = FanoutSink::new();
        strict.push(Box::new(broken));
        assert!(matches!(
            strict.record(&record(Action::None)),
            Err(ControlError::Config(_))
        ));
    }
}
