use thiserror::Error;

/// Failures reported by a simulation engine.
///
/// Lane and signal lookups fail transiently (a vehicle left, a lane was
/// removed); `Fatal` and `Closed` mean the run cannot continue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown lane: {0}")]
    UnknownLane(String),
    #[error("Unknown traffic light: {0}")]
    UnknownSignal(String),
    #[error("Query failed: {0}")]
    Query(String),
    #[error("Simulation failure: {0}")]
    Fatal(String),
    #[error("Simulation already closed")]
    Closed,
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_) | EngineError::Closed)
    }
}

/// Main error type for the control crate
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Message bus error: {0}")]
    MessageBus(#[from] amiquip::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Invalid demand: {0}")]
    Demand(String),
    #[error("Invalid network: {0}")]
    Network(String),
    #[error("Chart error: {0}")]
    Chart(String),
    #[error("Scenario '{scenario}' failed: {reason}")]
    Scenario { scenario: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ControlError>;
