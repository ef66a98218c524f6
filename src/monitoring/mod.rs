// monitoring/mod.rs
pub mod decision_log;
