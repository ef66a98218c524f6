pub mod kpi;
pub mod kpi_chart;

pub use kpi::{analyze_outputs, write_kpi_table, ScenarioKpis};
pub use kpi_chart::draw_kpi_chart;
