// kpi_chart.rs
use crate::errors::{ControlError, Result};
use crate::flow_analyzer::kpi::ScenarioKpis;
use plotters::prelude::*;
use std::path::Path;

type Metric = (&'static str, fn(&ScenarioKpis) -> Option<f64>);

fn travel_time(k: &ScenarioKpis) -> Option<f64> {
    k.mean_travel_time
}

fn time_loss(k: &ScenarioKpis) -> Option<f64> {
    k.mean_time_loss
}

fn waiting_time(k: &ScenarioKpis) -> Option<f64> {
    k.mean_waiting_time
}

const METRICS: [Metric; 3] = [
    ("mean travel time (s)", travel_time),
    ("mean time loss (s)", time_loss),
    ("mean waiting time (s)", waiting_time),
];

const BAR_COLORS: [RGBColor; 3] = [
    RGBColor(31, 119, 180),
    RGBColor(214, 39, 40),
    RGBColor(44, 160, 44),
];

fn chart_error<E: std::fmt::Display>(error: E) -> ControlError {
    ControlError::Chart(error.to_string())
}

/// One panel per metric, one bar per scene.
pub fn draw_kpi_chart<P: AsRef<Path>>(path: P, kpis: &[ScenarioKpis]) -> Result<()> {
    let top = kpis
        .iter()
        .flat_map(|k| METRICS.iter().filter_map(move |(_, get)| get(k)))
        .fold(0.0, f64::max);
    if kpis.is_empty() || top <= 0.0 {
        return Err(ControlError::Chart("no KPI values to plot".to_string()));
    }
    let scenes: Vec<String> = kpis.iter().map(|k| k.scene.clone()).collect();

    let root = BitMapBackend::new(path.as_ref(), (1200, 450)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error)?;
    let panels = root.split_evenly((1, METRICS.len()));

    for (index, (panel, (name, get))) in panels.iter().zip(METRICS.iter()).enumerate() {
        let mut chart = ChartBuilder::on(panel)
            .caption(*name, ("sans-serif", 18))
            .margin(15)
            .x_label_area_size(30)
            .y_label_area_size(45)
            .build_cartesian_2d((0u32..scenes.len() as u32).into_segmented(), 0f64..top * 1.15)
            .map_err(chart_error)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_label_formatter(&|value| match value {
                SegmentValue::CenterOf(i) => scenes.get(*i as usize).cloned().unwrap_or_default(),
                _ => String::new(),
            })
            .draw()
            .map_err(chart_error)?;

        chart
            .draw_series(
                Histogram::vertical(&chart)
                    .style(BAR_COLORS[index % BAR_COLORS.len()].filled())
                    .margin(20)
                    .data(
                        kpis.iter()
                            .enumerate()
                            .filter_map(|(i, k)| get(k).map(|v| (i as u32, v))),
                    ),
            )
            .map_err(chart_error)?;
    }

    root.present().map_err(chart_error)?;
    log::info!("KPI chart saved to {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_to_plot_is_an_error() {
        let empty = ScenarioKpis {
            scene: "baseline".to_string(),
            trips: 0,
            mean_travel_time: None,
            median_travel_time: None,
            p90_travel_time: None,
            mean_time_loss: None,
            mean_waiting_time: None,
            avg_queue: None,
            avg_detector_speed: None,
        };
        let path = std::env::temp_dir().join("adaptive_signals_empty_chart.png");
        assert!(matches!(
            draw_kpi_chart(&path, &[empty]),
            Err(ControlError::Chart(_))
        ));
        assert!(draw_kpi_chart(&path, &[]).is_err());
        assert!(!path.exists());
    }
}
