// benches/bench_phase_pressure.rs
use adaptive_signals::config::ControllerConfig;
use adaptive_signals::control_system::pressure::{score_phases, PressureWeights};
use adaptive_signals::control_system::topology::IntersectionTopology;
use adaptive_signals::simulation_engine::interface::{LinkEntry, SignalPhase, SignalProgram};
use adaptive_signals::simulation_engine::scripted::ScriptedEngine;
use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, Criterion, PlotConfiguration,
};
use std::time::Duration;

// Four phases over `num_links` positions: each green phase serves half of them.
fn build_intersection(num_links: usize) -> (ScriptedEngine, IntersectionTopology) {
    let links: Vec<_> = (0..num_links)
        .map(|i| {
            vec![LinkEntry::new(
                &format!("in{}", i),
                &format!(":J_{}", i),
                &format!("out{}", i),
            )]
        })
        .collect();
    let half = num_links / 2;
    let first: String = (0..num_links).map(|i| if i < half { 'G' } else { 'r' }).collect();
    let second: String = (0..num_links).map(|i| if i < half { 'r' } else { 'G' }).collect();
    let amber = "y".repeat(num_links);
    let program = SignalProgram {
        program_id: "0".to_string(),
        phases: vec![
            SignalPhase::new(&first, 30.0),
            SignalPhase::new(&amber, 4.0),
            SignalPhase::new(&second, 20.0),
            SignalPhase::new(&amber, 4.0),
        ],
    };

    let mut engine = ScriptedEngine::new();
    for i in 0..num_links {
        engine.set_lane(&format!("in{}", i), i % 7, (i % 5) as f64 * 3.0);
        engine.set_lane(&format!("out{}", i), i % 3, 0.0);
    }
    let topology = IntersectionTopology::build("J", &links, &program);
    (engine, topology)
}

fn bench_phase_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("phase_pressure");

    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &size in [8, 32, 128].iter() {
        for (label, beta_out) in [("inbound", 0.0), ("with_outbound", 0.5)] {
            let weights = PressureWeights {
                beta_out,
                ..PressureWeights::from(&ControllerConfig::default())
            };
            group.bench_function(format!("{}_links_{}", label, size), |b| {
                let (mut engine, topology) = build_intersection(size);
                b.iter(|| {
                    let scores = score_phases(&mut engine, &topology, weights);
                    black_box(scores);
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_phase_pressure);
criterion_main!(benches);
