// benches/bench_controller_tick.rs
use adaptive_signals::config::{Cadence, ControllerConfig};
use adaptive_signals::control_system::TrafficLightController;
use adaptive_signals::simulation_engine::interface::{
    LinkEntry, SignalPhase, SignalProgram, SimulationEngine,
};
use adaptive_signals::simulation_engine::scripted::ScriptedEngine;
use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, Criterion, PlotConfiguration,
};
use std::time::Duration;

// A row of `num_junctions` four-link junctions sharing the corridor program.
fn build_network(num_junctions: usize) -> ScriptedEngine {
    let program = SignalProgram {
        program_id: "0".to_string(),
        phases: vec![
            SignalPhase::new("GGrr", 31.0),
            SignalPhase::new("yyrr", 4.0),
            SignalPhase::new("rrGG", 20.0),
            SignalPhase::new("rryy", 4.0),
        ],
    };
    let mut engine = ScriptedEngine::new();
    for j in 0..num_junctions {
        let main_in = format!("main{}_0", j);
        let main_out = format!("main{}_0", j + 1);
        let side_in = format!("side{}_in_0", j);
        let side_out = format!("side{}_out_0", j);
        let links = vec![
            vec![LinkEntry::new(&main_in, &format!(":J{}_0", j), &main_out)],
            vec![LinkEntry::new(&main_in, &format!(":J{}_1", j), &side_out)],
            vec![LinkEntry::new(&side_in, &format!(":J{}_2", j), &main_out)],
            vec![LinkEntry::new(&side_in, &format!(":J{}_3", j), &side_out)],
        ];
        engine.add_signal(&format!("J{}", j), links, program.clone());
        engine.set_lane(&main_in, 4 + j % 5, 12.0);
        engine.set_lane(&side_in, 2 + j % 9, 30.0);
    }
    engine.run_for(usize::MAX);
    engine
}

fn bench_controller_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("controller_tick");

    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    let config = ControllerConfig {
        cadence: Cadence::SimTime,
        ..ControllerConfig::default()
    };

    for &size in [3, 30, 300].iter() {
        group.bench_function(format!("junctions_{}", size), |b| {
            let mut engine = build_network(size);
            let mut controller = match TrafficLightController::initialize(&mut engine, config.clone()) {
                Ok(controller) => controller,
                Err(e) => panic!("could not initialize controller: {}", e),
            };
            b.iter(|| {
                engine.step().ok();
                let now = engine.time().unwrap_or(0.0);
                let records = controller.update_all(&mut engine, now);
                black_box(records);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_controller_tick);
criterion_main!(benches);
