// Cost of one full control tick (tilt read → PID → drive → proximity →
// gripper → telemetry) against the simulated peripheral set, without the
// cadence sleep. Bounds the work part of the 20 ms period.

use criterion::{Criterion, criterion_group, criterion_main};
use std::{
    hint::black_box,
    sync::{Arc, Mutex},
};

use balance_bot::{
    advanced::sim::{Plant, simulated_peripherals},
    config::ControlConfig,
    scheduler::ControlLoop,
    utils::metrics::{TickRecorder, shared_metrics},
};

fn control_tick_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_tick");

    for telemetry in [false, true] {
        let config = ControlConfig {
            settle_ms: 0,
            telemetry,
            ..ControlConfig::default()
        };
        let plant = Arc::new(Mutex::new(Plant::leaning(1.0)));
        let peripherals = simulated_peripherals(&config, plant).expect("simulated peripherals");
        let mut control = ControlLoop::new(config, peripherals, shared_metrics(), TickRecorder::with_capacity(1));
        control.initialize().expect("initialize");

        let name = if telemetry { "with_telemetry" } else { "control_only" };
        group.bench_function(name, |b| {
            b.iter(|| black_box(control.tick(black_box(0.02)).expect("tick")))
        });

        control.shutdown();
    }

    group.finish();
}

criterion_group!(benches, control_tick_bench);
criterion_main!(benches);
