/*
Measures the capture critical section (snapshot + interlock + seal under one lock) when several
threads fire captures into the same CaptureLoop, and the cost of the edge handler itself
(which must stay non-blocking while a capture is in flight).
*/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use tp_acquisition::{
    RigConfig,
    acquisition::{
        capture::CaptureLoop,
        sensor::{ScriptedGateway, configure_all},
        trigger::trigger_gate,
    },
    safety::interlock::{Interlock, SimulatedOutputs},
    utils::metrics::CaptureMetrics,
};
use std::{
    hint::black_box,
    sync::{Arc, atomic::AtomicBool},
    thread,
};

//Threads firing captures into one shared loop
const THREAD_COUNTS: &[usize] = &[2, 4, 8, 16];

//Captures per thread per iteration
const CAPTURES_PER_THREAD: usize = 200;

fn capture_loop() -> Arc<CaptureLoop> {
    let config = RigConfig::default();
    let gateway = ScriptedGateway::new();
    configure_all(
        &gateway,
        &config.temperature_channels,
        &config.pressure_channels,
        config.thermocouple_type,
    )
    .expect("scripted channels configure");
    let metrics = Arc::new(CaptureMetrics::new());
    let interlock = Arc::new(Interlock::new(
        config.pressure_threshold,
        Arc::new(SimulatedOutputs::new()),
    ));
    Arc::new(CaptureLoop::new(
        &config,
        Arc::new(gateway),
        interlock,
        metrics,
    ))
}

fn bench_capture_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture_contention");

    for &threads in THREAD_COUNTS {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let capture = capture_loop();

            b.iter(|| {
                let mut handles = Vec::with_capacity(threads);
                for _ in 0..threads {
                    let c = Arc::clone(&capture);
                    handles.push(thread::spawn(move || {
                        for _ in 0..CAPTURES_PER_THREAD {
                            let index = c.capture().expect("capture on configured channels");
                            black_box(index);
                        }
                    }));
                }
                for h in handles {
                    h.join().expect("capture thread panicked");
                }
                //keep the log from growing across iterations
                black_box(capture.take_session());
            });
        });
    }
    group.finish();
}

fn bench_edge_handler(c: &mut Criterion) {
    let metrics = Arc::new(CaptureMetrics::new());
    let (handler, rx) = trigger_gate(Arc::new(AtomicBool::new(true)), metrics);

    //queue is kept full, so every call takes the drop-and-count path
    handler();
    c.bench_function("edge_handler_overrun", |b| b.iter(|| handler()));
    drop(rx);
}

criterion_group!(benches, bench_capture_contention, bench_edge_handler);
criterion_main!(benches);
