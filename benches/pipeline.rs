use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use hemodrop::{Classifier, MonitorEngine, Reading, SessionScheduler, SimulatedSource, SimulationProfile, SubjectId};

fn bench_submit_reading(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(1));

    group.bench_function("submit_reading_with_observer", |b| {
        b.iter_custom(|iters| {
            // Fresh engine per sample so ledger growth does not leak between samples.
            let engine = MonitorEngine::default();
            let stream = engine.subscribe(1 << 16).unwrap();
            let subject = SubjectId::new("bench").unwrap();

            let start = Instant::now();
            for i in 0..iters {
                #[allow(clippy::cast_precision_loss)]
                let loss = (i % 1_500) as f64;
                let reading = Reading::new(subject.clone(), Utc::now(), loss, 8.0).unwrap();
                engine.submit_reading(&subject, reading).unwrap();
                let _ = stream.drain();
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_classifier(c: &mut Criterion) {
    let classifier = Classifier::default();
    let subject = SubjectId::new("bench").unwrap();
    let history: Vec<_> = [100.0, 120.0, 140.0]
        .into_iter()
        .map(|loss| Reading::new(subject.clone(), Utc::now(), loss, 5.0).unwrap())
        .collect();
    let current = Reading::new(subject, Utc::now(), 400.0, 5.0).unwrap();

    c.bench_function("classifier/evaluate_with_escalation", |b| {
        b.iter(|| classifier.evaluate(&current, &history));
    });
}

fn bench_sampling_cycle(c: &mut Criterion) {
    c.bench_function("scheduler/cycle_32_sessions", |b| {
        b.iter_custom(|iters| {
            let engine = Arc::new(MonitorEngine::default());
            for n in 0..32 {
                engine.start_session(&SubjectId::new(format!("bed-{n}")).unwrap()).unwrap();
            }
            let source = Arc::new(SimulatedSource::seeded(SimulationProfile::default(), 11));
            let scheduler = SessionScheduler::new(Arc::clone(&engine), source).unwrap();

            let start = Instant::now();
            for _ in 0..iters {
                scheduler.run_cycle().unwrap();
            }
            start.elapsed()
        });
    });
}

criterion_group!(benches, bench_submit_reading, bench_classifier, bench_sampling_cycle);
criterion_main!(benches);
