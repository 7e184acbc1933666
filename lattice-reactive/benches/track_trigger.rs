//! Track/trigger benchmarks
//!
//! Measures the hot paths: notifying many effects from one write, rebuilding
//! a wide dependency list, and flushing a full job queue.

use std::cell::Cell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lattice_reactive::{EffectOptions, Job, Runtime, Target};

fn fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for subscribers in [10usize, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let rt = Runtime::new();
                let source = rt.ref_value(0);
                let runs = Rc::new(Cell::new(0usize));
                let effects: Vec<_> = (0..subscribers)
                    .map(|_| {
                        let (s, r) = (source.clone(), runs.clone());
                        rt.effect(
                            move || {
                                s.get();
                                r.set(r.get() + 1);
                            },
                            EffectOptions::default(),
                        )
                    })
                    .collect();

                let mut next = 0i64;
                b.iter(|| {
                    next += 1;
                    source.set(black_box(next));
                });
                black_box(effects.len());
            },
        );
    }
    group.finish();
}

fn wide_record_reads(c: &mut Criterion) {
    let rt = Runtime::new();
    let target = Target::record_from((0..256).map(|i| (format!("k{i}"), i)));
    let view = rt.reactive(target);
    let view = view.as_reactive().cloned().expect("record view");
    let keys: Vec<String> = (0..256).map(|i| format!("k{i}")).collect();

    let v = view.clone();
    let effect = rt.effect(
        move || {
            for key in &keys {
                black_box(v.get(key.as_str()));
            }
        },
        EffectOptions {
            lazy: true,
            ..Default::default()
        },
    );

    c.bench_function("rerun_256_deps", |b| b.iter(|| effect.run()));
}

fn flush_queue(c: &mut Criterion) {
    let rt = Runtime::new();
    let jobs: Vec<Job> = (0..500u64).rev().map(|id| Job::with_id(id, || {})).collect();

    c.bench_function("flush_500_jobs", |b| {
        b.iter(|| {
            for job in &jobs {
                rt.queue_job(job);
            }
            rt.flush_jobs();
        })
    });
}

criterion_group!(benches, fan_out, wide_record_reads, flush_queue);
criterion_main!(benches);
