//! Scheduler dispatch overhead and edge-iteration throughput.
//!
//! Run with: `cargo bench --bench scheduler`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use lattice_rs::link::{DenseLink, LinkEnd, LinkShape};
use lattice_rs::scheduler::{ComponentId, JobSpec, OpTypeId, Scheduler, SchedulerConfig};

fn bench_edge_sum(c: &mut Criterion) {
    let mut link = DenseLink::new();
    link.set_dimensions(&[512], &[512]);
    let link = Arc::new(link);
    let edges = link.max_progress(LinkEnd::One);

    let mut group = c.benchmark_group("dense_edge_sum");
    group.throughput(Throughput::Elements(edges));

    for workers in [0usize, 2, 4] {
        group.bench_with_input(
            BenchmarkId::from_parameter(workers),
            &workers,
            |b, &workers| {
                let sched = Scheduler::new(SchedulerConfig {
                    workers,
                    deterministic: true,
                    ..SchedulerConfig::default()
                });
                let sink = Arc::new(AtomicU64::new(0));
                b.iter(|| {
                    let iter_link = Arc::clone(&link);
                    let next_link = Arc::clone(&link);
                    let sink = Arc::clone(&sink);
                    let number = sched.process_op(
                        JobSpec::new("dense-512", "sum", OpTypeId(1), ComponentId(1), edges),
                        0u64,
                        move |k, start, end| {
                            iter_link.for_each_edge(
                                LinkEnd::One,
                                |e| *k += (e.near_node ^ e.far_node) as u64,
                                start,
                                end,
                            );
                            sink.fetch_add(*k, Ordering::Relaxed);
                        },
                        move |requested| next_link.next_progress_point(LinkEnd::One, requested),
                        None,
                    );
                    sched.finish_batch(number);
                });
            },
        );
    }
    group.finish();
}

fn bench_submission_only(c: &mut Criterion) {
    c.bench_function("submit_and_finish_empty_job", |b| {
        let sched = Scheduler::with_workers(2);
        b.iter(|| {
            let number = sched.process_op(
                JobSpec::new("noop", "noop", OpTypeId(2), ComponentId(2), 64),
                (),
                |_k, _s, _e| {},
                |p| p,
                None,
            );
            sched.finish_batch(number);
        });
    });
}

criterion_group!(benches, bench_edge_sum, bench_submission_only);
criterion_main!(benches);
