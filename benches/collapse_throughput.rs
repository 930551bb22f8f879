//! Benchmarks for request collapsing overhead
//!
//! This benchmark measures:
//! - Window append cost (no runtime involved)
//! - Positional demultiplexing of a batch result
//! - Full submit → seal → execute → resolve cycle for size-triggered windows

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use request_collapser::batch::{batch_fn, RequestWindow, ResponseDemultiplexer, SealTrigger};
use request_collapser::{CollapserConfig, RequestCollapser};

fn bench_window_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_append");

    for size in [8usize, 64, 512] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut window: RequestWindow<u64, u64> = RequestWindow::new(
                    1,
                    Arc::from("bench"),
                    std::time::Duration::from_millis(10),
                    Some(size),
                );
                let handles: Vec<_> = (0..size as u64).map(|i| window.append(black_box(i)).0).collect();
                black_box((window.seal(SealTrigger::Size), handles))
            })
        });
    }

    group.finish();
}

fn bench_demux(c: &mut Criterion) {
    let mut group = c.benchmark_group("demux");

    for size in [8usize, 64, 512] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut window: RequestWindow<u64, u64> = RequestWindow::new(
                    1,
                    Arc::from("bench"),
                    std::time::Duration::from_millis(10),
                    None,
                );
                let handles: Vec<_> = (0..size as u64).map(|i| window.append(i).0).collect();
                let (args, resolvers) = window.seal(SealTrigger::Flush).into_parts();
                let responses = args.into_iter().map(Some).collect();
                black_box(ResponseDemultiplexer::new().demux(resolvers, responses));
                handles
            })
        });
    }

    group.finish();
}

fn bench_collapse_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("collapse_cycle");

    for size in [8usize, 64] {
        let collapser = rt.block_on(async {
            RequestCollapser::new(
                CollapserConfig::new("bench")
                    .with_window_duration_ms(1_000)
                    .with_max_batch_size(size),
                Arc::new(batch_fn(|args: Vec<u64>| async move {
                    Ok(args.into_iter().map(Some).collect::<Vec<_>>())
                })),
            )
            .unwrap()
        });

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| {
                let collapser = collapser.clone();
                async move {
                    let handles: Vec<_> = (0..size as u64)
                        .map(|i| collapser.submit(i).unwrap())
                        .collect();
                    for h in handles {
                        black_box(h.await.unwrap());
                    }
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_window_append, bench_demux, bench_collapse_cycle);
criterion_main!(benches);
