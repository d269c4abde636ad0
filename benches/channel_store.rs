//! Criterion benchmarks for the per-line hot path.
//!
//! Every accepted device line is parsed, appended to the channel store and
//! followed by a window trim, all while holding the store's write lock.
//!
//! Key metrics:
//! - Parse cost per line for common board sizes
//! - Append + trim cost at steady state (store full, window sliding)
//! - Snapshot latency for readers
//!
//! Run with: cargo bench --bench channel_store

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use thermo_daq::protocol::{parse_line, parse_line_into, record_arity};
use thermo_daq::store::ChannelStore;

fn device_line(sensor_count: usize) -> String {
    (0..sensor_count)
        .map(|i| format!("{:.2},{:.2}", 150.0 + i as f64, 25.0 + i as f64 / 10.0))
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_line");

    for sensors in [1usize, 8, 32] {
        let line = device_line(sensors);
        group.throughput(Throughput::Bytes(line.len() as u64));

        group.bench_with_input(BenchmarkId::new("alloc", sensors), &line, |b, line| {
            b.iter(|| parse_line(black_box(line), sensors).unwrap());
        });

        let mut scratch = Vec::with_capacity(record_arity(sensors));
        group.bench_with_input(BenchmarkId::new("reuse", sensors), &line, |b, line| {
            b.iter(|| parse_line_into(black_box(line), sensors, &mut scratch).unwrap());
        });
    }

    group.bench_function("reject_arity", |b| {
        let line = device_line(7);
        b.iter(|| parse_line(black_box(&line), 8).is_err());
    });

    group.finish();
}

/// Steady state: capacity reached and the window trims one record per append.
fn append_and_trim(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_append");
    group.throughput(Throughput::Elements(1));

    for capacity in [600usize, 20_000] {
        let mut store = ChannelStore::new(8, capacity);
        let values = vec![21.5; record_arity(8)];
        let mut t = 0.0;
        for _ in 0..capacity {
            store.append(t, &values).unwrap();
            t += 0.1;
        }

        group.bench_function(BenchmarkId::new("append_trim", capacity), |b| {
            b.iter(|| {
                store.append(black_box(t), &values).unwrap();
                store.trim(60.0);
                t += 0.1;
            });
        });
    }

    group.finish();
}

fn snapshot_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_snapshot");

    for records in [600usize, 20_000] {
        let mut store = ChannelStore::new(8, records);
        let values = vec![21.5; record_arity(8)];
        for i in 0..records {
            store.append(i as f64 * 0.1, &values).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("snapshot", records), &store, |b, store| {
            b.iter(|| black_box(store.snapshot()));
        });
    }

    group.finish();
}

criterion_group!(benches, parse_throughput, append_and_trim, snapshot_latency);
criterion_main!(benches);
